//! Tree and command-line configuration.
//!
//! Configuration is plain data with defaults; the binary reads overrides from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `PAGETREE_ORDER`: maximum children / records per node (default: `9`)
//! - `PAGETREE_PAGE_SIZE`: bytes per page (default: `1024`)
//! - `PAGETREE_PAGE_COUNT`: pages in the store, superblock included (default: `256`)
//! - `PAGETREE_MAX_VALUE_LEN`: longest accepted value in bytes (default: derived
//!   so a full leaf always fits in a page)
//! - `PAGETREE_DB_PATH`: database file used by the binary (default: `./pagetree.db`)
//!
//! # Invariants
//!
//! A validated `TreeConfig` guarantees a full node of either kind, with every
//! value at `max_value_len`, serializes into a single page.

use std::path::PathBuf;

use crate::btree::{DATA_OFFSET, LEAF_ENTRY_OVERHEAD, internal_node_size, leaf_node_size};
use crate::storage::{DEFAULT_PAGE_SIZE, SUPERBLOCK_SIZE};

/// Geometry of a tree and its page store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    /// Maximum children per internal node and records per leaf.
    pub order: usize,
    /// Bytes per page.
    pub page_size: usize,
    /// Number of pages, including the superblock page.
    pub page_count: u64,
    /// Longest value, in bytes, the tree accepts.
    pub max_value_len: usize,
}

impl TreeConfig {
    pub const DEFAULT_ORDER: usize = 9;
    pub const DEFAULT_PAGE_COUNT: u64 = 256;

    /// Configuration with the given geometry and the largest value length
    /// that still lets a full leaf fit in a page.
    #[must_use]
    pub const fn new(order: usize, page_size: usize, page_count: u64) -> Self {
        Self {
            order,
            page_size,
            page_count,
            max_value_len: Self::derived_max_value_len(order, page_size),
        }
    }

    /// Largest value length for which `order` records fit in one page.
    #[must_use]
    pub const fn derived_max_value_len(order: usize, page_size: usize) -> usize {
        if order == 0 || page_size <= DATA_OFFSET {
            return 0;
        }
        ((page_size - DATA_OFFSET) / order).saturating_sub(LEAF_ENTRY_OVERHEAD)
    }

    /// Check the geometry is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the order is below 3, the store has no room for a
    /// node, or a full node cannot fit in a page.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.order < 3 {
            return Err(invalid("order", format!("{} is below the minimum of 3", self.order)));
        }
        if self.page_count < 2 {
            return Err(invalid(
                "page_count",
                format!("{} leaves no page for the root", self.page_count),
            ));
        }
        if self.page_size < SUPERBLOCK_SIZE {
            return Err(invalid(
                "page_size",
                format!(
                    "{} bytes cannot hold the {SUPERBLOCK_SIZE}-byte superblock",
                    self.page_size
                ),
            ));
        }
        if self.max_value_len > usize::from(u16::MAX) {
            return Err(invalid(
                "max_value_len",
                format!("{} exceeds {}", self.max_value_len, u16::MAX),
            ));
        }

        let internal = internal_node_size(self.order);
        if internal > self.page_size {
            return Err(invalid(
                "order",
                format!(
                    "a full internal node needs {internal} bytes, pages hold {}",
                    self.page_size
                ),
            ));
        }
        let leaf = leaf_node_size(self.order, self.max_value_len);
        if leaf > self.page_size {
            return Err(invalid(
                "max_value_len",
                format!(
                    "a full leaf of {}-byte values needs {leaf} bytes, pages hold {}",
                    self.max_value_len, self.page_size
                ),
            ));
        }

        Ok(())
    }

    /// Load configuration from `PAGETREE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but not a valid number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but not a valid number.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let order = parse_var(&lookup, "PAGETREE_ORDER")?.unwrap_or(Self::DEFAULT_ORDER);
        let page_size = parse_var(&lookup, "PAGETREE_PAGE_SIZE")?.unwrap_or(DEFAULT_PAGE_SIZE);
        let page_count =
            parse_var(&lookup, "PAGETREE_PAGE_COUNT")?.unwrap_or(Self::DEFAULT_PAGE_COUNT);

        let mut config = Self::new(order, page_size, page_count);
        if let Some(max_value_len) = parse_var(&lookup, "PAGETREE_MAX_VALUE_LEN")? {
            config.max_value_len = max_value_len;
        }
        Ok(config)
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ORDER, DEFAULT_PAGE_SIZE, Self::DEFAULT_PAGE_COUNT)
    }
}

/// Configuration for the `pagetree` binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    /// Database file to open or create.
    pub db_path: PathBuf,
    /// Geometry used when the file is created.
    pub tree: TreeConfig,
}

impl CliConfig {
    /// Default database file.
    pub const DEFAULT_DB_PATH: &'static str = "./pagetree.db";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable is malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let db_path = lookup("PAGETREE_DB_PATH")
            .filter(|path| !path.is_empty())
            .map_or_else(|| PathBuf::from(Self::DEFAULT_DB_PATH), PathBuf::from);
        let tree = TreeConfig::from_lookup(lookup)?;
        Ok(Self { db_path, tree })
    }
}

/// Error returned when configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

fn invalid(name: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message,
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(name, format!("'{value}' is not a valid number"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = TreeConfig::default();
        assert_eq!(config.order, 9);
        assert_eq!(config.page_size, 1024);
        assert_eq!(config.page_count, 256);
        assert_eq!(config.max_value_len, 101);
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn test_derived_value_len_fills_page() {
        for (order, page_size) in [(3, 128), (4, 256), (9, 1024), (32, 4096)] {
            let config = TreeConfig::new(order, page_size, 16);
            assert!(leaf_node_size(order, config.max_value_len) <= page_size);
            assert!(leaf_node_size(order, config.max_value_len + 1) > page_size);
        }
    }

    #[test]
    fn test_validate_rejects_small_order() {
        let config = TreeConfig::new(2, 1024, 16);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref name, .. }) if name == "order"
        ));
    }

    #[test]
    fn test_validate_rejects_oversized_values() {
        let mut config = TreeConfig::default();
        config.max_value_len = 500;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref name, .. }) if name == "max_value_len"
        ));
    }

    #[test]
    fn test_validate_rejects_order_too_large_for_page() {
        let config = TreeConfig::new(200, 1024, 16);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_single_page() {
        let config = TreeConfig::new(9, 1024, 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = CliConfig::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config.db_path, PathBuf::from("./pagetree.db"));
        assert_eq!(config.tree, TreeConfig::default());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = CliConfig::from_lookup(lookup(&[
            ("PAGETREE_DB_PATH", "/tmp/x.db"),
            ("PAGETREE_ORDER", "5"),
            ("PAGETREE_PAGE_SIZE", "512"),
            ("PAGETREE_PAGE_COUNT", "64"),
        ]))
        .expect("config");

        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.tree.order, 5);
        assert_eq!(config.tree.page_size, 512);
        assert_eq!(config.tree.page_count, 64);
        assert_eq!(
            config.tree.max_value_len,
            TreeConfig::derived_max_value_len(5, 512)
        );
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = TreeConfig::from_lookup(lookup(&[("PAGETREE_ORDER", "nine")]))
            .expect_err("should fail");
        assert_eq!(
            err.to_string(),
            "invalid value for PAGETREE_ORDER: 'nine' is not a valid number"
        );
    }
}
