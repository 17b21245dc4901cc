//! Superblock structure and serialization.
//!
//! The superblock occupies page 0 and records the tree geometry and the
//! current root so a file-backed tree can be reopened.

#![allow(clippy::cast_possible_truncation)]

use crate::storage::page::{Page, PageError, PageHeader, PageId, PageType};

/// Magic number identifying a pagetree file: "PGTREE01"
pub const MAGIC: [u8; 8] = *b"PGTREE01";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// The page id the superblock lives on.
pub const SUPERBLOCK_PAGE: PageId = 0;

/// Superblock field offsets (after the page header).
mod offsets {
    use super::PageHeader;

    pub const MAGIC: usize = PageHeader::SIZE;
    pub const FORMAT_VERSION: usize = MAGIC + 8;
    pub const PAGE_SIZE: usize = FORMAT_VERSION + 4;
    pub const PAGE_COUNT: usize = PAGE_SIZE + 4;
    pub const ORDER: usize = PAGE_COUNT + 8;
    pub const ROOT: usize = ORDER + 4;
    pub const END: usize = ROOT + 8;
}

/// Bytes a page must have to hold the superblock.
pub const SUPERBLOCK_SIZE: usize = offsets::END;

/// Tree metadata stored on page 0.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Format version number.
    pub format_version: u32,
    /// Page size in bytes.
    pub page_size: u32,
    /// Total number of pages in the store.
    pub page_count: u64,
    /// Tree order (maximum children / records per node).
    pub order: u32,
    /// Page of the current root node.
    pub root: PageId,
}

impl Superblock {
    /// Create a superblock for a fresh tree.
    #[must_use]
    pub const fn new(page_size: usize, page_count: u64, order: usize, root: PageId) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            page_size: page_size as u32,
            page_count,
            order: order as u32,
            root,
        }
    }

    /// Serialize the superblock to a sealed page of `page_size` bytes.
    #[must_use]
    pub fn to_page(&self, page_size: usize) -> Page {
        let mut page = Page::new(page_size);

        let header = PageHeader {
            page_type: PageType::Superblock,
            flags: 0,
            checksum: 0,
        };
        page.write_bytes(0, &header.to_bytes());
        page.write_bytes(offsets::MAGIC, &MAGIC);
        page.write_u32(offsets::FORMAT_VERSION, self.format_version);
        page.write_u32(offsets::PAGE_SIZE, self.page_size);
        page.write_u64(offsets::PAGE_COUNT, self.page_count);
        page.write_u32(offsets::ORDER, self.order);
        page.write_u64(offsets::ROOT, self.root);
        page.seal();

        page
    }

    /// Deserialize a superblock from a page.
    pub fn from_page(page: &Page) -> Result<Self, SuperblockError> {
        if page.size() < SUPERBLOCK_SIZE {
            return Err(SuperblockError::InvalidPageSize(page.size() as u32));
        }

        // Validate magic number before anything else, a zeroed page is "not a tree"
        let mut magic = [0u8; 8];
        magic.copy_from_slice(page.read_bytes(offsets::MAGIC, 8));
        if magic != MAGIC {
            return Err(SuperblockError::InvalidMagic(magic));
        }

        page.verify_checksum().map_err(SuperblockError::Page)?;
        let header = PageHeader::from_page(page).map_err(SuperblockError::Page)?;
        if header.page_type != PageType::Superblock {
            return Err(SuperblockError::Page(PageError::InvalidPageType(
                header.page_type as u8,
            )));
        }

        let format_version = page.read_u32(offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(SuperblockError::UnsupportedVersion(format_version));
        }

        let page_size = page.read_u32(offsets::PAGE_SIZE);
        if page_size as usize != page.size() {
            return Err(SuperblockError::InvalidPageSize(page_size));
        }

        Ok(Self {
            format_version,
            page_size,
            page_count: page.read_u64(offsets::PAGE_COUNT),
            order: page.read_u32(offsets::ORDER),
            root: page.read_u64(offsets::ROOT),
        })
    }
}

/// Errors related to superblock parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuperblockError {
    /// Magic number doesn't match.
    InvalidMagic([u8; 8]),
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// Page size doesn't match the pager.
    InvalidPageSize(u32),
    /// Stored order doesn't match the configured order.
    OrderMismatch { stored: u32, configured: u32 },
    /// Page header or checksum problem.
    Page(PageError),
}

impl std::fmt::Display for SuperblockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(m) => write!(f, "invalid magic number: {m:?}"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::InvalidPageSize(s) => write!(f, "invalid page size: {s}"),
            Self::OrderMismatch { stored, configured } => write!(
                f,
                "tree order mismatch: file has {stored}, configured {configured}"
            ),
            Self::Page(e) => write!(f, "superblock page: {e}"),
        }
    }
}

impl std::error::Error for SuperblockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Page(e) => Some(e),
            _ => None,
        }
    }
}
