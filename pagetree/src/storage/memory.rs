//! In-memory page store for testing.
//!
//! Pages live in memory and reads/writes can fail on demand:
//! - seeded random read/write/sync errors
//! - bit-flip corruption on read
//! - "fail the next N-th write" for hitting one exact step of an operation

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::io::{Pager, PagerError};
use crate::storage::page::{Page, PageId};

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a write error (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability of a sync error (0.0 - 1.0).
    pub sync_error_rate: f64,
    /// Probability of page corruption on read (0.0 - 1.0).
    pub corruption_rate: f64,
}

impl FaultConfig {
    /// Create a fault config with no faults.
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }
}

/// Statistics about page store operations.
#[derive(Debug, Default, Clone)]
pub struct MemoryPagerStats {
    /// Number of page reads.
    pub reads: u64,
    /// Number of page writes.
    pub writes: u64,
    /// Number of syncs.
    pub syncs: u64,
    /// Number of injected read errors.
    pub injected_read_errors: u64,
    /// Number of injected write errors.
    pub injected_write_errors: u64,
    /// Number of corrupted pages returned.
    pub corrupted_reads: u64,
}

/// In-memory fixed-capacity page store.
///
/// Not thread-safe; the tree is single-threaded.
pub struct MemoryPager {
    pages: HashMap<PageId, Page>,
    page_size: usize,
    page_count: u64,
    fault_config: FaultConfig,
    rng: StdRng,
    /// Fail the write after this many further successful writes.
    fail_write_after: Option<u64>,
    stats: MemoryPagerStats,
}

impl MemoryPager {
    /// Create a fault-free in-memory pager.
    #[must_use]
    pub fn new(page_size: usize, page_count: u64) -> Self {
        Self::with_faults(page_size, page_count, 0, FaultConfig::no_faults())
    }

    /// Create an in-memory pager with seeded fault injection.
    ///
    /// The same seed produces the same sequence of faults.
    #[must_use]
    pub fn with_faults(
        page_size: usize,
        page_count: u64,
        seed: u64,
        fault_config: FaultConfig,
    ) -> Self {
        Self {
            pages: HashMap::new(),
            page_size,
            page_count,
            fault_config,
            rng: StdRng::seed_from_u64(seed),
            fail_write_after: None,
            stats: MemoryPagerStats::default(),
        }
    }

    /// Get the current statistics.
    #[must_use]
    pub const fn stats(&self) -> &MemoryPagerStats {
        &self.stats
    }

    /// Update the fault configuration.
    pub fn set_fault_config(&mut self, config: FaultConfig) {
        self.fault_config = config;
    }

    /// Make the write after `successful` more writes fail.
    pub const fn fail_write_after(&mut self, successful: u64) {
        self.fail_write_after = Some(successful);
    }

    /// Flip one bit of a stored page, bypassing checksums.
    pub fn corrupt(&mut self, page_id: PageId, byte_offset: usize) {
        if let Some(page) = self.pages.get_mut(&page_id) {
            page.as_bytes_mut()[byte_offset] ^= 0x01;
        }
    }

    /// Check if a fault should be injected based on the given rate.
    fn should_inject_fault(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        self.rng.random::<f64>() < rate
    }

    /// Corrupt a page by flipping random bits.
    fn corrupt_page(&mut self, page: &mut Page) {
        let num_flips = self.rng.random_range(1..=8);
        for _ in 0..num_flips {
            let byte_offset = self.rng.random_range(0..self.page_size);
            let bit = self.rng.random_range(0..8u8);
            page.as_bytes_mut()[byte_offset] ^= 1 << bit;
        }
    }
}

impl Pager for MemoryPager {
    fn page_count(&self) -> u64 {
        self.page_count
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&mut self, page_id: PageId) -> Result<Page, PagerError> {
        self.stats.reads += 1;
        self.check_access(page_id, None)?;

        if self.should_inject_fault(self.fault_config.read_error_rate) {
            self.stats.injected_read_errors += 1;
            return Err(PagerError::InjectedFault(format!(
                "simulated read error on page {page_id}"
            )));
        }

        let mut page = self
            .pages
            .get(&page_id)
            .cloned()
            .unwrap_or_else(|| Page::new(self.page_size));

        if self.should_inject_fault(self.fault_config.corruption_rate) {
            self.stats.corrupted_reads += 1;
            self.corrupt_page(&mut page);
        }

        Ok(page)
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), PagerError> {
        self.stats.writes += 1;
        self.check_access(page_id, Some(page))?;

        let scheduled = match self.fail_write_after {
            Some(0) => {
                self.fail_write_after = None;
                true
            }
            Some(n) => {
                self.fail_write_after = Some(n - 1);
                false
            }
            None => false,
        };
        if scheduled || self.should_inject_fault(self.fault_config.write_error_rate) {
            self.stats.injected_write_errors += 1;
            return Err(PagerError::InjectedFault(format!(
                "simulated write error on page {page_id}"
            )));
        }

        self.pages.insert(page_id, page.clone());
        Ok(())
    }

    fn sync(&mut self) -> Result<(), PagerError> {
        self.stats.syncs += 1;

        if self.should_inject_fault(self.fault_config.sync_error_rate) {
            return Err(PagerError::InjectedFault("simulated sync error".to_string()));
        }

        Ok(())
    }
}
