//! Page store abstraction.
//!
//! The tree never talks to a file directly. It goes through the `Pager`
//! trait, which allows real file I/O in production and in-memory storage
//! with fault injection in tests.
//!
//! # Contract
//!
//! - page ids are stable, zero-based and bounded by `page_count()`
//! - `page_size()` is fixed for the pager's lifetime
//! - every `write_page` fully overwrites the page

use crate::storage::page::{Page, PageId};

/// Errors that can occur during page store operations.
#[derive(Debug)]
pub enum PagerError {
    /// I/O error.
    Io(std::io::Error),
    /// Page out of bounds.
    PageOutOfBounds { page_id: PageId, page_count: u64 },
    /// A page buffer did not match the pager's page size.
    PageSizeMismatch { expected: usize, actual: usize },
    /// Injected fault for simulation.
    InjectedFault(String),
}

impl std::fmt::Display for PagerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::PageOutOfBounds {
                page_id,
                page_count,
            } => write!(f, "page {page_id} out of bounds (page count: {page_count})"),
            Self::PageSizeMismatch { expected, actual } => {
                write!(f, "page size mismatch: expected {expected} bytes, got {actual}")
            }
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for PagerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PagerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Abstraction over fixed-capacity page storage.
pub trait Pager {
    /// Total number of page slots available.
    fn page_count(&self) -> u64;

    /// Fixed number of bytes per page.
    fn page_size(&self) -> usize;

    /// Read a page.
    ///
    /// Returns the last written content, or a zeroed page if it was never written.
    fn read_page(&mut self, page_id: PageId) -> Result<Page, PagerError>;

    /// Write a full page.
    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), PagerError>;

    /// Make all previous writes durable.
    fn sync(&mut self) -> Result<(), PagerError> {
        Ok(())
    }

    /// Check that `page_id` is addressable and `page`, if given, has the right size.
    fn check_access(&self, page_id: PageId, page: Option<&Page>) -> Result<(), PagerError> {
        if page_id >= self.page_count() {
            return Err(PagerError::PageOutOfBounds {
                page_id,
                page_count: self.page_count(),
            });
        }
        match page {
            Some(page) if page.size() != self.page_size() => Err(PagerError::PageSizeMismatch {
                expected: self.page_size(),
                actual: page.size(),
            }),
            _ => Ok(()),
        }
    }
}
