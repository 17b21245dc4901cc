//! File-backed page store.
//!
//! The file is sized up front to `page_count * page_size` bytes and never
//! grows. A page id multiplied by the page size gives its byte offset.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::storage::io::{Pager, PagerError};
use crate::storage::page::{Page, PageId};

/// A fixed-capacity page file.
#[derive(Debug)]
pub struct FilePager {
    file: File,
    page_size: usize,
    page_count: u64,
}

impl FilePager {
    /// Create a new page file at the given path.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path, page_size: usize, page_count: u64) -> Result<Self, FileError> {
        if path.exists() {
            return Err(FileError::AlreadyExists(path.to_path_buf()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(FileError::Io)?;

        file.set_len(page_count * page_size as u64)
            .map_err(FileError::Io)?;
        file.sync_all().map_err(FileError::Io)?;

        tracing::debug!(
            "created page file {} ({page_count} pages of {page_size} bytes)",
            path.display()
        );

        Ok(Self {
            file,
            page_size,
            page_count,
        })
    }

    /// Open an existing page file.
    ///
    /// The file length must be exactly `page_count * page_size` bytes.
    pub fn open(path: &Path, page_size: usize, page_count: u64) -> Result<Self, FileError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(FileError::Io)?;

        let expected = page_count * page_size as u64;
        let actual = file.metadata().map_err(FileError::Io)?.len();
        if actual != expected {
            return Err(FileError::SizeMismatch { expected, actual });
        }

        Ok(Self {
            file,
            page_size,
            page_count,
        })
    }

    const fn offset(&self, page_id: PageId) -> u64 {
        page_id * self.page_size as u64
    }
}

impl Pager for FilePager {
    fn page_count(&self) -> u64 {
        self.page_count
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&mut self, page_id: PageId) -> Result<Page, PagerError> {
        self.check_access(page_id, None)?;

        let mut page = Page::new(self.page_size);
        self.file.seek(SeekFrom::Start(self.offset(page_id)))?;
        self.file.read_exact(page.as_bytes_mut())?;

        Ok(page)
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), PagerError> {
        self.check_access(page_id, Some(page))?;

        self.file.seek(SeekFrom::Start(self.offset(page_id)))?;
        self.file.write_all(page.as_bytes())?;

        Ok(())
    }

    fn sync(&mut self) -> Result<(), PagerError> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Errors that can occur while creating or opening a page file.
#[derive(Debug)]
pub enum FileError {
    /// I/O error.
    Io(std::io::Error),
    /// File already exists.
    AlreadyExists(std::path::PathBuf),
    /// File length doesn't match the configured geometry.
    SizeMismatch { expected: u64, actual: u64 },
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::AlreadyExists(p) => write!(f, "file already exists: {}", p.display()),
            Self::SizeMismatch { expected, actual } => write!(
                f,
                "file size mismatch: expected {expected} bytes, found {actual}"
            ),
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::AlreadyExists(_) | Self::SizeMismatch { .. } => None,
        }
    }
}
