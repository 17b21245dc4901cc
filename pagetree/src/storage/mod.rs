//! Page storage layer.
//!
//! Everything below the tree: fixed-size pages, the page store contract and
//! its implementations, the identifier bitmap and the superblock.
//!
//! # File Format
//!
//! The store is a fixed number of equally sized pages:
//!
//! - Page 0: Superblock (geometry, tree order, root page)
//! - Pages 1-N: B+ tree nodes, one node per page, page id == node id
//!
//! # Usage
//!
//! ```
//! use pagetree::storage::{MemoryPager, Page, Pager};
//!
//! let mut pager = MemoryPager::new(1024, 16);
//!
//! let mut page = Page::new(pager.page_size());
//! page.write_bytes(0, b"hello");
//! pager.write_page(3, &page).unwrap();
//!
//! assert_eq!(pager.read_page(3).unwrap().read_bytes(0, 5), b"hello");
//! ```

mod allocator;
mod file;
mod io;
mod memory;
mod page;
mod superblock;

pub use allocator::IdAllocator;
pub use file::{FileError, FilePager};
pub use io::{Pager, PagerError};
pub use memory::{FaultConfig, MemoryPager, MemoryPagerStats};
pub use page::{DEFAULT_PAGE_SIZE, Page, PageError, PageHeader, PageId, PageType};
pub use superblock::{SUPERBLOCK_PAGE, SUPERBLOCK_SIZE, Superblock, SuperblockError};
