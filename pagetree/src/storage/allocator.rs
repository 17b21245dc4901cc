//! Node identifier allocator using a bitmap to track free/used pages.
//!
//! Each bit represents one page: 0 = free, 1 = used. Identifiers are always
//! handed out lowest-first so freed pages are reused before fresh ones.
//! The bitmap lives in memory only; on reopen it is rebuilt from the tree.

// Page IDs are u64 but bitmap indices are usize. On 64-bit systems these are the same size.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::page::PageId;

/// Number of bits per byte.
const BITS_PER_BYTE: usize = 8;

/// An identifier allocation bitmap.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    /// The bitmap data.
    bitmap: Vec<u8>,
    /// Total number of ids being tracked.
    total: u64,
    /// Number of free ids.
    free_count: u64,
    /// Every id below the hint is known to be in use.
    lowest_free_hint: u64,
}

impl IdAllocator {
    /// Create an allocator tracking `total` ids, with the first `reserved` ids marked used.
    #[must_use]
    pub fn new(total: u64, reserved: u64) -> Self {
        let bitmap_bytes = (total as usize).div_ceil(BITS_PER_BYTE);
        let mut bitmap = vec![0u8; bitmap_bytes];

        let reserved = reserved.min(total);
        for id in 0..reserved {
            set_bit(&mut bitmap, id as usize);
        }

        Self {
            bitmap,
            total,
            free_count: total - reserved,
            lowest_free_hint: reserved,
        }
    }

    /// Allocate the lowest free id.
    ///
    /// Returns `None` if every id is in use.
    pub fn allocate(&mut self) -> Option<PageId> {
        if self.free_count == 0 {
            return None;
        }

        for id in self.lowest_free_hint..self.total {
            if !get_bit(&self.bitmap, id as usize) {
                set_bit(&mut self.bitmap, id as usize);
                self.free_count -= 1;
                self.lowest_free_hint = id + 1;
                return Some(id);
            }
        }

        None
    }

    /// Mark a specific id as used.
    ///
    /// Returns `false` if it was already in use or out of range.
    pub fn mark_used(&mut self, id: PageId) -> bool {
        if id >= self.total || get_bit(&self.bitmap, id as usize) {
            return false;
        }

        set_bit(&mut self.bitmap, id as usize);
        self.free_count -= 1;
        if id == self.lowest_free_hint {
            self.lowest_free_hint = id + 1;
        }
        true
    }

    /// Free a previously allocated id.
    ///
    /// Returns `false` if the id was not allocated.
    pub fn free(&mut self, id: PageId) -> bool {
        if !self.is_allocated(id) {
            return false;
        }

        clear_bit(&mut self.bitmap, id as usize);
        self.free_count += 1;
        if id < self.lowest_free_hint {
            self.lowest_free_hint = id;
        }
        true
    }

    /// Check if an id is allocated.
    #[must_use]
    pub fn is_allocated(&self, id: PageId) -> bool {
        if id >= self.total {
            return false;
        }
        get_bit(&self.bitmap, id as usize)
    }

    /// Get the number of free ids.
    #[must_use]
    pub const fn free_count(&self) -> u64 {
        self.free_count
    }

    /// Get the total number of ids being tracked.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.total
    }
}

/// Get a bit from the bitmap.
fn get_bit(bitmap: &[u8], index: usize) -> bool {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index >= bitmap.len() {
        return false;
    }

    (bitmap[byte_index] & (1 << bit_index)) != 0
}

/// Set a bit in the bitmap (mark as used).
fn set_bit(bitmap: &mut [u8], index: usize) {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index < bitmap.len() {
        bitmap[byte_index] |= 1 << bit_index;
    }
}

/// Clear a bit in the bitmap (mark as free).
fn clear_bit(bitmap: &mut [u8], index: usize) {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index < bitmap.len() {
        bitmap[byte_index] &= !(1 << bit_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_allocator_reserves_prefix() {
        let alloc = IdAllocator::new(100, 1);

        assert!(alloc.is_allocated(0));
        assert!(!alloc.is_allocated(1));
        assert_eq!(alloc.free_count(), 99);
    }

    #[test]
    fn test_allocates_lowest_first() {
        let mut alloc = IdAllocator::new(16, 1);

        assert_eq!(alloc.allocate(), Some(1));
        assert_eq!(alloc.allocate(), Some(2));
        assert_eq!(alloc.allocate(), Some(3));
        assert_eq!(alloc.allocate(), Some(4));

        assert!(alloc.free(3));
        assert!(alloc.free(2));

        // Lowest hole first, then the next one, then fresh ids
        assert_eq!(alloc.allocate(), Some(2));
        assert_eq!(alloc.allocate(), Some(3));
        assert_eq!(alloc.allocate(), Some(5));
    }

    #[test]
    fn test_free_unallocated_is_rejected() {
        let mut alloc = IdAllocator::new(16, 1);
        let id = alloc.allocate().expect("allocate");

        assert!(alloc.free(id));
        assert!(!alloc.free(id));
        assert!(!alloc.free(99));
        assert_eq!(alloc.free_count(), 15);
    }

    #[test]
    fn test_allocate_exhaustion() {
        let mut alloc = IdAllocator::new(10, 1);

        while alloc.allocate().is_some() {}

        assert_eq!(alloc.free_count(), 0);
        assert!(alloc.allocate().is_none());

        assert!(alloc.free(4));
        assert_eq!(alloc.allocate(), Some(4));
    }

    #[test]
    fn test_mark_used() {
        let mut alloc = IdAllocator::new(16, 1);

        assert!(alloc.mark_used(5));
        assert!(!alloc.mark_used(5));
        assert!(alloc.mark_used(1));
        assert!(!alloc.mark_used(16));

        assert_eq!(alloc.allocate(), Some(2));
        assert_eq!(alloc.allocate(), Some(3));
        assert_eq!(alloc.allocate(), Some(4));
        assert_eq!(alloc.allocate(), Some(6));
    }

    #[test]
    fn test_bit_operations() {
        let mut bitmap = vec![0u8; 10];

        assert!(!get_bit(&bitmap, 0));
        assert!(!get_bit(&bitmap, 79));

        set_bit(&mut bitmap, 0);
        set_bit(&mut bitmap, 7);
        set_bit(&mut bitmap, 8);
        set_bit(&mut bitmap, 79);
        assert!(get_bit(&bitmap, 0));
        assert!(get_bit(&bitmap, 7));
        assert!(get_bit(&bitmap, 8));
        assert!(get_bit(&bitmap, 79));

        clear_bit(&mut bitmap, 7);
        assert!(!get_bit(&bitmap, 7));
        assert!(get_bit(&bitmap, 0)); // Others unchanged
    }
}
