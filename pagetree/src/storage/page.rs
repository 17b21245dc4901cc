//! Page types and constants for the storage engine.
//!
//! Pages are fixed-size byte buffers and the unit of I/O. The size is chosen
//! once per pager and never changes for the pager's lifetime.

/// Default page size in bytes (1KB).
pub const DEFAULT_PAGE_SIZE: usize = 1024;

/// A page identifier (0-indexed page number).
pub type PageId = u64;

/// Page type identifiers stored in page headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// Superblock (page 0 only)
    Superblock = 0x01,
    /// B+ tree internal node
    TreeInternal = 0x03,
    /// B+ tree leaf node
    TreeLeaf = 0x04,
    /// Free page (released node)
    Free = 0x06,
}

impl TryFrom<u8> for PageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Superblock),
            0x03 => Ok(Self::TreeInternal),
            0x04 => Ok(Self::TreeLeaf),
            0x06 => Ok(Self::Free),
            _ => Err(value),
        }
    }
}

/// Common page header present at the start of every page.
///
/// Layout:
/// - `page_type`: 1 byte
/// - `flags`: 1 byte
/// - `checksum`: 4 bytes (CRC32)
/// - `reserved`: 2 bytes
///
/// Total: 8 bytes
#[derive(Debug, Copy, Clone)]
pub struct PageHeader {
    pub page_type: PageType,
    pub flags: u8,
    pub checksum: u32,
}

impl PageHeader {
    /// Size of the page header in bytes.
    pub const SIZE: usize = 8;

    /// Offset of the checksum field inside the header.
    pub const CHECKSUM_OFFSET: usize = 2;

    /// Serialize the header to bytes.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.page_type as u8;
        buf[1] = self.flags;
        buf[2..6].copy_from_slice(&self.checksum.to_le_bytes());
        // bytes 6-7 reserved
        buf
    }

    /// Deserialize a header from bytes.
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Result<Self, PageError> {
        let page_type = PageType::try_from(bytes[0]).map_err(PageError::InvalidPageType)?;
        let flags = bytes[1];
        let checksum = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);

        Ok(Self {
            page_type,
            flags,
            checksum,
        })
    }

    /// Read the header stored at the start of a page.
    pub fn from_page(page: &Page) -> Result<Self, PageError> {
        let mut bytes = [0u8; Self::SIZE];
        bytes.copy_from_slice(page.read_bytes(0, Self::SIZE));
        Self::from_bytes(bytes)
    }
}

/// A raw page buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    data: Box<[u8]>,
}

impl Page {
    /// Create a new zeroed page of `page_size` bytes.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            data: vec![0u8; page_size].into_boxed_slice(),
        }
    }

    /// Create a page from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: bytes.into_boxed_slice(),
        }
    }

    /// Size of the page in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.data.len()
    }

    /// Get the raw page data.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable access to the raw page data.
    pub const fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Read bytes at a specific offset.
    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    /// Write bytes at a specific offset.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Read a u8 at the given offset.
    #[must_use]
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.data[offset]
    }

    /// Write a u8 at the given offset.
    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.data[offset] = value;
    }

    /// Read a u16 (little-endian) at the given offset.
    #[must_use]
    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    /// Write a u16 (little-endian) at the given offset.
    pub fn write_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Read a u32 (little-endian) at the given offset.
    #[must_use]
    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.data[offset..offset + 4]);
        u32::from_le_bytes(buf)
    }

    /// Write a u32 (little-endian) at the given offset.
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Read a u64 (little-endian) at the given offset.
    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[offset..offset + 8]);
        u64::from_le_bytes(buf)
    }

    /// Write a u64 (little-endian) at the given offset.
    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Read an i64 (little-endian) at the given offset.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn read_i64(&self, offset: usize) -> i64 {
        self.read_u64(offset) as i64
    }

    /// Write an i64 (little-endian) at the given offset.
    #[allow(clippy::cast_sign_loss)]
    pub fn write_i64(&mut self, offset: usize, value: i64) {
        self.write_u64(offset, value as u64);
    }

    /// Compute CRC32 checksum of the page data (excluding the checksum field itself).
    #[must_use]
    pub fn compute_checksum(&self) -> u32 {
        let start = PageHeader::CHECKSUM_OFFSET;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data[..start]); // page_type + flags
        hasher.update(&[0u8; 4]); // zero out checksum field
        hasher.update(&self.data[start + 4..]); // rest of page
        hasher.finalize()
    }

    /// Compute the checksum and store it in the header.
    pub fn seal(&mut self) {
        let checksum = self.compute_checksum();
        self.write_u32(PageHeader::CHECKSUM_OFFSET, checksum);
    }

    /// Check the stored checksum against the page contents.
    pub fn verify_checksum(&self) -> Result<(), PageError> {
        let expected = self.read_u32(PageHeader::CHECKSUM_OFFSET);
        let actual = self.compute_checksum();
        if expected == actual {
            Ok(())
        } else {
            Err(PageError::ChecksumMismatch { expected, actual })
        }
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = self.data.len().min(16);
        f.debug_struct("Page")
            .field("size", &self.data.len())
            .field("first_bytes", &&self.data[..shown])
            .finish_non_exhaustive()
    }
}

/// Errors related to page operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    /// Invalid page type byte.
    InvalidPageType(u8),
    /// Checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl std::fmt::Display for PageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPageType(v) => write!(f, "invalid page type: 0x{v:02x}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

impl std::error::Error for PageError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_header_roundtrip() {
        let header = PageHeader {
            page_type: PageType::TreeLeaf,
            flags: 0x42,
            checksum: 0xDEAD_BEEF,
        };

        let bytes = header.to_bytes();
        let restored = PageHeader::from_bytes(bytes).expect("should parse");

        assert_eq!(restored.page_type, PageType::TreeLeaf);
        assert_eq!(restored.flags, 0x42);
        assert_eq!(restored.checksum, 0xDEAD_BEEF);
    }

    #[test]
    fn test_page_read_write() {
        let mut page = Page::new(DEFAULT_PAGE_SIZE);

        page.write_u8(0, 0xFF);
        assert_eq!(page.read_u8(0), 0xFF);

        page.write_u16(50, 0xBEEF);
        assert_eq!(page.read_u16(50), 0xBEEF);

        page.write_u32(100, 0x1234_5678);
        assert_eq!(page.read_u32(100), 0x1234_5678);

        page.write_u64(200, 0x0102_0304_0506_0708);
        assert_eq!(page.read_u64(200), 0x0102_0304_0506_0708);

        page.write_i64(300, -42);
        assert_eq!(page.read_i64(300), -42);

        page.write_bytes(500, b"hello");
        assert_eq!(page.read_bytes(500, 5), b"hello");
    }

    #[test]
    fn test_page_type_conversion() {
        assert_eq!(PageType::try_from(0x01), Ok(PageType::Superblock));
        assert_eq!(PageType::try_from(0x04), Ok(PageType::TreeLeaf));
        assert!(PageType::try_from(0xFF).is_err());
    }

    #[test]
    fn test_checksum_detects_flipped_bit() {
        let mut page = Page::new(128);
        page.write_bytes(0, &PageHeader {
            page_type: PageType::TreeLeaf,
            flags: 0,
            checksum: 0,
        }
        .to_bytes());
        page.write_bytes(40, b"payload");
        page.seal();
        assert!(page.verify_checksum().is_ok());

        page.as_bytes_mut()[41] ^= 0x01;
        assert!(matches!(
            page.verify_checksum(),
            Err(PageError::ChecksumMismatch { .. })
        ));
    }
}
