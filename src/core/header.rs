//! Block list file header
//!
//! The header is the first [`HEADER_SIZE`] bytes of every block list file:
//!
//! ```text
//! offset  size  field
//! 0       8     magic "BLST\x00\x01\x00\x00"
//! 8       2     version major
//! 10      2     version minor
//! 12      4     record type tag
//! 16      4     directory page capacity (descriptors per page)
//! 20      8     record count (u64::MAX = unknown)
//! 28      4     total descriptor count
//! 32      22    root directory page descriptor (block 0)
//! 54      4     CRC32 of bytes 0..54
//! 58      6     reserved
//! ```

use crate::core::directory::{BlockDescriptor, DESCRIPTOR_SIZE};
use crate::core::error::{BlockListError, Result};

pub const MAGIC: [u8; 8] = *b"BLST\x00\x01\x00\x00";
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 0;
pub const HEADER_SIZE: usize = 64;

/// Persisted in place of the record count while the count is unknown
pub const UNKNOWN_COUNT: u64 = u64::MAX;

const ROOT_OFFSET: usize = 32;
const CRC_OFFSET: usize = ROOT_OFFSET + DESCRIPTOR_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 8],
    pub version_major: u16,
    pub version_minor: u16,

    /// Tag of the record type stored in this file
    pub type_tag: u32,

    /// Descriptors per directory page
    pub page_capacity: u32,

    /// Number of live records, or [`UNKNOWN_COUNT`]
    pub record_count: u64,

    /// Number of descriptors in the directory, including directory pages
    pub block_count: u32,

    /// Descriptor of block 0, the first directory page
    pub root: BlockDescriptor,
}

impl Header {
    pub fn new(type_tag: u32, page_capacity: u32, root: BlockDescriptor) -> Self {
        Header {
            magic: MAGIC,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            type_tag,
            page_capacity,
            record_count: 0,
            block_count: 1,
            root,
        }
    }

    /// Validate the header magic, version, and structural fields
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(BlockListError::InvalidMagic);
        }

        if self.version_major != VERSION_MAJOR || self.version_minor > VERSION_MINOR {
            return Err(BlockListError::UnsupportedVersion {
                major: self.version_major,
                minor: self.version_minor,
            });
        }

        if self.page_capacity < 2 {
            return Err(BlockListError::InvalidFormat(format!(
                "directory page capacity {} is below the minimum of 2",
                self.page_capacity
            )));
        }

        if self.block_count == 0 {
            return Err(BlockListError::InvalidFormat(
                "directory has no blocks".to_string(),
            ));
        }

        if !self.root.kind.is_directory() || self.root.empty {
            return Err(BlockListError::InvalidFormat(
                "block 0 is not a directory page".to_string(),
            ));
        }

        let page_len = self.page_capacity as u64 * DESCRIPTOR_SIZE as u64;
        if (self.root.length as u64) < page_len || self.root.start < HEADER_SIZE as u64 {
            return Err(BlockListError::InvalidFormat(format!(
                "root directory page at {} ({} bytes) is malformed",
                self.root.start, self.root.length
            )));
        }

        if self.record_count != UNKNOWN_COUNT && self.record_count > self.block_count as u64 {
            return Err(BlockListError::InvalidFormat(format!(
                "record count {} exceeds block count {}",
                self.record_count, self.block_count
            )));
        }

        Ok(())
    }

    /// Record count, if it was known when the header was written
    pub fn known_count(&self) -> Option<usize> {
        if self.record_count == UNKNOWN_COUNT {
            None
        } else {
            Some(self.record_count as usize)
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];

        bytes[0..8].copy_from_slice(&self.magic);
        bytes[8..10].copy_from_slice(&self.version_major.to_le_bytes());
        bytes[10..12].copy_from_slice(&self.version_minor.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.type_tag.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.page_capacity.to_le_bytes());
        bytes[20..28].copy_from_slice(&self.record_count.to_le_bytes());
        bytes[28..32].copy_from_slice(&self.block_count.to_le_bytes());
        bytes[ROOT_OFFSET..CRC_OFFSET].copy_from_slice(&self.root.to_bytes());

        let crc = crc32fast::hash(&bytes[..CRC_OFFSET]);
        bytes[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(BlockListError::InvalidFormat(format!(
                "header needs {} bytes, file has {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[0..8]);
        if magic != MAGIC {
            return Err(BlockListError::InvalidMagic);
        }

        let stored_crc = u32::from_le_bytes([
            bytes[CRC_OFFSET],
            bytes[CRC_OFFSET + 1],
            bytes[CRC_OFFSET + 2],
            bytes[CRC_OFFSET + 3],
        ]);
        if crc32fast::hash(&bytes[..CRC_OFFSET]) != stored_crc {
            return Err(BlockListError::ChecksumMismatch);
        }

        let header = Header {
            magic,
            version_major: u16::from_le_bytes([bytes[8], bytes[9]]),
            version_minor: u16::from_le_bytes([bytes[10], bytes[11]]),
            type_tag: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
            page_capacity: u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
            record_count: u64::from_le_bytes([
                bytes[20], bytes[21], bytes[22], bytes[23], bytes[24], bytes[25], bytes[26],
                bytes[27],
            ]),
            block_count: u32::from_le_bytes([bytes[28], bytes[29], bytes[30], bytes[31]]),
            root: BlockDescriptor::from_bytes(&bytes[ROOT_OFFSET..CRC_OFFSET])?,
        };

        header.validate()?;

        Ok(header)
    }
}
