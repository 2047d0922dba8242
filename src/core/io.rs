//! Disk I/O for block list files

use crate::core::error::{BlockListError, Result};
use crate::core::header::{Header, HEADER_SIZE};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Backing file of a block list
///
/// Tracks the logical end of file so new blocks can be appended without a
/// metadata call per allocation.
pub struct BlockFile {
    file: File,
    path: PathBuf,
    len: u64,
    sync_on_write: bool,
}

impl BlockFile {
    /// Create (or truncate) a block list file and write its header
    pub fn create<P: AsRef<Path>>(path: P, header: &Header, sync_on_write: bool) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        file.write_all(&header.to_bytes())?;
        file.flush()?;

        Ok(BlockFile {
            file,
            path: path.as_ref().to_path_buf(),
            len: HEADER_SIZE as u64,
            sync_on_write,
        })
    }

    /// Open an existing block list file
    pub fn open<P: AsRef<Path>>(path: P, sync_on_write: bool) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();

        Ok(BlockFile {
            file,
            path: path.as_ref().to_path_buf(),
            len,
            sync_on_write,
        })
    }

    pub fn read_header(&mut self) -> Result<Header> {
        if self.len < HEADER_SIZE as u64 {
            return Err(BlockListError::InvalidFormat(format!(
                "file is {} bytes, too short for a header",
                self.len
            )));
        }
        let bytes = self.read_at(0, HEADER_SIZE)?;
        Header::from_bytes(&bytes)
    }

    pub fn write_header(&mut self, header: &Header) -> Result<()> {
        self.write_at(0, &header.to_bytes())
    }

    /// Read `len` bytes at `offset`
    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if offset.saturating_add(len as u64) > self.len {
            return Err(BlockListError::InvalidFormat(format!(
                "read of {} bytes at {} runs past end of file ({} bytes)",
                len, offset, self.len
            )));
        }

        self.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        self.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Write `data` at `offset`; the range must already be allocated
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if offset.saturating_add(data.len() as u64) > self.len {
            return Err(BlockListError::InvalidFormat(format!(
                "write of {} bytes at {} runs past end of file ({} bytes)",
                data.len(),
                offset,
                self.len
            )));
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        if self.sync_on_write {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Grow the file by `len` zeroed bytes, returning the offset of the new range
    pub fn extend(&mut self, len: u32) -> Result<u64> {
        let start = self.len;
        self.file.set_len(start + len as u64)?;
        self.len = start + len as u64;
        Ok(start)
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sync all writes to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}
