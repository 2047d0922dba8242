//! Block list options and builder

use crate::core::block_list::BlockList;
use crate::core::cache::DEFAULT_CACHE_CAPACITY;
use crate::core::error::{BlockListError, Result};
use crate::core::record::Record;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Descriptors per directory page for new files
pub const DEFAULT_PAGE_CAPACITY: u32 = 64;

/// Smallest block allocated for a new record
pub const DEFAULT_MIN_BLOCK_SIZE: u32 = 128;

/// How [`BlockList::open_with`] treats the target path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    /// Always start a fresh file, truncating any existing one
    Create,
    /// Open an existing file; fail if it is missing
    Open,
    /// Open the file if it exists, otherwise create it
    OpenOrCreate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockListOptions {
    /// Descriptors per directory page. Only used when creating a file; an
    /// existing file keeps the capacity recorded in its header.
    pub page_capacity: u32,

    /// Minimum length of a newly allocated block
    pub min_block_size: u32,

    /// Maximum number of decoded values kept in memory
    pub cache_capacity: usize,

    /// fsync after every write
    pub sync_on_write: bool,
}

impl Default for BlockListOptions {
    fn default() -> Self {
        BlockListOptions {
            page_capacity: DEFAULT_PAGE_CAPACITY,
            min_block_size: DEFAULT_MIN_BLOCK_SIZE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            sync_on_write: false,
        }
    }
}

impl BlockListOptions {
    pub fn validate(&self) -> Result<()> {
        if self.page_capacity < 2 {
            return Err(BlockListError::Config(format!(
                "page_capacity must be at least 2, got {}",
                self.page_capacity
            )));
        }
        if self.min_block_size == 0 {
            return Err(BlockListError::Config(
                "min_block_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for opening a [`BlockList`] with custom options
///
/// # Examples
///
/// ```rust,no_run
/// use blockstack::{BlockListBuilder, OpenMode};
///
/// # fn main() -> blockstack::core::Result<()> {
/// let list = BlockListBuilder::new()
///     .page_capacity(128)
///     .cache_capacity(1024)
///     .open::<String, _>("names.blst", OpenMode::OpenOrCreate)?;
/// list.add("hello".to_string())?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct BlockListBuilder {
    options: BlockListOptions,
}

impl BlockListBuilder {
    pub fn new() -> Self {
        BlockListBuilder {
            options: BlockListOptions::default(),
        }
    }

    pub fn page_capacity(mut self, capacity: u32) -> Self {
        self.options.page_capacity = capacity;
        self
    }

    pub fn min_block_size(mut self, size: u32) -> Self {
        self.options.min_block_size = size;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.options.cache_capacity = capacity;
        self
    }

    pub fn sync_on_write(mut self, sync: bool) -> Self {
        self.options.sync_on_write = sync;
        self
    }

    pub fn options(&self) -> BlockListOptions {
        self.options
    }

    pub fn open<T: Record, P: AsRef<Path>>(self, path: P, mode: OpenMode) -> Result<BlockList<T>> {
        BlockList::open_with(path, mode, self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = BlockListOptions::default();
        assert_eq!(options.page_capacity, 64);
        assert_eq!(options.min_block_size, 128);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let options = BlockListBuilder::new()
            .page_capacity(8)
            .min_block_size(32)
            .cache_capacity(0)
            .sync_on_write(true)
            .options();
        assert_eq!(options.page_capacity, 8);
        assert_eq!(options.min_block_size, 32);
        assert_eq!(options.cache_capacity, 0);
        assert!(options.sync_on_write);
    }

    #[test]
    fn test_validation() {
        let options = BlockListBuilder::new().page_capacity(1).options();
        assert!(matches!(options.validate(), Err(BlockListError::Config(_))));

        let options = BlockListBuilder::new().min_block_size(0).options();
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let options: BlockListOptions = toml::from_str("cache_capacity = 16").unwrap();
        assert_eq!(options.cache_capacity, 16);
        assert_eq!(options.page_capacity, DEFAULT_PAGE_CAPACITY);
    }
}
