//! Catalog record types

use crate::core::block_list::BlockList;
use crate::core::record::{tags, Record};
use crate::stack::hash::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One deduplicated content blob, stored in the blob directory as `bulk_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkInfo {
    pub bulk_id: String,
    pub content_hash: ContentHash,
    pub length: u64,
}

impl BulkInfo {
    /// True when this blob holds exactly the given content
    pub fn matches(&self, content_hash: &ContentHash, length: u64) -> bool {
        self.length == length && self.content_hash == *content_hash
    }
}

impl Record for BulkInfo {
    const TYPE_TAG: u32 = tags::BULK_INFO;
    const TYPE_NAME: &'static str = "bulk info";
}

/// A file captured by a level, pointing at its blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackedFileInfo {
    pub bulk_id: String,
    pub original_path: PathBuf,
    pub file_name: String,
    pub level_id: String,
}

/// One snapshot of a set of files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelInfo {
    pub level_id: String,
    pub time_saved: DateTime<Utc>,
    pub files: Vec<StackedFileInfo>,
    pub metadata: Option<Vec<u8>>,
}

impl LevelInfo {
    pub fn new(level_id: String, metadata: Option<Vec<u8>>) -> Self {
        LevelInfo {
            level_id,
            time_saved: Utc::now(),
            files: Vec::new(),
            metadata,
        }
    }

    pub fn references(&self, bulk_id: &str) -> bool {
        self.files.iter().any(|file| file.bulk_id == bulk_id)
    }
}

impl Record for LevelInfo {
    const TYPE_TAG: u32 = tags::LEVEL_INFO;
    const TYPE_NAME: &'static str = "level info";
}

/// Stack-wide bookkeeping, kept as the single record of the metadata store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackMetadata {
    pub last_stacked_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

impl StackMetadata {
    pub fn new() -> Self {
        StackMetadata {
            last_stacked_path: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_last_stacked_path(mut self, path: &Path) -> Self {
        self.last_stacked_path = Some(path.to_path_buf());
        self
    }
}

impl Default for StackMetadata {
    fn default() -> Self {
        Self::new()
    }
}

impl Record for StackMetadata {
    const TYPE_TAG: u32 = tags::STACK_METADATA;
    const TYPE_NAME: &'static str = "stack metadata";
}

pub type BulkCatalog = BlockList<BulkInfo>;
pub type LevelCatalog = BlockList<LevelInfo>;
pub type MetadataStore = BlockList<StackMetadata>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::{decode, encode};

    #[test]
    fn test_level_codec() {
        let mut level = LevelInfo::new("lvl".to_string(), Some(vec![1, 2, 3]));
        level.files.push(StackedFileInfo {
            bulk_id: "b1".to_string(),
            original_path: PathBuf::from("/src/a.txt"),
            file_name: "a.txt".to_string(),
            level_id: "lvl".to_string(),
        });

        let decoded: LevelInfo = decode(&encode(&level).unwrap()).unwrap();
        assert_eq!(decoded, level);
        assert!(decoded.references("b1"));
        assert!(!decoded.references("b2"));
    }

    #[test]
    fn test_bulk_matches_requires_hash_and_length() {
        let hash = ContentHash::of_bytes(b"data");
        let bulk = BulkInfo {
            bulk_id: "x".to_string(),
            content_hash: hash,
            length: 4,
        };
        assert!(bulk.matches(&hash, 4));
        assert!(!bulk.matches(&hash, 5));
        assert!(!bulk.matches(&ContentHash::of_bytes(b"other"), 4));
    }
}
