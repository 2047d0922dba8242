//! # Blockstack - Single-File Block Lists and a Deduplicating File Stack
//!
//! `blockstack` provides two layers:
//!
//! - **Block lists**: an ordered, index-addressable collection of records of
//!   one type, persisted in a single file with a self-describing directory.
//!   Freed blocks are reused first-fit and records grow or shrink in place.
//! - **Stacks**: a versioned file archive built on three block lists. Each
//!   stacked snapshot ("level") references content blobs that are stored once
//!   per unique content and reclaimed by an explicit prune.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use blockstack::{BlockList, OpenMode};
//!
//! # fn main() -> blockstack::core::Result<()> {
//! let list: BlockList<String> = BlockList::open("names.blst", OpenMode::OpenOrCreate)?;
//!
//! let position = list.add("hello".to_string())?;
//! assert_eq!(list.get(position)?, "hello");
//!
//! for name in list.iter()? {
//!     println!("{}", name?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Stacking Files
//!
//! ```rust,no_run
//! use blockstack::Stack;
//!
//! # fn main() -> blockstack::stack::Result<()> {
//! let stack = Stack::open_or_create("my-stack")?;
//!
//! let level = stack.create_level(&["notes.txt", "notes-copy.txt"], None)?;
//! println!("level {} holds {} files", level.level_id, level.files.len());
//!
//! let mut out = Vec::new();
//! stack.retrieve_file(&level.files[0].bulk_id, &mut out)?;
//!
//! stack.delete_level(&level.level_id)?;
//! let pruned = stack.prune_bulk()?;
//! println!("reclaimed {} bytes", pruned.bytes_reclaimed);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod stack;

// Re-export the types most callers need
pub use crate::core::{
    BlockList, BlockListBuilder, BlockListError, BlockListOptions, BlockListStats, OpenMode,
    Record,
};
pub use crate::stack::{
    BulkInfo, ContentHash, FileMatch, LevelInfo, PruneStats, Stack, StackConfig, StackError,
    StackMetadata, StackStats, StackedFileInfo,
};
