//! Block list storage engine
//!
//! A block list persists an ordered collection of records of one type inside
//! a single file. The file holds a fixed header, a self-describing directory
//! of block descriptors, and the record blocks themselves.
//!
//! - [`header`] - 64-byte file header with magic, version, and checksum
//! - [`directory`] - descriptor arena with tagged block kinds
//! - [`io`] - positioned reads and writes on the backing file
//! - [`cache`] - bounded value cache (no eviction)
//! - [`count`] - lazily computed record count
//! - [`record`] - codec and record type registry
//! - [`config`] - options, open modes, and the builder
//! - [`block_list`] - the store and its guarded enumerator
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            Block List File                  │
//! ├─────────────────────────────────────────────┤
//! │ Header (64 bytes)                           │
//! │  - Magic: "BLST\x00\x01\x00\x00"            │
//! │  - Record type tag, record count            │
//! │  - Root directory page descriptor           │
//! ├─────────────────────────────────────────────┤
//! │ Directory page 0 (block 0)                  │
//! │  - 22-byte descriptors, last slot links on  │
//! ├─────────────────────────────────────────────┤
//! │ Record blocks and further directory pages   │
//! │  - Interleaved in allocation order          │
//! │  - Records chained head → fragment → ...    │
//! └─────────────────────────────────────────────┘
//! ```

pub mod block_list;
pub mod cache;
pub mod config;
pub mod count;
pub mod directory;
pub mod error;
pub mod header;
pub mod io;
pub mod record;

// Re-export commonly used types
pub use block_list::{BlockList, BlockListStats, Iter, ReadGuard};
pub use cache::CacheStats;
pub use config::{BlockListBuilder, BlockListOptions, OpenMode};
pub use directory::{BlockDescriptor, BlockId, BlockKind};
pub use error::{BlockListError, Result};
pub use header::{Header, HEADER_SIZE};
pub use record::Record;
