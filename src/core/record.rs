//! Record codec and type registry
//!
//! A block list stores values of exactly one [`Record`] type. The type's tag
//! is written into the file header, so opening a file with the wrong record
//! type fails instead of decoding garbage.

use crate::core::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Well-known record type tags
pub mod tags {
    pub const STRING: u32 = 0x0001;
    pub const BYTES: u32 = 0x0002;
    pub const BULK_INFO: u32 = 0x0101;
    pub const LEVEL_INFO: u32 = 0x0102;
    pub const STACK_METADATA: u32 = 0x0103;
}

/// Every tag this crate knows about, with a display name
pub const REGISTRY: &[(u32, &str)] = &[
    (tags::STRING, "string"),
    (tags::BYTES, "bytes"),
    (tags::BULK_INFO, "bulk info"),
    (tags::LEVEL_INFO, "level info"),
    (tags::STACK_METADATA, "stack metadata"),
];

/// Display name for a tag read from disk
pub fn type_name(tag: u32) -> String {
    REGISTRY
        .iter()
        .find(|(known, _)| *known == tag)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("unknown type {:#06x}", tag))
}

/// A value that can be stored in a block list
pub trait Record: Serialize + DeserializeOwned + Clone + PartialEq + Debug {
    /// Stable tag persisted in the file header
    const TYPE_TAG: u32;

    /// Human-readable name used in errors and logs
    const TYPE_NAME: &'static str;
}

impl Record for String {
    const TYPE_TAG: u32 = tags::STRING;
    const TYPE_NAME: &'static str = "string";
}

impl Record for Vec<u8> {
    const TYPE_TAG: u32 = tags::BYTES;
    const TYPE_NAME: &'static str = "bytes";
}

pub fn encode<T: Record>(record: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(record)?)
}

pub fn decode<T: Record>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}
