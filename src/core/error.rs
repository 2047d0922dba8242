use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlockListError {
    #[error("Invalid magic number in header")]
    InvalidMagic,

    #[error("Unsupported format version: {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("Header checksum verification failed")]
    ChecksumMismatch,

    #[error("Not a valid block list: {0}")]
    InvalidFormat(String),

    #[error("Record type mismatch: expected {expected}, file holds {found}")]
    RecordTypeMismatch {
        expected: &'static str,
        found: String,
    },

    #[error("Block list has been disposed")]
    Disposed,

    #[error("Cannot mutate while {readers} enumeration(s) are open")]
    ConcurrentMutation { readers: usize },

    #[error("Index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Record of {0} bytes exceeds the maximum block length")]
    RecordTooLarge(usize),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),
}

impl BlockListError {
    /// True for every error that means "this file is not a usable block list"
    pub fn is_invalid_format(&self) -> bool {
        matches!(
            self,
            BlockListError::InvalidMagic
                | BlockListError::UnsupportedVersion { .. }
                | BlockListError::ChecksumMismatch
                | BlockListError::InvalidFormat(_)
                | BlockListError::RecordTypeMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BlockListError>;
