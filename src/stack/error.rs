use crate::core::error::BlockListError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("Catalog error: {0}")]
    Store(#[from] BlockListError),

    #[error("Stack has been disposed")]
    Disposed,

    #[error("Level not found: {0}")]
    LevelNotFound(String),

    #[error("Bulk not found: {0}")]
    BulkNotFound(String),

    #[error("Could not generate a unique {kind} id after {attempts} attempts")]
    IdCollision { kind: &'static str, attempts: usize },

    #[error("Could not open source file {path:?}, it may already be open: {source}")]
    SourceFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot restore {first:?} and {second:?} into one directory, both are named {file_name}")]
    RestoreConflict {
        file_name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl StackError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StackError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn source_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StackError::SourceFile {
            path: path.into(),
            source,
        }
    }

    /// True when the error means the requested level or bulk does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StackError::LevelNotFound(_)
                | StackError::BulkNotFound(_)
                | StackError::Store(BlockListError::NotFound(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, StackError>;
