//! Storage Error Types

use crate::value::ValueError;
use std::io;
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON manifest error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Blob encoding failure
    #[error("encode error: {0}")]
    Encode(String),

    /// Blob decoding failure
    #[error("decode error: {0}")]
    Decode(String),

    /// No storage backend registered under this id
    #[error("unknown storage id `{0}`")]
    UnknownStorageId(String),

    /// An existing shape manifest disagrees with the requested shape
    #[error("shape manifest at {path} holds {existing:?}, expected {requested:?}")]
    ShapeMismatch {
        path: String,
        existing: Vec<usize>,
        requested: Vec<usize>,
    },

    /// A cell was read before it was written
    #[error("cell {key:?} is missing from `{dir}`")]
    MissingCell { dir: String, key: Vec<usize> },

    /// A stored cell value does not match the expected internal shape
    #[error(transparent)]
    Value(#[from] ValueError),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
