//! Blob Encoding
//!
//! The serialization collaborator: bincode-encoded [`Value`] blobs written
//! whole-file. A blob either exists fully on the filesystem or not at all as
//! far as the scheduler is concerned; concurrent writers never share a key.

use crate::storage::{StorageError, StorageResult};
use crate::value::Value;
use std::fs;
use std::path::Path;

/// Encode a value to bytes.
pub fn encode(value: &Value) -> StorageResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StorageError::Encode(e.to_string()))
}

/// Decode a value from bytes.
pub fn decode(bytes: &[u8]) -> StorageResult<Value> {
    bincode::deserialize(bytes).map_err(|e| StorageError::Decode(e.to_string()))
}

/// Write a value blob, creating parent directories as needed.
pub fn dump_blob(value: &Value, path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, encode(value)?)?;
    Ok(())
}

/// Read a value blob.
pub fn load_blob(path: &Path) -> StorageResult<Value> {
    let bytes = fs::read(path)?;
    decode(&bytes)
}
