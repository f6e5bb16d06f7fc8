//! Storage Module
//!
//! One [`Storage`] instance backs one mapped output: a sharded N-D array
//! with one blob per cell key, a JSON shape manifest, and a lazy
//! materialization path for downstream consumers.
//!
//! ## Layout
//!
//! ```text
//! outputs/<name>/
//!     shape            # JSON: [d0, d1, …]   (full shape, manifest)
//!     <k0>/<k1>/…      # one blob per external cell key
//! ```
//!
//! Cells are keyed by the *external* multi-index (the dimensions the
//! scheduler iterates); dimensions a single call produces internally live
//! inside the cell value and are spliced into place by [`Storage::to_array`].
//!
//! ## Backends
//!
//! - [`FileArray`] (`file_array`): blob-per-cell on disk, safe for
//!   concurrent workers on distinct keys.
//! - [`MemoryArray`] (`memory`): in-process map, single-threaded runs only,
//!   flushed to the file layout by [`Storage::persist`].

pub mod error;
mod file_array;
mod memory;

pub use error::{StorageError, StorageResult};
pub use file_array::FileArray;
pub use memory::MemoryArray;

use crate::shape::{external_shape, prod};
use crate::value::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Pluggable backend for one mapped output array.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Registry id of the backend (`"file_array"`, `"memory"`).
    fn storage_id(&self) -> &'static str;

    /// Full shape: external dims interleaved with internal dims per the mask.
    fn shape(&self) -> &[usize];

    /// `true` marks an external (scheduler-iterated) dimension.
    fn mask(&self) -> &[bool];

    /// Write one cell. `key` is the external multi-index. Distinct keys may
    /// be written concurrently; the scheduler never issues same-key writes.
    fn dump(&self, key: &[usize], value: &Value) -> StorageResult<()>;

    /// Read one cell by external multi-index.
    fn get(&self, key: &[usize]) -> StorageResult<Value>;

    /// Whether the cell for `key` has been written.
    fn has(&self, key: &[usize]) -> bool;

    /// Missing-cell bitmap in linear order over the external shape
    /// (`true` = missing, must be computed).
    fn mask_linear(&self) -> Vec<bool>;

    /// Materialize the whole array as a nested [`Value`] of the full shape.
    fn to_array(&self) -> StorageResult<Value>;

    /// Whether concurrent workers may write through this backend.
    fn parallelizable(&self) -> bool;

    /// Flush in-memory contents to disk. A no-op for file-backed stores.
    fn persist(&self) -> StorageResult<()>;

    /// Read the cell at a linear position in the external iteration order.
    fn get_from_index(&self, linear: usize) -> StorageResult<Value> {
        let ext = external_shape(self.shape(), self.mask());
        let key = crate::shape::unravel_index(linear, &ext);
        self.get(&key)
    }

    /// Number of cells (product of the external dims).
    fn num_cells(&self) -> usize {
        prod(&external_shape(self.shape(), self.mask()))
    }
}

/// Open a storage backend by registry id.
pub fn open_storage(
    storage_id: &str,
    dir: &Path,
    shape: Vec<usize>,
    mask: Vec<bool>,
) -> StorageResult<Arc<dyn Storage>> {
    match storage_id {
        "file_array" => Ok(Arc::new(FileArray::open(dir, shape, mask)?)),
        "memory" => Ok(Arc::new(MemoryArray::open(dir, shape, mask)?)),
        other => Err(StorageError::UnknownStorageId(other.to_string())),
    }
}

/// Path of the cell blob for `key` under `dir`: `<dir>/<k0>/<k1>/…`.
pub(crate) fn cell_path(dir: &Path, key: &[usize]) -> PathBuf {
    let mut path = dir.to_path_buf();
    for k in key {
        path.push(k.to_string());
    }
    path
}

/// Write the JSON `shape` manifest, or verify an existing one.
pub(crate) fn write_shape_manifest(dir: &Path, shape: &[usize]) -> StorageResult<()> {
    let path = dir.join("shape");
    if path.exists() {
        let existing: Vec<usize> = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        if existing != shape {
            return Err(StorageError::ShapeMismatch {
                path: path.display().to_string(),
                existing,
                requested: shape.to_vec(),
            });
        }
        return Ok(());
    }
    std::fs::write(&path, serde_json::to_string(shape)?)?;
    Ok(())
}

/// Materialize a store into a nested value of the full shape, splicing each
/// cell's internal dims into their masked positions.
pub(crate) fn materialize(store: &dyn Storage) -> StorageResult<Value> {
    let shape = store.shape();
    let mask = store.mask();
    let ext = external_shape(shape, mask);
    let int = crate::shape::internal_shape(shape, mask);
    let mut flat = vec![Value::Null; prod(shape)];

    for ext_index in crate::shape::iterate_indices(&ext) {
        let cell = store.get(&ext_index)?;
        for int_index in crate::shape::iterate_indices(&int) {
            let full_index = crate::shape::select_by_mask(mask, &ext_index, &int_index);
            flat[crate::shape::ravel_index(&full_index, shape)] = cell.get(&int_index)?.clone();
        }
    }

    Ok(Value::from_flat(shape, &flat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_storage_unknown_id() {
        let temp = TempDir::new().unwrap();
        let result = open_storage("zarr", temp.path(), vec![2], vec![true]);
        assert!(matches!(result, Err(StorageError::UnknownStorageId(_))));
    }

    #[test]
    fn test_cell_path_nests_key_components() {
        let path = cell_path(Path::new("/out/y"), &[0, 2, 1]);
        assert_eq!(path, PathBuf::from("/out/y/0/2/1"));
    }

    #[test]
    fn test_shape_manifest_idempotent() {
        let temp = TempDir::new().unwrap();
        write_shape_manifest(temp.path(), &[3, 2]).unwrap();
        write_shape_manifest(temp.path(), &[3, 2]).unwrap();
        let err = write_shape_manifest(temp.path(), &[4]).unwrap_err();
        assert!(matches!(err, StorageError::ShapeMismatch { .. }));
    }
}
