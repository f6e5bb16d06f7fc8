//! File-Backed Cell Array
//!
//! The default storage backend: one blob file per cell under the array's
//! directory, nested by key component. Distinct cells land at distinct paths,
//! so concurrent workers need no coordination; a cell either exists fully or
//! not at all.

use super::{cell_path, materialize, write_shape_manifest, Storage, StorageError, StorageResult};
use crate::serialize;
use crate::shape::{external_shape, iterate_indices};
use crate::value::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Blob-per-cell array on disk.
#[derive(Debug)]
pub struct FileArray {
    dir: PathBuf,
    shape: Vec<usize>,
    mask: Vec<bool>,
}

impl FileArray {
    /// Open (or create) the array directory and its shape manifest.
    ///
    /// Re-opening an existing directory with the same shape is idempotent;
    /// a differing shape is a [`StorageError::ShapeMismatch`].
    pub fn open(dir: &Path, shape: Vec<usize>, mask: Vec<bool>) -> StorageResult<Self> {
        debug_assert_eq!(shape.len(), mask.len());
        fs::create_dir_all(dir)?;
        write_shape_manifest(dir, &shape)?;
        Ok(FileArray {
            dir: dir.to_path_buf(),
            shape,
            mask,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Storage for FileArray {
    fn storage_id(&self) -> &'static str {
        "file_array"
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn mask(&self) -> &[bool] {
        &self.mask
    }

    fn dump(&self, key: &[usize], value: &Value) -> StorageResult<()> {
        serialize::dump_blob(value, &cell_path(&self.dir, key))
    }

    fn get(&self, key: &[usize]) -> StorageResult<Value> {
        let path = cell_path(&self.dir, key);
        if !path.is_file() {
            return Err(StorageError::MissingCell {
                dir: self.dir.display().to_string(),
                key: key.to_vec(),
            });
        }
        serialize::load_blob(&path)
    }

    fn has(&self, key: &[usize]) -> bool {
        cell_path(&self.dir, key).is_file()
    }

    fn mask_linear(&self) -> Vec<bool> {
        iterate_indices(&external_shape(&self.shape, &self.mask))
            .map(|key| !self.has(&key))
            .collect()
    }

    fn to_array(&self) -> StorageResult<Value> {
        materialize(self)
    }

    fn parallelizable(&self) -> bool {
        true
    }

    fn persist(&self) -> StorageResult<()> {
        // Cells are already on disk.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Key;
    use tempfile::TempDir;

    fn open(temp: &TempDir, shape: Vec<usize>, mask: Vec<bool>) -> FileArray {
        FileArray::open(&temp.path().join("y"), shape, mask).unwrap()
    }

    #[test]
    fn test_dump_and_get_roundtrip() {
        let temp = TempDir::new().unwrap();
        let array = open(&temp, vec![3, 2], vec![true, true]);

        array.dump(&[1, 0], &Value::Int(7)).unwrap();
        assert_eq!(array.get(&[1, 0]).unwrap(), Value::Int(7));
        assert!(array.has(&[1, 0]));
        assert!(!array.has(&[0, 0]));
    }

    #[test]
    fn test_cell_blob_layout() {
        let temp = TempDir::new().unwrap();
        let array = open(&temp, vec![3, 2], vec![true, true]);
        array.dump(&[2, 1], &Value::Int(1)).unwrap();
        assert!(temp.path().join("y/2/1").is_file());
        assert!(temp.path().join("y/shape").is_file());
    }

    #[test]
    fn test_mask_linear_orders_by_linear_index() {
        let temp = TempDir::new().unwrap();
        let array = open(&temp, vec![2, 2], vec![true, true]);
        array.dump(&[0, 1], &Value::Int(1)).unwrap();
        array.dump(&[1, 0], &Value::Int(2)).unwrap();
        // linear order: (0,0) (0,1) (1,0) (1,1); true = missing
        assert_eq!(array.mask_linear(), vec![true, false, false, true]);
    }

    #[test]
    fn test_get_from_index() {
        let temp = TempDir::new().unwrap();
        let array = open(&temp, vec![2, 2], vec![true, true]);
        array.dump(&[1, 0], &Value::Int(5)).unwrap();
        assert_eq!(array.get_from_index(2).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_to_array_external_only() {
        let temp = TempDir::new().unwrap();
        let array = open(&temp, vec![2, 2], vec![true, true]);
        for (linear, key) in [[0, 0], [0, 1], [1, 0], [1, 1]].iter().enumerate() {
            array.dump(key, &Value::Int(linear as i64)).unwrap();
        }
        let nested = array.to_array().unwrap();
        assert_eq!(nested.get(&[1, 0]).unwrap(), &Value::Int(2));
        assert_eq!(nested.shape(), vec![2, 2]);
    }

    #[test]
    fn test_to_array_splices_internal_dims() {
        let temp = TempDir::new().unwrap();
        // full shape (2, 3): axis 0 external, axis 1 internal
        let array = open(&temp, vec![2, 3], vec![true, false]);
        array.dump(&[0], &Value::from(vec![1i64, 2, 3])).unwrap();
        array.dump(&[1], &Value::from(vec![4i64, 5, 6])).unwrap();

        let nested = array.to_array().unwrap();
        assert_eq!(nested.shape(), vec![2, 3]);
        assert_eq!(nested.get(&[1, 2]).unwrap(), &Value::Int(6));
        assert_eq!(
            nested.select(&[Key::Index(0), Key::Slice]).unwrap(),
            Value::from(vec![1i64, 2, 3])
        );
    }

    #[test]
    fn test_to_array_missing_cell_errors() {
        let temp = TempDir::new().unwrap();
        let array = open(&temp, vec![2], vec![true]);
        array.dump(&[0], &Value::Int(1)).unwrap();
        assert!(matches!(
            array.to_array(),
            Err(StorageError::MissingCell { .. })
        ));
    }

    #[test]
    fn test_reopen_preserves_cells() {
        let temp = TempDir::new().unwrap();
        {
            let array = open(&temp, vec![2], vec![true]);
            array.dump(&[1], &Value::Int(9)).unwrap();
        }
        let array = open(&temp, vec![2], vec![true]);
        assert_eq!(array.mask_linear(), vec![true, false]);
        assert_eq!(array.get(&[1]).unwrap(), Value::Int(9));
    }

    #[test]
    fn test_parallelizable() {
        let temp = TempDir::new().unwrap();
        assert!(open(&temp, vec![1], vec![true]).parallelizable());
    }
}
