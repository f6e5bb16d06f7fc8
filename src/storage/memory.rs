//! In-Memory Cell Array
//!
//! Keeps cells in a process-local map. Not parallelizable: the scheduler
//! rejects `parallel=true` runs over this backend before any function
//! executes. `persist` flushes cells to the same on-disk layout as
//! [`super::FileArray`], and `open` re-reads any cells already flushed there,
//! so memory-backed runs still resume.

use super::{cell_path, materialize, write_shape_manifest, Storage, StorageError, StorageResult};
use crate::serialize;
use crate::shape::{external_shape, iterate_indices};
use crate::value::Value;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Map-backed array with an on-disk flush path.
#[derive(Debug)]
pub struct MemoryArray {
    dir: PathBuf,
    shape: Vec<usize>,
    mask: Vec<bool>,
    cells: RwLock<HashMap<Vec<usize>, Value>>,
}

impl MemoryArray {
    /// Open the array, loading any previously persisted cells from `dir`.
    pub fn open(dir: &Path, shape: Vec<usize>, mask: Vec<bool>) -> StorageResult<Self> {
        debug_assert_eq!(shape.len(), mask.len());
        fs::create_dir_all(dir)?;
        write_shape_manifest(dir, &shape)?;

        let mut cells = HashMap::new();
        for key in iterate_indices(&external_shape(&shape, &mask)) {
            let path = cell_path(dir, &key);
            if path.is_file() {
                cells.insert(key, serialize::load_blob(&path)?);
            }
        }

        Ok(MemoryArray {
            dir: dir.to_path_buf(),
            shape,
            mask,
            cells: RwLock::new(cells),
        })
    }
}

impl Storage for MemoryArray {
    fn storage_id(&self) -> &'static str {
        "memory"
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn mask(&self) -> &[bool] {
        &self.mask
    }

    fn dump(&self, key: &[usize], value: &Value) -> StorageResult<()> {
        self.cells.write().insert(key.to_vec(), value.clone());
        Ok(())
    }

    fn get(&self, key: &[usize]) -> StorageResult<Value> {
        self.cells
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::MissingCell {
                dir: self.dir.display().to_string(),
                key: key.to_vec(),
            })
    }

    fn has(&self, key: &[usize]) -> bool {
        self.cells.read().contains_key(key)
    }

    fn mask_linear(&self) -> Vec<bool> {
        let cells = self.cells.read();
        iterate_indices(&external_shape(&self.shape, &self.mask))
            .map(|key| !cells.contains_key(&key))
            .collect()
    }

    fn to_array(&self) -> StorageResult<Value> {
        materialize(self)
    }

    fn parallelizable(&self) -> bool {
        false
    }

    fn persist(&self) -> StorageResult<()> {
        let cells = self.cells.read();
        for (key, value) in cells.iter() {
            serialize::dump_blob(value, &cell_path(&self.dir, key))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dump_get_and_mask() {
        let temp = TempDir::new().unwrap();
        let array = MemoryArray::open(&temp.path().join("y"), vec![3], vec![true]).unwrap();

        array.dump(&[1], &Value::Int(4)).unwrap();
        assert_eq!(array.get(&[1]).unwrap(), Value::Int(4));
        assert_eq!(array.mask_linear(), vec![true, false, true]);
        assert!(!array.parallelizable());
    }

    #[test]
    fn test_persist_then_reopen() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("y");
        {
            let array = MemoryArray::open(&dir, vec![2], vec![true]).unwrap();
            array.dump(&[0], &Value::Int(1)).unwrap();
            array.dump(&[1], &Value::Int(2)).unwrap();
            array.persist().unwrap();
        }
        // Cells flushed by persist() survive into a fresh instance.
        let array = MemoryArray::open(&dir, vec![2], vec![true]).unwrap();
        assert_eq!(array.mask_linear(), vec![false, false]);
        assert_eq!(array.get(&[1]).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_unpersisted_cells_do_not_survive() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("y");
        {
            let array = MemoryArray::open(&dir, vec![1], vec![true]).unwrap();
            array.dump(&[0], &Value::Int(1)).unwrap();
        }
        let array = MemoryArray::open(&dir, vec![1], vec![true]).unwrap();
        assert_eq!(array.mask_linear(), vec![true]);
    }
}
