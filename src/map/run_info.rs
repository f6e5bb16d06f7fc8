//! Run Manifest
//!
//! [`RunInfo`] is the immutable snapshot a run is scheduled from: resolved
//! shapes and masks, input blob paths, the mapspec list, and the storage
//! backend id. It is created once at the start of `run()`, written to
//! `<run_folder>/run_info.json` before any function executes, and read-only
//! thereafter. Its presence indicates a run was initiated, not that it
//! completed.
//!
//! ## Run folder layout
//!
//! ```text
//! <run_folder>/
//!     run_info.json                # manifest
//!     functions/<name>.blob        # descriptor per function
//!     inputs/<name>.blob           # one blob per root input
//!     outputs/<name>.blob          # one blob per un-mapped output
//!     outputs/<name>/shape         # JSON full shape per mapped output
//!     outputs/<name>/<k0>/<k1>/…   # one blob per cell key
//! ```

use crate::errors::Result;
use crate::map::shapes::{resolve_map_shapes, ResolvedShapes};
use crate::mapspec::MapSpec;
use crate::pipeline::Pipeline;
use crate::serialize;
use crate::storage::{open_storage, Storage, StorageError};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Serialized descriptor of a [`crate::pipeline::PipeFunc`]. The callable
/// itself is opaque; the descriptor is what run-folder tooling can inspect.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FuncDescriptor {
    name: String,
    parameters: Vec<String>,
    output_names: Vec<String>,
    mapspec: Option<String>,
}

/// On-disk form of the manifest. Shapes and masks serialize as pair lists,
/// `[["y", [3, 2]], …]`, keeping the JSON stable and diffable.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    functions: Vec<PathBuf>,
    inputs: BTreeMap<String, PathBuf>,
    shapes: Vec<(String, Vec<usize>)>,
    shape_masks: Vec<(String, Vec<bool>)>,
    mapspecs: Vec<String>,
    storage_id: String,
    run_folder: PathBuf,
}

/// Immutable snapshot of one run.
#[derive(Debug, Clone)]
pub struct RunInfo {
    input_paths: BTreeMap<String, PathBuf>,
    function_paths: Vec<PathBuf>,
    shapes: BTreeMap<String, Vec<usize>>,
    shape_masks: BTreeMap<String, Vec<bool>>,
    mapspecs_as_strings: Vec<String>,
    storage_id: String,
    run_folder: PathBuf,
}

impl RunInfo {
    /// Resolve and freeze everything the scheduler needs.
    pub fn create(
        run_folder: &Path,
        pipeline: &Pipeline,
        inputs: &HashMap<String, Value>,
        internal_shapes: &HashMap<String, Vec<usize>>,
        storage_id: &str,
        cleanup: bool,
    ) -> Result<Self> {
        fs::create_dir_all(run_folder).map_err(StorageError::Io)?;
        if cleanup {
            clean_run_folder(run_folder);
        }

        let function_paths = dump_functions(pipeline, run_folder)?;
        let input_paths = dump_inputs(inputs, run_folder)?;
        let ResolvedShapes { shapes, masks } =
            resolve_map_shapes(pipeline, inputs, internal_shapes)?;

        debug!(
            run_folder = %run_folder.display(),
            outputs = shapes.len(),
            "resolved run shapes"
        );

        Ok(RunInfo {
            input_paths,
            function_paths,
            shapes,
            shape_masks: masks,
            mapspecs_as_strings: pipeline.mapspecs_as_strings(),
            storage_id: storage_id.to_string(),
            run_folder: run_folder.to_path_buf(),
        })
    }

    /// Write `run_info.json`. Called before any function executes.
    pub fn dump(&self) -> Result<()> {
        let manifest = Manifest {
            functions: self.function_paths.clone(),
            inputs: self.input_paths.clone(),
            shapes: self.shapes.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            shape_masks: self
                .shape_masks
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            mapspecs: self.mapspecs_as_strings.clone(),
            storage_id: self.storage_id.clone(),
            run_folder: fs::canonicalize(&self.run_folder)?,
        };
        let path = self.run_folder.join("run_info.json");
        fs::write(&path, serde_json::to_string_pretty(&manifest)?)?;
        Ok(())
    }

    /// Read a manifest back from a run folder.
    pub fn load(run_folder: &Path) -> Result<Self> {
        let path = run_folder.join("run_info.json");
        let manifest: Manifest = serde_json::from_str(&fs::read_to_string(path)?)?;
        Ok(RunInfo {
            input_paths: manifest.inputs,
            function_paths: manifest.functions,
            shapes: manifest.shapes.into_iter().collect(),
            shape_masks: manifest.shape_masks.into_iter().collect(),
            mapspecs_as_strings: manifest.mapspecs,
            storage_id: manifest.storage_id,
            run_folder: run_folder.to_path_buf(),
        })
    }

    /// Open one storage per mapspec-produced output name. Every member of a
    /// tuple output shares its function's shape and mask.
    pub fn init_store(&self) -> Result<BTreeMap<String, Arc<dyn Storage>>> {
        let mut store: BTreeMap<String, Arc<dyn Storage>> = BTreeMap::new();
        for spec in &self.mapspecs_as_strings {
            let mapspec: MapSpec = spec.parse()?;
            for name in mapspec.output_names() {
                let shape = self.shapes[name].clone();
                let mask = self.shape_masks[name].clone();
                let dir = self.run_folder.join("outputs").join(name);
                store.insert(
                    name.to_string(),
                    open_storage(&self.storage_id, &dir, shape, mask)?,
                );
            }
        }
        Ok(store)
    }

    pub fn input_paths(&self) -> &BTreeMap<String, PathBuf> {
        &self.input_paths
    }

    pub fn shapes(&self) -> &BTreeMap<String, Vec<usize>> {
        &self.shapes
    }

    pub fn shape_masks(&self) -> &BTreeMap<String, Vec<bool>> {
        &self.shape_masks
    }

    pub fn mapspecs_as_strings(&self) -> &[String] {
        &self.mapspecs_as_strings
    }

    pub fn storage_id(&self) -> &str {
        &self.storage_id
    }

    pub fn run_folder(&self) -> &Path {
        &self.run_folder
    }

    /// Whether `name` has any externally iterated dimension (i.e. lives in a
    /// cell store rather than a single output blob).
    pub fn is_mapped(&self, name: &str) -> bool {
        self.shape_masks
            .get(name)
            .is_some_and(|mask| mask.iter().any(|&m| m))
    }
}

/// Path of the single-value blob for an un-mapped output.
pub fn output_blob_path(run_folder: &Path, output_name: &str) -> PathBuf {
    run_folder.join("outputs").join(format!("{output_name}.blob"))
}

fn clean_run_folder(run_folder: &Path) {
    for sub in ["functions", "inputs", "outputs"] {
        let _ = fs::remove_dir_all(run_folder.join(sub));
    }
}

fn dump_functions(pipeline: &Pipeline, run_folder: &Path) -> Result<Vec<PathBuf>> {
    let folder = run_folder.join("functions");
    fs::create_dir_all(&folder).map_err(StorageError::Io)?;
    let mut paths = Vec::new();
    for func in pipeline.sorted_functions() {
        let descriptor = FuncDescriptor {
            name: func.name().to_string(),
            parameters: func.parameters().to_vec(),
            output_names: func.output_name().names().to_vec(),
            mapspec: func.mapspec().map(ToString::to_string),
        };
        let bytes = bincode::serialize(&descriptor)
            .map_err(|e| StorageError::Encode(e.to_string()))?;
        let path = folder.join(format!("{}.blob", func.name()));
        fs::write(&path, bytes).map_err(StorageError::Io)?;
        paths.push(path);
    }
    Ok(paths)
}

fn dump_inputs(
    inputs: &HashMap<String, Value>,
    run_folder: &Path,
) -> Result<BTreeMap<String, PathBuf>> {
    let folder = run_folder.join("inputs");
    fs::create_dir_all(&folder).map_err(StorageError::Io)?;
    let mut paths = BTreeMap::new();
    for (name, value) in inputs {
        let path = folder.join(format!("{name}.blob"));
        serialize::dump_blob(value, &path)?;
        paths.insert(name.clone(), path);
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipeFunc;
    use tempfile::TempDir;

    fn pipeline() -> Pipeline {
        let double = PipeFunc::new("double", &["x"], "y", |kw| Ok(Value::Int(kw.int("x")? * 2)))
            .with_mapspec("x[i] -> y[i]")
            .unwrap();
        Pipeline::new(vec![double]).unwrap()
    }

    fn inputs() -> HashMap<String, Value> {
        HashMap::from([("x".to_string(), Value::from(vec![1i64, 2, 3]))])
    }

    #[test]
    fn test_create_writes_functions_and_inputs() {
        let temp = TempDir::new().unwrap();
        let info = RunInfo::create(
            temp.path(),
            &pipeline(),
            &inputs(),
            &HashMap::new(),
            "file_array",
            true,
        )
        .unwrap();

        assert!(temp.path().join("functions/double.blob").is_file());
        assert!(temp.path().join("inputs/x.blob").is_file());
        assert_eq!(info.shapes()["y"], vec![3]);
        assert_eq!(info.shape_masks()["y"], vec![true]);
        assert!(info.is_mapped("y"));
    }

    #[test]
    fn test_dump_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let info = RunInfo::create(
            temp.path(),
            &pipeline(),
            &inputs(),
            &HashMap::new(),
            "file_array",
            true,
        )
        .unwrap();
        info.dump().unwrap();

        let loaded = RunInfo::load(temp.path()).unwrap();
        assert_eq!(loaded.shapes(), info.shapes());
        assert_eq!(loaded.shape_masks(), info.shape_masks());
        assert_eq!(loaded.mapspecs_as_strings(), info.mapspecs_as_strings());
        assert_eq!(loaded.storage_id(), "file_array");
    }

    #[test]
    fn test_manifest_json_layout() {
        let temp = TempDir::new().unwrap();
        let info = RunInfo::create(
            temp.path(),
            &pipeline(),
            &inputs(),
            &HashMap::new(),
            "file_array",
            true,
        )
        .unwrap();
        info.dump().unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(temp.path().join("run_info.json")).unwrap())
                .unwrap();
        // BTreeMap ordering: "x" (root input) precedes "y" (output).
        assert_eq!(raw["shapes"][0][0], "x");
        assert_eq!(raw["shapes"][1][0], "y");
        assert_eq!(raw["shapes"][1][1][0], 3);
        assert_eq!(raw["mapspecs"][0], "x[i] -> y[i]");
        assert_eq!(raw["storage_id"], "file_array");
        assert!(raw["inputs"]["x"].as_str().unwrap().ends_with("x.blob"));
    }

    #[test]
    fn test_init_store_opens_mapped_outputs() {
        let temp = TempDir::new().unwrap();
        let info = RunInfo::create(
            temp.path(),
            &pipeline(),
            &inputs(),
            &HashMap::new(),
            "file_array",
            true,
        )
        .unwrap();
        let store = info.init_store().unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store["y"].shape(), &[3]);
        assert!(temp.path().join("outputs/y/shape").is_file());
    }

    #[test]
    fn test_cleanup_removes_prior_outputs() {
        let temp = TempDir::new().unwrap();
        let stale = temp.path().join("outputs/y/0");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, b"stale").unwrap();

        RunInfo::create(
            temp.path(),
            &pipeline(),
            &inputs(),
            &HashMap::new(),
            "file_array",
            true,
        )
        .unwrap();
        assert!(!stale.exists());
    }

    #[test]
    fn test_no_cleanup_preserves_outputs() {
        let temp = TempDir::new().unwrap();
        let kept = temp.path().join("outputs/y/0");
        fs::create_dir_all(kept.parent().unwrap()).unwrap();
        fs::write(&kept, b"kept").unwrap();

        RunInfo::create(
            temp.path(),
            &pipeline(),
            &inputs(),
            &HashMap::new(),
            "file_array",
            false,
        )
        .unwrap();
        assert!(kept.exists());
    }
}
