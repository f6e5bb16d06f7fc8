//! Scheduler
//!
//! Walks the pipeline's topological generations. Every function either runs
//! once (no mapspec) or fans out over the external shape of its output, one
//! task per missing cell. Generations are strict barriers: a generation's
//! tasks all complete before the next generation assembles its kwargs.
//!
//! Resumability: a cell (or single-output blob) that already exists on disk
//! is never recomputed; the scheduler reads it back instead. Cells written
//! before a failure stay on disk, so a rerun with `cleanup = false` picks up
//! where the failed run stopped.

use crate::cache::BlobCache;
use crate::errors::{Result, RunError};
use crate::map::executor::{Executor, SequentialExecutor, ThreadPoolExecutor};
use crate::map::run_info::{output_blob_path, RunInfo};
use crate::mapspec::{Axis, MapSpec};
use crate::pipeline::{PipeFunc, Pipeline};
use crate::serialize;
use crate::shape::{
    external_shape, internal_shape, iterate_indices, prod, ravel_index, select_by_mask,
    unravel_index, Key,
};
use crate::storage::Storage;
use crate::value::{Kwargs, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Options controlling one `run()` invocation.
#[derive(Clone)]
pub struct RunOptions {
    /// Shapes for outputs that cannot be inferred from the inputs.
    pub internal_shapes: Option<HashMap<String, Vec<usize>>>,
    /// Fan map cells out over a worker pool.
    pub parallel: bool,
    /// Worker pool override; `None` builds a thread pool when `parallel`.
    pub executor: Option<Arc<dyn Executor>>,
    /// Pool size when the scheduler builds its own executor; `0` = all cores.
    pub num_threads: usize,
    /// Storage backend id for mapped outputs.
    pub storage: String,
    /// Flush memory-backed storage to disk after the run.
    pub persist_memory: bool,
    /// Remove prior run state from the run folder before starting.
    pub cleanup: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            internal_shapes: None,
            parallel: true,
            executor: None,
            num_threads: 0,
            storage: "file_array".to_string(),
            persist_memory: true,
            cleanup: true,
        }
    }
}

/// One named output of a completed run.
///
/// `store` is a lookup-only reference into the run's storage map by output
/// name; it never owns the storage.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub function: String,
    pub kwargs: Kwargs,
    pub output_name: String,
    pub output: Value,
    pub store: Option<String>,
}

/// Execute a pipeline over the given inputs, persisting state under
/// `run_folder`. Returns one [`RunOutput`] per output name.
pub fn run(
    pipeline: &Pipeline,
    inputs: &HashMap<String, Value>,
    run_folder: &Path,
    options: &RunOptions,
) -> Result<BTreeMap<String, RunOutput>> {
    validate_complete_inputs(pipeline, inputs)?;

    let internal_shapes = options.internal_shapes.clone().unwrap_or_default();
    let run_info = RunInfo::create(
        run_folder,
        pipeline,
        inputs,
        &internal_shapes,
        &options.storage,
        options.cleanup,
    )?;
    run_info.dump()?;

    let store = run_info.init_store()?;
    check_parallel(options.parallel, &store)?;
    let executor = build_executor(options)?;
    let cache = BlobCache::new();

    info!(
        run_folder = %run_folder.display(),
        functions = pipeline.functions().len(),
        parallel = options.parallel,
        storage = %options.storage,
        "starting pipeline run"
    );

    let mut results = BTreeMap::new();
    for generation in pipeline.topological_generations() {
        // Generation barrier: every function of this generation completes
        // before the next generation assembles kwargs from its outputs.
        for func in generation {
            run_function(
                func,
                pipeline,
                &run_info,
                &store,
                &cache,
                executor.as_ref(),
                &mut results,
            )?;
        }
    }

    if options.persist_memory {
        for storage in store.values() {
            storage.persist()?;
        }
    }

    info!(outputs = results.len(), "pipeline run complete");
    Ok(results)
}

/// Load outputs of a previous run: scalar values for un-mapped outputs,
/// fully materialized arrays for mapped ones.
pub fn load_outputs(names: &[&str], run_folder: &Path) -> Result<Vec<Value>> {
    let run_info = RunInfo::load(run_folder)?;
    let store = run_info.init_store()?;

    names
        .iter()
        .map(|&name| {
            if let Some(path) = run_info.input_paths().get(name) {
                return Ok(serialize::load_blob(path)?);
            }
            if run_info.is_mapped(name) {
                if let Some(storage) = store.get(name) {
                    return Ok(storage.to_array()?);
                }
            }
            let path = output_blob_path(run_folder, name);
            if path.is_file() {
                return Ok(serialize::load_blob(&path)?);
            }
            Err(RunError::UnknownOutput(name.to_string()))
        })
        .collect()
}

fn validate_complete_inputs(pipeline: &Pipeline, inputs: &HashMap<String, Value>) -> Result<()> {
    let mut missing: Vec<&str> = pipeline
        .root_args_all()
        .iter()
        .filter(|name| !inputs.contains_key(*name) && !pipeline.defaults().contains_key(*name))
        .map(String::as_str)
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    missing.sort_unstable();
    Err(RunError::MissingInputs(missing.join(", ")))
}

fn check_parallel(parallel: bool, store: &BTreeMap<String, Arc<dyn Storage>>) -> Result<()> {
    if !parallel {
        return Ok(());
    }
    for storage in store.values() {
        if !storage.parallelizable() {
            return Err(RunError::ParallelismUnsupported(
                storage.storage_id().to_string(),
            ));
        }
    }
    Ok(())
}

fn build_executor(options: &RunOptions) -> Result<Arc<dyn Executor>> {
    if !options.parallel {
        return Ok(Arc::new(SequentialExecutor));
    }
    if let Some(executor) = &options.executor {
        return Ok(Arc::clone(executor));
    }
    Ok(Arc::new(ThreadPoolExecutor::new(options.num_threads)?))
}

/// A parameter bound for one function call: an owned value, or a reference
/// to the upstream cell store (materialized only when needed).
#[derive(Clone)]
enum Binding {
    Val(Value),
    Store(Arc<dyn Storage>),
}

impl Binding {
    fn materialize(&self) -> Result<Value> {
        match self {
            Binding::Val(value) => Ok(value.clone()),
            Binding::Store(storage) => Ok(storage.to_array()?),
        }
    }
}

fn assemble_bindings(
    func: &PipeFunc,
    pipeline: &Pipeline,
    run_info: &RunInfo,
    store: &BTreeMap<String, Arc<dyn Storage>>,
    cache: &BlobCache,
) -> Result<BTreeMap<String, Binding>> {
    let mut bindings = BTreeMap::new();
    for param in func.parameters() {
        let binding = if let Some(path) = run_info.input_paths().get(param) {
            Binding::Val(cache.load(path)?)
        } else if let Some(storage) = store.get(param).filter(|_| run_info.is_mapped(param)) {
            Binding::Store(Arc::clone(storage))
        } else if pipeline.output_to_func(param).is_some() {
            // Un-mapped (or internal-only) upstream output: one blob.
            Binding::Val(cache.load(&output_blob_path(run_info.run_folder(), param))?)
        } else if let Some(default) = pipeline.defaults().get(param) {
            Binding::Val(default.clone())
        } else {
            return Err(RunError::MissingInputs(param.clone()));
        };
        bindings.insert(param.clone(), binding);
    }
    Ok(bindings)
}

fn run_function(
    func: &PipeFunc,
    pipeline: &Pipeline,
    run_info: &RunInfo,
    store: &BTreeMap<String, Arc<dyn Storage>>,
    cache: &BlobCache,
    executor: &dyn Executor,
    results: &mut BTreeMap<String, RunOutput>,
) -> Result<()> {
    let bindings = assemble_bindings(func, pipeline, run_info, store, cache)?;

    match func.mapspec() {
        Some(mapspec) if !mapspec.inputs().is_empty() => {
            let (kwargs, outputs) = run_mapped(func, mapspec, bindings, run_info, store, executor)?;
            for (name, output) in outputs {
                results.insert(
                    name.clone(),
                    RunOutput {
                        function: func.name().to_string(),
                        kwargs: kwargs.clone(),
                        output_name: name.clone(),
                        output,
                        store: Some(name),
                    },
                );
            }
        }
        _ => {
            let (kwargs, outputs) = run_single(func, bindings, run_info.run_folder())?;
            for (name, output) in func.output_name().names().iter().zip(outputs) {
                results.insert(
                    name.clone(),
                    RunOutput {
                        function: func.name().to_string(),
                        kwargs: kwargs.clone(),
                        output_name: name.clone(),
                        output,
                        store: None,
                    },
                );
            }
        }
    }
    Ok(())
}

/// Run a function once, resuming from its output blob(s) when present.
fn run_single(
    func: &PipeFunc,
    bindings: BTreeMap<String, Binding>,
    run_folder: &Path,
) -> Result<(Kwargs, Vec<Value>)> {
    let names = func.output_name().names();
    let paths: Vec<_> = names
        .iter()
        .map(|name| output_blob_path(run_folder, name))
        .collect();

    let kwargs: Kwargs = bindings
        .iter()
        .map(|(name, binding)| Ok((name.clone(), binding.materialize()?)))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .collect();

    if paths.iter().all(|p| p.is_file()) {
        debug!(function = func.name(), "resuming from existing output blobs");
        let outputs = paths
            .iter()
            .map(|p| Ok(serialize::load_blob(p)?))
            .collect::<Result<Vec<_>>>()?;
        return Ok((kwargs, outputs));
    }

    debug!(function = func.name(), "executing single call");
    let raw = func
        .call(&kwargs)
        .map_err(|e| RunError::function(func.name(), &kwargs, None, e))?;

    let mut outputs = Vec::with_capacity(names.len());
    for (name, path) in names.iter().zip(&paths) {
        let picked = func
            .pick(&raw, name)
            .map_err(|e| RunError::function(func.name(), &kwargs, None, e))?;
        serialize::dump_blob(&picked, path)?;
        outputs.push(picked);
    }
    Ok((kwargs, outputs))
}

/// Fan a mapped function out over its external shape.
fn run_mapped(
    func: &PipeFunc,
    mapspec: &MapSpec,
    bindings: BTreeMap<String, Binding>,
    run_info: &RunInfo,
    store: &BTreeMap<String, Arc<dyn Storage>>,
    executor: &dyn Executor,
) -> Result<(Kwargs, Vec<(String, Value)>)> {
    let names = func.output_name().names();
    let shape = run_info.shapes()[func.output_name().first()].clone();
    let mask = run_info.shape_masks()[func.output_name().first()].clone();
    let external = external_shape(&shape, &mask);
    let internal = internal_shape(&shape, &mask);
    let num_cells = prod(&external);

    let arrays: Vec<Arc<dyn Storage>> = names.iter().map(|n| Arc::clone(&store[n])).collect();
    let bindings = prepare_bindings(bindings, mapspec, run_info)?;

    // A cell must be (re)computed when any of the outputs misses it.
    let cell_masks: Vec<Vec<bool>> = arrays.iter().map(|a| a.mask_linear()).collect();
    let mut missing = Vec::new();
    let mut existing = Vec::new();
    for linear in 0..num_cells {
        if cell_masks.iter().any(|m| m[linear]) {
            missing.push(linear);
        } else {
            existing.push(linear);
        }
    }

    debug!(
        function = func.name(),
        cells = num_cells,
        missing = missing.len(),
        existing = existing.len(),
        "dispatching mapped function"
    );

    let task = |linear: usize| -> Result<Vec<Value>> {
        let selected = select_kwargs(mapspec, &bindings, &external, linear)?;
        let raw = func
            .call(&selected)
            .map_err(|e| RunError::function(func.name(), &selected, Some(linear), e))?;
        let key = mapspec.output_key(&external, linear);
        let mut outputs = Vec::with_capacity(names.len());
        for (name, array) in names.iter().zip(&arrays) {
            let picked = func
                .pick(&raw, name)
                .map_err(|e| RunError::function(func.name(), &selected, Some(linear), e))?;
            array.dump(&key, &picked)?;
            outputs.push(picked);
        }
        Ok(outputs)
    };
    let computed = executor.map_indices(&missing, &task)?;

    // Assemble one full-shape result array per output name.
    let total = prod(&shape);
    let mut flats: Vec<Vec<Value>> = names.iter().map(|_| vec![Value::Null; total]).collect();
    for (&linear, outputs) in missing.iter().zip(&computed) {
        for (flat, value) in flats.iter_mut().zip(outputs) {
            place_cell(flat, &shape, &mask, &external, &internal, linear, value)?;
        }
    }
    for &linear in &existing {
        for (flat, array) in flats.iter_mut().zip(&arrays) {
            let value = array.get_from_index(linear)?;
            place_cell(flat, &shape, &mask, &external, &internal, linear, &value)?;
        }
    }

    let kwargs: Kwargs = bindings
        .iter()
        .map(|(name, binding)| Ok((name.clone(), binding.materialize()?)))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .collect();

    let outputs = names
        .iter()
        .zip(flats)
        .map(|(name, flat)| (name.clone(), Value::from_flat(&shape, &flat)))
        .collect();
    Ok((kwargs, outputs))
}

/// Materialize store bindings the per-cell selection cannot index directly:
/// parameters outside the mapspec, and arrays whose pattern slices across an
/// external axis of the producer (the selection would span many cells).
fn prepare_bindings(
    bindings: BTreeMap<String, Binding>,
    mapspec: &MapSpec,
    run_info: &RunInfo,
) -> Result<BTreeMap<String, Binding>> {
    let mut prepared = BTreeMap::new();
    for (name, binding) in bindings {
        let binding = match &binding {
            Binding::Store(storage) => {
                let spec = mapspec.inputs().iter().find(|s| s.name == name);
                match spec {
                    None => Binding::Val(binding.materialize()?),
                    Some(spec) => {
                        let producer_mask = &run_info.shape_masks()[&name];
                        let slices_external = spec
                            .axes
                            .iter()
                            .zip(producer_mask.iter())
                            .any(|(axis, &ext)| ext && matches!(axis, Axis::Reduced));
                        if slices_external {
                            Binding::Val(binding.materialize()?)
                        } else {
                            Binding::Store(Arc::clone(storage))
                        }
                    }
                }
            }
            Binding::Val(_) => binding,
        };
        prepared.insert(name, binding);
    }
    Ok(prepared)
}

fn select_kwargs(
    mapspec: &MapSpec,
    bindings: &BTreeMap<String, Binding>,
    external: &[usize],
    linear: usize,
) -> Result<Kwargs> {
    let keys: HashMap<String, Vec<Key>> = mapspec.input_keys(external, linear).into_iter().collect();
    let mut selected = Kwargs::new();
    for (name, binding) in bindings {
        match keys.get(name) {
            // Parameters outside the mapspec pass through whole.
            None => selected.insert(name.clone(), binding.materialize()?),
            Some(key) => {
                let value = match binding {
                    Binding::Val(value) => value.select(key)?,
                    Binding::Store(storage) => storage_select(storage.as_ref(), key)?,
                };
                selected.insert(name.clone(), value);
            }
        }
    }
    Ok(selected)
}

/// Resolve a full-rank key against a cell store: the external positions pick
/// the cell, the internal positions select within the cell value.
fn storage_select(storage: &dyn Storage, keys: &[Key]) -> Result<Value> {
    let mask = storage.mask();
    let crosses_cells = keys
        .iter()
        .zip(mask)
        .any(|(key, &ext)| ext && key.index().is_none());
    if crosses_cells {
        // Slice over an external axis spans many cells.
        return Ok(storage.to_array()?.select(keys)?);
    }

    let mut cell_key = Vec::new();
    let mut inner = Vec::new();
    for (key, &ext) in keys.iter().zip(mask) {
        if ext {
            cell_key.push(key.index().expect("checked above"));
        } else {
            inner.push(*key);
        }
    }
    let cell = storage.get(&cell_key)?;
    Ok(cell.select(&inner)?)
}

/// Place one cell's value into the flat full-shape result array, spreading
/// internal dims into their masked positions.
fn place_cell(
    flat: &mut [Value],
    shape: &[usize],
    mask: &[bool],
    external: &[usize],
    internal: &[usize],
    linear: usize,
    value: &Value,
) -> Result<()> {
    let ext_index = unravel_index(linear, external);
    for int_index in iterate_indices(internal) {
        let full = select_by_mask(mask, &ext_index, &int_index);
        flat[ravel_index(&full, shape)] = value.get(&int_index)?.clone();
    }
    Ok(())
}
