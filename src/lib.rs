//! # Pipemap
//!
//! A resumable execution engine for DAGs of pure functions over
//! multi-dimensional parameter sweeps. Functions declare *mapspecs* — axis
//! patterns like `x[i], y[j] -> z[i, j]` — that bind input parameters to
//! named axes; the engine resolves every output's shape, stratifies the DAG
//! into topological generations, fans independent map cells out over a
//! worker pool, and persists each cell to a run folder so interrupted runs
//! resume instead of recomputing.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! PipeFuncs + mapspec strings
//!     ↓
//! [Pipeline]          → DAG, producer lookup, topological generations
//!     ↓
//! [Shape resolver]    → shapes + external/internal masks per output
//!     ↓
//! [RunInfo]           → frozen manifest on disk (run_info.json)
//!     ↓
//! [Scheduler]         → per generation: assemble kwargs, fan out cells
//!     ↓
//! [Storage]           → one blob per cell, lazy re-materialization
//!     ↓
//! Results
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pipemap::{run, Pipeline, PipeFunc, RunOptions, Value};
//! use std::collections::HashMap;
//! use std::path::Path;
//!
//! let double = PipeFunc::new("double", &["x"], "y", |kw| {
//!     Ok(Value::Int(kw.int("x")? * 2))
//! })
//! .with_mapspec("x[i] -> y[i]")?;
//!
//! let pipeline = Pipeline::new(vec![double])?;
//! let inputs = HashMap::from([("x".to_string(), Value::from(vec![1i64, 2, 3]))]);
//!
//! let results = run(&pipeline, &inputs, Path::new("runs/double"), &RunOptions::default())?;
//! assert_eq!(results["y"].output, Value::from(vec![2i64, 4, 6]));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `mapspec` | axis-pattern grammar, shape algebra, key enumeration |
//! | `pipeline` | DAG model, generations, deferred call graphs |
//! | `map` | shape resolution, run manifest, scheduler, executors |
//! | `storage` | per-cell blob stores (file-backed and in-memory) |
//! | `value` | dynamic values, nested arrays, kwargs bundles |
//! | `config` | figment-based configuration and logging setup |

pub mod cache;
pub mod config;
pub mod errors;
pub mod map;
pub mod mapspec;
pub mod pipeline;
pub mod serialize;
pub mod shape;
pub mod storage;
pub mod value;

// Re-export the primary surface for convenience
pub use config::{Config, ExecutionConfig, LoggingConfig};
pub use errors::RunError;
pub use map::{load_outputs, run, Executor, RunInfo, RunOptions, RunOutput};
pub use mapspec::{parse_mapspec, MapSpec, MapSpecError};
pub use pipeline::{OutputName, PipeFunc, Pipeline, PipelineError};
pub use storage::{Storage, StorageError};
pub use value::{Kwargs, Value, ValueError};
