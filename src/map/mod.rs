//! Map Execution Module
//!
//! Everything between a resolved [`crate::pipeline::Pipeline`] and blobs on
//! disk:
//! - [`shapes`] — generation-wise shape resolution with external/internal
//!   masks
//! - [`run_info`] — the immutable per-run manifest and run-folder layout
//! - [`executor`] — sequential and thread-pool cell executors
//! - [`run`] — the scheduler: kwargs assembly, cell fan-out, resume,
//!   result-array assembly

pub mod executor;
pub mod run;
pub mod run_info;
pub mod shapes;

pub use executor::{CancelFlag, Executor, SequentialExecutor, ThreadPoolExecutor};
pub use run::{load_outputs, run, RunOptions, RunOutput};
pub use run_info::RunInfo;
pub use shapes::{resolve_map_shapes, ResolvedShapes};
