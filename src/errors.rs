//! Run-Level Error Types
//!
//! Every error below is fatal for the current `run()`: no partial recovery
//! happens within a generation. Cell blobs already written stay on disk, so
//! the next invocation resumes instead of recomputing.

use crate::mapspec::MapSpecError;
use crate::pipeline::PipelineError;
use crate::storage::StorageError;
use crate::value::ValueError;
use thiserror::Error;

/// Errors surfaced by `run()` and `load_outputs()`.
#[derive(Error, Debug)]
pub enum RunError {
    /// Root arguments without a value or pipeline default
    #[error("missing inputs: {0}")]
    MissingInputs(String),

    /// A mapped parameter whose shape cannot be inferred
    #[error("parameter `{0}` is used in a mapspec but its shape cannot be inferred from the inputs; provide it via internal_shapes")]
    MissingShape(String),

    /// The selected storage cannot host concurrent workers
    #[error("parallel execution is not supported with `{0}` storage; use a file based storage or run with parallel disabled")]
    ParallelismUnsupported(String),

    /// A user function failed; the context names the function, its kwargs
    /// and (for mapped calls) the cell index
    #[error("{context}: {cause}")]
    Function {
        context: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Worker pool construction failed
    #[error("executor error: {0}")]
    Executor(String),

    /// The run folder holds no output under this name
    #[error("unknown output `{0}` in run folder")]
    UnknownOutput(String),

    /// Blob or cell I/O failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Mapspec parse/validation/shape failure
    #[error(transparent)]
    MapSpec(#[from] MapSpecError),

    /// Pipeline construction failure
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Value indexing or typing failure during kwargs selection
    #[error(transparent)]
    Value(#[from] ValueError),

    /// Manifest I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest encoding failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RunError {
    /// Wrap a user-function failure with its call context, mirroring the
    /// message shape `error occurred while executing `f(x=1, y=2)``.
    pub(crate) fn function(
        name: &str,
        kwargs: &crate::value::Kwargs,
        index: Option<usize>,
        cause: anyhow::Error,
    ) -> Self {
        let context = match index {
            Some(i) => {
                format!("error occurred while executing `{name}({kwargs})` at index {i}")
            }
            None => format!("error occurred while executing `{name}({kwargs})`"),
        };
        RunError::Function {
            context,
            cause: cause.into(),
        }
    }
}

/// Result type for run operations
pub type Result<T> = std::result::Result<T, RunError>;
