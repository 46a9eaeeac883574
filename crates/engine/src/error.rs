//! Error types for the normalization engine

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while resolving, planning or running normalization jobs
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] suitability_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown utility function: {0}")]
    UnknownFunction(String),

    #[error("unknown layer: {0}")]
    UnknownLayer(String),

    #[error("degenerate parameters for {method}: {reason}")]
    DegenerateParameters { method: String, reason: String },

    #[error("{method} needs the data range (min, max) of its input")]
    MissingDataRange { method: String },

    #[error("no valid data in {}", path.display())]
    NoValidData { path: PathBuf },

    #[error("{method} takes {expected} parameter(s), got {got}")]
    ArgumentCount {
        method: String,
        expected: usize,
        got: usize,
    },

    #[error("at most {max} rasters can be combined, got {got}")]
    TooManyInputs { max: usize, got: usize },

    #[error("the selected window does not intersect every active layer")]
    EmptyWindowIntersection,

    #[error("nothing to do: {0}")]
    NoViableLayers(String),

    #[error("subtask \"{description}\" failed: {reason}")]
    ChildJobFailed { description: String, reason: String },

    #[error("job canceled")]
    Canceled,

    #[error("unknown job: {0}")]
    UnknownJob(u64),
}

impl EngineError {
    /// Whether a read failed for lack of memory, so a lighter strategy may work
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, EngineError::Core(e) if e.is_out_of_memory())
    }

    /// Whether the condition only excludes one layer from a run
    pub fn excludes_layer(&self) -> bool {
        matches!(
            self,
            EngineError::DegenerateParameters { .. }
                | EngineError::MissingDataRange { .. }
                | EngineError::Core(suitability_core::Error::SourceNotFound { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
