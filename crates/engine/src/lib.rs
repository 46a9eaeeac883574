//! # Suitability Engine
//!
//! Raster normalization and weighted aggregation.
//!
//! ## Components
//!
//! - **catalog**: the utility functions and their parameters
//! - **stats**: windowed min/max with fallback strategies
//! - **algebra**: expressions over co-registered bands
//! - **normalize**: one raster through one utility function
//! - **composite**: weighted sum of normalized rasters
//! - **layer**: layers, their weights and the plan of a run
//! - **scheduler**: normalization jobs feeding one weighted-sum job

pub mod algebra;
pub mod catalog;
pub mod composite;
pub mod config;
pub mod error;
pub mod layer;
pub(crate) mod maybe_rayon;
pub mod normalize;
pub mod scheduler;
pub mod stats;

/// Target of every log event emitted by the engine
pub const LOG_TARGET: &str = "suitability";

pub use config::EngineConfig;
pub use error::{EngineError, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::algebra::{DataRange, Expr, MAX_INPUTS};
    pub use crate::catalog::{MethodArgs, ParamRange, UtilityFunction, UtilityKind, UtilityParams};
    pub use crate::composite::{balance_weights, weighted_sum, SumParams};
    pub use crate::config::EngineConfig;
    pub use crate::error::{EngineError, Result};
    pub use crate::layer::{Layer, LayerSet, Plan, PlannedLayer};
    pub use crate::normalize::{normalize, NormalizeParams, RasterOutput};
    pub use crate::scheduler::{
        CompositeRequest, Completion, Executor, JobId, JobStatus, Scheduler, ThreadExecutor,
    };
    pub use crate::stats::{MinMax, WindowedStatsEngine};
    pub use suitability_core::prelude::*;
}
