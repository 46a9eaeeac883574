//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use suitability_core::DataType;
use suitability_parallel::ProcessingMode;

/// Tuning and output options shared by every job of a run.
///
/// Every field has a default, so a JSON file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads for per-layer statistics; `None` uses every core
    pub threads: Option<usize>,
    /// Rows per block when streaming a raster
    pub block_rows: usize,
    /// Directory for intermediate rasters; the system temp dir when unset
    pub temp_dir: Option<PathBuf>,
    /// Keep normalized intermediates after the composite is written
    pub keep_intermediates: bool,
    /// Data type of normalized intermediates
    pub intermediate_dtype: DataType,
    /// AUTHOR metadata written to every output
    pub author: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: None,
            block_rows: 256,
            temp_dir: None,
            keep_intermediates: false,
            intermediate_dtype: DataType::Float32,
            author: "suitability".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn processing_mode(&self) -> ProcessingMode {
        ProcessingMode::from_threads(self.threads)
    }

    /// Builder for temporary files inside the configured directory
    pub(crate) fn temp_file(&self, prefix: &str) -> std::io::Result<tempfile::NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix).suffix(".tif");
        match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
    }
}
