//! Error types for raster access

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for raster access and georeferencing
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("raster source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("format not supported for {}: {reason}", path.display())]
    FormatNotSupported { path: PathBuf, reason: String },

    #[error("out of memory reading {bytes} bytes")]
    OutOfMemory { bytes: usize },

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("Window ({col_off}, {row_off}) {cols}x{rows} outside raster of size {width}x{height}")]
    WindowOutOfBounds {
        col_off: usize,
        row_off: usize,
        cols: usize,
        rows: usize,
        width: usize,
        height: usize,
    },

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error reports an allocation or decoding-limit failure
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Error::OutOfMemory { .. })
    }
}

/// Result type alias for raster operations
pub type Result<T> = std::result::Result<T, Error>;
