//! # Suitability Core
//!
//! Core types and I/O shared by the normalization engine.
//!
//! This crate provides:
//! - `Raster<T>`: Generic georeferenced grid
//! - `GeoTransform`: Affine transformation for georeferencing
//! - `Extent` / `PixelWindow`: geographic windows and their pixel projection
//! - `CRS`: Spatial reference carried from inputs to outputs
//! - `RasterSource` / `RasterDataset`: windowed raster access
//! - Native GeoTIFF reading and writing

pub mod crs;
pub mod error;
pub mod io;
pub mod raster;

pub use crs::CRS;
pub use error::{Error, Result};
pub use raster::{DataType, Extent, GeoTransform, PixelWindow, Raster, RasterElement};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::CRS;
    pub use crate::error::{Error, Result};
    pub use crate::io::{GeoTiffSource, RasterDataset, RasterSource};
    pub use crate::raster::{DataType, Extent, GeoTransform, PixelWindow, Raster, RasterElement};
}
