//! Raster data structures and georeferencing

mod element;
mod extent;
mod geotransform;
mod grid;

pub use element::{DataType, RasterElement};
pub use extent::{Extent, PixelWindow};
pub use geotransform::GeoTransform;
pub use grid::Raster;
