//! Reading and writing georeferenced rasters

mod native;
mod source;

pub use native::{
    read_geotiff, read_metadata, write_geotiff, write_geotiff_as, GeoTiffOptions, Metadata,
    META_AUTHOR, META_DESCRIPTION,
};
pub use source::{GeoTiffDataset, GeoTiffSource, RasterDataset, RasterSource};
