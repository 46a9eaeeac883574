//! Spatial reference carried from inputs to outputs.
//!
//! No reprojection happens here; rasters are expected to share one frame.

use serde::{Deserialize, Serialize};
use std::fmt;

/// GeoTIFF model type recorded alongside the EPSG code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelType {
    Projected,
    Geographic,
}

/// Coordinate Reference System identified by EPSG code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CRS {
    epsg: u32,
    model: ModelType,
}

impl CRS {
    /// CRS from an EPSG code; 4xxx codes are taken as geographic
    pub fn from_epsg(code: u32) -> Self {
        let model = if code == 4326 || (4000..5000).contains(&code) {
            ModelType::Geographic
        } else {
            ModelType::Projected
        };
        Self { epsg: code, model }
    }

    /// CRS with an explicit model type, as read from a GeoKey directory
    pub fn with_model(code: u32, model: ModelType) -> Self {
        Self { epsg: code, model }
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    pub fn model(&self) -> ModelType {
        self.model
    }

    /// Get a string identifier for this CRS
    pub fn identifier(&self) -> String {
        format!("EPSG:{}", self.epsg)
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}
