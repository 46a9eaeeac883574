//! Cell value types and the output data types they map to

use num_traits::{NumCast, Zero};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::str::FromStr;

use crate::error::Error;

/// Pixel data type of a written raster.
///
/// Only the four types the engine emits are supported. Integer outputs
/// receive the normalized values cast with saturation, so a `[0, 1]`
/// surface written as `Byte` keeps only its 0 and 1 cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataType {
    Byte,
    UInt16,
    #[default]
    Float32,
    Float64,
}

impl DataType {
    pub const ALL: &'static [DataType] = &[
        DataType::Byte,
        DataType::UInt16,
        DataType::Float32,
        DataType::Float64,
    ];

    /// Canonical name, as accepted by [`FromStr`]
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Byte => "Byte",
            DataType::UInt16 => "UInt16",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .iter()
            .copied()
            .find(|dt| dt.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnsupportedDataType(s.to_string()))
    }
}

/// Trait for types that can be stored in a raster cell.
pub trait RasterElement:
    Copy + Clone + Debug + PartialOrd + PartialEq + NumCast + Zero + Send + Sync + 'static
{
    /// Output data type this cell type is written as
    const DATA_TYPE: DataType;

    /// Default no-data value for this type.
    ///
    /// Integer types use their maximum so that a valid 0 never reads as
    /// no-data.
    fn default_nodata() -> Self;

    /// Check if this value represents no-data
    fn is_nodata(&self, nodata: Option<Self>) -> bool;

    /// Convert self to f64
    fn to_f64(self) -> Option<f64> {
        NumCast::from(self)
    }

    /// Convert from f64, saturating at the type bounds.
    ///
    /// NaN maps to [`RasterElement::default_nodata`].
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_raster_element_int {
    ($t:ty, $dt:expr) => {
        impl RasterElement for $t {
            const DATA_TYPE: DataType = $dt;

            fn default_nodata() -> Self {
                <$t>::MAX
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                nodata == Some(*self)
            }

            fn from_f64(value: f64) -> Self {
                if value.is_nan() {
                    return Self::default_nodata();
                }
                value.clamp(<$t>::MIN as f64, <$t>::MAX as f64) as $t
            }
        }
    };
}

macro_rules! impl_raster_element_float {
    ($t:ty, $dt:expr) => {
        impl RasterElement for $t {
            const DATA_TYPE: DataType = $dt;

            fn default_nodata() -> Self {
                <$t>::NAN
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                if self.is_nan() {
                    return true;
                }
                match nodata {
                    Some(nd) => (self - nd).abs() < <$t>::EPSILON * 100.0,
                    None => false,
                }
            }

            fn from_f64(value: f64) -> Self {
                value as $t
            }
        }
    };
}

impl_raster_element_int!(u8, DataType::Byte);
impl_raster_element_int!(u16, DataType::UInt16);
impl_raster_element_float!(f32, DataType::Float32);
impl_raster_element_float!(f64, DataType::Float64);
