//! Main Raster type

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{Extent, GeoTransform, RasterElement};
use ndarray::{Array2, ArrayView2};

/// A georeferenced 2D raster grid.
///
/// `Raster<T>` stores values of type `T` in a 2D grid with associated
/// geographic metadata (transform, CRS and no-data value).
///
/// # Example
///
/// ```ignore
/// use suitability_core::Raster;
///
/// let mut raster: Raster<f64> = Raster::new(100, 100);
/// raster.set(10, 20, 42.0)?;
/// let value = raster.get(10, 20)?;
/// ```
#[derive(Debug, Clone)]
pub struct Raster<T: RasterElement> {
    /// Raster data stored in row-major order (row, col)
    data: Array2<T>,
    /// Affine transformation
    transform: GeoTransform,
    /// Coordinate reference system
    crs: Option<CRS>,
    /// No-data value
    nodata: Option<T>,
}

impl<T: RasterElement> Raster<T> {
    /// Create a new raster filled with zeros
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::from_array(Array2::zeros((rows, cols)))
    }

    /// Create a new raster filled with a specific value
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self::from_array(Array2::from_elem((rows, cols), value))
    }

    /// Create a raster from row-major data
    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }

        let array = Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| Error::Other(e.to_string()))?;

        Ok(Self::from_array(array))
    }

    /// Create a raster from an ndarray
    pub fn from_array(data: Array2<T>) -> Self {
        Self {
            data,
            transform: GeoTransform::default(),
            crs: None,
            nodata: None,
        }
    }

    /// Create a raster with the same georeferencing but different data
    pub fn with_same_meta<U: RasterElement>(&self, data: Array2<U>) -> Raster<U> {
        Raster {
            data,
            transform: self.transform,
            crs: self.crs.clone(),
            nodata: None,
        }
    }

    /// Convert every cell to another element type.
    ///
    /// No-data cells become the target's no-data value: the source no-data
    /// when the target type holds it exactly, the target's default otherwise.
    pub fn map_to<U: RasterElement>(&self) -> Raster<U> {
        let target_nodata = self
            .nodata
            .and_then(|nd| nd.to_f64())
            .filter(|nd| U::from_f64(*nd).to_f64() == Some(*nd))
            .map(U::from_f64)
            .unwrap_or_else(U::default_nodata);

        let data = self.data.mapv(|v| {
            if v.is_nodata(self.nodata) {
                target_nodata
            } else {
                v.to_f64().map(U::from_f64).unwrap_or(target_nodata)
            }
        });

        let mut out = self.with_same_meta(data);
        out.set_nodata(Some(target_nodata));
        out
    }

    // Dimensions

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Total number of cells
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the raster is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    // Data access

    /// Get value at (row, col)
    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        self.data
            .get((row, col))
            .copied()
            .ok_or(Error::InvalidParameter {
                name: "index",
                value: format!("({}, {})", row, col),
                reason: format!("raster is {}x{}", self.rows(), self.cols()),
            })
    }

    /// Set value at (row, col)
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        let (rows, cols) = self.shape();
        match self.data.get_mut((row, col)) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(Error::InvalidParameter {
                name: "index",
                value: format!("({}, {})", row, col),
                reason: format!("raster is {}x{}", rows, cols),
            }),
        }
    }

    /// Get a view of the underlying data
    pub fn view(&self) -> ArrayView2<'_, T> {
        self.data.view()
    }

    /// Get a reference to the underlying array
    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    // Metadata

    /// Get the geotransform
    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// Set the geotransform
    pub fn set_transform(&mut self, transform: GeoTransform) {
        self.transform = transform;
    }

    /// Get the CRS
    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }

    /// Set the CRS
    pub fn set_crs(&mut self, crs: Option<CRS>) {
        self.crs = crs;
    }

    /// Get the no-data value
    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    /// Set the no-data value
    pub fn set_nodata(&mut self, nodata: Option<T>) {
        self.nodata = nodata;
    }

    /// Geographic extent covered by the grid
    pub fn extent(&self) -> Extent {
        Extent::of_raster(&self.transform, self.cols(), self.rows())
    }

    /// Check if a value is no-data
    pub fn is_nodata(&self, value: T) -> bool {
        value.is_nodata(self.nodata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raster_creation() {
        let raster: Raster<f32> = Raster::new(100, 200);
        assert_eq!(raster.rows(), 100);
        assert_eq!(raster.cols(), 200);
        assert_eq!(raster.shape(), (100, 200));
    }

    #[test]
    fn test_map_to_byte() {
        let mut raster: Raster<f64> =
            Raster::from_vec(vec![0.0, 0.4, 1.0, f64::NAN], 2, 2).unwrap();
        raster.set_nodata(Some(f64::NAN));

        let bytes: Raster<u8> = raster.map_to();
        assert_eq!(bytes.data().iter().copied().collect::<Vec<_>>(), vec![0, 0, 1, 255]);
        assert_eq!(bytes.nodata(), Some(255));
        assert!(!bytes.is_nodata(0));
    }

    #[test]
    fn test_map_to_byte_without_nodata() {
        let raster: Raster<f64> = Raster::from_vec(vec![0.0, 1.0, f64::NAN, 0.0], 2, 2).unwrap();

        let bytes: Raster<u8> = raster.map_to();
        assert_eq!(bytes.nodata(), Some(255));
        assert_eq!(bytes.data().iter().copied().collect::<Vec<_>>(), vec![0, 1, 255, 0]);
    }

    #[test]
    fn test_map_to_byte_unrepresentable_nodata() {
        let mut raster: Raster<f64> = Raster::from_vec(vec![0.0, -9999.0], 1, 2).unwrap();
        raster.set_nodata(Some(-9999.0));

        let bytes: Raster<u8> = raster.map_to();
        assert_eq!(bytes.nodata(), Some(255));
        assert_eq!(bytes.data().iter().copied().collect::<Vec<_>>(), vec![0, 255]);
    }

    #[test]
    fn test_out_of_bounds_access() {
        let mut raster: Raster<f64> = Raster::new(2, 2);
        assert!(raster.get(2, 0).is_err());
        assert!(raster.set(0, 5, 1.0).is_err());
    }
}
