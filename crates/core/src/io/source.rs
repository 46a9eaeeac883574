//! Windowed raster access.
//!
//! The engine never assumes a whole raster fits in memory: it opens a
//! [`RasterDataset`] and pulls the pixel windows it needs.

use ndarray::Array2;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tiff::decoder::Decoder;

use super::native::{decoded_to_f64, open_decoder, read_header, tiff_error, Metadata};
use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{Extent, GeoTransform, PixelWindow};

/// An opened single-band raster
pub trait RasterDataset: Send {
    /// Size as (cols, rows)
    fn size(&self) -> (usize, usize);

    fn transform(&self) -> GeoTransform;

    fn nodata(&self) -> Option<f64>;

    fn crs(&self) -> Option<CRS>;

    /// Read a block of cells as f64, in row-major order
    fn read_window(&mut self, window: PixelWindow) -> Result<Array2<f64>>;

    fn extent(&self) -> Extent {
        let (cols, rows) = self.size();
        Extent::of_raster(&self.transform(), cols, rows)
    }
}

/// Opens raster files by path
pub trait RasterSource: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn RasterDataset>>;
}

/// [`RasterSource`] backed by the native GeoTIFF decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoTiffSource;

impl RasterSource for GeoTiffSource {
    fn open(&self, path: &Path) -> Result<Box<dyn RasterDataset>> {
        Ok(Box::new(GeoTiffDataset::open(path)?))
    }
}

/// A GeoTIFF read chunk by chunk (strip or tile)
pub struct GeoTiffDataset {
    path: PathBuf,
    decoder: Decoder<BufReader<File>>,
    cols: usize,
    rows: usize,
    transform: GeoTransform,
    nodata: Option<f64>,
    crs: Option<CRS>,
    metadata: Metadata,
}

impl GeoTiffDataset {
    pub fn open(path: &Path) -> Result<Self> {
        let mut decoder = open_decoder(path)?;
        let (width, height) = decoder.dimensions().map_err(|e| tiff_error(path, e))?;
        let header = read_header(&mut decoder);

        Ok(Self {
            path: path.to_path_buf(),
            decoder,
            cols: width as usize,
            rows: height as usize,
            transform: header.transform.unwrap_or_default(),
            nodata: header.nodata,
            crs: header.crs,
            metadata: header.metadata,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl RasterDataset for GeoTiffDataset {
    fn size(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    fn transform(&self) -> GeoTransform {
        self.transform
    }

    fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    fn crs(&self) -> Option<CRS> {
        self.crs.clone()
    }

    fn read_window(&mut self, window: PixelWindow) -> Result<Array2<f64>> {
        if !window.fits(self.cols, self.rows) {
            return Err(Error::WindowOutOfBounds {
                col_off: window.col_off,
                row_off: window.row_off,
                cols: window.cols,
                rows: window.rows,
                width: self.cols,
                height: self.rows,
            });
        }

        let mut out: Vec<f64> = Vec::new();
        out.try_reserve_exact(window.len())
            .map_err(|_| Error::OutOfMemory {
                bytes: window.len() * std::mem::size_of::<f64>(),
            })?;
        out.resize(window.len(), f64::NAN);

        if !window.is_empty() {
            self.fill_window(window, &mut out)?;
        }

        Array2::from_shape_vec((window.rows, window.cols), out)
            .map_err(|e| Error::Other(e.to_string()))
    }
}

impl GeoTiffDataset {
    /// Decode every chunk overlapping the window and copy its cells out
    fn fill_window(&mut self, window: PixelWindow, out: &mut [f64]) -> Result<()> {
        let (chunk_w, chunk_h) = self.decoder.chunk_dimensions();
        let (chunk_w, chunk_h) = (chunk_w.max(1) as usize, chunk_h.max(1) as usize);
        let chunks_across = self.cols.div_ceil(chunk_w);

        let first_chunk_row = window.row_off / chunk_h;
        let last_chunk_row = (window.row_off + window.rows - 1) / chunk_h;
        let first_chunk_col = window.col_off / chunk_w;
        let last_chunk_col = (window.col_off + window.cols - 1) / chunk_w;

        for chunk_row in first_chunk_row..=last_chunk_row {
            for chunk_col in first_chunk_col..=last_chunk_col {
                let index = (chunk_row * chunks_across + chunk_col) as u32;
                let decoded = self
                    .decoder
                    .read_chunk(index)
                    .map_err(|e| tiff_error(&self.path, e))?;
                let cells = decoded_to_f64(decoded)?;
                let (data_w, data_h) = self.decoder.chunk_data_dimensions(index);
                let (data_w, data_h) = (data_w as usize, data_h as usize);

                // Overlap of this chunk with the window, in raster coordinates
                let chunk_x = chunk_col * chunk_w;
                let chunk_y = chunk_row * chunk_h;
                let x0 = chunk_x.max(window.col_off);
                let x1 = (chunk_x + data_w).min(window.col_off + window.cols);
                let y0 = chunk_y.max(window.row_off);
                let y1 = (chunk_y + data_h).min(window.row_off + window.rows);
                if x1 <= x0 || y1 <= y0 {
                    continue;
                }

                for y in y0..y1 {
                    let src = (y - chunk_y) * data_w + (x0 - chunk_x);
                    let dst = (y - window.row_off) * window.cols + (x0 - window.col_off);
                    let n = x1 - x0;
                    let row = cells.get(src..src + n).ok_or_else(|| Error::FormatNotSupported {
                        path: self.path.clone(),
                        reason: format!("chunk {} is shorter than its declared size", index),
                    })?;
                    out[dst..dst + n].copy_from_slice(row);
                }
            }
        }
        Ok(())
    }
}
