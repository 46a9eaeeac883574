//! Windowed min/max statistics
//!
//! Min/max of a band over a geographic window, computed by an ordered chain
//! of strategies. The first strategy that succeeds wins; any failure moves
//! on to the next one. When all of them fail the result is empty, never an
//! error.

use ndarray::Array2;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use suitability_core::io::{write_geotiff, GeoTiffDataset, RasterDataset, RasterSource};
use suitability_core::{Extent, PixelWindow, Raster};
use suitability_parallel::BlockIterator;

use crate::algebra::DataRange;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::LOG_TARGET;

/// Min/max of the valid cells, `None` when there are none
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MinMax {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl MinMax {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_none() || self.max.is_none()
    }

    pub fn range(&self) -> Option<DataRange> {
        Some(DataRange::new(self.min?, self.max?))
    }

    /// Fold the valid cells of a block into this accumulator
    pub fn accumulate(&mut self, block: &Array2<f64>, nodata: Option<f64>) {
        for &v in block.iter() {
            if v.is_nan() || matches!(nodata, Some(nd) if (v - nd).abs() < f64::EPSILON) {
                continue;
            }
            self.min = Some(self.min.map_or(v, |m| m.min(v)));
            self.max = Some(self.max.map_or(v, |m| m.max(v)));
        }
    }
}

/// Pixel window of `window` on the dataset grid; the full raster for `None`.
///
/// `None` when the window misses the raster.
fn pixel_window(ds: &dyn RasterDataset, window: Option<&Extent>) -> Option<PixelWindow> {
    let (cols, rows) = ds.size();
    match window {
        None => Some(PixelWindow::full(cols, rows)),
        Some(extent) => extent.to_pixel_window(&ds.transform(), cols, rows),
    }
}

/// One way of computing min/max
pub trait StatsStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn min_max(
        &self,
        source: &dyn RasterSource,
        path: &Path,
        window: Option<&Extent>,
    ) -> Result<MinMax>;
}

/// Reads the whole window at once
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryStrategy;

impl StatsStrategy for InMemoryStrategy {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    fn min_max(
        &self,
        source: &dyn RasterSource,
        path: &Path,
        window: Option<&Extent>,
    ) -> Result<MinMax> {
        let mut ds = source.open(path)?;
        let Some(pw) = pixel_window(ds.as_ref(), window) else {
            return Ok(MinMax::default());
        };
        let block = ds.read_window(pw)?;

        let mut acc = MinMax::default();
        acc.accumulate(&block, ds.nodata());
        Ok(acc)
    }
}

/// Streams the window in row blocks, then round-trips the result through
/// two single-pixel rasters
#[derive(Debug, Clone)]
pub struct ChunkedStrategy {
    pub block_rows: usize,
    pub temp_dir: Option<PathBuf>,
}

impl Default for ChunkedStrategy {
    fn default() -> Self {
        Self {
            block_rows: 256,
            temp_dir: None,
        }
    }
}

impl ChunkedStrategy {
    /// Write `value` as a 1x1 raster and read it back
    fn through_pixel_raster(&self, value: f64) -> Result<f64> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("minmax_extent_").suffix(".tif");
        let file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        let raster = Raster::filled(1, 1, value);
        write_geotiff(&raster, file.path(), None)?;

        let mut ds = GeoTiffDataset::open(file.path())?;
        let pixel = ds.read_window(PixelWindow::new(0, 0, 1, 1))?;
        pixel
            .iter()
            .next()
            .copied()
            .ok_or_else(|| suitability_core::Error::Other("empty pixel raster".into()).into())
    }
}

impl StatsStrategy for ChunkedStrategy {
    fn name(&self) -> &'static str {
        "chunked"
    }

    fn min_max(
        &self,
        source: &dyn RasterSource,
        path: &Path,
        window: Option<&Extent>,
    ) -> Result<MinMax> {
        let mut ds = source.open(path)?;
        let Some(pw) = pixel_window(ds.as_ref(), window) else {
            return Ok(MinMax::default());
        };
        let nodata = ds.nodata();

        let mut acc = MinMax::default();
        for block in BlockIterator::strips(pw, self.block_rows) {
            let data = ds.read_window(block.window)?;
            acc.accumulate(&data, nodata);
        }

        match (acc.min, acc.max) {
            (Some(min), Some(max)) => Ok(MinMax::new(
                self.through_pixel_raster(min)?,
                self.through_pixel_raster(max)?,
            )),
            _ => Ok(acc),
        }
    }
}

/// Min/max over a window with an ordered fallback chain
#[derive(Clone)]
pub struct WindowedStatsEngine {
    source: Arc<dyn RasterSource>,
    strategies: Vec<Arc<dyn StatsStrategy>>,
}

impl WindowedStatsEngine {
    /// In-memory first, chunked on failure
    pub fn new(source: Arc<dyn RasterSource>, config: &EngineConfig) -> Self {
        Self::with_strategies(
            source,
            vec![
                Arc::new(InMemoryStrategy),
                Arc::new(ChunkedStrategy {
                    block_rows: config.block_rows,
                    temp_dir: config.temp_dir.clone(),
                }),
            ],
        )
    }

    pub fn with_strategies(
        source: Arc<dyn RasterSource>,
        strategies: Vec<Arc<dyn StatsStrategy>>,
    ) -> Self {
        Self { source, strategies }
    }

    pub fn source(&self) -> &Arc<dyn RasterSource> {
        &self.source
    }

    /// Min/max of `path` inside `window`, or over the whole raster for `None`
    pub fn min_max(&self, path: &Path, window: Option<&Extent>) -> MinMax {
        for strategy in &self.strategies {
            match strategy.min_max(self.source.as_ref(), path, window) {
                Ok(mm) => {
                    debug!(
                        target: LOG_TARGET,
                        strategy = strategy.name(),
                        min = ?mm.min,
                        max = ?mm.max,
                        "min/max of {}",
                        path.display()
                    );
                    return mm;
                }
                Err(e) if e.is_out_of_memory() => {
                    info!(
                        target: LOG_TARGET,
                        "{} min/max of {} ran out of memory, trying the next strategy",
                        strategy.name(),
                        path.display()
                    );
                }
                Err(e) => {
                    warn!(
                        target: LOG_TARGET,
                        "{} min/max of {} failed: {}",
                        strategy.name(),
                        path.display(),
                        e
                    );
                }
            }
        }

        warn!(
            target: LOG_TARGET,
            "Could not compute min/max of {}; narrow the selection, e.g. select a smaller polygon",
            path.display()
        );
        MinMax::default()
    }

    /// Min/max over the whole raster, failing when it has no valid cell
    pub fn full_range(&self, path: &Path) -> Result<DataRange> {
        self.min_max(path, None)
            .range()
            .ok_or_else(|| EngineError::NoValidData {
                path: path.to_path_buf(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use suitability_core::io::GeoTiffSource;
    use suitability_core::{Error, GeoTransform, CRS};
    use tempfile::tempdir;

    /// In-memory dataset refusing reads larger than `limit` cells
    struct LimitedDataset {
        data: Array2<f64>,
        limit: usize,
        reads: Arc<AtomicUsize>,
    }

    impl RasterDataset for LimitedDataset {
        fn size(&self) -> (usize, usize) {
            (self.data.ncols(), self.data.nrows())
        }

        fn transform(&self) -> GeoTransform {
            GeoTransform::new(0.0, self.data.nrows() as f64, 1.0, -1.0)
        }

        fn nodata(&self) -> Option<f64> {
            Some(-9999.0)
        }

        fn crs(&self) -> Option<CRS> {
            None
        }

        fn read_window(&mut self, w: PixelWindow) -> suitability_core::Result<Array2<f64>> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            if w.len() > self.limit {
                return Err(Error::OutOfMemory {
                    bytes: w.len() * 8,
                });
            }
            Ok(self
                .data
                .slice(ndarray::s![w.row_off..w.row_off + w.rows, w.col_off..w.col_off + w.cols])
                .to_owned())
        }
    }

    struct LimitedSource {
        data: Array2<f64>,
        limit: usize,
        reads: Arc<AtomicUsize>,
    }

    impl RasterSource for LimitedSource {
        fn open(&self, path: &Path) -> suitability_core::Result<Box<dyn RasterDataset>> {
            if path.to_str() == Some("missing") {
                return Err(Error::SourceNotFound {
                    path: path.to_path_buf(),
                });
            }
            Ok(Box::new(LimitedDataset {
                data: self.data.clone(),
                limit: self.limit,
                reads: Arc::clone(&self.reads),
            }))
        }
    }

    fn grid() -> Array2<f64> {
        let mut data = Array2::from_shape_fn((40, 30), |(r, c)| (r * 30 + c) as f64);
        data[[0, 0]] = -9999.0;
        data
    }

    fn engine(limit: usize) -> (WindowedStatsEngine, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        let source = LimitedSource {
            data: grid(),
            limit,
            reads: Arc::clone(&reads),
        };
        let config = EngineConfig {
            block_rows: 8,
            ..EngineConfig::default()
        };
        (WindowedStatsEngine::new(Arc::new(source), &config), reads)
    }

    #[test]
    fn test_in_memory_skips_nodata() {
        let (engine, reads) = engine(usize::MAX);
        let mm = engine.min_max(Path::new("grid"), None);
        assert_eq!(mm, MinMax::new(1.0, 1199.0));
        assert_eq!(reads.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_falls_back_to_chunked() {
        let (engine, reads) = engine(300);
        let mm = engine.min_max(Path::new("grid"), None);
        assert_eq!(mm, MinMax::new(1.0, 1199.0));
        // one refused full read, then 5 strips of 8 rows
        assert_eq!(reads.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn test_window_subset() {
        let (engine, _) = engine(usize::MAX);
        // rows 10..20, cols 5..15 (y grows upwards from 0 at the bottom row)
        let window = Extent::new(5.0, 20.0, 15.0, 30.0);
        let mm = engine.min_max(Path::new("grid"), Some(&window));
        assert_eq!(mm, MinMax::new(305.0, 584.0));
    }

    #[test]
    fn test_window_outside_is_empty() {
        let (engine, _) = engine(usize::MAX);
        let window = Extent::new(500.0, 500.0, 600.0, 600.0);
        let mm = engine.min_max(Path::new("grid"), Some(&window));
        assert_eq!(mm, MinMax::default());
        assert!(mm.range().is_none());
    }

    #[test]
    fn test_all_strategies_fail() {
        // Every read is too large, even single strips
        let (engine, _) = engine(10);
        assert_eq!(engine.min_max(Path::new("grid"), None), MinMax::default());
        assert_eq!(engine.min_max(Path::new("missing"), None), MinMax::default());
    }

    #[test]
    fn test_chunked_on_geotiff() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dem.tif");
        let mut raster = Raster::from_array(grid());
        raster.set_nodata(Some(-9999.0));
        write_geotiff(&raster, &path, None).unwrap();

        let chunked = ChunkedStrategy {
            block_rows: 7,
            temp_dir: Some(dir.path().to_path_buf()),
        };
        let mm = chunked.min_max(&GeoTiffSource, &path, None).unwrap();
        assert_eq!(mm, MinMax::new(1.0, 1199.0));

        // Temporary pixel rasters are gone
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.file_name().to_string_lossy().starts_with("minmax_extent_"))
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(leftovers, 0);
    }
}
