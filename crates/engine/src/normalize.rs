//! Normalization of one raster
//!
//! Evaluates a utility function over a window of the input and writes the
//! result as a single-band GeoTIFF on the window's grid.

use ndarray::Array2;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use suitability_core::io::{write_geotiff_as, GeoTiffOptions, Metadata, RasterDataset, META_DESCRIPTION};
use suitability_core::{DataType, Extent, PixelWindow, Raster};

use crate::algebra::{self, BandInput, DataRange};
use crate::catalog::{MethodArgs, UtilityKind};
use crate::error::{EngineError, Result};
use crate::stats::WindowedStatsEngine;
use crate::LOG_TARGET;

/// Parameters for normalization
#[derive(Debug, Clone)]
pub struct NormalizeParams {
    pub method: UtilityKind,
    pub args: MethodArgs,
    /// Data range for methods that need one; computed over the whole
    /// input when `None`
    pub range: Option<DataRange>,
    /// Area to evaluate; the whole input when `None`
    pub window: Option<Extent>,
    /// Output no-data; NaN when `None`
    pub nodata: Option<f64>,
    pub data_type: DataType,
    pub metadata: Metadata,
}

impl Default for NormalizeParams {
    fn default() -> Self {
        Self {
            method: UtilityKind::MinMax,
            args: MethodArgs::None,
            range: None,
            window: None,
            nodata: None,
            data_type: DataType::Float32,
            metadata: Metadata::new(),
        }
    }
}

/// A raster written by the engine
#[derive(Debug, Clone)]
pub struct RasterOutput {
    pub path: PathBuf,
    /// Expression that produced it
    pub expression: String,
    pub rows: usize,
    pub cols: usize,
    /// DESCRIPTION metadata, if any
    pub description: Option<String>,
}

/// Pixel window of `window` on the dataset grid, the full raster for `None`
pub(crate) fn resolve_window(ds: &dyn RasterDataset, window: Option<&Extent>) -> Result<PixelWindow> {
    let (cols, rows) = ds.size();
    match window {
        None => Ok(PixelWindow::full(cols, rows)),
        Some(extent) => extent
            .to_pixel_window(&ds.transform(), cols, rows)
            .ok_or(EngineError::EmptyWindowIntersection),
    }
}

/// Write evaluated cells on the grid of `ds` restricted to `pw`
pub(crate) fn write_window(
    data: Array2<f64>,
    ds: &dyn RasterDataset,
    pw: PixelWindow,
    nodata: f64,
    data_type: DataType,
    metadata: &Metadata,
    output: &Path,
) -> Result<()> {
    let mut raster = Raster::from_array(data);
    raster.set_transform(ds.transform().shifted(pw.col_off, pw.row_off));
    raster.set_crs(ds.crs());
    raster.set_nodata(Some(nodata));

    let options = GeoTiffOptions {
        metadata: metadata.clone(),
    };
    write_geotiff_as(&raster, output, data_type, Some(options))?;
    Ok(())
}

/// Normalize `input` into `output`
pub fn normalize(
    stats: &WindowedStatsEngine,
    input: &Path,
    output: &Path,
    params: &NormalizeParams,
) -> Result<RasterOutput> {
    let method = params.method;
    algebra::check_args(method, &params.args)?;

    let mut ds = stats.source().open(input)?;

    let range = match (method.needs_data_range(), params.range) {
        (false, _) => None,
        (true, Some(range)) => Some(range),
        (true, None) => Some(stats.full_range(input)?),
    };
    let expr = algebra::build(method, &params.args, range)?;
    let pw = resolve_window(ds.as_ref(), params.window.as_ref())?;

    info!(
        target: LOG_TARGET,
        "Normalizing {} with {}: {}",
        input.display(),
        method,
        expr
    );

    let block = ds.read_window(pw)?;
    let nodata = params.nodata.unwrap_or(f64::NAN);
    let result = algebra::evaluate(&expr, &[BandInput::new(block.view(), ds.nodata())], nodata)?;

    write_window(
        result,
        ds.as_ref(),
        pw,
        nodata,
        params.data_type,
        &params.metadata,
        output,
    )?;
    debug!(target: LOG_TARGET, "Wrote {}", output.display());

    Ok(RasterOutput {
        path: output.to_path_buf(),
        expression: expr.to_string(),
        rows: pw.rows,
        cols: pw.cols,
        description: params.metadata.get(META_DESCRIPTION).cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::{weighted_sum, SumParams, DEFAULT_SUM_NODATA};
    use crate::config::EngineConfig;
    use approx::assert_relative_eq;
    use std::sync::Arc;
    use suitability_core::io::{read_geotiff, read_metadata, write_geotiff, GeoTiffSource};
    use suitability_core::{Error, GeoTransform, CRS};
    use tempfile::tempdir;

    fn stats() -> WindowedStatsEngine {
        WindowedStatsEngine::new(Arc::new(GeoTiffSource), &EngineConfig::default())
    }

    /// 4x5 raster 0..=190 step 10, nodata -1 at (0, 0)
    fn write_input(path: &Path) {
        let mut data: Vec<f64> = (0..20).map(|v| v as f64 * 10.0).collect();
        data[0] = -1.0;
        let mut raster = Raster::from_vec(data, 4, 5).unwrap();
        raster.set_transform(GeoTransform::new(100.0, 40.0, 10.0, -10.0));
        raster.set_crs(Some(CRS::from_epsg(3035)));
        raster.set_nodata(Some(-1.0));
        write_geotiff(&raster, path, None).unwrap();
    }

    #[test]
    fn test_minmax_uses_full_range_and_window() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.tif");
        let output = dir.path().join("out.tif");
        write_input(&input);

        // Second row only (values 50..90)
        let params = NormalizeParams {
            window: Some(Extent::new(100.0, 20.0, 150.0, 30.0)),
            data_type: DataType::Float64,
            ..NormalizeParams::default()
        };
        let out = normalize(&stats(), &input, &output, &params).unwrap();
        assert_eq!((out.rows, out.cols), (1, 5));
        assert_eq!(out.expression, "(A-10)/(190-10)");

        let r: Raster<f64> = read_geotiff(&output).unwrap();
        assert_eq!(r.shape(), (1, 5));
        assert_relative_eq!(r.get(0, 0).unwrap(), 40.0 / 180.0, epsilon = 1e-12);
        assert_relative_eq!(r.get(0, 4).unwrap(), 80.0 / 180.0, epsilon = 1e-12);
        assert_relative_eq!(r.transform().origin_y, 30.0);
        assert_eq!(r.crs().map(|c| c.epsg()), Some(3035));
    }

    #[test]
    fn test_stepup_keeps_nodata() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.tif");
        let output = dir.path().join("out.tif");
        write_input(&input);

        let params = NormalizeParams {
            method: UtilityKind::StepUp,
            args: MethodArgs::Threshold(100.0),
            nodata: Some(-9999.0),
            metadata: Metadata::from([(META_DESCRIPTION.to_string(), "in stepup 100".to_string())]),
            ..NormalizeParams::default()
        };
        let out = normalize(&stats(), &input, &output, &params).unwrap();
        assert_eq!(out.description.as_deref(), Some("in stepup 100"));

        let r: Raster<f64> = read_geotiff(&output).unwrap();
        assert_eq!(r.get(0, 0).unwrap(), -9999.0);
        assert_eq!(r.get(1, 4).unwrap(), 0.0);
        assert_eq!(r.get(2, 0).unwrap(), 1.0);
        assert_eq!(r.nodata(), Some(-9999.0));

        let meta = read_metadata(&output).unwrap();
        assert_eq!(meta.get(META_DESCRIPTION).map(String::as_str), Some("in stepup 100"));
    }

    #[test]
    fn test_degenerate_checked_before_io() {
        let dir = tempdir().unwrap();
        let params = NormalizeParams {
            method: UtilityKind::BiPiecewiseLinear,
            args: MethodArgs::Bounds { a: 3.0, b: 3.0 },
            ..NormalizeParams::default()
        };
        // The input doesn't exist: the argument check must come first
        let err = normalize(
            &stats(),
            &dir.path().join("missing.tif"),
            &dir.path().join("out.tif"),
            &params,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::DegenerateParameters { .. }));
    }

    #[test]
    fn test_missing_input() {
        let dir = tempdir().unwrap();
        let err = normalize(
            &stats(),
            &dir.path().join("missing.tif"),
            &dir.path().join("out.tif"),
            &NormalizeParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Core(Error::SourceNotFound { .. })));
        assert!(!dir.path().join("out.tif").exists());
    }

    #[test]
    fn test_window_outside() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.tif");
        write_input(&input);
        let params = NormalizeParams {
            window: Some(Extent::new(0.0, 0.0, 10.0, 10.0)),
            ..NormalizeParams::default()
        };
        let err = normalize(&stats(), &input, &dir.path().join("out.tif"), &params).unwrap_err();
        assert!(matches!(err, EngineError::EmptyWindowIntersection));
    }

    #[test]
    fn test_byte_output() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.tif");
        let output = dir.path().join("out.tif");
        write_input(&input);

        let params = NormalizeParams {
            method: UtilityKind::StepDownPercent,
            args: MethodArgs::Threshold(50.0),
            range: Some(DataRange::new(0.0, 200.0)),
            nodata: Some(255.0),
            data_type: DataType::Byte,
            ..NormalizeParams::default()
        };
        normalize(&stats(), &input, &output, &params).unwrap();

        let r: Raster<u8> = read_geotiff(&output).unwrap();
        // threshold 50% of 0..200 is 100
        assert_eq!(r.get(0, 0).unwrap(), 255);
        assert_eq!(r.get(1, 4).unwrap(), 1);
        assert_eq!(r.get(2, 0).unwrap(), 0);
    }

    #[test]
    fn test_byte_output_default_nodata_keeps_zero() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.tif");
        let output = dir.path().join("out.tif");
        let summed = dir.path().join("sum.tif");
        let mut raster = Raster::from_vec(vec![-1.0, 10.0, 20.0, 30.0], 1, 4).unwrap();
        raster.set_nodata(Some(-1.0));
        write_geotiff(&raster, &input, None).unwrap();

        let params = NormalizeParams {
            method: UtilityKind::StepUp,
            args: MethodArgs::Threshold(15.0),
            data_type: DataType::Byte,
            ..NormalizeParams::default()
        };
        normalize(&stats(), &input, &output, &params).unwrap();

        let r: Raster<u8> = read_geotiff(&output).unwrap();
        assert_eq!(r.nodata(), Some(255));
        assert_eq!(r.data().iter().copied().collect::<Vec<_>>(), vec![255, 0, 1, 1]);

        // The 0 below the threshold still counts in a sum
        let sum_params = SumParams {
            data_type: DataType::Float64,
            ..SumParams::default()
        };
        weighted_sum(&GeoTiffSource, &[output], &summed, &sum_params).unwrap();
        let s: Raster<f64> = read_geotiff(&summed).unwrap();
        assert_eq!(
            s.data().iter().copied().collect::<Vec<_>>(),
            vec![DEFAULT_SUM_NODATA, 0.0, 1.0, 1.0]
        );
    }
}
