//! Weighted sum of normalized rasters

use std::path::{Path, PathBuf};
use tracing::info;

use suitability_core::io::{Metadata, RasterDataset, RasterSource, META_DESCRIPTION};
use suitability_core::{DataType, Error, Extent};

use crate::algebra::{self, BandInput, MAX_INPUTS};
use crate::error::{EngineError, Result};
use crate::normalize::{resolve_window, write_window, RasterOutput};
use crate::LOG_TARGET;

/// Output no-data of the weighted sum unless told otherwise
pub const DEFAULT_SUM_NODATA: f64 = -9999.0;

/// Parameters for the weighted sum
#[derive(Debug, Clone)]
pub struct SumParams {
    /// One weight per input, in percent; 100 each when `None`
    pub weights: Option<Vec<f64>>,
    /// Area to combine; the first input's extent when `None`
    pub window: Option<Extent>,
    /// Output no-data; NaN when `None`
    pub nodata: Option<f64>,
    pub data_type: DataType,
    pub metadata: Metadata,
}

impl Default for SumParams {
    fn default() -> Self {
        Self {
            weights: None,
            window: None,
            nodata: Some(DEFAULT_SUM_NODATA),
            data_type: DataType::Float32,
            metadata: Metadata::new(),
        }
    }
}

/// Rescale the active weights so they sum to 100, keeping their ratios.
///
/// Inactive weights are left untouched, as are all weights when the active
/// ones sum to zero.
pub fn balance_weights(weights: &mut [f64], active: &[bool]) {
    let total: f64 = weights
        .iter()
        .zip(active)
        .filter(|(_, a)| **a)
        .map(|(w, _)| *w)
        .sum();
    if total == 0.0 || !total.is_finite() {
        return;
    }
    for (w, _) in weights.iter_mut().zip(active).filter(|(_, a)| **a) {
        *w = *w / total * 100.0;
    }
}

/// `"0.40000 x slope + 0.60000 x soil"` from percent weights
pub fn summary(weights: &[f64], names: &[String]) -> String {
    weights
        .iter()
        .zip(names)
        .map(|(w, n)| format!("{:0.5} x {}", w / 100.0, n))
        .collect::<Vec<_>>()
        .join(" + ")
}

/// Combine `inputs` into `output` as `Σ weight_i/100 * input_i`.
///
/// Inputs must share one grid; the output takes the first input's.
pub fn weighted_sum(
    source: &dyn RasterSource,
    inputs: &[PathBuf],
    output: &Path,
    params: &SumParams,
) -> Result<RasterOutput> {
    if inputs.is_empty() {
        return Err(EngineError::NoViableLayers(
            "no rasters to combine".to_string(),
        ));
    }
    if inputs.len() > MAX_INPUTS {
        return Err(EngineError::TooManyInputs {
            max: MAX_INPUTS,
            got: inputs.len(),
        });
    }
    let weights = match &params.weights {
        Some(w) if w.len() != inputs.len() => {
            return Err(EngineError::ArgumentCount {
                method: "weighted sum".to_string(),
                expected: inputs.len(),
                got: w.len(),
            })
        }
        Some(w) => w.clone(),
        None => vec![100.0; inputs.len()],
    };
    if !weights.iter().any(|w| *w > 0.0) {
        return Err(EngineError::NoViableLayers(
            "every weight is zero".to_string(),
        ));
    }
    let expr = algebra::weighted_sum(&weights)?;

    let mut datasets: Vec<Box<dyn RasterDataset>> = inputs
        .iter()
        .map(|p| source.open(p))
        .collect::<std::result::Result<_, _>>()?;

    let first_size = datasets[0].size();
    for ds in &datasets[1..] {
        let size = ds.size();
        if size != first_size {
            return Err(Error::SizeMismatch {
                er: first_size.1,
                ec: first_size.0,
                ar: size.1,
                ac: size.0,
            }
            .into());
        }
    }
    let pw = resolve_window(datasets[0].as_ref(), params.window.as_ref())?;

    info!(
        target: LOG_TARGET,
        "Summing {} rasters: {}",
        inputs.len(),
        expr
    );

    let mut blocks = Vec::with_capacity(datasets.len());
    for ds in datasets.iter_mut() {
        blocks.push((ds.read_window(pw)?, ds.nodata()));
    }
    let bands: Vec<BandInput<'_>> = blocks
        .iter()
        .map(|(data, nodata)| BandInput::new(data.view(), *nodata))
        .collect();

    let nodata = params.nodata.unwrap_or(f64::NAN);
    let result = algebra::evaluate(&expr, &bands, nodata)?;

    write_window(
        result,
        datasets[0].as_ref(),
        pw,
        nodata,
        params.data_type,
        &params.metadata,
        output,
    )?;

    Ok(RasterOutput {
        path: output.to_path_buf(),
        expression: expr.to_string(),
        rows: pw.rows,
        cols: pw.cols,
        description: params.metadata.get(META_DESCRIPTION).cloned(),
    })
}
