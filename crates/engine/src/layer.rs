//! Layers and layer sets
//!
//! A [`Layer`] is one input raster with its weight, visibility and its own
//! copy of every utility function's parameters. A [`LayerSet`] owns the
//! layers of a run, keeps their parameter ranges in step with the active
//! window, and turns them into a [`Plan`] for the scheduler.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use suitability_core::io::RasterSource;
use suitability_core::Extent;
use suitability_parallel::{ParallelStrategy, ProcessingMode};

use crate::algebra::{self, DataRange, MAX_INPUTS};
use crate::catalog::{self, MethodArgs, UtilityFunction, UtilityKind};
use crate::composite;
use crate::error::{EngineError, Result};
use crate::stats::{MinMax, WindowedStatsEngine};
use crate::LOG_TARGET;

pub type LayerId = String;

/// Default layer weight, in percent
pub const DEFAULT_WEIGHT: f64 = 100.0;

/// Replace every run of non-word characters by `_`
pub fn clean_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c.is_alphanumeric() || c == '_' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}

/// First six characters followed by `...` for longer names
pub fn short_name(name: &str) -> String {
    if name.chars().count() > 6 {
        format!("{}...", name.chars().take(6).collect::<String>())
    } else {
        name.to_string()
    }
}

/// One input raster and its normalization settings
#[derive(Debug, Clone)]
pub struct Layer {
    pub id: LayerId,
    pub filepath: PathBuf,
    pub name: String,
    /// Weight in percent
    pub weight: f64,
    pub visible: bool,
    pub extent: Extent,
    file_range: MinMax,
    observed: MinMax,
    functions: Vec<UtilityFunction>,
    selected: usize,
}

impl Layer {
    /// Layer over a raster whose full-extent min/max is `file_range`.
    ///
    /// Gets a private copy of the catalog with ranges set to the data range.
    pub fn new(
        id: impl Into<LayerId>,
        filepath: impl Into<PathBuf>,
        name: impl Into<String>,
        extent: Extent,
        file_range: MinMax,
    ) -> Self {
        let mut layer = Self {
            id: id.into(),
            filepath: filepath.into(),
            name: name.into(),
            weight: DEFAULT_WEIGHT,
            visible: true,
            extent,
            file_range,
            observed: MinMax::default(),
            functions: catalog::all(),
            selected: 0,
        };
        layer.refresh_ranges(file_range);
        layer
    }

    /// Open `path` and compute its full-extent min/max
    pub fn open(
        id: impl Into<LayerId>,
        path: &Path,
        source: &dyn RasterSource,
        stats: &WindowedStatsEngine,
    ) -> Result<Self> {
        let extent = source.open(path)?.extent();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let range = stats.min_max(path, None);
        if range.is_empty() {
            warn!(target: LOG_TARGET, "Layer {} has no valid data", name);
        }
        Ok(Self::new(id, path, name, extent, range))
    }

    /// Visible with a positive weight
    pub fn is_active(&self) -> bool {
        self.visible && self.weight > 0.0
    }

    pub fn functions(&self) -> &[UtilityFunction] {
        &self.functions
    }

    pub fn function(&self, kind: UtilityKind) -> &UtilityFunction {
        &self.functions[kind.index()]
    }

    pub fn function_mut(&mut self, kind: UtilityKind) -> &mut UtilityFunction {
        &mut self.functions[kind.index()]
    }

    pub fn selected_function(&self) -> &UtilityFunction {
        &self.functions[self.selected]
    }

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    /// Select the method by name or catalog index
    pub fn select_function(&mut self, method: &str) -> Result<()> {
        let kind: UtilityKind = method.parse()?;
        self.selected = kind.index();
        Ok(())
    }

    /// Set a parameter of the selected method; the value is clamped into
    /// its range and the stored value returned
    pub fn set_param_value(&mut self, param: &str, value: f64) -> Result<f64> {
        let kind = self.selected_function().kind;
        self.functions[self.selected]
            .param_mut(param)
            .map(|p| p.set_value(value))
            .ok_or_else(|| EngineError::UnknownFunction(format!("{}.{}", kind, param)))
    }

    /// Full-extent min/max of the raster
    pub fn file_range(&self) -> MinMax {
        self.file_range
    }

    /// Min/max of the current window
    pub fn observed(&self) -> MinMax {
        self.observed
    }

    /// Move every non-percent parameter range to `mm`, re-clamping values.
    ///
    /// An empty `mm` leaves the ranges as they are.
    pub fn refresh_ranges(&mut self, mm: MinMax) {
        let (Some(min), Some(max)) = (mm.min, mm.max) else {
            return;
        };
        self.observed = mm;
        for function in self.functions.iter_mut().filter(|f| !f.kind.is_percent()) {
            for p in function.params.ranges_mut() {
                p.set_range(min, max);
            }
        }
    }

    /// Back to the full-extent ranges
    pub fn restore_ranges(&mut self) {
        self.refresh_ranges(self.file_range);
    }

    /// Arguments of the selected method
    pub fn resolved_args(&self) -> MethodArgs {
        self.selected_function().args()
    }

    /// Name for metadata
    pub fn clean_name(&self) -> String {
        clean_name(&self.name)
    }

    /// Name for job descriptions
    pub fn short_name(&self) -> String {
        short_name(&self.name)
    }
}

/// A layer ready to be normalized
#[derive(Debug, Clone)]
pub struct PlannedLayer {
    pub id: LayerId,
    pub name: String,
    pub filepath: PathBuf,
    pub method: UtilityKind,
    pub args: MethodArgs,
    /// Full-extent data range, for methods that use it
    pub range: Option<DataRange>,
    pub weight: f64,
}

/// What a run will do: the layers that take part and the common window
#[derive(Debug, Clone)]
pub struct Plan {
    pub layers: Vec<PlannedLayer>,
    pub window: Extent,
    /// Layers left out, with the reason
    pub excluded: Vec<(LayerId, String)>,
}

/// The layers of a run, owned by a single writer
#[derive(Debug, Clone, Default)]
pub struct LayerSet {
    layers: Vec<Layer>,
}

impl LayerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer, replacing one with the same id
    pub fn add(&mut self, layer: Layer) {
        match self.layers.iter_mut().find(|l| l.id == layer.id) {
            Some(existing) => *existing = layer,
            None => self.layers.push(layer),
        }
    }

    /// Drop the layer of a removed source
    pub fn remove(&mut self, id: &str) -> Option<Layer> {
        let idx = self.layers.iter().position(|l| l.id == id)?;
        Some(self.layers.remove(idx))
    }

    pub fn get(&self, id: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Result<&mut Layer> {
        self.layers
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| EngineError::UnknownLayer(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn set_visibility(&mut self, id: &str, visible: bool) -> Result<()> {
        self.get_mut(id)?.visible = visible;
        Ok(())
    }

    pub fn set_weight(&mut self, id: &str, weight: f64) -> Result<()> {
        self.get_mut(id)?.weight = weight;
        Ok(())
    }

    /// Rescale visible layers' weights to sum 100
    pub fn balance_weights(&mut self) {
        let mut weights: Vec<f64> = self.layers.iter().map(|l| l.weight).collect();
        let active: Vec<bool> = self.layers.iter().map(|l| l.visible).collect();
        composite::balance_weights(&mut weights, &active);
        for (layer, w) in self.layers.iter_mut().zip(weights) {
            layer.weight = w;
        }
    }

    /// Bring parameter ranges in line with a new active window.
    ///
    /// Layers inside the window go back to their full-extent ranges, layers
    /// missing it are left alone, and the rest get windowed statistics.
    /// Statistics are computed in parallel and applied here afterwards.
    pub fn refresh_window_stats(
        &mut self,
        window: &Extent,
        stats: &WindowedStatsEngine,
        mode: ProcessingMode,
    ) {
        let mut pending = Vec::new();
        for (idx, layer) in self.layers.iter_mut().enumerate() {
            if window.contains(&layer.extent) {
                layer.restore_ranges();
            } else if window.intersect(&layer.extent).is_empty() {
                warn!(
                    target: LOG_TARGET,
                    "Selection does not intersect layer {}, keeping its ranges",
                    layer.name
                );
            } else {
                pending.push((idx, layer.filepath.clone()));
            }
        }

        let results = mode.par_map(0..pending.len(), |i| stats.min_max(&pending[i].1, Some(window)));

        for ((idx, _), mm) in pending.into_iter().zip(results) {
            let layer = &mut self.layers[idx];
            if mm.is_empty() {
                warn!(
                    target: LOG_TARGET,
                    "No valid data for layer {} in the selection",
                    layer.name
                );
                continue;
            }
            info!(
                target: LOG_TARGET,
                "Layer {} range in selection: {:?}..{:?}",
                layer.name,
                mm.min,
                mm.max
            );
            layer.refresh_ranges(mm);
        }
    }

    /// Resolve parameters and the common window of a run.
    ///
    /// Active layers whose source is missing or whose parameters are
    /// degenerate are excluded with a warning. The window is the requested
    /// one (or the first layer's extent) intersected with every remaining
    /// layer's extent.
    pub fn plan(&self, window: Option<Extent>) -> Result<Plan> {
        let mut layers = Vec::new();
        let mut excluded = Vec::new();

        for layer in self.layers.iter().filter(|l| l.is_active()) {
            match Self::plan_layer(layer) {
                Ok(planned) => layers.push((planned, layer.extent)),
                Err(e) if e.excludes_layer() => {
                    warn!(
                        target: LOG_TARGET,
                        "Excluding layer {}: {}",
                        layer.name,
                        e
                    );
                    excluded.push((layer.id.clone(), e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        if layers.is_empty() {
            return Err(EngineError::NoViableLayers(
                "no visible layer with a positive weight and usable parameters".to_string(),
            ));
        }
        if layers.len() > MAX_INPUTS {
            return Err(EngineError::TooManyInputs {
                max: MAX_INPUTS,
                got: layers.len(),
            });
        }

        let start = window.unwrap_or(layers[0].1);
        let window = layers.iter().fold(start, |acc, (_, extent)| acc.intersect(extent));
        if window.is_empty() {
            return Err(EngineError::EmptyWindowIntersection);
        }

        Ok(Plan {
            layers: layers.into_iter().map(|(p, _)| p).collect(),
            window,
            excluded,
        })
    }

    fn plan_layer(layer: &Layer) -> Result<PlannedLayer> {
        if !layer.filepath.is_file() {
            return Err(suitability_core::Error::SourceNotFound {
                path: layer.filepath.clone(),
            }
            .into());
        }

        let function = layer.selected_function();
        let args = function.args();
        let range = if function.kind.needs_data_range() {
            layer.file_range.range()
        } else {
            None
        };

        // Known ranges are checked now; unknown ones are computed by the job
        match range {
            Some(_) => {
                algebra::build(function.kind, &args, range)?;
            }
            None => algebra::check_args(function.kind, &args)?,
        }

        Ok(PlannedLayer {
            id: layer.id.clone(),
            name: layer.name.clone(),
            filepath: layer.filepath.clone(),
            method: function.kind,
            args,
            range,
            weight: layer.weight,
        })
    }
}
