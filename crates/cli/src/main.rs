//! Suitability CLI - raster normalization and weighted overlay

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use suitability_core::io::{GeoTiffDataset, GeoTiffSource, RasterDataset, RasterSource};
use suitability_core::{DataType, Extent};
use suitability_engine::algebra::DataRange;
use suitability_engine::catalog::{self, MethodArgs, UtilityKind};
use suitability_engine::composite::{weighted_sum, SumParams, DEFAULT_SUM_NODATA};
use suitability_engine::layer::{Layer, LayerSet};
use suitability_engine::normalize::{normalize, NormalizeParams};
use suitability_engine::scheduler::{CompositeRequest, JobStatus, Scheduler, ThreadExecutor};
use suitability_engine::stats::WindowedStatsEngine;
use suitability_engine::EngineConfig;

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "suitability")]
#[command(author, version, about = "Raster normalization and weighted suitability analysis", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Engine configuration (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Worker threads for statistics (0 = all cores, 1 = sequential)
    #[arg(short, long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// List the utility functions
    Methods,
    /// Normalize one raster with a utility function
    Normalize {
        /// Input raster file
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Utility function, by name or index
        #[arg(short, long, default_value = "minmax")]
        method: String,
        /// Function parameters (threshold, or a and b); defaults when omitted
        #[arg(short, long, num_args = 1.., allow_negative_numbers = true)]
        params: Vec<f64>,
        /// Window as ulx uly lrx lry
        #[arg(long, num_args = 4, value_names = ["ULX", "ULY", "LRX", "LRY"], allow_negative_numbers = true)]
        projwin: Option<Vec<f64>>,
        /// Data minimum for range-based methods (whole raster when omitted)
        #[arg(long, allow_negative_numbers = true)]
        min: Option<f64>,
        /// Data maximum for range-based methods (whole raster when omitted)
        #[arg(long, allow_negative_numbers = true)]
        max: Option<f64>,
        /// Output no-data value (NaN when omitted)
        #[arg(long, allow_negative_numbers = true)]
        nodata: Option<f64>,
        /// Output data type: Byte, UInt16, Float32, Float64
        #[arg(long = "type", default_value = "Float32")]
        data_type: String,
    },
    /// Weighted sum of co-registered rasters
    Sum {
        /// Output file
        output: PathBuf,
        /// Input raster files
        #[arg(short, long, num_args = 1.., required = true)]
        inputs: Vec<PathBuf>,
        /// One weight per input in percent (100 each when omitted)
        #[arg(short, long, num_args = 1.., allow_negative_numbers = true)]
        weights: Vec<f64>,
        /// Window as ulx uly lrx lry
        #[arg(long, num_args = 4, value_names = ["ULX", "ULY", "LRX", "LRY"], allow_negative_numbers = true)]
        projwin: Option<Vec<f64>>,
        /// Output no-data value
        #[arg(long, default_value_t = DEFAULT_SUM_NODATA, allow_negative_numbers = true)]
        nodata: f64,
        /// Output data type: Byte, UInt16, Float32, Float64
        #[arg(long = "type", default_value = "Float32")]
        data_type: String,
    },
    /// Normalize every layer and combine them in one run
    Composite {
        /// Output file
        output: PathBuf,
        /// Layer as path,method,weight[,p1[,p2]]
        #[arg(short, long = "layer", required = true)]
        layers: Vec<String>,
        /// Window as ulx uly lrx lry
        #[arg(long, num_args = 4, value_names = ["ULX", "ULY", "LRX", "LRY"], allow_negative_numbers = true)]
        projwin: Option<Vec<f64>>,
        /// Rescale weights to sum 100
        #[arg(long)]
        balance: bool,
        /// Keep the normalized intermediates
        #[arg(long)]
        keep_intermediates: bool,
        /// Output no-data value
        #[arg(long, default_value_t = DEFAULT_SUM_NODATA, allow_negative_numbers = true)]
        nodata: f64,
        /// Output data type: Byte, UInt16, Float32, Float64
        #[arg(long = "type", default_value = "Float32")]
        data_type: String,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("a global tracing subscriber is already installed");
    }
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

fn load_config(path: Option<&Path>, threads: Option<usize>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&text).context("Invalid engine configuration")?
        }
        None => EngineConfig::default(),
    };
    if threads.is_some() {
        config.threads = threads;
    }
    Ok(config)
}

/// `ulx uly lrx lry` to an extent
fn parse_projwin(values: Option<Vec<f64>>) -> Result<Option<Extent>> {
    match values.as_deref() {
        None => Ok(None),
        Some(&[ulx, uly, lrx, lry]) => {
            if ulx >= lrx || lry >= uly {
                bail!("Invalid --projwin: expected ulx < lrx and lry < uly");
            }
            Ok(Some(Extent::from_projwin([ulx, uly, lrx, lry])))
        }
        Some(_) => bail!("--projwin takes exactly 4 values"),
    }
}

fn parse_type(s: &str) -> Result<DataType> {
    s.parse::<DataType>()
        .with_context(|| format!("Unknown data type '{}'", s))
}

/// Explicit parameters, or the catalog defaults when none are given
fn method_args(kind: UtilityKind, params: &[f64]) -> Result<MethodArgs> {
    if params.is_empty() {
        return Ok(catalog::UtilityFunction::new(kind).args());
    }
    Ok(MethodArgs::from_values(kind, params)?)
}

/// Explicit `--min`/`--max`, the missing side taken from the whole raster
fn data_range(
    stats: &WindowedStatsEngine,
    input: &Path,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<Option<DataRange>> {
    let (min, max) = match (min, max) {
        (None, None) => return Ok(None),
        (Some(min), Some(max)) => (min, max),
        (min, max) => {
            let full = stats
                .full_range(input)
                .with_context(|| format!("Failed to compute the range of {}", input.display()))?;
            (min.unwrap_or(full.min), max.unwrap_or(full.max))
        }
    };
    if min > max {
        bail!("Invalid data range: min {} is above max {}", min, max);
    }
    Ok(Some(DataRange::new(min, max)))
}

/// `path,method,weight[,p1[,p2]]`; `None` when the layer is left out
fn parse_layer(
    spec: &str,
    index: usize,
    source: &dyn RasterSource,
    stats: &WindowedStatsEngine,
) -> Result<Option<Layer>> {
    let parts: Vec<&str> = spec.split(',').map(str::trim).collect();
    if parts.len() < 3 {
        bail!("Invalid layer '{}': expected path,method,weight[,params]", spec);
    }
    let path = PathBuf::from(parts[0]);
    let weight: f64 = parts[2]
        .parse()
        .with_context(|| format!("Invalid weight in layer '{}'", spec))?;
    let params = parts[3..]
        .iter()
        .map(|p| p.parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Invalid parameter in layer '{}'", spec))?;

    let mut layer = match Layer::open(index.to_string(), &path, source, stats) {
        Ok(layer) => layer,
        Err(e) if e.excludes_layer() => {
            warn!("Layer {} left out: {}", path.display(), e);
            return Ok(None);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to open layer {}", path.display()))
        }
    };
    layer.select_function(parts[1])?;
    layer.weight = weight;

    let kind = layer.selected_function().kind;
    if !params.is_empty() && params.len() != kind.numvars() {
        bail!(
            "{} takes {} parameter(s), got {} in '{}'",
            kind,
            kind.numvars(),
            params.len(),
            spec
        );
    }
    for (name, value) in kind.param_names().iter().zip(params) {
        let stored = layer.set_param_value(name, value)?;
        if stored != value {
            warn!("{} {} clamped to {}", layer.name, name, stored);
        }
    }
    Ok(Some(layer))
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    let mut config = load_config(cli.config.as_deref(), cli.threads)?;
    let source: Arc<dyn RasterSource> = Arc::new(GeoTiffSource);

    match cli.command {
        // ── Info ─────────────────────────────────────────────────────
        Commands::Info { input } => {
            let ds = GeoTiffDataset::open(&input).context("Failed to open raster")?;
            let (cols, rows) = ds.size();
            let t = ds.transform();
            let extent = ds.extent();

            println!("File: {}", input.display());
            println!("Dimensions: {} x {} ({} cells)", cols, rows, cols * rows);
            println!("Origin: ({:.6}, {:.6})", t.origin_x, t.origin_y);
            println!("Pixel size: ({:.6}, {:.6})", t.pixel_width, t.pixel_height);
            println!(
                "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                extent.min_x, extent.min_y, extent.max_x, extent.max_y
            );
            if let Some(crs) = ds.crs() {
                println!("CRS: {}", crs);
            }
            if let Some(nodata) = ds.nodata() {
                println!("NoData: {}", nodata);
            }
            for (key, value) in ds.metadata() {
                println!("{}: {}", key, value);
            }

            let stats = WindowedStatsEngine::new(source, &config);
            let pb = spinner("Computing statistics...");
            let mm = stats.min_max(&input, None);
            pb.finish_and_clear();
            match (mm.min, mm.max) {
                (Some(min), Some(max)) => {
                    println!("\nStatistics:");
                    println!("  Min: {:.4}", min);
                    println!("  Max: {:.4}", max);
                }
                _ => println!("\nNo valid data"),
            }
        }

        // ── Methods ──────────────────────────────────────────────────
        Commands::Methods => {
            for function in catalog::all() {
                let kind = function.kind;
                let defaults = function
                    .args()
                    .values()
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>();
                let params = kind
                    .param_names()
                    .iter()
                    .zip(&defaults)
                    .map(|(n, v)| format!("{}={}", n, v))
                    .collect::<Vec<_>>()
                    .join(", ");
                println!(
                    "{:>2}  {:<26} {}{}",
                    kind.index(),
                    kind.name(),
                    kind.description(),
                    if params.is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", params)
                    }
                );
            }
        }

        // ── Normalize ────────────────────────────────────────────────
        Commands::Normalize {
            input,
            output,
            method,
            params,
            projwin,
            min,
            max,
            nodata,
            data_type,
        } => {
            let kind: UtilityKind = method.parse()?;
            let stats = WindowedStatsEngine::new(source, &config);
            let range = if kind.needs_data_range() {
                data_range(&stats, &input, min, max)?
            } else {
                if min.is_some() || max.is_some() {
                    warn!("{} does not use a data range; --min/--max ignored", kind);
                }
                None
            };
            let params = NormalizeParams {
                method: kind,
                args: method_args(kind, &params)?,
                range,
                window: parse_projwin(projwin)?,
                nodata,
                data_type: parse_type(&data_type)?,
                ..NormalizeParams::default()
            };

            let pb = spinner("Normalizing...");
            let start = Instant::now();
            let result = normalize(&stats, &input, &output, &params);
            pb.finish_and_clear();
            let result = result.context("Failed to normalize")?;
            info!("Expression: {}", result.expression);
            done("Normalized raster", &result.path, start.elapsed());
        }

        // ── Sum ──────────────────────────────────────────────────────
        Commands::Sum {
            output,
            inputs,
            weights,
            projwin,
            nodata,
            data_type,
        } => {
            let params = SumParams {
                weights: if weights.is_empty() { None } else { Some(weights) },
                window: parse_projwin(projwin)?,
                nodata: Some(nodata),
                data_type: parse_type(&data_type)?,
                ..SumParams::default()
            };

            let pb = spinner("Summing...");
            let start = Instant::now();
            let result = weighted_sum(source.as_ref(), &inputs, &output, &params);
            pb.finish_and_clear();
            let result = result.context("Failed to compute weighted sum")?;
            info!("Expression: {}", result.expression);
            done("Weighted sum", &result.path, start.elapsed());
        }

        // ── Composite ────────────────────────────────────────────────
        Commands::Composite {
            output,
            layers,
            projwin,
            balance,
            keep_intermediates,
            nodata,
            data_type,
        } => {
            if keep_intermediates {
                config.keep_intermediates = true;
            }
            let window = parse_projwin(projwin)?;
            let data_type = parse_type(&data_type)?;
            let stats = WindowedStatsEngine::new(source.clone(), &config);

            let pb = spinner("Reading layers...");
            let mut set = LayerSet::new();
            for (i, spec) in layers.iter().enumerate() {
                if let Some(layer) = parse_layer(spec, i, source.as_ref(), &stats)? {
                    set.add(layer);
                }
            }
            if let Some(window) = &window {
                set.refresh_window_stats(window, &stats, config.processing_mode());
            }
            pb.finish_and_clear();
            if balance {
                set.balance_weights();
            }
            for layer in set.iter() {
                info!(
                    "{}: {} weight {:.2}%",
                    layer.name,
                    layer.selected_function().name(),
                    layer.weight
                );
            }

            let plan = set.plan(window).context("Nothing to compute")?;
            for (id, reason) in &plan.excluded {
                warn!("Layer {} left out: {}", id, reason);
            }

            let mut scheduler = Scheduler::new(Arc::new(ThreadExecutor), stats, config);
            scheduler.on_completion(|c| {
                if !c.success {
                    warn!("{} ({})", c.description, c.status);
                }
            });

            let start = Instant::now();
            let parent = scheduler.submit(CompositeRequest {
                plan,
                output: output.clone(),
                nodata: Some(nodata),
                data_type,
            })?;
            let pb = spinner("Running jobs...");
            let status = scheduler.wait(parent);
            pb.finish_and_clear();

            match status? {
                JobStatus::Succeeded => done("Suitability raster", &output, start.elapsed()),
                status => {
                    let reason = scheduler
                        .job(parent)
                        .and_then(|j| j.error)
                        .unwrap_or_else(|| status.to_string());
                    bail!("Composite run {}: {}", status, reason);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use suitability_core::io::write_geotiff;
    use suitability_core::Raster;
    use tempfile::tempdir;

    fn write_ramp(path: &Path) {
        let raster = Raster::from_vec((0..10).map(|v| v as f64 * 5.0).collect(), 2, 5).unwrap();
        write_geotiff(&raster, path, None).unwrap();
    }

    #[test]
    fn test_data_range_fills_missing_side() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("ramp.tif");
        write_ramp(&input);
        let stats = WindowedStatsEngine::new(Arc::new(GeoTiffSource), &EngineConfig::default());

        assert!(data_range(&stats, &input, None, None).unwrap().is_none());
        assert_eq!(
            data_range(&stats, &input, Some(10.0), None).unwrap(),
            Some(DataRange::new(10.0, 45.0))
        );
        assert_eq!(
            data_range(&stats, &input, None, Some(20.0)).unwrap(),
            Some(DataRange::new(0.0, 20.0))
        );
        assert!(data_range(&stats, &input, Some(50.0), Some(20.0)).is_err());
    }

    #[test]
    fn test_missing_layer_is_left_out() {
        let dir = tempdir().unwrap();
        let present = dir.path().join("present.tif");
        write_ramp(&present);
        let stats = WindowedStatsEngine::new(Arc::new(GeoTiffSource), &EngineConfig::default());

        let missing = format!("{},minmax,50", dir.path().join("gone.tif").display());
        assert!(parse_layer(&missing, 0, &GeoTiffSource, &stats).unwrap().is_none());

        let spec = format!("{},stepup,50,20", present.display());
        let layer = parse_layer(&spec, 1, &GeoTiffSource, &stats).unwrap().unwrap();
        assert_eq!(layer.weight, 50.0);
        assert_eq!(layer.selected_function().kind, UtilityKind::StepUp);

        assert!(parse_layer("only,two", 2, &GeoTiffSource, &stats).is_err());
    }
}
