/// Re-prediction tool: applies a saved model bundle to a predictor stack
/// without retraining and writes quantile, interval, DI and AOA rasters.
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use dbd_core::aoa::polygonize::{polygonize, to_geojson};
use dbd_core::config::worker_pool;
use dbd_core::io::{read_domain, read_stack, write_json, write_raster};
use dbd_core::{predict_domain, ModelBundle};
use log::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "dbd-predict", about = "Predict DBD quantiles and applicability from a saved model")]
struct Args {
    /// model.json written by dbd-map
    #[arg(short, long)]
    model: PathBuf,

    /// Predictor stack JSON; must contain every selected band
    #[arg(short, long)]
    stack: PathBuf,

    /// Optional domain polygon; cells outside become null
    #[arg(short, long)]
    domain: Option<PathBuf>,

    /// Comma-separated quantiles
    #[arg(short, long, value_delimiter = ',', default_value = "0.05,0.5,0.95")]
    quantiles: Vec<f64>,

    /// Output directory (created if absent)
    #[arg(short, long, default_value = "out")]
    output: PathBuf,

    /// Worker threads (default: all cores but one)
    #[arg(long)]
    threads: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let bundle = ModelBundle::load(&args.model).with_context(|| format!("Cannot load model {}", args.model.display()))?;
    let stack = read_stack(&args.stack).with_context(|| format!("Cannot read stack {}", args.stack.display()))?;
    let domain = args
        .domain
        .as_ref()
        .map(|p| read_domain(p).with_context(|| format!("Cannot read domain {}", p.display())))
        .transpose()?;
    if args.quantiles.is_empty() {
        bail!("at least one quantile is required");
    }
    if !bundle.model.validated {
        warn!("model was not validated against the baseline; treat predictions as low confidence");
    }
    info!(
        "predicting with features [{}], mtry {}",
        bundle.model.features.join(", "),
        bundle.model.mtry
    );

    let out = &args.output;
    fs::create_dir_all(out).with_context(|| format!("Cannot create {}", out.display()))?;

    let pool = worker_pool(args.threads).context("Cannot build worker pool")?;
    let rasters = pool
        .install(|| predict_domain(&bundle.model, &stack, &args.quantiles, domain.as_ref()))
        .context("Prediction failed")?;
    for (q, layer) in rasters.quantiles.iter().zip(&rasters.layers) {
        let name = format!("q{q}");
        write_raster(&out.join(format!("{name}.json")), &name, layer)?;
    }
    if rasters.layers.len() >= 2 {
        write_raster(&out.join("interval_width.json"), "interval_width", &rasters.interval_width()?)?;
        if rasters.get(0.5).is_some() {
            write_raster(&out.join("interval_ratio.json"), "interval_ratio", &rasters.interval_ratio()?)?;
        }
    }

    let mut maps = pool
        .install(|| bundle.train_di.score(&stack))
        .context("Applicability scoring failed")?;
    if let Some(domain) = &domain {
        maps.di.mask_outside(domain);
        maps.aoa.mask_outside(domain);
    }
    write_raster(&out.join("di.json"), "di", &maps.di)?;
    write_raster(&out.join("aoa.json"), "aoa", &maps.aoa)?;
    write_json(&out.join("aoa.geojson"), &to_geojson(&polygonize(&maps.aoa)))?;

    println!(
        "{} quantile layers written to {}; {:.1} % of valid pixels inside the AOA",
        rasters.layers.len(),
        out.display(),
        maps.percent_inside()
    );
    Ok(())
}
