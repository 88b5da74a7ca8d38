/// DBD mapping tool: fits the spatial quantile forest on point observations
/// and writes quantile, interval, DI and AOA products for the domain.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use dbd_core::geometry::Polygon;
use dbd_core::io::{read_domain, read_observations, read_stack};
use dbd_core::{MappingPipeline, PipelineConfig};
use log::info;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "dbd-map", about = "Map dry bulk density with a spatially validated quantile forest")]
struct Args {
    /// Predictor stack JSON ({grid, bands})
    #[arg(short, long)]
    stack: PathBuf,

    /// Observations as a GeoJSON FeatureCollection of Points
    #[arg(short = 'p', long)]
    observations: PathBuf,

    /// Domain polygon GeoJSON (default: the full grid extent)
    #[arg(short, long)]
    domain: Option<PathBuf>,

    /// Pipeline configuration JSON; missing fields take defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory (created if absent)
    #[arg(short, long, default_value = "out")]
    output: PathBuf,

    /// Override the random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the number of cross-validation folds
    #[arg(long)]
    k_folds: Option<usize>,

    /// Override the number of trees per forest
    #[arg(long)]
    n_trees: Option<usize>,

    /// Override the worker thread count
    #[arg(long)]
    threads: Option<usize>,

    /// Override the observation property holding the response
    #[arg(long)]
    response_field: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn effective_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("Cannot load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(k) = args.k_folds {
        config.k_folds = k;
    }
    if let Some(n) = args.n_trees {
        config.n_trees = n;
    }
    if args.threads.is_some() {
        config.threads = args.threads;
    }
    if let Some(field) = &args.response_field {
        config.response_field = field.clone();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

// ── Main ──────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = effective_config(&args)?;
    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let stack = read_stack(&args.stack).with_context(|| format!("Cannot read stack {}", args.stack.display()))?;
    let observations = read_observations(&args.observations, &config.response_field)
        .with_context(|| format!("Cannot read observations {}", args.observations.display()))?;
    let domain = match &args.domain {
        Some(path) => read_domain(path).with_context(|| format!("Cannot read domain {}", path.display()))?,
        None => {
            let g = stack.grid();
            Polygon::rectangle(g.x_min, g.y_min(), g.x_max(), g.y_max)
        }
    };
    info!(
        "{} bands on a {}×{} grid, {} observations",
        stack.n_bands(),
        stack.grid().rows,
        stack.grid().cols,
        observations.len()
    );

    let result = MappingPipeline::new(config)
        .run(&stack, &observations, &domain)
        .context("Mapping pipeline failed")?;
    result
        .write_outputs(&args.output)
        .with_context(|| format!("Cannot write outputs to {}", args.output.display()))?;

    print!("{}", result.report.to_text());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let args = Args::parse_from([
            "dbd-map", "--stack", "s.json", "-p", "o.geojson", "--k-folds", "3", "--response-field", "bd",
        ]);
        let config = effective_config(&args).unwrap();
        assert_eq!(config.k_folds, 3);
        assert_eq!(config.response_field, "bd");
        assert_eq!(config.n_trees, 500);
    }

    #[test]
    fn invalid_override_is_rejected() {
        let args = Args::parse_from(["dbd-map", "--stack", "s.json", "-p", "o.geojson", "--k-folds", "1"]);
        assert!(effective_config(&args).is_err());
    }
}
