//! Pipeline orchestrator: runs every modeling stage in order.
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Instant;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::aoa::polygonize::{polygonize, to_geojson, AoaPolygon};
use crate::aoa::{ApplicabilityMaps, TrainDi};
use crate::config::{worker_pool, PipelineConfig};
use crate::error::Result;
use crate::geometry::Polygon;
use crate::io::{write_json, write_raster};
use crate::model::ModelBundle;
use crate::partition::{FoldMethod, SpatialBlockPartitioner};
use crate::points::{extract_training_data, Observation};
use crate::predict::{predict_domain, QuantileRasters};
use crate::raster::{PredictorStack, RasterLayer};
use crate::selection::metrics::CvMetrics;
use crate::selection::{ForwardFeatureSelector, RoundRecord};

// ── Public structs ────────────────────────────────────────────────────────────

/// Structured summary of one run, written as `report.json` and
/// `report.txt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub features: Vec<String>,
    pub mtry: usize,
    pub cv: CvMetrics,
    pub validated: bool,
    /// Set whenever the model could not be validated against the baseline.
    pub low_confidence: bool,
    pub warning: Option<String>,
    pub n_observations: usize,
    pub n_used: usize,
    pub n_dropped: usize,
    pub fold_method: FoldMethod,
    pub fold_sizes: Vec<usize>,
    /// Wasserstein distance between CV and prediction NN distances.
    pub w_statistic: f64,
    /// Percent of valid domain cells inside the area of applicability.
    pub aoa_percent: f64,
    pub aoa_threshold: f64,
    pub n_aoa_polygons: usize,
    pub models_evaluated: usize,
    pub history: Vec<RoundRecord>,
    /// Worker threads every stage ran on.
    pub threads: usize,
    pub elapsed_ms: u64,
}

impl RunReport {
    /// Plain-text rendering for the log sink.
    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DBD mapping run")?;
        writeln!(f, "selected features : {}", self.features.join(", "))?;
        writeln!(f, "mtry              : {}", self.mtry)?;
        writeln!(
            f,
            "validated         : {}{}",
            if self.validated { "yes" } else { "no" },
            if self.low_confidence { " (LOW CONFIDENCE)" } else { "" }
        )?;
        writeln!(f, "CV R² / RMSE / ME : {:.4} / {:.4} / {:.4}", self.cv.r2, self.cv.rmse, self.cv.me)?;
        writeln!(
            f,
            "observations      : {} used, {} dropped of {}",
            self.n_used, self.n_dropped, self.n_observations
        )?;
        writeln!(
            f,
            "spatial folds     : {:?}, sizes {:?}, W = {:.4}",
            self.fold_method, self.fold_sizes, self.w_statistic
        )?;
        writeln!(
            f,
            "AOA               : {:.1} % of valid domain pixels (DI threshold {:.3}, {} polygons)",
            self.aoa_percent, self.aoa_threshold, self.n_aoa_polygons
        )?;
        if let Some(w) = &self.warning {
            writeln!(f, "warning           : {w}")?;
        }
        writeln!(f, "selection history ({} forest fits):", self.models_evaluated)?;
        for r in &self.history {
            writeln!(
                f,
                "  round {:>2}: {:<20} mtry {} R² {:.4} RMSE {:.4} {}",
                r.round,
                r.feature,
                r.mtry,
                r.r2,
                r.rmse,
                if r.accepted { "accepted" } else { "rejected" }
            )?;
        }
        writeln!(f, "workers           : {}", self.threads)?;
        writeln!(f, "elapsed           : {} ms", self.elapsed_ms)
    }
}

/// Full output of a run.
pub struct PipelineResult {
    pub report: RunReport,
    pub bundle: ModelBundle,
    pub quantiles: QuantileRasters,
    /// None with a single requested quantile.
    pub interval_width: Option<RasterLayer>,
    /// None when the median quantile was not requested.
    pub interval_ratio: Option<RasterLayer>,
    pub applicability: ApplicabilityMaps,
    pub aoa_polygons: Vec<AoaPolygon>,
}

impl PipelineResult {
    /// Write every product into `dir`, creating it if needed.
    pub fn write_outputs(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        for (q, layer) in self.quantiles.quantiles.iter().zip(&self.quantiles.layers) {
            let name = format!("q{q}");
            write_raster(&dir.join(format!("{name}.json")), &name, layer)?;
        }
        if let Some(width) = &self.interval_width {
            write_raster(&dir.join("interval_width.json"), "interval_width", width)?;
        }
        if let Some(ratio) = &self.interval_ratio {
            write_raster(&dir.join("interval_ratio.json"), "interval_ratio", ratio)?;
        }
        write_raster(&dir.join("di.json"), "di", &self.applicability.di)?;
        write_raster(&dir.join("aoa.json"), "aoa", &self.applicability.aoa)?;
        write_json(&dir.join("aoa.geojson"), &to_geojson(&self.aoa_polygons))?;
        self.bundle.save(&dir.join("model.json"))?;
        write_json(&dir.join("report.json"), &self.report)?;
        fs::write(dir.join("report.txt"), self.report.to_text())?;
        info!("outputs written to {}", dir.display());
        Ok(())
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct MappingPipeline {
    config: PipelineConfig,
}

impl MappingPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the full modeling pipeline on one worker pool sized by
    /// `PipelineConfig::threads`.
    ///
    /// Stage order:
    ///   1. Extraction of complete training rows
    ///   2. Spatial fold partition
    ///   3. Forward feature selection
    ///   4. Quantile prediction over the domain
    ///   5. Area of applicability
    pub fn run(&self, stack: &PredictorStack, observations: &[Observation], domain: &Polygon) -> Result<PipelineResult> {
        self.config.validate()?;
        domain.validate()?;
        worker_pool(self.config.threads)?.install(|| self.run_stages(stack, observations, domain))
    }

    fn run_stages(&self, stack: &PredictorStack, observations: &[Observation], domain: &Polygon) -> Result<PipelineResult> {
        let cfg = &self.config;
        let started = Instant::now();

        // ── 1. Extraction ───────────────────────────────────────────────────
        let data = extract_training_data(observations, stack)?;
        info!(
            "{} of {} observations usable across {} bands",
            data.n_rows(),
            observations.len(),
            stack.n_bands()
        );

        // ── 2. Spatial folds ────────────────────────────────────────────────
        let partition = SpatialBlockPartitioner::new(cfg.partition_params()).partition(&data.coords, domain)?;

        // ── 3. Feature selection ────────────────────────────────────────────
        let selection = ForwardFeatureSelector::new(cfg.selection_params()).search(
            stack.names(),
            &data.x,
            &data.y,
            &partition.folds,
        )?;
        if let Some(w) = &selection.warning {
            warn!("{w}; continuing with an unvalidated model");
        }
        let model = selection.model;

        // ── 4. Prediction ───────────────────────────────────────────────────
        let quantiles = predict_domain(&model, stack, &cfg.quantiles, Some(domain))?;
        let interval_width = match quantiles.layers.len() {
            0 | 1 => None,
            _ => Some(quantiles.interval_width()?),
        };
        let interval_ratio = match (&interval_width, quantiles.get(0.5)) {
            (Some(_), Some(_)) => Some(quantiles.interval_ratio()?),
            _ => None,
        };

        // ── 5. Area of applicability ────────────────────────────────────────
        let x_selected = data.x.select_columns(&model.features)?;
        let train_di = if cfg.aoa_fold_aware {
            TrainDi::fit_with_folds(&x_selected, model.importance(), cfg.aoa_multiplier, &partition.folds.fold_of)?
        } else {
            TrainDi::fit(&x_selected, model.importance(), cfg.aoa_multiplier)?
        };
        let mut applicability = train_di.score(stack)?;
        applicability.di.mask_outside(domain);
        applicability.aoa.mask_outside(domain);
        let aoa_polygons = polygonize(&applicability.aoa);
        let aoa_percent = applicability.percent_inside();
        info!(
            "AOA covers {aoa_percent:.1} % of valid domain pixels (threshold {:.3})",
            train_di.threshold()
        );

        let report = RunReport {
            features: model.features.clone(),
            mtry: model.mtry,
            cv: model.cv,
            validated: model.validated,
            low_confidence: !model.validated,
            warning: selection.warning.as_ref().map(|w| w.to_string()),
            n_observations: observations.len(),
            n_used: data.n_rows(),
            n_dropped: data.dropped,
            fold_method: partition.diagnostics.method,
            fold_sizes: partition.folds.fold_sizes(),
            w_statistic: partition.diagnostics.w_statistic,
            aoa_percent,
            aoa_threshold: train_di.threshold(),
            n_aoa_polygons: aoa_polygons.len(),
            models_evaluated: selection.models_evaluated,
            history: selection.history,
            threads: rayon::current_num_threads(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        Ok(PipelineResult {
            report,
            bundle: ModelBundle { model, train_di },
            quantiles,
            interval_width,
            interval_ratio,
            applicability,
            aoa_polygons,
        })
    }
}
