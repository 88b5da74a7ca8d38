//! Run configuration for the full mapping pipeline.
use std::fs;
use std::path::Path;

use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{DbdError, Result};
use crate::partition::PartitionParams;
use crate::predict::normalize_quantiles;
use crate::selection::SelectionParams;

/// Every tunable of a run. Missing JSON fields take their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Default 42. Salted per purpose (sampling, clustering, bootstrap).
    pub seed: u64,
    /// Default 5. Cross-validation folds.
    pub k_folds: usize,
    /// Default 1000. Prediction locations sampled from the domain.
    pub domain_sample_size: usize,
    /// Default 10. Cluster counts tried for clustered fold layouts.
    pub n_cluster_candidates: usize,
    /// Default 0.5. Largest share of points one fold may hold.
    pub max_fold_share: f64,
    /// Default 500.
    pub n_trees: usize,
    /// Default 5.
    pub min_node_size: usize,
    /// Default [1, 2, 3].
    pub mtry_grid: Vec<usize>,
    /// Default [0.05, 0.5, 0.95].
    pub quantiles: Vec<f64>,
    /// Default 3. MADs above the median training DI that are still inside.
    pub aoa_multiplier: f64,
    /// Default false. Search training neighbours only in other CV folds.
    pub aoa_fold_aware: bool,
    /// Default "dbd". Observation property holding the response.
    pub response_field: String,
    /// Default None, meaning all cores but one.
    pub threads: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            k_folds: 5,
            domain_sample_size: 1000,
            n_cluster_candidates: 10,
            max_fold_share: 0.5,
            n_trees: 500,
            min_node_size: 5,
            mtry_grid: vec![1, 2, 3],
            quantiles: vec![0.05, 0.5, 0.95],
            aoa_multiplier: 3.0,
            aoa_fold_aware: false,
            response_field: "dbd".into(),
            threads: None,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(DbdError::InvalidParameter(msg));
        if self.k_folds < 2 {
            return bad(format!("k_folds must be ≥ 2, got {}", self.k_folds));
        }
        if self.domain_sample_size == 0 {
            return bad("domain_sample_size must be positive".into());
        }
        if self.n_cluster_candidates == 0 {
            return bad("n_cluster_candidates must be positive".into());
        }
        if !(self.max_fold_share > 0.0 && self.max_fold_share <= 1.0) {
            return bad(format!("max_fold_share must lie in (0, 1], got {}", self.max_fold_share));
        }
        if self.n_trees == 0 {
            return bad("n_trees must be positive".into());
        }
        if self.min_node_size == 0 {
            return bad("min_node_size must be positive".into());
        }
        if self.mtry_grid.is_empty() || self.mtry_grid.contains(&0) {
            return bad(format!("mtry_grid must be non-empty and positive, got {:?}", self.mtry_grid));
        }
        normalize_quantiles(&self.quantiles)?;
        if !(self.aoa_multiplier >= 0.0 && self.aoa_multiplier.is_finite()) {
            return bad(format!("aoa_multiplier must be finite and ≥ 0, got {}", self.aoa_multiplier));
        }
        if self.response_field.is_empty() {
            return bad("response_field must not be empty".into());
        }
        if self.threads == Some(0) {
            return bad("threads must be positive".into());
        }
        Ok(())
    }

    pub fn partition_params(&self) -> PartitionParams {
        PartitionParams {
            k: self.k_folds,
            sample_size: self.domain_sample_size,
            n_candidates: self.n_cluster_candidates,
            max_fold_share: self.max_fold_share,
            seed: self.seed,
        }
    }

    pub fn selection_params(&self) -> SelectionParams {
        SelectionParams {
            mtry_grid: self.mtry_grid.clone(),
            n_trees: self.n_trees,
            min_node_size: self.min_node_size,
            baseline_r2: 0.0,
            seed: self.seed,
            threads: self.threads,
        }
    }
}

/// Rayon pool with `threads` workers; None means all cores but one.
pub fn worker_pool(threads: Option<usize>) -> Result<ThreadPool> {
    let n = threads.unwrap_or_else(|| num_cpus::get().saturating_sub(1)).max(1);
    ThreadPoolBuilder::new()
        .num_threads(n)
        .build()
        .map_err(|e| DbdError::InvalidParameter(format!("cannot build worker pool: {e}")))
}
