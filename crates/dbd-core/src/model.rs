//! The fitted model that survives selection, and its on-disk form.
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::aoa::TrainDi;
use crate::error::{DbdError, Result};
use crate::forest::QuantileForest;
use crate::selection::metrics::CvMetrics;

/// Selected feature subset with its tuned forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedModel {
    /// Insertion order of forward selection, no duplicates.
    pub features: Vec<String>,
    pub mtry: usize,
    pub forest: QuantileForest,
    /// Spatial cross-validation metrics of the accepted subset.
    pub cv: CvMetrics,
    /// False when selection never beat the baseline.
    pub validated: bool,
}

impl SelectedModel {
    /// Conditional quantile for a row ordered like `features`.
    pub fn predict_quantile(&self, row: &[f64], q: f64) -> f64 {
        self.forest.predict_quantile(row, q)
    }

    pub fn predict_quantiles(&self, row: &[f64], qs: &[f64]) -> Vec<f64> {
        self.forest.predict_quantiles(row, qs)
    }

    /// Importance per selected feature, in `features` order.
    pub fn importance(&self) -> &[f64] {
        self.forest.importance()
    }
}

/// Everything needed to re-predict and re-score applicability without
/// retraining.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub model: SelectedModel,
    pub train_di: TrainDi,
}

impl ModelBundle {
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = fs::File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = fs::File::open(path)?;
        let bundle: ModelBundle = serde_json::from_reader(BufReader::new(file))?;
        if bundle.model.features.len() != bundle.model.forest.feature_names().len() {
            return Err(DbdError::InvalidParameter(format!(
                "model lists {} features but its forest was fit on {}",
                bundle.model.features.len(),
                bundle.model.forest.feature_names().len()
            )));
        }
        Ok(bundle)
    }
}
