//! Point observations and their extraction against a predictor stack.
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{DbdError, Result};
use crate::geometry::Point2;
use crate::matrix::FeatureMatrix;
use crate::raster::PredictorStack;

/// A sampled location with its measured response (e.g. dry bulk density).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub location: Point2,
    pub response: f64,
}

impl Observation {
    pub fn new(x: f64, y: f64, response: f64) -> Self {
        Self { location: Point2::new(x, y), response }
    }
}

/// Complete rows ready for modeling: coordinates, predictors and response
/// share row indices.
#[derive(Debug, Clone)]
pub struct RegressionData {
    pub coords: Vec<Point2>,
    pub x: FeatureMatrix,
    pub y: Vec<f64>,
    /// Observations dropped for falling outside the grid or carrying a
    /// missing predictor or response value.
    pub dropped: usize,
}

impl RegressionData {
    pub fn n_rows(&self) -> usize {
        self.y.len()
    }
}

/// Extract every band at every observation and keep only complete rows.
pub fn extract_training_data(
    observations: &[Observation],
    stack: &PredictorStack,
) -> Result<RegressionData> {
    let mut coords = Vec::with_capacity(observations.len());
    let mut rows = Vec::with_capacity(observations.len());
    let mut y = Vec::with_capacity(observations.len());
    let mut dropped = 0usize;

    for obs in observations {
        let Some(values) = stack.extract(obs.location.x, obs.location.y) else {
            dropped += 1;
            continue;
        };
        if !obs.response.is_finite() || values.iter().any(|v| !v.is_finite()) {
            dropped += 1;
            continue;
        }
        coords.push(obs.location);
        rows.push(values);
        y.push(obs.response);
    }

    if dropped > 0 {
        warn!("dropped {dropped} of {} observations with missing values", observations.len());
    }
    if y.is_empty() {
        return Err(DbdError::InsufficientData(
            "no observation has a complete set of predictor values".into(),
        ));
    }

    let x = FeatureMatrix::from_rows(stack.names().to_vec(), &rows)?;
    Ok(RegressionData { coords, x, y, dropped })
}
