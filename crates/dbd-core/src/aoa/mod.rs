//! Area of applicability from feature-space dissimilarity.
//!
//! Predictors are standardized with the training mean and standard
//! deviation and weighted by model importance. The dissimilarity index (DI)
//! of a location is its distance to the nearest training point in that
//! space, divided by the mean leave-one-out nearest-neighbour distance of the
//! training set. Locations whose DI stays below an outlier-robust threshold
//! derived from the training DI are inside the area of applicability.
pub mod polygonize;

use log::warn;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{DbdError, Result};
use crate::matrix::FeatureMatrix;
use crate::raster::{PredictorStack, RasterLayer};

/// Consistency constant turning a MAD into a normal-sd estimate.
const MAD_SCALE: f64 = 1.4826;

/// Default multiplier on the MAD above the median training DI.
pub const DEFAULT_MULTIPLIER: f64 = 3.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainDi {
    features: Vec<String>,
    means: Vec<f64>,
    sds: Vec<f64>,
    weights: Vec<f64>,
    /// Scaled and weighted training rows, row-major.
    train: Vec<f64>,
    n_train: usize,
    /// Leave-one-out nearest-neighbour distance per training row.
    nn_distances: Vec<f64>,
    /// Mean of `nn_distances`; the DI normalization divisor.
    mean_nn: f64,
    /// `nn_distances / mean_nn`.
    train_di: Vec<f64>,
    threshold: f64,
    multiplier: f64,
}

/// DI and AOA rasters on the stack's grid.
#[derive(Debug, Clone)]
pub struct ApplicabilityMaps {
    pub di: RasterLayer,
    /// 1 inside, 0 outside, NaN where a predictor is missing.
    pub aoa: RasterLayer,
}

impl ApplicabilityMaps {
    /// Percent of valid cells inside the area of applicability.
    pub fn percent_inside(&self) -> f64 {
        let valid = self.aoa.valid_count();
        if valid == 0 {
            return 0.0;
        }
        let inside = self.aoa.data.iter().filter(|&&v| v == 1.0).count();
        100.0 * inside as f64 / valid as f64
    }
}

impl TrainDi {
    /// Build from the training matrix and per-column importance weights
    /// using leave-one-out nearest neighbours.
    pub fn fit(x: &FeatureMatrix, weights: &[f64], multiplier: f64) -> Result<Self> {
        Self::fit_inner(x, weights, multiplier, None)
    }

    /// Like [`TrainDi::fit`], but a training point's nearest neighbour is
    /// searched only among points in other cross-validation folds.
    pub fn fit_with_folds(x: &FeatureMatrix, weights: &[f64], multiplier: f64, fold_of: &[usize]) -> Result<Self> {
        if fold_of.len() != x.n_rows() {
            return Err(DbdError::InvalidParameter(format!(
                "{} fold labels for {} training rows",
                fold_of.len(),
                x.n_rows()
            )));
        }
        Self::fit_inner(x, weights, multiplier, Some(fold_of))
    }

    fn fit_inner(x: &FeatureMatrix, weights: &[f64], multiplier: f64, fold_of: Option<&[usize]>) -> Result<Self> {
        let n = x.n_rows();
        let p = x.n_cols();
        if n < 2 {
            return Err(DbdError::EmptyTrainingSet(n));
        }
        if weights.len() != p {
            return Err(DbdError::InvalidParameter(format!("{} weights for {p} features", weights.len())));
        }
        if !(multiplier >= 0.0) {
            return Err(DbdError::InvalidParameter(format!("AOA multiplier must be ≥ 0, got {multiplier}")));
        }

        let mut means = Vec::with_capacity(p);
        let mut sds = Vec::with_capacity(p);
        for j in 0..p {
            let col = x.column(j);
            let mean = col.iter().sum::<f64>() / n as f64;
            let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            let sd = var.sqrt();
            means.push(mean);
            sds.push(if sd > 0.0 && sd.is_finite() { sd } else { 1.0 });
        }
        let weights = normalize_weights(weights);

        let mut train = Vec::with_capacity(n * p);
        for i in 0..n {
            for (j, &v) in x.row(i).iter().enumerate() {
                train.push((v - means[j]) / sds[j] * weights[j]);
            }
        }

        let row = |i: usize| &train[i * p..(i + 1) * p];
        let nn_distances: Vec<f64> = (0..n)
            .map(|i| {
                (0..n)
                    .filter(|&j| j != i && fold_of.map_or(true, |f| f[j] != f[i]))
                    .map(|j| euclid(row(i), row(j)))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        if nn_distances.iter().any(|d| d.is_infinite()) {
            return Err(DbdError::InsufficientData(
                "a training point has no neighbour outside its own fold".into(),
            ));
        }

        let mean_nn = nn_distances.iter().sum::<f64>() / n as f64;
        let train_di: Vec<f64> = nn_distances.iter().map(|&d| normalize(d, mean_nn)).collect();
        let threshold = median(&train_di) + multiplier * MAD_SCALE * mad(&train_di);

        Ok(Self {
            features: x.names().to_vec(),
            means,
            sds,
            weights,
            train,
            n_train: n,
            nn_distances,
            mean_nn,
            train_di,
            threshold,
            multiplier,
        })
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn mean_nn(&self) -> f64 {
        self.mean_nn
    }

    pub fn train_di(&self) -> &[f64] {
        &self.train_di
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// DI of a raw feature row ordered like `features`.
    pub fn di_of(&self, row: &[f64]) -> f64 {
        let p = self.features.len();
        let scaled: Vec<f64> = row
            .iter()
            .enumerate()
            .map(|(j, &v)| (v - self.means[j]) / self.sds[j] * self.weights[j])
            .collect();
        let nearest = (0..self.n_train)
            .map(|i| euclid(&scaled, &self.train[i * p..(i + 1) * p]))
            .fold(f64::INFINITY, f64::min);
        normalize(nearest, self.mean_nn)
    }

    pub fn is_inside(&self, di: f64) -> bool {
        di <= self.threshold
    }

    /// DI and AOA for every cell of `stack`. The stack is only read.
    pub fn score(&self, stack: &PredictorStack) -> Result<ApplicabilityMaps> {
        let band_idx = stack.indices_of(&self.features)?;
        let grid = *stack.grid();
        let p = band_idx.len();

        let di_values: Vec<f64> = (0..grid.n_cells())
            .into_par_iter()
            .map_init(
                || vec![0.0; p],
                |buf, cell| {
                    if stack.pixel_into(cell, &band_idx, buf) {
                        self.di_of(buf)
                    } else {
                        f64::NAN
                    }
                },
            )
            .collect();
        let aoa_values: Vec<f64> = di_values
            .iter()
            .map(|&d| if d.is_nan() { f64::NAN } else if self.is_inside(d) { 1.0 } else { 0.0 })
            .collect();

        Ok(ApplicabilityMaps {
            di: RasterLayer::from_vec(grid, di_values)?,
            aoa: RasterLayer::from_vec(grid, aoa_values)?,
        })
    }
}

/// Clamp negatives to zero and scale to a maximum of 1; all-zero weights
/// fall back to uniform.
fn normalize_weights(raw: &[f64]) -> Vec<f64> {
    let clean: Vec<f64> = raw.iter().map(|&w| if w.is_finite() && w > 0.0 { w } else { 0.0 }).collect();
    let max = clean.iter().cloned().fold(0.0, f64::max);
    if max <= 0.0 {
        warn!("all feature importance weights are zero; using uniform weights");
        return vec![1.0; raw.len()];
    }
    clean.iter().map(|w| w / max).collect()
}

fn normalize(distance: f64, mean_nn: f64) -> f64 {
    if mean_nn > 0.0 {
        distance / mean_nn
    } else if distance == 0.0 {
        0.0
    } else {
        f64::INFINITY
    }
}

#[inline]
fn euclid(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut v = values.to_vec();
    v.sort_by(f64::total_cmp);
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        (v[mid - 1] + v[mid]) / 2.0
    } else {
        v[mid]
    }
}

/// Median absolute deviation from the median (unscaled).
pub fn mad(values: &[f64]) -> f64 {
    let m = median(values);
    let dev: Vec<f64> = values.iter().map(|v| (v - m).abs()).collect();
    median(&dev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GridSpec;
    use approx::assert_relative_eq;

    fn training() -> FeatureMatrix {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        FeatureMatrix::from_rows(vec!["a".into(), "b".into()], &rows).unwrap()
    }

    #[test]
    fn training_point_has_zero_di_and_is_inside() {
        let x = training();
        let tdi = TrainDi::fit(&x, &[1.0, 0.5], DEFAULT_MULTIPLIER).unwrap();
        for i in 0..x.n_rows() {
            let di = tdi.di_of(x.row(i));
            assert_eq!(di, 0.0);
            assert!(tdi.is_inside(di));
        }
    }

    #[test]
    fn far_point_is_outside() {
        let tdi = TrainDi::fit(&training(), &[1.0, 1.0], DEFAULT_MULTIPLIER).unwrap();
        let di = tdi.di_of(&[1e6, -1e6]);
        assert!(di > 1e3);
        assert!(!tdi.is_inside(di));
    }

    #[test]
    fn threshold_is_median_plus_scaled_mad() {
        let tdi = TrainDi::fit(&training(), &[1.0, 1.0], 2.0).unwrap();
        let expected = median(tdi.train_di()) + 2.0 * MAD_SCALE * mad(tdi.train_di());
        assert_relative_eq!(tdi.threshold(), expected);
        let mean_di = tdi.train_di().iter().sum::<f64>() / tdi.train_di().len() as f64;
        assert_relative_eq!(mean_di, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_weight_feature_is_ignored() {
        let tdi = TrainDi::fit(&training(), &[1.0, 0.0], DEFAULT_MULTIPLIER).unwrap();
        // Moving only the zero-weight feature leaves DI unchanged.
        assert_eq!(tdi.di_of(&[4.0, 100.0]), tdi.di_of(&[4.0, 1.0]));
    }

    #[test]
    fn all_zero_weights_fall_back_to_uniform() {
        let tdi = TrainDi::fit(&training(), &[0.0, -2.0], DEFAULT_MULTIPLIER).unwrap();
        assert_eq!(tdi.weights(), &[1.0, 1.0]);
    }

    #[test]
    fn fewer_than_two_rows_rejected() {
        let x = FeatureMatrix::from_rows(vec!["a".into()], &[vec![1.0]]).unwrap();
        assert!(matches!(
            TrainDi::fit(&x, &[1.0], DEFAULT_MULTIPLIER),
            Err(DbdError::EmptyTrainingSet(1))
        ));
    }

    #[test]
    fn single_fold_leaves_no_outside_neighbour() {
        let folds = vec![0usize; 10];
        assert!(matches!(
            TrainDi::fit_with_folds(&training(), &[1.0, 1.0], DEFAULT_MULTIPLIER, &folds),
            Err(DbdError::InsufficientData(_))
        ));
    }

    #[test]
    fn fold_aware_distances_are_never_smaller() {
        let x = training();
        let loo = TrainDi::fit(&x, &[1.0, 1.0], DEFAULT_MULTIPLIER).unwrap();
        let folds: Vec<usize> = (0..10).map(|i| i / 5).collect();
        let cv = TrainDi::fit_with_folds(&x, &[1.0, 1.0], DEFAULT_MULTIPLIER, &folds).unwrap();
        for (a, b) in loo.nn_distances.iter().zip(&cv.nn_distances) {
            assert!(b >= a);
        }
    }

    #[test]
    fn score_marks_missing_cells_and_leaves_stack_untouched() {
        let grid = GridSpec::new(0.0, 3.0, 1.0, 1, 3);
        let stack = PredictorStack::new(
            grid,
            vec![("a".into(), vec![2.0, f64::NAN, 500.0]), ("b".into(), vec![2.0, 1.0, 0.0])],
        )
        .unwrap();
        let before = stack.clone();
        let tdi = TrainDi::fit(&training(), &[1.0, 1.0], DEFAULT_MULTIPLIER).unwrap();
        let maps = tdi.score(&stack).unwrap();
        assert_eq!(maps.di.data[0], 0.0);
        assert!(maps.di.data[1].is_nan());
        assert_eq!(maps.aoa.data[0], 1.0);
        assert!(maps.aoa.data[1].is_nan());
        assert_eq!(maps.aoa.data[2], 0.0);
        assert_relative_eq!(maps.percent_inside(), 50.0);
        assert_eq!(stack.names(), before.names());
        let bits = |s: &PredictorStack| -> Vec<u64> { s.band("a").unwrap().iter().map(|v| v.to_bits()).collect() };
        assert_eq!(bits(&stack), bits(&before));
    }
}
