use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Agreement between pooled out-of-fold predictions and observations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CvMetrics {
    /// Squared Pearson correlation; NaN when either side is constant.
    #[serde(with = "nan_as_null")]
    pub r2: f64,
    /// Mean error, predicted − observed.
    #[serde(with = "nan_as_null")]
    pub me: f64,
    #[serde(with = "nan_as_null")]
    pub mse: f64,
    #[serde(with = "nan_as_null")]
    pub rmse: f64,
    pub n: usize,
}

impl CvMetrics {
    pub fn compute(predicted: &[f64], observed: &[f64]) -> Self {
        let n = predicted.len().min(observed.len());
        if n == 0 {
            return Self { r2: f64::NAN, me: f64::NAN, mse: f64::NAN, rmse: f64::NAN, n: 0 };
        }
        let nf = n as f64;
        let (p, o) = (&predicted[..n], &observed[..n]);

        let me = p.iter().zip(o).map(|(a, b)| a - b).sum::<f64>() / nf;
        let mse = p.iter().zip(o).map(|(a, b)| (a - b).powi(2)).sum::<f64>() / nf;

        let mp = p.iter().sum::<f64>() / nf;
        let mo = o.iter().sum::<f64>() / nf;
        let mut sxy = 0.0;
        let mut sxx = 0.0;
        let mut syy = 0.0;
        for (a, b) in p.iter().zip(o) {
            sxy += (a - mp) * (b - mo);
            sxx += (a - mp).powi(2);
            syy += (b - mo).powi(2);
        }
        let r2 = if sxx <= 1e-300 || syy <= 1e-300 { f64::NAN } else { sxy * sxy / (sxx * syy) };

        Self { r2, me, mse, rmse: mse.sqrt(), n }
    }

    /// R² for ranking: NaN sorts below every finite value.
    pub fn rank_score(&self) -> f64 {
        if self.r2.is_nan() {
            f64::NEG_INFINITY
        } else {
            self.r2
        }
    }
}

/// JSON has no NaN; undefined metrics are stored as `null`.
pub(crate) mod nan_as_null {
    use super::*;

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_finite() {
            s.serialize_f64(*v)
        } else {
            s.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::NAN))
    }
}
