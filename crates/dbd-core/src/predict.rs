//! Per-pixel quantile prediction over a predictor stack.
use log::debug;
use rayon::prelude::*;

use crate::error::{DbdError, Result};
use crate::geometry::{Point2, Polygon};
use crate::model::SelectedModel;
use crate::raster::{PredictorStack, RasterLayer};

const Q_EPS: f64 = 1e-9;

/// One raster per requested quantile, ascending by quantile.
#[derive(Debug, Clone)]
pub struct QuantileRasters {
    pub quantiles: Vec<f64>,
    pub layers: Vec<RasterLayer>,
}

impl QuantileRasters {
    pub fn get(&self, q: f64) -> Option<&RasterLayer> {
        self.quantiles.iter().position(|&p| (p - q).abs() < Q_EPS).map(|i| &self.layers[i])
    }

    /// Highest minus lowest quantile.
    pub fn interval_width(&self) -> Result<RasterLayer> {
        match (self.layers.first(), self.layers.last()) {
            (Some(lo), Some(hi)) if self.layers.len() >= 2 => hi.zip_map(lo, |h, l| h - l),
            _ => Err(DbdError::InvalidParameter(
                "interval width needs at least two quantiles".into(),
            )),
        }
    }

    /// Interval width divided by the median; NaN where the median is zero.
    pub fn interval_ratio(&self) -> Result<RasterLayer> {
        let median = self
            .get(0.5)
            .ok_or_else(|| DbdError::InvalidParameter("interval ratio needs the 0.5 quantile".into()))?;
        self.interval_width()?
            .zip_map(median, |w, m| if m == 0.0 { f64::NAN } else { w / m })
    }
}

/// Sorted, deduplicated copy of `quantiles`, each checked to lie in [0, 1].
pub fn normalize_quantiles(quantiles: &[f64]) -> Result<Vec<f64>> {
    if quantiles.is_empty() {
        return Err(DbdError::InvalidParameter("no quantiles requested".into()));
    }
    if let Some(q) = quantiles.iter().find(|q| !(0.0..=1.0).contains(*q)) {
        return Err(DbdError::InvalidParameter(format!("quantile {q} outside [0, 1]")));
    }
    let mut qs = quantiles.to_vec();
    qs.sort_by(f64::total_cmp);
    qs.dedup_by(|a, b| (*a - *b).abs() < Q_EPS);
    Ok(qs)
}

/// Predict every requested quantile for every cell of `stack`.
///
/// Cells with a missing selected predictor, or whose centre falls outside
/// `mask`, are NaN in every layer.
pub fn predict_domain(
    model: &SelectedModel,
    stack: &PredictorStack,
    quantiles: &[f64],
    mask: Option<&Polygon>,
) -> Result<QuantileRasters> {
    let qs = normalize_quantiles(quantiles)?;
    let band_idx = stack.indices_of(&model.features)?;
    let grid = *stack.grid();
    let p = band_idx.len();
    let nq = qs.len();

    let per_cell: Vec<Vec<f64>> = (0..grid.n_cells())
        .into_par_iter()
        .map_init(
            || vec![0.0; p],
            |buf, cell| {
                let (row, col) = (cell / grid.cols, cell % grid.cols);
                let masked_out = mask.map_or(false, |m| {
                    let (x, y) = grid.cell_center(row, col);
                    !m.contains(Point2::new(x, y))
                });
                if masked_out || !stack.pixel_into(cell, &band_idx, buf) {
                    vec![f64::NAN; nq]
                } else {
                    model.predict_quantiles(buf, &qs)
                }
            },
        )
        .collect();

    let mut layers: Vec<Vec<f64>> = vec![Vec::with_capacity(grid.n_cells()); nq];
    for values in &per_cell {
        for (layer, &v) in layers.iter_mut().zip(values) {
            layer.push(v);
        }
    }
    let predicted = per_cell.iter().filter(|v| !v[0].is_nan()).count();
    debug!("predicted {predicted} of {} cells for {nq} quantiles", grid.n_cells());

    Ok(QuantileRasters {
        layers: layers
            .into_iter()
            .map(|data| RasterLayer::from_vec(grid, data))
            .collect::<Result<_>>()?,
        quantiles: qs,
    })
}
