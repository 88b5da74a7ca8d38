use serde::{Deserialize, Serialize};

use crate::error::{DbdError, Result};
use crate::geometry::{Point2, Polygon};

/// Georeferencing shared by every layer of a stack.
///
/// North-up grid: row 0 is the northern edge (`y_max`), column 0 the western
/// edge (`x_min`). Cells are square with side `cell_size` in map units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub x_min: f64,
    pub y_max: f64,
    pub cell_size: f64,
    pub rows: usize,
    pub cols: usize,
}

impl GridSpec {
    pub fn new(x_min: f64, y_max: f64, cell_size: f64, rows: usize, cols: usize) -> Self {
        Self { x_min, y_max, cell_size, rows, cols }
    }

    #[inline]
    pub fn n_cells(&self) -> usize {
        self.rows * self.cols
    }

    pub fn x_max(&self) -> f64 {
        self.x_min + self.cols as f64 * self.cell_size
    }

    pub fn y_min(&self) -> f64 {
        self.y_max - self.rows as f64 * self.cell_size
    }

    /// Map coordinates of the centre of cell (row, col).
    #[inline]
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.x_min + (col as f64 + 0.5) * self.cell_size,
            self.y_max - (row as f64 + 0.5) * self.cell_size,
        )
    }

    /// The cell containing (x, y), or None outside the grid extent.
    /// Points on the eastern/southern edge belong to the last column/row.
    pub fn cell_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        if x < self.x_min || x > self.x_max() || y > self.y_max || y < self.y_min() {
            return None;
        }
        let col = (((x - self.x_min) / self.cell_size).floor() as usize).min(self.cols - 1);
        let row = (((self.y_max - y) / self.cell_size).floor() as usize).min(self.rows - 1);
        Some((row, col))
    }

    fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(DbdError::GridMismatch(format!(
                "grid must have at least one cell, got {}×{}",
                self.rows, self.cols
            )));
        }
        if !(self.cell_size > 0.0) || !self.cell_size.is_finite() {
            return Err(DbdError::GridMismatch(format!(
                "cell size must be positive, got {}",
                self.cell_size
            )));
        }
        Ok(())
    }
}

/// A single-band grid of f64 values, row-major. NaN marks missing cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterLayer {
    pub grid: GridSpec,
    pub data: Vec<f64>,
}

impl RasterLayer {
    /// Create a layer filled with `fill`.
    pub fn filled(grid: GridSpec, fill: f64) -> Self {
        Self { grid, data: vec![fill; grid.n_cells()] }
    }

    pub fn from_vec(grid: GridSpec, data: Vec<f64>) -> Result<Self> {
        grid.validate()?;
        if data.len() != grid.n_cells() {
            return Err(DbdError::GridMismatch(format!(
                "layer has {} values, grid expects {}",
                data.len(),
                grid.n_cells()
            )));
        }
        Ok(Self { grid, data })
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.grid.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f64) {
        self.data[row * self.grid.cols + col] = val;
    }

    /// Number of non-NaN cells.
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| !v.is_nan()).count()
    }

    /// Set cells whose centre falls outside `domain` to NaN.
    pub fn mask_outside(&mut self, domain: &Polygon) {
        for row in 0..self.grid.rows {
            for col in 0..self.grid.cols {
                let (x, y) = self.grid.cell_center(row, col);
                if !domain.contains(Point2::new(x, y)) {
                    self.set(row, col, f64::NAN);
                }
            }
        }
    }

    /// Elementwise combination of two layers on the same grid. NaN propagates.
    pub fn zip_map(&self, other: &RasterLayer, f: impl Fn(f64, f64) -> f64) -> Result<RasterLayer> {
        if self.grid != other.grid {
            return Err(DbdError::GridMismatch("layers are not co-registered".into()));
        }
        let data = self.data.iter().zip(&other.data).map(|(&a, &b)| f(a, b)).collect();
        Ok(RasterLayer { grid: self.grid, data })
    }
}

/// Ordered, named, co-registered predictor bands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorStack {
    grid: GridSpec,
    names: Vec<String>,
    bands: Vec<Vec<f64>>,
}

impl PredictorStack {
    /// Build a stack, checking that every band covers the grid exactly and
    /// that band names are unique.
    pub fn new(grid: GridSpec, bands: Vec<(String, Vec<f64>)>) -> Result<Self> {
        grid.validate()?;
        let mut names = Vec::with_capacity(bands.len());
        let mut values = Vec::with_capacity(bands.len());
        for (name, data) in bands {
            if data.len() != grid.n_cells() {
                return Err(DbdError::GridMismatch(format!(
                    "band `{name}` has {} values, grid expects {}",
                    data.len(),
                    grid.n_cells()
                )));
            }
            if names.contains(&name) {
                return Err(DbdError::GridMismatch(format!("duplicate band name `{name}`")));
            }
            names.push(name);
            values.push(data);
        }
        Ok(Self { grid, names, bands: values })
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn n_bands(&self) -> usize {
        self.bands.len()
    }

    pub fn band(&self, name: &str) -> Option<&[f64]> {
        self.band_index(name).map(|i| self.bands[i].as_slice())
    }

    pub fn band_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Band indices for `features`, in the given order.
    pub fn indices_of(&self, features: &[String]) -> Result<Vec<usize>> {
        features
            .iter()
            .map(|f| self.band_index(f).ok_or_else(|| DbdError::MissingBand(f.clone())))
            .collect()
    }

    /// Copy the values of `band_idx` at flat cell `cell` into `out`.
    /// Returns false if any value is missing.
    #[inline]
    pub fn pixel_into(&self, cell: usize, band_idx: &[usize], out: &mut [f64]) -> bool {
        let mut complete = true;
        for (slot, &b) in out.iter_mut().zip(band_idx) {
            let v = self.bands[b][cell];
            complete &= !v.is_nan();
            *slot = v;
        }
        complete
    }

    /// Value of every band at the cell containing (x, y).
    /// Returns None outside the grid; missing cells yield NaN entries.
    pub fn extract(&self, x: f64, y: f64) -> Option<Vec<f64>> {
        let (row, col) = self.grid.cell_at(x, y)?;
        let cell = row * self.grid.cols + col;
        Some(self.bands.iter().map(|b| b[cell]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> GridSpec {
        GridSpec::new(100.0, 50.0, 10.0, 3, 4)
    }

    #[test]
    fn cell_center_and_lookup_agree() {
        let g = grid();
        for r in 0..g.rows {
            for c in 0..g.cols {
                let (x, y) = g.cell_center(r, c);
                assert_eq!(g.cell_at(x, y), Some((r, c)));
            }
        }
    }

    #[test]
    fn lookup_outside_extent_returns_none() {
        let g = grid();
        assert!(g.cell_at(99.0, 45.0).is_none());
        assert!(g.cell_at(110.0, 51.0).is_none());
        assert!(g.cell_at(f64::NAN, 45.0).is_none());
        // Edges belong to the last row/column.
        assert_eq!(g.cell_at(140.0, 20.0), Some((2, 3)));
    }

    #[test]
    fn stack_rejects_short_band_and_duplicate_names() {
        let g = grid();
        let short = PredictorStack::new(g, vec![("a".into(), vec![0.0; 5])]);
        assert!(matches!(short, Err(DbdError::GridMismatch(_))));

        let dup = PredictorStack::new(
            g,
            vec![("a".into(), vec![0.0; 12]), ("a".into(), vec![1.0; 12])],
        );
        assert!(matches!(dup, Err(DbdError::GridMismatch(_))));
    }

    #[test]
    fn extract_returns_all_bands_at_point() {
        let g = grid();
        let a: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let b: Vec<f64> = (0..12).map(|i| (i * 10) as f64).collect();
        let stack = PredictorStack::new(g, vec![("a".into(), a), ("b".into(), b)]).unwrap();

        // Cell (1, 2) → flat index 6.
        let (x, y) = g.cell_center(1, 2);
        assert_eq!(stack.extract(x, y), Some(vec![6.0, 60.0]));
        assert!(stack.extract(0.0, 0.0).is_none());
    }

    #[test]
    fn mask_outside_blanks_cells_by_centre() {
        let g = grid();
        let mut layer = RasterLayer::filled(g, 1.0);
        // Covers the two western columns (centres at x = 105 and 115).
        layer.mask_outside(&Polygon::rectangle(100.0, 20.0, 120.0, 50.0));
        assert_eq!(layer.valid_count(), 6);
        assert_eq!(layer.get(0, 1), 1.0);
        assert!(layer.get(0, 2).is_nan());
    }

    #[test]
    fn indices_of_reports_missing_band() {
        let stack = PredictorStack::new(grid(), vec![("a".into(), vec![0.0; 12])]).unwrap();
        let err = stack.indices_of(&["a".into(), "z".into()]).unwrap_err();
        assert!(matches!(err, DbdError::MissingBand(name) if name == "z"));
    }
}
