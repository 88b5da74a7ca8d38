use serde::{Deserialize, Serialize};

use crate::error::{DbdError, Result};

/// Dense row-major predictor matrix with named columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    names: Vec<String>,
    n_rows: usize,
    data: Vec<f64>,
}

impl FeatureMatrix {
    pub fn new(names: Vec<String>, data: Vec<f64>) -> Result<Self> {
        let n_cols = names.len();
        if n_cols == 0 {
            if !data.is_empty() {
                return Err(DbdError::InvalidParameter("matrix without columns has values".into()));
            }
            return Ok(Self { names, n_rows: 0, data });
        }
        if data.len() % n_cols != 0 {
            return Err(DbdError::InvalidParameter(format!(
                "{} values do not fill {} columns",
                data.len(),
                n_cols
            )));
        }
        Ok(Self { n_rows: data.len() / n_cols, names, data })
    }

    /// Build from per-row vectors. Every row must have `names.len()` values.
    pub fn from_rows(names: Vec<String>, rows: &[Vec<f64>]) -> Result<Self> {
        let n_cols = names.len();
        let mut data = Vec::with_capacity(rows.len() * n_cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n_cols {
                return Err(DbdError::InvalidParameter(format!(
                    "row {i} has {} values, expected {n_cols}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Self::new(names, data)
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[inline]
    pub fn n_cols(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        let n = self.n_cols();
        &self.data[i * n..(i + 1) * n]
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n_cols() + j]
    }

    pub fn column(&self, j: usize) -> Vec<f64> {
        (0..self.n_rows).map(|i| self.get(i, j)).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Sub-matrix with the named columns, in the given order.
    pub fn select_columns(&self, features: &[String]) -> Result<FeatureMatrix> {
        let idx: Vec<usize> = features
            .iter()
            .map(|f| self.column_index(f).ok_or_else(|| DbdError::MissingBand(f.clone())))
            .collect::<Result<_>>()?;
        let mut data = Vec::with_capacity(self.n_rows * idx.len());
        for i in 0..self.n_rows {
            let row = self.row(i);
            data.extend(idx.iter().map(|&j| row[j]));
        }
        Ok(FeatureMatrix { names: features.to_vec(), n_rows: self.n_rows, data })
    }

    /// Sub-matrix with the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> FeatureMatrix {
        let mut data = Vec::with_capacity(rows.len() * self.n_cols());
        for &i in rows {
            data.extend_from_slice(self.row(i));
        }
        FeatureMatrix { names: self.names.clone(), n_rows: rows.len(), data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FeatureMatrix {
        FeatureMatrix::from_rows(
            vec!["a".into(), "b".into(), "c".into()],
            &[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]],
        )
        .unwrap()
    }

    #[test]
    fn select_columns_reorders() {
        let m = sample().select_columns(&["c".into(), "a".into()]).unwrap();
        assert_eq!(m.names(), &["c".to_string(), "a".to_string()]);
        assert_eq!(m.row(0), &[3.0, 1.0]);
        assert_eq!(m.row(1), &[6.0, 4.0]);
    }

    #[test]
    fn select_rows_and_column() {
        let m = sample().select_rows(&[1, 1, 0]);
        assert_eq!(m.n_rows(), 3);
        assert_eq!(m.column(1), vec![5.0, 5.0, 2.0]);
    }

    #[test]
    fn ragged_rows_rejected() {
        let err = FeatureMatrix::from_rows(vec!["a".into(), "b".into()], &[vec![1.0]]);
        assert!(matches!(err, Err(DbdError::InvalidParameter(_))));
    }
}
