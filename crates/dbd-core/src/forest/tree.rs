//! Regression tree whose leaves keep every response value that reached them.
use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

use crate::matrix::FeatureMatrix;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        /// Bootstrap responses in this leaf, with multiplicity.
        values: Vec<f64>,
    },
}

/// Flat node arena; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileTree {
    nodes: Vec<Node>,
}

impl QuantileTree {
    /// Grow a tree on the rows listed in `rows` (repeats allowed for a
    /// bootstrap sample). `mtry` features are drawn at every node.
    pub fn grow(
        x: &FeatureMatrix,
        y: &[f64],
        rows: Vec<usize>,
        mtry: usize,
        min_node_size: usize,
        rng: &mut StdRng,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.nodes.push(Node::Leaf { values: Vec::new() });

        // Depth-first with an explicit stack of (node slot, rows).
        let mut stack = vec![(0usize, rows)];
        while let Some((slot, rows)) = stack.pop() {
            match best_split(x, y, &rows, mtry, min_node_size, rng) {
                Some((feature, threshold)) => {
                    let (l_rows, r_rows): (Vec<usize>, Vec<usize>) =
                        rows.iter().copied().partition(|&i| x.get(i, feature) <= threshold);
                    if l_rows.is_empty() || r_rows.is_empty() {
                        let values = rows.iter().map(|&i| y[i]).collect();
                        tree.nodes[slot] = Node::Leaf { values };
                        continue;
                    }
                    let left = tree.nodes.len();
                    let right = left + 1;
                    tree.nodes.push(Node::Leaf { values: Vec::new() });
                    tree.nodes.push(Node::Leaf { values: Vec::new() });
                    tree.nodes[slot] = Node::Split { feature, threshold, left, right };
                    stack.push((right, r_rows));
                    stack.push((left, l_rows));
                }
                None => {
                    let values = rows.iter().map(|&i| y[i]).collect();
                    tree.nodes[slot] = Node::Leaf { values };
                }
            }
        }
        tree
    }

    /// Leaf values for a feature row.
    pub fn leaf_values(&self, row: &[f64]) -> &[f64] {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Split { feature, threshold, left, right } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
                Node::Leaf { values } => return values,
            }
        }
    }

    /// Mean of the leaf reached by `row`.
    pub fn predict_mean(&self, row: &[f64]) -> f64 {
        let v = self.leaf_values(row);
        if v.is_empty() {
            return f64::NAN;
        }
        v.iter().sum::<f64>() / v.len() as f64
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf { .. })).count()
    }
}

/// Variance-reduction split over `mtry` randomly drawn features.
///
/// Nodes with at most `min_node_size` rows or a constant response stay
/// leaves. Thresholds sit midway between consecutive distinct values; the
/// first best (feature in draw order, then lowest threshold) wins.
fn best_split(
    x: &FeatureMatrix,
    y: &[f64],
    rows: &[usize],
    mtry: usize,
    min_node_size: usize,
    rng: &mut StdRng,
) -> Option<(usize, f64)> {
    let n = rows.len();
    if n <= min_node_size.max(1) {
        return None;
    }
    let first = y[rows[0]];
    if rows.iter().all(|&i| y[i] == first) {
        return None;
    }

    let total: f64 = rows.iter().map(|&i| y[i]).sum();
    // Score of the unsplit node; a split must beat it.
    let parent_score = total * total / n as f64;

    let n_features = x.n_cols();
    let features = sample(rng, n_features, mtry.min(n_features));

    let mut best: Option<(usize, f64)> = None;
    let mut best_score = parent_score + 1e-12 * parent_score.abs().max(1.0);
    let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(n);

    for feature in features.iter() {
        pairs.clear();
        pairs.extend(rows.iter().map(|&i| (x.get(i, feature), y[i])));
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left_sum = 0.0;
        for split in 1..n {
            left_sum += pairs[split - 1].1;
            let (lo, hi) = (pairs[split - 1].0, pairs[split].0);
            if lo == hi {
                continue;
            }
            let n_left = split as f64;
            let n_right = (n - split) as f64;
            let right_sum = total - left_sum;
            let score = left_sum * left_sum / n_left + right_sum * right_sum / n_right;
            if score > best_score {
                best_score = score;
                // The midpoint of adjacent floats rounds onto `hi`, and `hi - lo`
                // can overflow; fall back to `lo` so both sides stay non-empty.
                let t = lo + (hi - lo) / 2.0;
                let t = if t < hi && t.is_finite() { t } else { lo };
                best = Some((feature, t));
            }
        }
    }
    best
}
