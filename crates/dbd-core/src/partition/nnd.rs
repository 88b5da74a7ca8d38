//! Nearest-neighbour distance distributions and their comparison.
use crate::geometry::Point2;

/// For each `query`, the distance to the nearest point of `reference`.
pub fn nearest_distances(query: &[Point2], reference: &[Point2]) -> Vec<f64> {
    query
        .iter()
        .map(|&q| reference.iter().map(|&r| q.distance(r)).fold(f64::INFINITY, f64::min))
        .collect()
}

/// For each observation, the distance to the nearest observation assigned
/// to a different fold: the prediction distance a cross-validation fit on
/// the other folds would face. Infinite when every point shares one fold.
pub fn cross_fold_distances(points: &[Point2], fold_of: &[usize]) -> Vec<f64> {
    points
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            points
                .iter()
                .zip(fold_of)
                .filter(|&(_, &f)| f != fold_of[i])
                .map(|(&q, _)| p.distance(q))
                .fold(f64::INFINITY, f64::min)
        })
        .collect()
}

/// Wasserstein-1 distance between the empirical distributions of `a` and
/// `b`: the area between their ECDFs. Non-finite values are ignored.
pub fn wasserstein(a: &[f64], b: &[f64]) -> f64 {
    let mut a: Vec<f64> = a.iter().cloned().filter(|v| v.is_finite()).collect();
    let mut b: Vec<f64> = b.iter().cloned().filter(|v| v.is_finite()).collect();
    if a.is_empty() || b.is_empty() {
        return f64::INFINITY;
    }
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);

    let mut all: Vec<f64> = a.iter().chain(b.iter()).cloned().collect();
    all.sort_by(f64::total_cmp);

    let (na, nb) = (a.len() as f64, b.len() as f64);
    let (mut ia, mut ib) = (0usize, 0usize);
    let mut area = 0.0;
    for w in all.windows(2) {
        let t = w[0];
        while ia < a.len() && a[ia] <= t {
            ia += 1;
        }
        while ib < b.len() && b[ib] <= t {
            ib += 1;
        }
        let fa = ia as f64 / na;
        let fb = ib as f64 / nb;
        area += (fa - fb).abs() * (w[1] - w[0]);
    }
    area
}
