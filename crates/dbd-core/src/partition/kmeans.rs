//! Seeded k-means on 2-D coordinates (k-means++ seeding, Lloyd iterations).
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::geometry::Point2;

const MAX_ITERS: usize = 100;

/// Cluster `points` into at most `k` groups and return one label per point.
///
/// Labels lie in `0..k`; a cluster may end up empty when the data has fewer
/// than `k` distinct locations. Ties in assignment go to the lowest centre
/// index, so the result depends only on the inputs and `seed`.
pub fn kmeans_labels(points: &[Point2], k: usize, seed: u64) -> Vec<usize> {
    let n = points.len();
    if n == 0 || k == 0 {
        return Vec::new();
    }
    if k >= n {
        return (0..n).collect();
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut centres = plus_plus_init(points, k, &mut rng);
    let mut labels = vec![0usize; n];

    for iter in 0..MAX_ITERS {
        let mut changed = false;
        for (i, &p) in points.iter().enumerate() {
            let best = nearest_centre(p, &centres);
            changed |= best != labels[i];
            labels[i] = best;
        }

        let mut sums = vec![(0.0f64, 0.0f64, 0usize); k];
        for (&p, &l) in points.iter().zip(&labels) {
            sums[l].0 += p.x;
            sums[l].1 += p.y;
            sums[l].2 += 1;
        }
        for (c, &(sx, sy, cnt)) in centres.iter_mut().zip(&sums) {
            // Empty clusters keep their previous centre.
            if cnt > 0 {
                *c = Point2::new(sx / cnt as f64, sy / cnt as f64);
            }
        }

        if !changed && iter > 0 {
            break;
        }
    }
    labels
}

fn nearest_centre(p: Point2, centres: &[Point2]) -> usize {
    let mut best = 0usize;
    let mut best_d = f64::INFINITY;
    for (j, &c) in centres.iter().enumerate() {
        let d = (p.x - c.x).powi(2) + (p.y - c.y).powi(2);
        if d < best_d {
            best_d = d;
            best = j;
        }
    }
    best
}

/// k-means++: first centre uniform, each next centre drawn with probability
/// proportional to squared distance from the nearest chosen centre.
fn plus_plus_init(points: &[Point2], k: usize, rng: &mut StdRng) -> Vec<Point2> {
    let n = points.len();
    let mut centres = Vec::with_capacity(k);
    centres.push(points[rng.gen_range(0..n)]);

    let mut d2: Vec<f64> = points
        .iter()
        .map(|p| (p.x - centres[0].x).powi(2) + (p.y - centres[0].y).powi(2))
        .collect();

    while centres.len() < k {
        let total: f64 = d2.iter().sum();
        let next = if total <= 0.0 {
            // All remaining points coincide with a centre.
            rng.gen_range(0..n)
        } else {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = n - 1;
            for (i, &d) in d2.iter().enumerate() {
                if target < d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        };
        let c = points[next];
        centres.push(c);
        for (slot, p) in d2.iter_mut().zip(points) {
            let d = (p.x - c.x).powi(2) + (p.y - c.y).powi(2);
            if d < *slot {
                *slot = d;
            }
        }
    }
    centres
}
