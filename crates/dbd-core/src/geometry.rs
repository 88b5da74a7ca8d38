/// Planar point and polygon types for the prediction domain.
/// All coordinates are projected map units; no reprojection happens here.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{DbdError, Result};

/// A point in projected map coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn distance(self, other: Point2) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// A simple polygon given by its outer ring. The ring may be open or closed
/// (first vertex repeated); orientation does not matter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub ring: Vec<Point2>,
}

impl Polygon {
    pub fn new(ring: Vec<Point2>) -> Self {
        Self { ring }
    }

    /// Axis-aligned rectangle, useful as a domain covering a whole grid.
    pub fn rectangle(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self::new(vec![
            Point2::new(x_min, y_min),
            Point2::new(x_max, y_min),
            Point2::new(x_max, y_max),
            Point2::new(x_min, y_max),
        ])
    }

    /// Ring vertices with a trailing duplicate of the first vertex removed.
    fn open_ring(&self) -> &[Point2] {
        match (self.ring.first(), self.ring.last()) {
            (Some(a), Some(b)) if self.ring.len() > 1 && a == b => &self.ring[..self.ring.len() - 1],
            _ => &self.ring,
        }
    }

    /// Unsigned area (shoelace formula).
    pub fn area(&self) -> f64 {
        let ring = self.open_ring();
        if ring.len() < 3 {
            return 0.0;
        }
        let mut twice = 0.0;
        for i in 0..ring.len() {
            let a = ring[i];
            let b = ring[(i + 1) % ring.len()];
            twice += a.x * b.y - b.x * a.y;
        }
        (twice / 2.0).abs()
    }

    /// Returns (x_min, y_min, x_max, y_max).
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.ring.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(x0, y0, x1, y1), p| (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y)),
        )
    }

    /// Even-odd ray casting point-in-polygon test.
    pub fn contains(&self, p: Point2) -> bool {
        let ring = self.open_ring();
        let n = ring.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (a, b) = (ring[i], ring[j]);
            if (a.y > p.y) != (b.y > p.y) {
                let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
                if p.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// Fails unless the polygon has at least 3 distinct vertices and a
    /// positive area.
    pub fn validate(&self) -> Result<()> {
        let ring = self.open_ring();
        let mut distinct: Vec<Point2> = Vec::with_capacity(ring.len());
        for p in ring {
            if !distinct.contains(p) {
                distinct.push(*p);
            }
        }
        if distinct.len() < 3 {
            return Err(DbdError::InsufficientData(format!(
                "domain polygon has {} distinct vertices, at least 3 required",
                distinct.len()
            )));
        }
        let area = self.area();
        if !(area > 0.0) || !area.is_finite() {
            return Err(DbdError::InsufficientData("domain polygon has zero area".into()));
        }
        Ok(())
    }

    /// Draw `n` points uniformly inside the polygon by rejection sampling its
    /// bounding box.
    ///
    /// Gives up after `n × 1000` attempts so a sliver polygon cannot loop
    /// forever; fewer than `n` points are returned in that case.
    pub fn sample_uniform(&self, n: usize, seed: u64) -> Vec<Point2> {
        let (x0, y0, x1, y1) = self.bounds();
        let mut rng = StdRng::seed_from_u64(seed ^ 0x9E37_79B9_7F4A_7C15);
        let mut out = Vec::with_capacity(n);
        let max_attempts = n.saturating_mul(1000).max(1000);
        let mut attempts = 0usize;
        while out.len() < n && attempts < max_attempts {
            attempts += 1;
            let p = Point2::new(rng.gen_range(x0..=x1), rng.gen_range(y0..=y1));
            if self.contains(p) {
                out.push(p);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangle_area_and_containment() {
        let poly = Polygon::rectangle(0.0, 0.0, 4.0, 2.0);
        assert!((poly.area() - 8.0).abs() < 1e-12);
        assert!(poly.contains(Point2::new(1.0, 1.0)));
        assert!(!poly.contains(Point2::new(5.0, 1.0)));
        assert!(!poly.contains(Point2::new(1.0, -0.5)));
    }

    #[test]
    fn closed_ring_handled_like_open_ring() {
        let mut ring = Polygon::rectangle(0.0, 0.0, 1.0, 1.0).ring;
        ring.push(ring[0]);
        let closed = Polygon::new(ring);
        assert!((closed.area() - 1.0).abs() < 1e-12);
        assert!(closed.validate().is_ok());
    }

    #[test]
    fn concave_polygon_excludes_notch() {
        // L-shape: the square [1,2]×[1,2] is cut out.
        let poly = Polygon::new(vec![
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(2.0, 1.0),
            Point2::new(1.0, 1.0),
            Point2::new(1.0, 2.0),
            Point2::new(0.0, 2.0),
        ]);
        assert!(poly.contains(Point2::new(0.5, 1.5)));
        assert!(!poly.contains(Point2::new(1.5, 1.5)));
        assert!((poly.area() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_polygons_rejected() {
        let line = Polygon::new(vec![Point2::new(0.0, 0.0), Point2::new(1.0, 1.0), Point2::new(2.0, 2.0)]);
        assert!(matches!(line.validate(), Err(DbdError::InsufficientData(_))));
        let empty = Polygon::new(vec![]);
        assert!(matches!(empty.validate(), Err(DbdError::InsufficientData(_))));
    }

    #[test]
    fn samples_fall_inside_and_are_reproducible() {
        let poly = Polygon::rectangle(10.0, 20.0, 30.0, 25.0);
        let a = poly.sample_uniform(200, 7);
        let b = poly.sample_uniform(200, 7);
        assert_eq!(a.len(), 200);
        assert_eq!(a, b);
        assert!(a.iter().all(|&p| poly.contains(p)));
    }
}
