//! Vectorize a binary AOA raster into polygons.
//!
//! Boundary edges between inside and outside cells are traced on the cell
//! corner lattice with the inside kept on the left, so exteriors come out
//! counter-clockwise and holes clockwise. Cells touching only at a corner
//! belong to separate polygons.
use std::collections::HashMap;

use serde_json::{json, Value};

use crate::geometry::{Point2, Polygon};
use crate::raster::RasterLayer;

/// One connected inside region. Rings are closed (first vertex repeated).
#[derive(Debug, Clone, PartialEq)]
pub struct AoaPolygon {
    pub exterior: Vec<Point2>,
    pub holes: Vec<Vec<Point2>>,
}

impl AoaPolygon {
    /// Exterior area minus hole area.
    pub fn area(&self) -> f64 {
        signed_area(&self.exterior).abs() - self.holes.iter().map(|h| signed_area(h).abs()).sum::<f64>()
    }
}

type Vertex = (i64, i64);

struct Edge {
    from: Vertex,
    to: Vertex,
}

impl Edge {
    /// Direction in map axes (x east, y north); lattice rows grow southward.
    fn direction(&self) -> (i64, i64) {
        (self.to.1 - self.from.1, self.from.0 - self.to.0)
    }
}

/// Trace every region of cells with value 1 (≥ 0.5). NaN and 0 are outside.
pub fn polygonize(mask: &RasterLayer) -> Vec<AoaPolygon> {
    let grid = mask.grid;
    let (rows, cols) = (grid.rows as i64, grid.cols as i64);
    let inside = |r: i64, c: i64| r >= 0 && c >= 0 && r < rows && c < cols && mask.get(r as usize, c as usize) >= 0.5;

    let mut edges: Vec<Edge> = Vec::new();
    for r in 0..rows {
        for c in 0..cols {
            if !inside(r, c) {
                continue;
            }
            if !inside(r + 1, c) {
                edges.push(Edge { from: (r + 1, c), to: (r + 1, c + 1) });
            }
            if !inside(r, c + 1) {
                edges.push(Edge { from: (r + 1, c + 1), to: (r, c + 1) });
            }
            if !inside(r - 1, c) {
                edges.push(Edge { from: (r, c + 1), to: (r, c) });
            }
            if !inside(r, c - 1) {
                edges.push(Edge { from: (r, c), to: (r + 1, c) });
            }
        }
    }

    let mut outgoing: HashMap<Vertex, Vec<usize>> = HashMap::new();
    for (i, e) in edges.iter().enumerate() {
        outgoing.entry(e.from).or_default().push(i);
    }

    let mut used = vec![false; edges.len()];
    let mut rings: Vec<Vec<Vertex>> = Vec::new();
    for first in 0..edges.len() {
        if used[first] {
            continue;
        }
        let mut ring = vec![edges[first].from];
        let mut cur = first;
        loop {
            used[cur] = true;
            let Some(next) = next_edge(&edges, &outgoing, cur) else { break };
            if next == first || used[next] {
                break;
            }
            ring.push(edges[next].from);
            cur = next;
        }
        rings.push(drop_collinear(&ring));
    }

    let to_map = |&(r, c): &Vertex| {
        Point2::new(grid.x_min + c as f64 * grid.cell_size, grid.y_max - r as f64 * grid.cell_size)
    };
    let mut exteriors: Vec<AoaPolygon> = Vec::new();
    let mut holes: Vec<Vec<Point2>> = Vec::new();
    for ring in rings {
        let mut pts: Vec<Point2> = ring.iter().map(to_map).collect();
        if let Some(&p0) = pts.first() {
            pts.push(p0);
        }
        if signed_area(&pts) > 0.0 {
            exteriors.push(AoaPolygon { exterior: pts, holes: Vec::new() });
        } else {
            holes.push(pts);
        }
    }

    for hole in holes {
        let probe = inside_probe(&hole, grid.cell_size);
        let owner = exteriors
            .iter_mut()
            .filter(|p| Polygon::new(p.exterior.clone()).contains(probe))
            .min_by(|a, b| signed_area(&a.exterior).total_cmp(&signed_area(&b.exterior)));
        if let Some(owner) = owner {
            owner.holes.push(hole);
        }
    }
    exteriors
}

/// Among the edges leaving the end of `cur`, prefer a left turn, then
/// straight on, then a right turn.
fn next_edge(edges: &[Edge], outgoing: &HashMap<Vertex, Vec<usize>>, cur: usize) -> Option<usize> {
    let (ix, iy) = edges[cur].direction();
    outgoing.get(&edges[cur].to)?.iter().copied().min_by_key(|&e| {
        let (ox, oy) = edges[e].direction();
        let cross = ix * oy - iy * ox;
        match cross.signum() {
            1 => 0,
            0 => 1,
            _ => 2,
        }
    })
}

fn drop_collinear(ring: &[Vertex]) -> Vec<Vertex> {
    let n = ring.len();
    if n < 3 {
        return ring.to_vec();
    }
    (0..n)
        .filter(|&i| {
            let prev = ring[(i + n - 1) % n];
            let here = ring[i];
            let next = ring[(i + 1) % n];
            let d1 = (here.0 - prev.0, here.1 - prev.1);
            let d2 = (next.0 - here.0, next.1 - here.1);
            d1.0 * d2.1 - d1.1 * d2.0 != 0
        })
        .map(|i| ring[i])
        .collect()
}

/// Shoelace area of a closed ring; positive when counter-clockwise.
fn signed_area(ring: &[Point2]) -> f64 {
    ring.windows(2).map(|w| w[0].x * w[1].y - w[1].x * w[0].y).sum::<f64>() / 2.0
}

/// A point just left of the first edge of `ring`, which lies in the
/// inside region bordering it.
fn inside_probe(ring: &[Point2], cell_size: f64) -> Point2 {
    let (a, b) = (ring[0], ring[1]);
    let len = a.distance(b);
    let (ux, uy) = ((b.x - a.x) / len, (b.y - a.y) / len);
    let offset = 0.25 * cell_size;
    Point2::new((a.x + b.x) / 2.0 - uy * offset, (a.y + b.y) / 2.0 + ux * offset)
}

fn ring_coords(ring: &[Point2]) -> Value {
    Value::Array(ring.iter().map(|p| json!([p.x, p.y])).collect())
}

/// A FeatureCollection with one MultiPolygon feature covering the AOA.
pub fn to_geojson(polygons: &[AoaPolygon]) -> Value {
    let coordinates: Vec<Value> = polygons
        .iter()
        .map(|p| {
            let mut rings = vec![ring_coords(&p.exterior)];
            rings.extend(p.holes.iter().map(|h| ring_coords(h)));
            Value::Array(rings)
        })
        .collect();
    let area: f64 = polygons.iter().map(AoaPolygon::area).sum();
    json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "properties": { "aoa": 1, "n_polygons": polygons.len(), "area": area },
            "geometry": { "type": "MultiPolygon", "coordinates": coordinates },
        }],
    })
}
