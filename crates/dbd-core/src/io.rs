//! JSON file glue: raster stacks, GeoJSON observations and domain polygons.
//!
//! Rasters use `{ "grid": {..}, "bands": [{ "name", "values" }] }` with
//! `null` for missing cells. Vector data is plain GeoJSON in map units.
use std::fs;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DbdError, Result};
use crate::geometry::{Point2, Polygon};
use crate::points::Observation;
use crate::raster::{GridSpec, PredictorStack, RasterLayer};

// ── Rasters ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct StackFile {
    grid: GridSpec,
    bands: Vec<BandFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BandFile {
    name: String,
    values: Vec<Option<f64>>,
}

impl BandFile {
    fn new(name: &str, data: &[f64]) -> Self {
        Self {
            name: name.to_string(),
            values: data.iter().map(|&v| v.is_finite().then_some(v)).collect(),
        }
    }
}

pub fn parse_stack(text: &str) -> Result<PredictorStack> {
    let file: StackFile = serde_json::from_str(text)?;
    let bands = file
        .bands
        .into_iter()
        .map(|b| (b.name, b.values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect()))
        .collect();
    PredictorStack::new(file.grid, bands)
}

pub fn read_stack(path: &Path) -> Result<PredictorStack> {
    parse_stack(&fs::read_to_string(path)?)
}

pub fn stack_to_string(stack: &PredictorStack) -> Result<String> {
    let file = StackFile {
        grid: *stack.grid(),
        bands: stack
            .names()
            .iter()
            .filter_map(|n| stack.band(n).map(|data| BandFile::new(n, data)))
            .collect(),
    };
    Ok(serde_json::to_string(&file)?)
}

/// Write one layer as a single-band stack named `name`. Non-finite cells
/// become `null`.
pub fn write_raster(path: &Path, name: &str, layer: &RasterLayer) -> Result<()> {
    let file = StackFile { grid: layer.grid, bands: vec![BandFile::new(name, &layer.data)] };
    fs::write(path, serde_json::to_string(&file)?)?;
    Ok(())
}

/// Read back the first band of a raster file.
pub fn read_raster(path: &Path) -> Result<RasterLayer> {
    let stack = read_stack(path)?;
    let name = stack
        .names()
        .first()
        .cloned()
        .ok_or_else(|| DbdError::GridMismatch(format!("{} holds no band", path.display())))?;
    let data = stack.band(&name).map(<[f64]>::to_vec).unwrap_or_default();
    RasterLayer::from_vec(*stack.grid(), data)
}

// ── Observations ──────────────────────────────────────────────────────────────

/// Point features of a GeoJSON FeatureCollection. A missing or non-numeric
/// `response_field` yields a NaN response, which extraction later drops.
pub fn parse_observations(text: &str, response_field: &str) -> Result<Vec<Observation>> {
    let doc: Value = serde_json::from_str(text)?;
    let features = doc["features"]
        .as_array()
        .ok_or_else(|| DbdError::InvalidParameter("observations must be a GeoJSON FeatureCollection".into()))?;

    let mut out = Vec::with_capacity(features.len());
    let mut skipped = 0usize;
    for feature in features {
        let geom = &feature["geometry"];
        let coords = match geom["type"].as_str() {
            Some("Point") => geom["coordinates"].as_array(),
            _ => None,
        };
        let Some(p) = coords.and_then(|c| position(c)) else {
            skipped += 1;
            continue;
        };
        let response = feature["properties"][response_field].as_f64().unwrap_or(f64::NAN);
        out.push(Observation::new(p.x, p.y, response));
    }
    if skipped > 0 {
        warn!("skipped {skipped} features without a Point geometry");
    }
    Ok(out)
}

pub fn read_observations(path: &Path, response_field: &str) -> Result<Vec<Observation>> {
    parse_observations(&fs::read_to_string(path)?, response_field)
}

// ── Domain ────────────────────────────────────────────────────────────────────

/// Outer ring of the first polygon in a GeoJSON Polygon, MultiPolygon,
/// Feature or FeatureCollection.
pub fn parse_domain(text: &str) -> Result<Polygon> {
    let doc: Value = serde_json::from_str(text)?;
    first_polygon(&doc).ok_or_else(|| DbdError::InsufficientData("no polygon found in domain file".into()))
}

pub fn read_domain(path: &Path) -> Result<Polygon> {
    parse_domain(&fs::read_to_string(path)?)
}

fn first_polygon(value: &Value) -> Option<Polygon> {
    match value["type"].as_str()? {
        "FeatureCollection" => value["features"].as_array()?.iter().find_map(first_polygon),
        "Feature" => first_polygon(&value["geometry"]),
        "Polygon" => ring(&value["coordinates"][0]),
        "MultiPolygon" => ring(&value["coordinates"][0][0]),
        _ => None,
    }
}

fn ring(value: &Value) -> Option<Polygon> {
    let points: Option<Vec<Point2>> = value.as_array()?.iter().map(|v| position(v.as_array()?)).collect();
    points.map(Polygon::new)
}

fn position(coords: &[Value]) -> Option<Point2> {
    match coords {
        [x, y, ..] => Some(Point2::new(x.as_f64()?, y.as_f64()?)),
        _ => None,
    }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STACK: &str = r#"{
        "grid": {"x_min": 0.0, "y_max": 2.0, "cell_size": 1.0, "rows": 2, "cols": 2},
        "bands": [
            {"name": "depth", "values": [1.0, 2.0, null, 4.0]},
            {"name": "slope", "values": [0.1, 0.2, 0.3, 0.4]}
        ]
    }"#;

    #[test]
    fn stack_nulls_become_nan_and_back() {
        let stack = parse_stack(STACK).unwrap();
        assert_eq!(stack.names(), &["depth".to_string(), "slope".to_string()]);
        assert!(stack.band("depth").unwrap()[2].is_nan());

        let text = stack_to_string(&stack).unwrap();
        assert!(text.contains("null"));
        let again = parse_stack(&text).unwrap();
        assert_eq!(again.band("slope"), stack.band("slope"));
    }

    #[test]
    fn stack_with_wrong_length_band_rejected() {
        let text = STACK.replace("[0.1, 0.2, 0.3, 0.4]", "[0.1]");
        assert!(matches!(parse_stack(&text), Err(DbdError::GridMismatch(_))));
    }

    #[test]
    fn observations_read_points_and_response() {
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1.5, 2.5]},
             "properties": {"dbd": 0.9}},
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [3.0, 4.0]},
             "properties": {"other": 1}},
            {"type": "Feature", "geometry": {"type": "LineString", "coordinates": [[0, 0], [1, 1]]},
             "properties": {"dbd": 1.0}}
        ]}"#;
        let obs = parse_observations(text, "dbd").unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0], Observation::new(1.5, 2.5, 0.9));
        assert!(obs[1].response.is_nan());
    }

    #[test]
    fn domain_accepts_bare_feature_and_collection() {
        let poly = r#"{"type": "Polygon", "coordinates": [[[0, 0], [4, 0], [4, 3], [0, 3], [0, 0]]]}"#;
        let bare = parse_domain(poly).unwrap();
        assert!((bare.area() - 12.0).abs() < 1e-12);

        let feature = format!(r#"{{"type": "Feature", "properties": {{}}, "geometry": {poly}}}"#);
        assert_eq!(parse_domain(&feature).unwrap(), bare);

        let collection = format!(r#"{{"type": "FeatureCollection", "features": [{feature}]}}"#);
        assert_eq!(parse_domain(&collection).unwrap(), bare);

        assert!(parse_domain(r#"{"type": "FeatureCollection", "features": []}"#).is_err());
    }
}
