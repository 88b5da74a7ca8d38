//! Spatial prediction of dry bulk density from point observations and a
//! raster predictor stack: spatial cross-validation folds, a quantile
//! regression forest tuned by forward feature selection, and the area of
//! applicability of the resulting model.
pub mod aoa;
pub mod config;
pub mod error;
pub mod forest;
pub mod geometry;
pub mod io;
pub mod matrix;
pub mod model;
pub mod partition;
pub mod pipeline;
pub mod points;
pub mod predict;
pub mod raster;
pub mod selection;

pub use aoa::{ApplicabilityMaps, TrainDi};
pub use config::PipelineConfig;
pub use error::{DbdError, Result};
pub use forest::{ForestParams, QuantileForest};
pub use geometry::{Point2, Polygon};
pub use matrix::FeatureMatrix;
pub use model::{ModelBundle, SelectedModel};
pub use partition::{Folds, SpatialBlockPartitioner};
pub use pipeline::{MappingPipeline, PipelineResult, RunReport};
pub use points::Observation;
pub use predict::{predict_domain, QuantileRasters};
pub use raster::{GridSpec, PredictorStack, RasterLayer};
pub use selection::{ForwardFeatureSelector, Selection};
