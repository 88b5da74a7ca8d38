use thiserror::Error;

/// Every failure the modeling pipeline can report.
///
/// `NoFeatureImproves` is the only recoverable variant: the selector attaches
/// it to its result as a warning instead of returning it.
#[derive(Error, Debug)]
pub enum DbdError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("training failed: {0}")]
    Training(String),

    #[error("no feature improves on the baseline R² of {baseline:.3} (best single feature `{best_feature}` reached {best_r2:.3})")]
    NoFeatureImproves {
        baseline: f64,
        best_feature: String,
        best_r2: f64,
    },

    #[error("area of applicability undefined: {0} training rows, at least 2 required")]
    EmptyTrainingSet(usize),

    #[error("band `{0}` not present in predictor stack")]
    MissingBand(String),

    #[error("grid mismatch: {0}")]
    GridMismatch(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DbdError>;
