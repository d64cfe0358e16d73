use thiserror::Error;

#[derive(Debug, Error)]
pub enum StressEngineError {
    #[error("Insufficient data for {}: {reason}", .factors.join(", "))]
    InsufficientData { factors: Vec<String>, reason: String },

    #[error("Invalid sensitivity config: {field} — {reason}")]
    InvalidSensitivityConfig { field: String, reason: String },

    #[error("Migration renormalization failed for grade '{grade}': {reason}")]
    MigrationRenormalizationError { grade: String, reason: String },

    #[error("Correlation matrix is not positive semi-definite at factor '{factor}' (pivot {pivot:e})")]
    NonPositiveSemiDefiniteCorrelation { factor: String, pivot: f64 },

    #[error("Insufficient trials: {requested} requested, at least {minimum} required")]
    InsufficientTrials { requested: usize, minimum: usize },

    #[error("Incomplete inputs for segment '{segment}': missing {}", .missing.join(", "))]
    IncompleteInputs { segment: String, missing: Vec<String> },

    #[error("Simulation cancelled after {completed_batches} of {total_batches} batches")]
    Cancelled {
        completed_batches: usize,
        total_batches: usize,
    },

    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Date error in '{factor}': {reason}")]
    DateError { factor: String, reason: String },

    #[error("Data source error for segment '{segment}': {reason}")]
    DataSource { segment: String, reason: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for StressEngineError {
    fn from(e: serde_json::Error) -> Self {
        StressEngineError::SerializationError(e.to_string())
    }
}
