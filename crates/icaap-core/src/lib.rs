pub mod error;
pub mod types;

pub mod aggregation;
pub mod calibration;
pub mod recommender;
pub mod simulation;
pub mod stress_curves;

#[cfg(feature = "engine")]
pub mod config;

#[cfg(feature = "engine")]
pub mod engine;

pub use error::StressEngineError;
pub use types::*;

/// Standard result type for all stress-engine operations
pub type StressResult<T> = Result<T, StressEngineError>;
