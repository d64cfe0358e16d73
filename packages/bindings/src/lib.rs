use napi::Result as NapiResult;
use napi_derive::napi;
use std::sync::Arc;

use icaap_core::config::EngineConfig;
use icaap_core::engine::memory::{InMemoryMarketData, InMemoryPortfolio};
use icaap_core::engine::{StressEngine, StressReportRequest};

/// Convert any Display error into a napi::Error.
fn to_napi_error(e: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

#[napi]
pub fn calibrate_factors(input_json: String) -> NapiResult<String> {
    let input: icaap_core::calibration::historical::CalibrationInput =
        serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output =
        icaap_core::calibration::historical::run_calibration(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Stress curves
// ---------------------------------------------------------------------------

#[napi]
pub fn transform_curve(input_json: String) -> NapiResult<String> {
    let input: icaap_core::stress_curves::transformer::TransformationInput =
        serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = icaap_core::stress_curves::transformer::run_transformation(&input)
        .map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Severity recommendation
// ---------------------------------------------------------------------------

#[napi]
pub fn recommend_severity(input_json: String) -> NapiResult<String> {
    let input: icaap_core::recommender::severity::RecommendationInput =
        serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = icaap_core::recommender::severity::run_recommendation(&input)
        .map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Market simulation
// ---------------------------------------------------------------------------

#[napi]
pub fn simulate_market(input_json: String) -> NapiResult<String> {
    let input: icaap_core::simulation::market::MarketSimulationInput =
        serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = icaap_core::simulation::market::run_market_simulation(&input)
        .map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Aggregation and reports
// ---------------------------------------------------------------------------

#[napi]
pub fn aggregate_metrics(input_json: String) -> NapiResult<String> {
    let input: icaap_core::aggregation::metrics::AggregationInput =
        serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output =
        icaap_core::aggregation::metrics::run_aggregation(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

/// Full segment report over an in-memory data snapshot.
#[napi]
pub fn stress_report(
    config_json: String,
    portfolio_json: String,
    market_json: String,
    request_json: String,
) -> NapiResult<String> {
    let config: EngineConfig = serde_json::from_str(&config_json).map_err(to_napi_error)?;
    let portfolio: InMemoryPortfolio =
        serde_json::from_str(&portfolio_json).map_err(to_napi_error)?;
    let market: InMemoryMarketData = serde_json::from_str(&market_json).map_err(to_napi_error)?;
    let request: StressReportRequest =
        serde_json::from_str(&request_json).map_err(to_napi_error)?;
    let engine =
        StressEngine::new(config, Arc::new(portfolio), Arc::new(market)).map_err(to_napi_error)?;
    let output = engine.run(&request).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}
