//! Data-access seams the engine consumes.
//!
//! Implementations own transport and storage; the engine only sees typed
//! records. Failures should surface as [`StressEngineError::DataSource`]
//! naming the segment or factor that could not be served.
//!
//! [`StressEngineError::DataSource`]: crate::error::StressEngineError::DataSource

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::aggregation::metrics::ExposureWeights;
use crate::calibration::historical::FactorSeries;
use crate::recommender::severity::PortfolioProfile;
use crate::simulation::market::Position;
use crate::stress_curves::curve::StressCurve;
use crate::stress_curves::migration::RatingMigrationMatrix;
use crate::types::{DateRange, Rate, RiskFactor, Segment};
use crate::StressResult;

/// Unstressed credit inputs of one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentBaseline {
    pub pd_curve: StressCurve,
    pub lgd_curve: StressCurve,
    pub migration: RatingMigrationMatrix,
    pub exposure_weights: ExposureWeights,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_weights: Option<BTreeMap<String, Rate>>,
}

/// Portfolio and position data access.
pub trait PortfolioDataProvider: Send + Sync {
    fn fetch_positions(&self, segment: Segment) -> StressResult<Vec<Position>>;

    fn fetch_profile(&self, segment: Segment) -> StressResult<PortfolioProfile>;

    fn fetch_baseline(&self, segment: Segment) -> StressResult<SegmentBaseline>;
}

/// Historical market data access.
pub trait MarketDataProvider: Send + Sync {
    /// Series for every requested factor, restricted to `range`.
    fn fetch_factor_series(
        &self,
        factors: &[RiskFactor],
        range: DateRange,
    ) -> StressResult<BTreeMap<RiskFactor, FactorSeries>>;
}
