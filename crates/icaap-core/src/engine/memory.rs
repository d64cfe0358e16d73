use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::providers::{MarketDataProvider, PortfolioDataProvider, SegmentBaseline};
use crate::calibration::historical::FactorSeries;
use crate::error::StressEngineError;
use crate::recommender::severity::PortfolioProfile;
use crate::simulation::market::Position;
use crate::types::{DateRange, RiskFactor, Segment};
use crate::StressResult;

/// Everything the engine reads for one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentData {
    pub profile: PortfolioProfile,
    pub baseline: SegmentBaseline,
    #[serde(default)]
    pub positions: Vec<Position>,
}

/// Portfolio provider over a preloaded snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryPortfolio {
    pub segments: BTreeMap<Segment, SegmentData>,
}

impl InMemoryPortfolio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_segment(mut self, segment: Segment, data: SegmentData) -> Self {
        self.segments.insert(segment, data);
        self
    }

    fn segment(&self, segment: Segment) -> StressResult<&SegmentData> {
        self.segments
            .get(&segment)
            .ok_or_else(|| StressEngineError::DataSource {
                segment: segment.to_string(),
                reason: "no data loaded for segment".into(),
            })
    }
}

impl PortfolioDataProvider for InMemoryPortfolio {
    fn fetch_positions(&self, segment: Segment) -> StressResult<Vec<Position>> {
        Ok(self.segment(segment)?.positions.clone())
    }

    fn fetch_profile(&self, segment: Segment) -> StressResult<PortfolioProfile> {
        Ok(self.segment(segment)?.profile.clone())
    }

    fn fetch_baseline(&self, segment: Segment) -> StressResult<SegmentBaseline> {
        Ok(self.segment(segment)?.baseline.clone())
    }
}

/// Market data provider over preloaded factor histories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryMarketData {
    pub series: BTreeMap<RiskFactor, FactorSeries>,
}

impl InMemoryMarketData {
    pub fn new(series: impl IntoIterator<Item = FactorSeries>) -> Self {
        Self {
            series: series.into_iter().map(|s| (s.factor, s)).collect(),
        }
    }
}

impl MarketDataProvider for InMemoryMarketData {
    fn fetch_factor_series(
        &self,
        factors: &[RiskFactor],
        range: DateRange,
    ) -> StressResult<BTreeMap<RiskFactor, FactorSeries>> {
        let missing: Vec<String> = factors
            .iter()
            .filter(|f| !self.series.contains_key(f))
            .map(|f| f.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(StressEngineError::DataSource {
                segment: Segment::TradingBook.to_string(),
                reason: format!("no history for factors {}", missing.join(", ")),
            });
        }

        Ok(factors
            .iter()
            .filter_map(|f| self.series.get(f))
            .map(|s| {
                let points = s
                    .points
                    .iter()
                    .filter(|p| range.contains(p.date))
                    .copied()
                    .collect();
                (s.factor, FactorSeries::new(s.factor, points))
            })
            .collect())
    }
}
