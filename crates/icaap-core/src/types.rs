use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// All monetary values. Wraps Decimal to prevent accidental f64 usage.
pub type Money = Decimal;

/// Rates expressed as decimals (0.05 = 5%). Never as percentages.
pub type Rate = Decimal;

/// Discrete stress intensity tier, ordered by increasing stress magnitude.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SeverityLevel {
    #[default]
    Base,
    Moderate,
    Severe,
    Extreme,
}

impl SeverityLevel {
    /// Every level, mildest first.
    pub const ALL: [SeverityLevel; 4] = [
        SeverityLevel::Base,
        SeverityLevel::Moderate,
        SeverityLevel::Severe,
        SeverityLevel::Extreme,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityLevel::Base => "base",
            SeverityLevel::Moderate => "moderate",
            SeverityLevel::Severe => "severe",
            SeverityLevel::Extreme => "extreme",
        }
    }
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Portfolio segment a report is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Retail,
    Business,
    CommercialRealEstate,
    Securitization,
    TradingBook,
}

impl Segment {
    /// Only the trading book carries market-risk positions to simulate.
    pub fn is_trading_book(&self) -> bool {
        matches!(self, Segment::TradingBook)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::Retail => "retail",
            Segment::Business => "business",
            Segment::CommercialRealEstate => "commercial_real_estate",
            Segment::Securitization => "securitization",
            Segment::TradingBook => "trading_book",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named market or macro factor with a historical time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    EquityReturn,
    RateChange,
    FxReturn,
    CommodityReturn,
    GdpChange,
    UnemploymentChange,
    HousePriceChange,
    InterestRateChange,
}

impl RiskFactor {
    /// The factors a trading-book position can be sensitive to.
    pub const MARKET: [RiskFactor; 4] = [
        RiskFactor::EquityReturn,
        RiskFactor::RateChange,
        RiskFactor::FxReturn,
        RiskFactor::CommodityReturn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskFactor::EquityReturn => "equity_return",
            RiskFactor::RateChange => "rate_change",
            RiskFactor::FxReturn => "fx_return",
            RiskFactor::CommodityReturn => "commodity_return",
            RiskFactor::GdpChange => "gdp_change",
            RiskFactor::UnemploymentChange => "unemployment_change",
            RiskFactor::HousePriceChange => "house_price_change",
            RiskFactor::InterestRateChange => "interest_rate_change",
        }
    }
}

impl fmt::Display for RiskFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Macroeconomic driver of the credit stress curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroFactor {
    #[serde(alias = "gdpChange")]
    GdpChange,
    #[serde(alias = "unemploymentChange")]
    UnemploymentChange,
    #[serde(alias = "housePriceChange")]
    HousePriceChange,
    #[serde(alias = "interestRateChange")]
    InterestRateChange,
}

impl fmt::Display for MacroFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MacroFactor::GdpChange => "gdp_change",
            MacroFactor::UnemploymentChange => "unemployment_change",
            MacroFactor::HousePriceChange => "house_price_change",
            MacroFactor::InterestRateChange => "interest_rate_change",
        };
        f.write_str(name)
    }
}

/// Percentage-point change per macro factor (-3.0 = a 3% fall).
/// A factor absent from the map carries no shock.
pub type MacroShockVector = BTreeMap<MacroFactor, Decimal>;

/// Per-factor coefficients applied to a [`MacroShockVector`].
pub type FactorCoefficients = BTreeMap<MacroFactor, Decimal>;

/// Sum of `coefficient * shock` over the factors present in both maps.
pub fn shock_index(coefficients: &FactorCoefficients, shocks: &MacroShockVector) -> Decimal {
    coefficients
        .iter()
        .filter_map(|(factor, coef)| shocks.get(factor).map(|shock| *coef * *shock))
        .sum()
}

/// Inclusive calendar window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "rust_decimal_128bit".to_string(),
        },
    }
}

/// Same envelope for results computed in `f64`.
pub fn with_metadata_f64<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    let mut output = with_metadata(methodology, assumptions, warnings, elapsed_us, result);
    output.metadata.precision = "ieee754_f64".to_string();
    output
}
