pub mod memory;
pub mod providers;
pub mod report;

pub use providers::{MarketDataProvider, PortfolioDataProvider, SegmentBaseline};
pub use report::{StressEngine, StressReportOutput, StressReportRequest};
