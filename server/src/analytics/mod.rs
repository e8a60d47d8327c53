//! Analytics core
//!
//! Attribution event storage and time-series aggregation (`store`), the ROI
//! calculation engine (`roi`), and the shared data types (`types`).

pub mod roi;
pub mod store;
pub mod types;

pub use roi::{AttributionRoi, RoiCalculator, RoiMethod, RoiMetrics};
pub use store::{AnalyticsStore, TimescaleAnalyticsStore};
pub use types::{
    Aggregation, AttributionEvent, CampaignPerformance, ListenerMetric, MetricType,
};
