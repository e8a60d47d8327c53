//! Telemetry ports
//!
//! - `metrics` - counter/gauge/histogram sink
//! - `events` - at-least-once structured event append

pub mod events;
pub mod metrics;

pub use events::EventLogger;
pub use metrics::{MetricsCollector, MetricsSnapshot};
