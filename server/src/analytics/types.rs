//! Analytics data types
//!
//! Time-series tuples (listener metrics), attribution events, and the
//! aggregate shapes derived from them.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::campaigns::AttributionMethod;
use crate::core::config::ListenerCountMode;
use crate::data::DataError;

/// Listener metric types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Downloads,
    Streams,
    CompletionRate,
    Listeners,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Downloads => "downloads",
            Self::Streams => "streams",
            Self::CompletionRate => "completion_rate",
            Self::Listeners => "listeners",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "downloads" => Ok(Self::Downloads),
            "streams" => Ok(Self::Streams),
            "completion_rate" => Ok(Self::CompletionRate),
            "listeners" => Ok(Self::Listeners),
            other => Err(DataError::validation(format!(
                "unknown metric type: {}",
                other
            ))),
        }
    }
}

/// Listener metric data point (append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerMetric {
    pub timestamp: DateTime<Utc>,
    pub podcast_id: Uuid,
    pub episode_id: Option<Uuid>,
    pub metric_type: MetricType,
    pub value: f64,
    pub platform: Option<String>,
    pub country: Option<String>,
    pub device: Option<String>,
}

/// Attribution event linking a listener action to a campaign
///
/// Identity is `event_id`; ingesting the same id again is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionEvent {
    pub event_id: Uuid,
    pub tenant_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub campaign_id: Uuid,
    pub podcast_id: Uuid,
    pub episode_id: Option<Uuid>,
    pub method: AttributionMethod,
    /// Non-null marks the event as a conversion
    pub conversion_type: Option<String>,
    pub conversion_value: Option<f64>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl AttributionEvent {
    /// A monetary value requires a conversion type
    pub fn validate(&self) -> Result<(), DataError> {
        if self.conversion_value.is_some() && self.conversion_type.is_none() {
            return Err(DataError::validation(format!(
                "event {} has a conversion_value without a conversion_type",
                self.event_id
            )));
        }
        Ok(())
    }

    pub fn is_conversion(&self) -> bool {
        self.conversion_type.is_some()
    }

    /// Key used to group events into per-user paths for multi-touch
    pub fn path_key(&self) -> &str {
        self.user_id
            .as_deref()
            .or(self.session_id.as_deref())
            .unwrap_or("unknown")
    }
}

/// Campaign performance aggregate over a time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignPerformance {
    pub campaign_id: Uuid,
    pub podcast_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub total_downloads: i64,
    pub total_streams: i64,
    pub total_listeners: i64,
    pub attribution_events: i64,
    pub conversions: i64,
    pub conversion_value: f64,
}

/// Numeric reduction over a metric window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Avg,
    Min,
    Max,
}

/// Reduce metric values; an empty window is 0 for every operation
pub fn reduce(values: &[f64], op: Aggregation) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    match op {
        Aggregation::Sum => values.iter().sum(),
        Aggregation::Avg => values.iter().sum::<f64>() / values.len() as f64,
        Aggregation::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
        Aggregation::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
    }
}

/// Count distinct listeners in a window of `listeners` metrics.
///
/// `Legacy` counts distinct metric values, preserving the historical
/// behavior; `DeviceIdentity` counts distinct device identifiers, folding
/// rows without one into a single "unknown" bucket.
pub fn distinct_listeners(metrics: &[ListenerMetric], mode: ListenerCountMode) -> i64 {
    match mode {
        ListenerCountMode::Legacy => {
            let distinct: HashSet<u64> = metrics.iter().map(|m| m.value.to_bits()).collect();
            distinct.len() as i64
        }
        ListenerCountMode::DeviceIdentity => {
            let distinct: HashSet<&str> = metrics
                .iter()
                .map(|m| m.device.as_deref().unwrap_or("unknown"))
                .collect();
            distinct.len() as i64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn metric(value: f64, device: Option<&str>) -> ListenerMetric {
        ListenerMetric {
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            podcast_id: Uuid::nil(),
            episode_id: None,
            metric_type: MetricType::Listeners,
            value,
            platform: None,
            country: None,
            device: device.map(|d| d.to_string()),
        }
    }

    #[test]
    fn test_reduce_empty_window_is_zero() {
        for op in [
            Aggregation::Sum,
            Aggregation::Avg,
            Aggregation::Min,
            Aggregation::Max,
        ] {
            assert_eq!(reduce(&[], op), 0.0);
        }
    }

    #[test]
    fn test_reduce_operations() {
        let values = [3.0, 1.0, 2.0];
        assert_eq!(reduce(&values, Aggregation::Sum), 6.0);
        assert_eq!(reduce(&values, Aggregation::Avg), 2.0);
        assert_eq!(reduce(&values, Aggregation::Min), 1.0);
        assert_eq!(reduce(&values, Aggregation::Max), 3.0);
    }

    #[test]
    fn test_reduce_sum_is_additive_over_disjoint_windows() {
        let first = [1.0, 2.0];
        let second = [3.0, 4.0];
        let combined = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(
            reduce(&first, Aggregation::Sum) + reduce(&second, Aggregation::Sum),
            reduce(&combined, Aggregation::Sum)
        );
    }

    #[test]
    fn test_distinct_listeners_legacy_counts_values() {
        let metrics = vec![metric(1.0, None), metric(1.0, None), metric(2.0, None)];
        assert_eq!(distinct_listeners(&metrics, ListenerCountMode::Legacy), 2);
    }

    #[test]
    fn test_distinct_listeners_by_device_identity() {
        let metrics = vec![
            metric(1.0, Some("ios-a")),
            metric(2.0, Some("ios-a")),
            metric(3.0, Some("web-b")),
            metric(4.0, None),
        ];
        assert_eq!(
            distinct_listeners(&metrics, ListenerCountMode::DeviceIdentity),
            3
        );
    }

    #[test]
    fn test_event_validation() {
        let mut event = AttributionEvent {
            event_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            campaign_id: Uuid::new_v4(),
            podcast_id: Uuid::new_v4(),
            episode_id: None,
            method: AttributionMethod::Pixel,
            conversion_type: None,
            conversion_value: Some(10.0),
            user_id: None,
            session_id: None,
        };
        assert!(event.validate().is_err());

        event.conversion_type = Some("purchase".into());
        assert!(event.validate().is_ok());
        assert!(event.is_conversion());
    }

    #[test]
    fn test_path_key_precedence() {
        let mut event = AttributionEvent {
            event_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            campaign_id: Uuid::new_v4(),
            podcast_id: Uuid::new_v4(),
            episode_id: None,
            method: AttributionMethod::Utm,
            conversion_type: None,
            conversion_value: None,
            user_id: Some("u1".into()),
            session_id: Some("s1".into()),
        };
        assert_eq!(event.path_key(), "u1");
        event.user_id = None;
        assert_eq!(event.path_key(), "s1");
        event.session_id = None;
        assert_eq!(event.path_key(), "unknown");
    }
}
