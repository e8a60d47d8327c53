//! In-process metrics sink
//!
//! Counters, gauges, and histograms keyed by name + sorted tag pairs. The
//! registry is lock-free for writers (dashmap) and snapshottable for
//! exposition by the monitoring collaborator.

use dashmap::DashMap;
use serde::Serialize;

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
struct MetricKey {
    name: String,
    tags: Vec<(String, String)>,
}

fn metric_key(name: &str, tags: &[(&str, &str)]) -> MetricKey {
    let mut tags: Vec<(String, String)> = tags
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    tags.sort();
    MetricKey {
        name: name.to_string(),
        tags,
    }
}

/// Histogram summary (count/sum/min/max)
#[derive(Clone, Debug, Default, Serialize)]
pub struct HistogramData {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl HistogramData {
    fn record(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// One sample in a metrics snapshot
#[derive(Clone, Debug, Serialize)]
pub struct MetricSample<T> {
    pub name: String,
    pub tags: Vec<(String, String)>,
    pub value: T,
}

/// Point-in-time view of the whole registry
#[derive(Clone, Debug, Serialize)]
pub struct MetricsSnapshot {
    pub counters: Vec<MetricSample<u64>>,
    pub gauges: Vec<MetricSample<f64>>,
    pub histograms: Vec<MetricSample<HistogramData>>,
}

/// Metrics collector shared by every core component
#[derive(Default)]
pub struct MetricsCollector {
    counters: DashMap<MetricKey, u64>,
    gauges: DashMap<MetricKey, f64>,
    histograms: DashMap<MetricKey, HistogramData>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_counter(&self, name: &str, tags: &[(&str, &str)]) {
        *self.counters.entry(metric_key(name, tags)).or_insert(0) += 1;
    }

    pub fn record_gauge(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        self.gauges.insert(metric_key(name, tags), value);
    }

    pub fn record_histogram(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        self.histograms
            .entry(metric_key(name, tags))
            .or_default()
            .record(value);
    }

    // =========================================================================
    // Reads (snapshotting, tests)
    // =========================================================================

    pub fn counter_value(&self, name: &str, tags: &[(&str, &str)]) -> u64 {
        self.counters
            .get(&metric_key(name, tags))
            .map(|v| *v)
            .unwrap_or(0)
    }

    pub fn gauge_value(&self, name: &str, tags: &[(&str, &str)]) -> Option<f64> {
        self.gauges.get(&metric_key(name, tags)).map(|v| *v)
    }

    pub fn histogram(&self, name: &str, tags: &[(&str, &str)]) -> Option<HistogramData> {
        self.histograms
            .get(&metric_key(name, tags))
            .map(|v| v.clone())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .iter()
                .map(|e| MetricSample {
                    name: e.key().name.clone(),
                    tags: e.key().tags.clone(),
                    value: *e.value(),
                })
                .collect(),
            gauges: self
                .gauges
                .iter()
                .map(|e| MetricSample {
                    name: e.key().name.clone(),
                    tags: e.key().tags.clone(),
                    value: *e.value(),
                })
                .collect(),
            histograms: self
                .histograms
                .iter()
                .map(|e| MetricSample {
                    name: e.key().name.clone(),
                    tags: e.key().tags.clone(),
                    value: e.value().clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_accumulates() {
        let metrics = MetricsCollector::new();
        metrics.increment_counter("ingested", &[("method", "pixel")]);
        metrics.increment_counter("ingested", &[("method", "pixel")]);
        metrics.increment_counter("ingested", &[("method", "utm")]);

        assert_eq!(metrics.counter_value("ingested", &[("method", "pixel")]), 2);
        assert_eq!(metrics.counter_value("ingested", &[("method", "utm")]), 1);
        assert_eq!(metrics.counter_value("ingested", &[("method", "promo_code")]), 0);
    }

    #[test]
    fn test_tag_order_is_irrelevant() {
        let metrics = MetricsCollector::new();
        metrics.increment_counter("x", &[("a", "1"), ("b", "2")]);
        metrics.increment_counter("x", &[("b", "2"), ("a", "1")]);
        assert_eq!(metrics.counter_value("x", &[("a", "1"), ("b", "2")]), 2);
    }

    #[test]
    fn test_gauge_overwrites() {
        let metrics = MetricsCollector::new();
        metrics.record_gauge("etl_health_status", 1.0, &[]);
        metrics.record_gauge("etl_health_status", 0.5, &[]);
        assert_eq!(metrics.gauge_value("etl_health_status", &[]), Some(0.5));
    }

    #[test]
    fn test_histogram_summary() {
        let metrics = MetricsCollector::new();
        metrics.record_histogram("duration", 2.0, &[]);
        metrics.record_histogram("duration", 4.0, &[]);
        metrics.record_histogram("duration", 1.0, &[]);

        let h = metrics.histogram("duration", &[]).unwrap();
        assert_eq!(h.count, 3);
        assert_eq!(h.sum, 7.0);
        assert_eq!(h.min, 1.0);
        assert_eq!(h.max, 4.0);
        assert!((h.mean() - 7.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_contains_all_kinds() {
        let metrics = MetricsCollector::new();
        metrics.increment_counter("c", &[]);
        metrics.record_gauge("g", 1.0, &[]);
        metrics.record_histogram("h", 1.0, &[]);

        let snap = metrics.snapshot();
        assert_eq!(snap.counters.len(), 1);
        assert_eq!(snap.gauges.len(), 1);
        assert_eq!(snap.histograms.len(), 1);
    }
}
