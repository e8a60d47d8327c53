//! ROI calculation engine
//!
//! Computes ROI/ROAS/payback for campaigns under four methods. Arithmetic
//! corners never raise: zero cost reports roi/roas of 0 with net profit
//! carrying the sign, and empty event sets produce all-zero metrics.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::types::AttributionEvent;
use crate::campaigns::{AttributionMethod, Campaign};
use crate::telemetry::MetricsCollector;

/// ROI calculation methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoiMethod {
    /// (revenue - cost) / cost over every passed event
    Simple,
    /// Only events matching the campaign's attribution configuration
    Attributed,
    /// Lift over a baseline conversion rate
    Incremental,
    /// Per-user path credit (last-touch)
    MultiTouch,
}

impl RoiMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Attributed => "attributed",
            Self::Incremental => "incremental",
            Self::MultiTouch => "multi_touch",
        }
    }
}

impl fmt::Display for RoiMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ROI calculation results
#[derive(Debug, Clone, Serialize)]
pub struct RoiMetrics {
    pub campaign_id: Uuid,
    pub campaign_cost: f64,
    pub conversion_value: f64,
    /// (conversion_value - campaign_cost) / campaign_cost; 0 when cost is 0
    pub roi: f64,
    /// conversion_value / campaign_cost; 0 when cost is 0
    pub roas: f64,
    /// conversion_value - campaign_cost (disambiguates the zero-cost case)
    pub net_profit: f64,
    pub conversion_count: i64,
    pub average_order_value: Option<f64>,
    pub cost_per_conversion: Option<f64>,
    pub payback_period_days: Option<i64>,
    pub method: RoiMethod,
    pub baseline_rate: Option<f64>,
    /// Set when a method fell back to a weaker calculation
    pub degraded: bool,
    pub calculated_at: DateTime<Utc>,
}

/// ROI broken down by attribution method
#[derive(Debug, Clone, Serialize)]
pub struct AttributionRoi {
    pub promo_code: Option<RoiMetrics>,
    pub pixel: Option<RoiMetrics>,
    pub utm: Option<RoiMetrics>,
    pub direct: Option<RoiMetrics>,
    pub overall: RoiMetrics,
}

/// ROI calculator
pub struct RoiCalculator {
    metrics: Arc<MetricsCollector>,
}

impl RoiCalculator {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self { metrics }
    }

    /// Calculate ROI for a campaign over the given events
    pub fn calculate(
        &self,
        campaign: &Campaign,
        events: &[AttributionEvent],
        baseline_rate: Option<f64>,
        method: RoiMethod,
    ) -> RoiMetrics {
        match method {
            RoiMethod::Simple => self.simple(campaign, events),
            RoiMethod::Attributed => self.attributed(campaign, events),
            RoiMethod::Incremental => self.incremental(campaign, events, baseline_rate),
            RoiMethod::MultiTouch => self.multi_touch(campaign, events),
        }
    }

    fn simple(&self, campaign: &Campaign, events: &[AttributionEvent]) -> RoiMetrics {
        let revenue: f64 = events.iter().filter_map(|e| e.conversion_value).sum();
        let conversion_count = events.iter().filter(|e| e.is_conversion()).count() as i64;
        self.build(campaign, revenue, conversion_count, RoiMethod::Simple)
    }

    fn attributed(&self, campaign: &Campaign, events: &[AttributionEvent]) -> RoiMetrics {
        let attributed = filter_attributed(campaign, events);
        let revenue: f64 = attributed.iter().filter_map(|e| e.conversion_value).sum();
        let conversion_count = attributed.iter().filter(|e| e.is_conversion()).count() as i64;
        self.build(campaign, revenue, conversion_count, RoiMethod::Attributed)
    }

    fn incremental(
        &self,
        campaign: &Campaign,
        events: &[AttributionEvent],
        baseline_rate: Option<f64>,
    ) -> RoiMetrics {
        let Some(rate) = baseline_rate else {
            tracing::warn!(
                campaign_id = %campaign.campaign_id,
                "Baseline conversion rate not provided, falling back to attributed ROI"
            );
            let mut metrics = self.attributed(campaign, events);
            metrics.degraded = true;
            return metrics;
        };

        let attributed = filter_attributed(campaign, events);
        let revenue: f64 = attributed.iter().filter_map(|e| e.conversion_value).sum();
        let conversion_count = attributed.iter().filter(|e| e.is_conversion()).count() as i64;

        let mut metrics = self.build(campaign, revenue, conversion_count, RoiMethod::Incremental);
        metrics.baseline_rate = Some(rate);
        metrics
    }

    fn multi_touch(&self, campaign: &Campaign, events: &[AttributionEvent]) -> RoiMetrics {
        let paths = build_user_paths(events);

        let mut revenue = 0.0;
        let mut conversion_count = 0i64;
        for path in paths.values() {
            if let Some(credited) = credit_conversion(path)
                && let Some(value) = credited.conversion_value
            {
                revenue += value;
                conversion_count += 1;
            }
        }

        self.build(campaign, revenue, conversion_count, RoiMethod::MultiTouch)
    }

    fn build(
        &self,
        campaign: &Campaign,
        revenue: f64,
        conversion_count: i64,
        method: RoiMethod,
    ) -> RoiMetrics {
        let cost = campaign.campaign_value;
        let (roi, roas) = if cost > 0.0 {
            ((revenue - cost) / cost, revenue / cost)
        } else {
            (0.0, 0.0)
        };
        let net_profit = revenue - cost;

        let average_order_value = (conversion_count > 0).then(|| revenue / conversion_count as f64);
        let cost_per_conversion = (conversion_count > 0).then(|| cost / conversion_count as f64);

        let payback_period_days =
            payback_period(campaign, revenue, conversion_count, net_profit, None);

        RoiMetrics {
            campaign_id: campaign.campaign_id,
            campaign_cost: cost,
            conversion_value: revenue,
            roi,
            roas,
            net_profit,
            conversion_count,
            average_order_value,
            cost_per_conversion,
            payback_period_days,
            method,
            baseline_rate: None,
            degraded: false,
            calculated_at: Utc::now(),
        }
    }

    /// ROI broken down by attribution method, plus the overall attributed ROI
    pub fn by_attribution_method(
        &self,
        campaign: &Campaign,
        events: &[AttributionEvent],
    ) -> AttributionRoi {
        let mut by_method: HashMap<AttributionMethod, Vec<AttributionEvent>> = HashMap::new();
        for event in events {
            by_method.entry(event.method).or_default().push(event.clone());
        }

        let slice = |method: AttributionMethod| {
            by_method
                .get(&method)
                .map(|subset| self.attributed(campaign, subset))
        };

        AttributionRoi {
            promo_code: slice(AttributionMethod::PromoCode),
            pixel: slice(AttributionMethod::Pixel),
            utm: slice(AttributionMethod::Utm),
            direct: slice(AttributionMethod::Direct),
            overall: self.attributed(campaign, events),
        }
    }

    /// Compare attributed ROI across multiple campaigns
    pub fn compare_campaigns(
        &self,
        campaigns: &[Campaign],
        events_by_campaign: &HashMap<Uuid, Vec<AttributionEvent>>,
    ) -> HashMap<Uuid, RoiMetrics> {
        let mut results = HashMap::with_capacity(campaigns.len());
        for campaign in campaigns {
            let empty = Vec::new();
            let events = events_by_campaign
                .get(&campaign.campaign_id)
                .unwrap_or(&empty);
            results.insert(
                campaign.campaign_id,
                self.calculate(campaign, events, None, RoiMethod::Attributed),
            );
        }

        self.metrics.increment_counter(
            "roi_calculations_completed",
            &[("campaign_count", &campaigns.len().to_string())],
        );

        results
    }
}

/// Days to recover the campaign cost at the observed (or supplied) daily
/// conversion rate. None when net profit is non-positive or the rate is.
pub fn payback_period(
    campaign: &Campaign,
    revenue: f64,
    conversion_count: i64,
    net_profit: f64,
    daily_conversion_rate: Option<f64>,
) -> Option<i64> {
    if net_profit <= 0.0 {
        return None;
    }

    let rate = match daily_conversion_rate {
        Some(rate) => rate,
        None => {
            let duration = campaign.duration_days();
            if duration > 0 && conversion_count > 0 {
                revenue / duration as f64
            } else {
                return None;
            }
        }
    };

    if rate <= 0.0 {
        return None;
    }

    Some((campaign.campaign_value / rate).floor() as i64)
}

/// Events matching the campaign's attribution configuration
fn filter_attributed<'a>(
    campaign: &Campaign,
    events: &'a [AttributionEvent],
) -> Vec<&'a AttributionEvent> {
    events
        .iter()
        .filter(|e| {
            e.campaign_id == campaign.campaign_id
                && e.method == campaign.attribution_config.method
        })
        .collect()
}

/// Group events into per-user paths, each sorted by timestamp
fn build_user_paths(events: &[AttributionEvent]) -> HashMap<&str, Vec<&AttributionEvent>> {
    let mut paths: HashMap<&str, Vec<&AttributionEvent>> = HashMap::new();
    for event in events {
        paths.entry(event.path_key()).or_default().push(event);
    }
    for path in paths.values_mut() {
        path.sort_by_key(|e| e.timestamp);
    }
    paths
}

/// Pick the conversion a path's value is credited to.
///
/// Last-touch today; the seam exists so linear or time-decay credit can
/// replace it without touching callers.
fn credit_conversion<'a>(path: &[&'a AttributionEvent]) -> Option<&'a AttributionEvent> {
    path.iter().rev().find(|e| e.is_conversion()).copied()
}
