//! Attribution and listener-metric store
//!
//! The [`AnalyticsStore`] port is what the calculators and jobs consume;
//! [`TimescaleAnalyticsStore`] is the production implementation over the
//! time-series database. Tests inject in-memory fakes of the same port
//! instead of branching inside the store.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use super::types::{
    Aggregation, AttributionEvent, CampaignPerformance, ListenerMetric, MetricType,
    distinct_listeners, reduce,
};
use crate::core::config::ListenerCountMode;
use crate::core::constants::{INGEST_BASE_DELAY_MS, INGEST_MAX_ATTEMPTS};
use crate::core::tenant::TenantContext;
use crate::data::{DataError, TimescaleService};
use crate::telemetry::MetricsCollector;
use crate::utils::retry::retry_with_backoff;

/// Port for attribution events and listener metrics
///
/// `aggregate` and `campaign_performance` are derived operations with
/// default implementations over the raw reads, so every implementation
/// (including test fakes) shares the same reduction semantics.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Idempotent upsert of one attribution event (no-op on duplicate id)
    async fn ingest(
        &self,
        tenant: &TenantContext,
        event: &AttributionEvent,
    ) -> Result<(), DataError>;

    /// Append one listener metric data point
    async fn ingest_metric(
        &self,
        tenant: &TenantContext,
        metric: &ListenerMetric,
    ) -> Result<(), DataError>;

    /// Events for a campaign, newest first, optionally windowed
    async fn list_events(
        &self,
        tenant: &TenantContext,
        campaign_id: Uuid,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<AttributionEvent>, DataError>;

    /// Metrics for a podcast over a window with optional filters
    #[allow(clippy::too_many_arguments)]
    async fn list_metrics(
        &self,
        tenant: &TenantContext,
        podcast_id: Uuid,
        metric_type: MetricType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        platform: Option<&str>,
        episode_id: Option<Uuid>,
    ) -> Result<Vec<ListenerMetric>, DataError>;

    /// Distinct-listener counting mode for `campaign_performance`
    fn listener_count_mode(&self) -> ListenerCountMode {
        ListenerCountMode::Legacy
    }

    /// Numeric reduction over a metric window; an empty window is 0
    async fn aggregate(
        &self,
        tenant: &TenantContext,
        podcast_id: Uuid,
        metric_type: MetricType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        op: Aggregation,
    ) -> Result<f64, DataError> {
        let metrics = self
            .list_metrics(tenant, podcast_id, metric_type, start, end, None, None)
            .await?;
        let values: Vec<f64> = metrics.iter().map(|m| m.value).collect();
        Ok(reduce(&values, op))
    }

    /// Aggregate downloads, streams, listeners, and attribution outcomes for
    /// a campaign window
    async fn campaign_performance(
        &self,
        tenant: &TenantContext,
        campaign_id: Uuid,
        podcast_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CampaignPerformance, DataError> {
        let downloads = self
            .list_metrics(tenant, podcast_id, MetricType::Downloads, start, end, None, None)
            .await?;
        let streams = self
            .list_metrics(tenant, podcast_id, MetricType::Streams, start, end, None, None)
            .await?;
        let listeners = self
            .list_metrics(tenant, podcast_id, MetricType::Listeners, start, end, None, None)
            .await?;
        let events = self
            .list_events(tenant, campaign_id, Some(start), Some(end))
            .await?;

        let conversions = events.iter().filter(|e| e.is_conversion()).count() as i64;
        let conversion_value: f64 = events.iter().filter_map(|e| e.conversion_value).sum();

        Ok(CampaignPerformance {
            campaign_id,
            podcast_id,
            start_date: start,
            end_date: end,
            total_downloads: downloads.iter().map(|m| m.value).sum::<f64>() as i64,
            total_streams: streams.iter().map(|m| m.value).sum::<f64>() as i64,
            total_listeners: distinct_listeners(&listeners, self.listener_count_mode()),
            attribution_events: events.len() as i64,
            conversions,
            conversion_value,
        })
    }
}

/// Production store over TimescaleDB
pub struct TimescaleAnalyticsStore {
    timescale: Arc<TimescaleService>,
    metrics: Arc<MetricsCollector>,
    listener_count_mode: ListenerCountMode,
}

impl TimescaleAnalyticsStore {
    pub fn new(
        timescale: Arc<TimescaleService>,
        metrics: Arc<MetricsCollector>,
        listener_count_mode: ListenerCountMode,
    ) -> Self {
        Self {
            timescale,
            metrics,
            listener_count_mode,
        }
    }
}

#[async_trait]
impl AnalyticsStore for TimescaleAnalyticsStore {
    async fn ingest(
        &self,
        tenant: &TenantContext,
        event: &AttributionEvent,
    ) -> Result<(), DataError> {
        event.validate()?;

        let db = self.timescale.router();
        let tenant_id = tenant.tenant_id;
        retry_with_backoff(
            INGEST_MAX_ATTEMPTS,
            INGEST_BASE_DELAY_MS,
            |e: &DataError| e.is_transient(),
            || async move {
                db.execute(
                    sqlx::query(
                        "INSERT INTO attribution_events
                         (event_id, tenant_id, timestamp, campaign_id, podcast_id, episode_id,
                          attribution_method, conversion_type, conversion_value, user_id, session_id)
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                         ON CONFLICT (event_id) DO NOTHING",
                    )
                    .bind(event.event_id)
                    .bind(tenant_id)
                    .bind(event.timestamp)
                    .bind(event.campaign_id)
                    .bind(event.podcast_id)
                    .bind(event.episode_id)
                    .bind(event.method.as_str())
                    .bind(&event.conversion_type)
                    .bind(event.conversion_value)
                    .bind(&event.user_id)
                    .bind(&event.session_id),
                )
                .await
                .map(|_| ())
            },
        )
        .await
        .map_err(|(e, attempts)| {
            tracing::error!(
                event_id = %event.event_id,
                attempts,
                error = %e,
                "Attribution ingest failed"
            );
            self.metrics
                .increment_counter("attribution.ingest_failed", &[("error", e.class())]);
            e
        })?;

        self.metrics.increment_counter(
            "attribution.ingested",
            &[("method", event.method.as_str())],
        );
        Ok(())
    }

    async fn ingest_metric(
        &self,
        tenant: &TenantContext,
        metric: &ListenerMetric,
    ) -> Result<(), DataError> {
        self.timescale
            .router()
            .execute(
                sqlx::query(
                    "INSERT INTO listener_metrics
                     (timestamp, tenant_id, podcast_id, episode_id, metric_type, value,
                      platform, country, device)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                )
                .bind(metric.timestamp)
                .bind(tenant.tenant_id)
                .bind(metric.podcast_id)
                .bind(metric.episode_id)
                .bind(metric.metric_type.as_str())
                .bind(metric.value)
                .bind(&metric.platform)
                .bind(&metric.country)
                .bind(&metric.device),
            )
            .await?;

        self.metrics.increment_counter(
            "metrics.ingested",
            &[("metric_type", metric.metric_type.as_str())],
        );
        Ok(())
    }

    async fn list_events(
        &self,
        tenant: &TenantContext,
        campaign_id: Uuid,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<AttributionEvent>, DataError> {
        let rows = self
            .timescale
            .router()
            .fetch_many(
                sqlx::query(
                    "SELECT event_id, tenant_id, timestamp, campaign_id, podcast_id, episode_id,
                            attribution_method, conversion_type, conversion_value, user_id,
                            session_id
                     FROM attribution_events
                     WHERE tenant_id = $1 AND campaign_id = $2
                       AND ($3::timestamptz IS NULL OR timestamp >= $3)
                       AND ($4::timestamptz IS NULL OR timestamp <= $4)
                     ORDER BY timestamp DESC",
                )
                .bind(tenant.tenant_id)
                .bind(campaign_id)
                .bind(start)
                .bind(end),
                None,
            )
            .await?;

        rows.iter().map(event_from_row).collect()
    }

    async fn list_metrics(
        &self,
        tenant: &TenantContext,
        podcast_id: Uuid,
        metric_type: MetricType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        platform: Option<&str>,
        episode_id: Option<Uuid>,
    ) -> Result<Vec<ListenerMetric>, DataError> {
        let started = Instant::now();

        let rows = self
            .timescale
            .router()
            .fetch_many(
                sqlx::query(
                    "SELECT timestamp, podcast_id, episode_id, metric_type, value,
                            platform, country, device
                     FROM listener_metrics
                     WHERE tenant_id = $1 AND podcast_id = $2 AND metric_type = $3
                       AND timestamp >= $4 AND timestamp <= $5
                       AND ($6::text IS NULL OR platform = $6)
                       AND ($7::uuid IS NULL OR episode_id = $7)
                     ORDER BY timestamp",
                )
                .bind(tenant.tenant_id)
                .bind(podcast_id)
                .bind(metric_type.as_str())
                .bind(start)
                .bind(end)
                .bind(platform)
                .bind(episode_id),
                None,
            )
            .await?;

        self.metrics.record_histogram(
            "analytics_query_latency",
            started.elapsed().as_secs_f64(),
            &[("metric_type", metric_type.as_str())],
        );

        rows.iter().map(metric_from_row).collect()
    }

    fn listener_count_mode(&self) -> ListenerCountMode {
        self.listener_count_mode
    }
}

fn event_from_row(row: &PgRow) -> Result<AttributionEvent, DataError> {
    Ok(AttributionEvent {
        event_id: row.try_get("event_id")?,
        tenant_id: row.try_get("tenant_id")?,
        timestamp: row.try_get("timestamp")?,
        campaign_id: row.try_get("campaign_id")?,
        podcast_id: row.try_get("podcast_id")?,
        episode_id: row.try_get("episode_id")?,
        method: row.try_get::<String, _>("attribution_method")?.parse()?,
        conversion_type: row.try_get("conversion_type")?,
        conversion_value: row.try_get("conversion_value")?,
        user_id: row.try_get("user_id")?,
        session_id: row.try_get("session_id")?,
    })
}

fn metric_from_row(row: &PgRow) -> Result<ListenerMetric, DataError> {
    Ok(ListenerMetric {
        timestamp: row.try_get("timestamp")?,
        podcast_id: row.try_get("podcast_id")?,
        episode_id: row.try_get("episode_id")?,
        metric_type: row.try_get::<String, _>("metric_type")?.parse()?,
        value: row.try_get("value")?,
        platform: row.try_get("platform")?,
        country: row.try_get("country")?,
        device: row.try_get("device")?,
    })
}
