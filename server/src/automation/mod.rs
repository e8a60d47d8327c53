//! Automation jobs
//!
//! Tenant-scoped background work dispatched by the scheduler (or triggered
//! via the admin API): ETL health probing, the daily metric-view refresh,
//! deal-pipeline alerting, and matchmaking recalculation. Each job emits
//! events on significant outcomes and records metrics.

pub mod handlers;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

use crate::core::constants::{
    ETL_DEGRADED_HOURS, ETL_HEALTHY_HOURS, PIPELINE_NEGOTIATION_DAYS, PIPELINE_STUCK_DAYS,
};
use crate::core::tenant::{TenantContext, tenant_param};
use crate::data::{DataError, ReadReplicaRouter};
use crate::matchmaking::MatchEngine;
use crate::telemetry::{EventLogger, MetricsCollector};

// =============================================================================
// ETL health
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EtlHealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl EtlHealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }

    /// Gauge encoding: healthy 1, degraded 0.5, unhealthy 0
    pub fn gauge_value(&self) -> f64 {
        match self {
            Self::Healthy => 1.0,
            Self::Degraded => 0.5,
            Self::Unhealthy => 0.0,
        }
    }
}

impl fmt::Display for EtlHealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify import health from the age of the last successful import
pub fn classify_etl_health(
    last_success: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> EtlHealthStatus {
    match last_success {
        Some(t) if now - t < Duration::hours(ETL_HEALTHY_HOURS) => EtlHealthStatus::Healthy,
        Some(t) if now - t < Duration::hours(ETL_DEGRADED_HOURS) => EtlHealthStatus::Degraded,
        _ => EtlHealthStatus::Unhealthy,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EtlHealthReport {
    pub status: EtlHealthStatus,
    pub last_success: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub successful_imports_24h: i64,
    pub failed_imports_24h: i64,
}

// =============================================================================
// Deal pipeline alerts
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StuckDeal {
    pub campaign_id: Uuid,
    pub campaign_name: String,
    pub stage: String,
    pub days_in_stage: i64,
    pub campaign_value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LongNegotiation {
    pub campaign_id: Uuid,
    pub campaign_name: String,
    pub days_in_negotiation: i64,
    pub campaign_value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LostDeal {
    pub campaign_id: Uuid,
    pub campaign_name: String,
}

/// One non-empty alert category
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "deals", rename_all = "snake_case")]
pub enum PipelineAlert {
    StuckDeals(Vec<StuckDeal>),
    LongNegotiations(Vec<LongNegotiation>),
    LostWithoutReason(Vec<LostDeal>),
}

impl PipelineAlert {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StuckDeals(_) => "stuck_deals",
            Self::LongNegotiations(_) => "long_negotiations",
            Self::LostWithoutReason(_) => "lost_without_reason",
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Self::StuckDeals(deals) => deals.len(),
            Self::LongNegotiations(deals) => deals.len(),
            Self::LostWithoutReason(deals) => deals.len(),
        }
    }

    fn properties(&self) -> serde_json::Value {
        serde_json::json!({
            "type": self.kind(),
            "count": self.count(),
            "alert": self,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineAlerts {
    pub alerts: Vec<PipelineAlert>,
}

// =============================================================================
// Matchmaking recalculation
// =============================================================================

/// Recalculation fanout modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecalcScope {
    /// One advertiser/podcast pair
    Pair {
        advertiser_id: Uuid,
        podcast_id: Uuid,
    },
    /// Every podcast in the tenant for one advertiser
    Advertiser(Uuid),
    /// Every advertiser in the tenant for one podcast
    Podcast(Uuid),
    /// Cartesian product of advertisers and podcasts; scheduler-only
    TenantWide,
}

impl RecalcScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pair { .. } => "pair",
            Self::Advertiser(_) => "advertiser",
            Self::Podcast(_) => "podcast",
            Self::TenantWide => "tenant_wide",
        }
    }
}

/// Where a recalculation request originated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecalcOrigin {
    Api,
    Scheduler,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecalcSummary {
    pub scope: &'static str,
    pub matches_recalculated: u64,
}

// =============================================================================
// Run-all summary
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct AutomationRunSummary {
    pub etl_health: EtlHealthReport,
    pub metrics_refreshed_at: DateTime<Utc>,
    pub pipeline_alert_count: usize,
}

/// Resets the running flag when a `run_all` invocation ends, error or not
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// =============================================================================
// AutomationJobs
// =============================================================================

pub struct AutomationJobs {
    db: Arc<ReadReplicaRouter>,
    metrics: Arc<MetricsCollector>,
    events: Arc<EventLogger>,
    engine: Arc<MatchEngine>,
    running: AtomicBool,
}

impl AutomationJobs {
    pub fn new(
        db: Arc<ReadReplicaRouter>,
        metrics: Arc<MetricsCollector>,
        events: Arc<EventLogger>,
        engine: Arc<MatchEngine>,
    ) -> Self {
        Self {
            db,
            metrics,
            events,
            engine,
            running: AtomicBool::new(false),
        }
    }

    /// Probe ETL import health over the last 24 hours
    pub async fn check_etl_health(
        &self,
        tenant: Option<&TenantContext>,
    ) -> Result<EtlHealthReport, DataError> {
        let row = self
            .db
            .fetch_one(
                sqlx::query(
                    "SELECT
                         COUNT(*) FILTER (WHERE status = 'completed') AS successful_imports,
                         COUNT(*) FILTER (WHERE status = 'failed') AS failed_imports,
                         MAX(started_at) FILTER (WHERE status = 'completed') AS last_success,
                         MAX(started_at) AS last_import_attempt
                     FROM etl_imports
                     WHERE started_at >= NOW() - INTERVAL '24 hours'
                       AND ($1::uuid IS NULL OR tenant_id = $1)",
                )
                .bind(tenant_param(tenant)),
                None,
            )
            .await?;

        let last_success: Option<DateTime<Utc>> = row.try_get("last_success")?;
        let last_attempt: Option<DateTime<Utc>> = row.try_get("last_import_attempt")?;
        let successful_imports_24h: i64 = row.try_get("successful_imports")?;
        let failed_imports_24h: i64 = row.try_get("failed_imports")?;

        let status = classify_etl_health(last_success, Utc::now());

        if status == EtlHealthStatus::Unhealthy {
            self.events
                .log_event(
                    "etl.health_alert",
                    tenant_param(tenant),
                    None,
                    serde_json::json!({
                        "status": status.as_str(),
                        "last_success": last_success.map(|t| t.to_rfc3339()),
                        "failed_count": failed_imports_24h,
                    }),
                )
                .await;
        }

        self.metrics.record_gauge(
            "etl_health_status",
            status.gauge_value(),
            &[("status", status.as_str())],
        );

        Ok(EtlHealthReport {
            status,
            last_success,
            last_attempt,
            successful_imports_24h,
            failed_imports_24h,
        })
    }

    /// Refresh the `metrics_daily` materialized view. Idempotent.
    pub async fn refresh_metrics_daily(&self) -> Result<DateTime<Utc>, DataError> {
        self.db
            .execute(sqlx::query("SELECT refresh_metrics_daily()"))
            .await?;

        self.events
            .log_event("metrics_daily.refreshed", None, None, serde_json::json!({}))
            .await;

        Ok(Utc::now())
    }

    /// Scan the deal pipeline for stuck deals, stale negotiations, and lost
    /// deals missing a reason
    pub async fn check_deal_pipeline_alerts(
        &self,
        tenant: Option<&TenantContext>,
    ) -> Result<PipelineAlerts, DataError> {
        let now = Utc::now();
        let tenant_id = tenant_param(tenant);

        let stuck_rows = self
            .db
            .fetch_many(
                sqlx::query(
                    "SELECT campaign_id, campaign_name, stage, stage_changed_at, campaign_value
                     FROM campaigns
                     WHERE ($1::uuid IS NULL OR tenant_id = $1)
                       AND stage NOT IN ('won', 'lost')
                       AND stage_changed_at < NOW() - make_interval(days => $2)
                     ORDER BY campaign_value DESC NULLS LAST",
                )
                .bind(tenant_id)
                .bind(PIPELINE_STUCK_DAYS as i32),
                None,
            )
            .await?;

        let negotiation_rows = self
            .db
            .fetch_many(
                sqlx::query(
                    "SELECT campaign_id, campaign_name, stage_changed_at, campaign_value
                     FROM campaigns
                     WHERE ($1::uuid IS NULL OR tenant_id = $1)
                       AND stage = 'negotiation'
                       AND stage_changed_at < NOW() - make_interval(days => $2)
                     ORDER BY campaign_value DESC NULLS LAST",
                )
                .bind(tenant_id)
                .bind(PIPELINE_NEGOTIATION_DAYS as i32),
                None,
            )
            .await?;

        let lost_rows = self
            .db
            .fetch_many(
                sqlx::query(
                    "SELECT campaign_id, campaign_name
                     FROM campaigns
                     WHERE ($1::uuid IS NULL OR tenant_id = $1)
                       AND stage = 'lost'
                       AND (notes IS NULL OR notes = '')",
                )
                .bind(tenant_id),
                None,
            )
            .await?;

        let mut alerts = Vec::new();

        if !stuck_rows.is_empty() {
            let deals = stuck_rows
                .iter()
                .map(|row| {
                    let changed: DateTime<Utc> = row.try_get("stage_changed_at")?;
                    Ok(StuckDeal {
                        campaign_id: row.try_get("campaign_id")?,
                        campaign_name: row.try_get("campaign_name")?,
                        stage: row.try_get("stage")?,
                        days_in_stage: (now - changed).num_days(),
                        campaign_value: row.try_get("campaign_value")?,
                    })
                })
                .collect::<Result<Vec<_>, DataError>>()?;
            alerts.push(PipelineAlert::StuckDeals(deals));
        }

        if !negotiation_rows.is_empty() {
            let deals = negotiation_rows
                .iter()
                .map(|row| {
                    let changed: DateTime<Utc> = row.try_get("stage_changed_at")?;
                    Ok(LongNegotiation {
                        campaign_id: row.try_get("campaign_id")?,
                        campaign_name: row.try_get("campaign_name")?,
                        days_in_negotiation: (now - changed).num_days(),
                        campaign_value: row.try_get("campaign_value")?,
                    })
                })
                .collect::<Result<Vec<_>, DataError>>()?;
            alerts.push(PipelineAlert::LongNegotiations(deals));
        }

        if !lost_rows.is_empty() {
            let deals = lost_rows
                .iter()
                .map(|row| {
                    Ok(LostDeal {
                        campaign_id: row.try_get("campaign_id")?,
                        campaign_name: row.try_get("campaign_name")?,
                    })
                })
                .collect::<Result<Vec<_>, DataError>>()?;
            alerts.push(PipelineAlert::LostWithoutReason(deals));
        }

        for alert in &alerts {
            self.events
                .log_event(
                    "deal_pipeline.alert",
                    tenant_id,
                    None,
                    alert.properties(),
                )
                .await;
        }

        Ok(PipelineAlerts { alerts })
    }

    /// Recalculate matchmaking scores for the given scope.
    ///
    /// The tenant-wide Cartesian fanout is refused outside the scheduler;
    /// it is the one operation that may also run without a tenant
    /// (administrative recalculation across tenants).
    pub async fn recalculate_matches(
        &self,
        tenant: Option<&TenantContext>,
        scope: RecalcScope,
        origin: RecalcOrigin,
    ) -> Result<RecalcSummary, DataError> {
        let mut recalculated = 0u64;

        match scope {
            RecalcScope::Pair {
                advertiser_id,
                podcast_id,
            } => {
                let tenant = require_tenant(tenant, scope)?;
                self.engine
                    .score_and_store(tenant, advertiser_id, podcast_id)
                    .await?;
                recalculated += 1;
            }
            RecalcScope::Advertiser(advertiser_id) => {
                let tenant = require_tenant(tenant, scope)?;
                for podcast_id in self.engine.list_podcast_ids(tenant).await? {
                    self.engine
                        .score_and_store(tenant, advertiser_id, podcast_id)
                        .await?;
                    recalculated += 1;
                }
            }
            RecalcScope::Podcast(podcast_id) => {
                let tenant = require_tenant(tenant, scope)?;
                for advertiser_id in self.engine.list_advertiser_ids(tenant).await? {
                    self.engine
                        .score_and_store(tenant, advertiser_id, podcast_id)
                        .await?;
                    recalculated += 1;
                }
            }
            RecalcScope::TenantWide => {
                if origin == RecalcOrigin::Api {
                    return Err(DataError::validation(
                        "tenant-wide match recalculation must run under the scheduler",
                    ));
                }
                for (tenant_id, advertiser_id, podcast_id) in
                    self.engine.list_pairs(tenant).await?
                {
                    let pair_tenant = TenantContext::new(tenant_id);
                    self.engine
                        .score_and_store(&pair_tenant, advertiser_id, podcast_id)
                        .await?;
                    recalculated += 1;
                }
            }
        }

        tracing::info!(
            scope = scope.as_str(),
            recalculated,
            "Matchmaking recalculation finished"
        );

        Ok(RecalcSummary {
            scope: scope.as_str(),
            matches_recalculated: recalculated,
        })
    }

    /// Run ETL health, metrics refresh, and pipeline alerts sequentially.
    ///
    /// Matchmaking recalculation is excluded; its fanout is scheduled
    /// separately. Concurrent invocations on the same instance short-circuit
    /// with a warning and return None.
    pub async fn run_all(
        &self,
        tenant: Option<&TenantContext>,
    ) -> Result<Option<AutomationRunSummary>, DataError> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Automation jobs already running");
            return Ok(None);
        }
        let _guard = RunningGuard(&self.running);

        tracing::info!("Running scheduled automation jobs");

        let etl_health = self.check_etl_health(tenant).await?;
        tracing::info!(status = %etl_health.status, "ETL health check");

        let metrics_refreshed_at = self.refresh_metrics_daily().await?;
        tracing::info!("Metrics daily refresh completed");

        let pipeline_alerts = self.check_deal_pipeline_alerts(tenant).await?;
        tracing::info!(alert_count = pipeline_alerts.alerts.len(), "Pipeline alerts");

        Ok(Some(AutomationRunSummary {
            etl_health,
            metrics_refreshed_at,
            pipeline_alert_count: pipeline_alerts.alerts.len(),
        }))
    }
}

fn require_tenant<'a>(
    tenant: Option<&'a TenantContext>,
    scope: RecalcScope,
) -> Result<&'a TenantContext, DataError> {
    tenant.ok_or_else(|| {
        DataError::validation(format!(
            "{} match recalculation requires a tenant",
            scope.as_str()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TimescaleService;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

    fn lazy_router() -> Arc<ReadReplicaRouter> {
        let options: PgConnectOptions = "postgres://localhost:1/none".parse().unwrap();
        let pool = PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_millis(10))
            .connect_lazy_with(options);
        Arc::new(ReadReplicaRouter::new(pool, None))
    }

    fn automation() -> AutomationJobs {
        let db = lazy_router();
        let metrics = Arc::new(MetricsCollector::new());
        let events = Arc::new(EventLogger::new(db.clone(), metrics.clone()));
        let timescale = Arc::new(TimescaleService::from_router_for_test(lazy_router()));
        let engine = Arc::new(MatchEngine::new(db.clone(), timescale, metrics.clone()));
        AutomationJobs::new(db, metrics, events, engine)
    }

    fn hours_ago(hours: i64) -> DateTime<Utc> {
        Utc::now() - Duration::hours(hours)
    }

    #[test]
    fn test_etl_classification_boundaries() {
        let now = Utc::now();
        // Last success 3h ago: healthy
        assert_eq!(
            classify_etl_health(Some(hours_ago(3)), now),
            EtlHealthStatus::Healthy
        );
        // 8h ago: degraded
        assert_eq!(
            classify_etl_health(Some(hours_ago(8)), now),
            EtlHealthStatus::Degraded
        );
        // 30h ago: unhealthy
        assert_eq!(
            classify_etl_health(Some(hours_ago(30)), now),
            EtlHealthStatus::Unhealthy
        );
        // Never succeeded: unhealthy
        assert_eq!(classify_etl_health(None, now), EtlHealthStatus::Unhealthy);
    }

    #[test]
    fn test_etl_gauge_values() {
        assert_eq!(EtlHealthStatus::Healthy.gauge_value(), 1.0);
        assert_eq!(EtlHealthStatus::Degraded.gauge_value(), 0.5);
        assert_eq!(EtlHealthStatus::Unhealthy.gauge_value(), 0.0);
    }

    #[test]
    fn test_pipeline_alert_properties() {
        let alert = PipelineAlert::StuckDeals(vec![StuckDeal {
            campaign_id: Uuid::nil(),
            campaign_name: "Q3 sponsorship".into(),
            stage: "proposal".into(),
            days_in_stage: 12,
            campaign_value: 5000.0,
        }]);

        assert_eq!(alert.kind(), "stuck_deals");
        assert_eq!(alert.count(), 1);
        let props = alert.properties();
        assert_eq!(props["type"], "stuck_deals");
        assert_eq!(props["count"], 1);
    }

    #[tokio::test]
    async fn test_tenant_wide_recalc_refused_from_api() {
        let jobs = automation();
        let tenant = TenantContext::new(Uuid::new_v4());

        let result = jobs
            .recalculate_matches(Some(&tenant), RecalcScope::TenantWide, RecalcOrigin::Api)
            .await;
        assert!(matches!(result, Err(DataError::Validation(_))));
    }

    #[tokio::test]
    async fn test_scoped_recalc_requires_tenant() {
        let jobs = automation();
        let scope = RecalcScope::Advertiser(Uuid::new_v4());

        let result = jobs
            .recalculate_matches(None, scope, RecalcOrigin::Api)
            .await;
        assert!(matches!(result, Err(DataError::Validation(_))));
    }

    #[tokio::test]
    async fn test_run_all_short_circuits_when_already_running() {
        let jobs = automation();
        jobs.running.store(true, Ordering::SeqCst);

        let result = jobs.run_all(None).await.unwrap();
        assert!(result.is_none());
        // The guard belongs to the running invocation; the flag stays set
        assert!(jobs.running.load(Ordering::SeqCst));
    }
}
