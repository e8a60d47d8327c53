//! Scheduler handlers and registration for the automation jobs
//!
//! Each handler adapts one [`AutomationJobs`] operation to the scheduler's
//! [`JobHandler`] contract: tenant comes from the execution context (absent
//! for cron-fired runs, which operate across tenants), parameters from the
//! enqueue call, and results are serialized onto the execution record.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::{AutomationJobs, RecalcOrigin, RecalcScope};
use crate::core::config::FeatureGates;
use crate::data::DataError;
use crate::orchestration::{
    JobContext, JobHandler, JobPriority, ResourceRequirements, ScheduledJob, SmartScheduler,
    TaskDefinition,
};

pub struct EtlHealthHandler {
    pub jobs: Arc<AutomationJobs>,
}

#[async_trait]
impl JobHandler for EtlHealthHandler {
    async fn run(&self, ctx: JobContext) -> Result<serde_json::Value, DataError> {
        let report = self.jobs.check_etl_health(ctx.tenant.as_ref()).await?;
        Ok(serde_json::to_value(report)?)
    }
}

pub struct RefreshMetricsHandler {
    pub jobs: Arc<AutomationJobs>,
}

#[async_trait]
impl JobHandler for RefreshMetricsHandler {
    async fn run(&self, _ctx: JobContext) -> Result<serde_json::Value, DataError> {
        let refreshed_at = self.jobs.refresh_metrics_daily().await?;
        Ok(serde_json::json!({ "refreshed_at": refreshed_at.to_rfc3339() }))
    }
}

pub struct PipelineAlertsHandler {
    pub jobs: Arc<AutomationJobs>,
}

#[async_trait]
impl JobHandler for PipelineAlertsHandler {
    async fn run(&self, ctx: JobContext) -> Result<serde_json::Value, DataError> {
        let alerts = self.jobs.check_deal_pipeline_alerts(ctx.tenant.as_ref()).await?;
        Ok(serde_json::to_value(alerts)?)
    }
}

pub struct RecalculateMatchesHandler {
    pub jobs: Arc<AutomationJobs>,
}

#[async_trait]
impl JobHandler for RecalculateMatchesHandler {
    async fn run(&self, ctx: JobContext) -> Result<serde_json::Value, DataError> {
        let advertiser_id = param_uuid(&ctx.params, "advertiser_id")?;
        let podcast_id = param_uuid(&ctx.params, "podcast_id")?;

        let scope = match (advertiser_id, podcast_id) {
            (Some(advertiser_id), Some(podcast_id)) => RecalcScope::Pair {
                advertiser_id,
                podcast_id,
            },
            (Some(advertiser_id), None) => RecalcScope::Advertiser(advertiser_id),
            (None, Some(podcast_id)) => RecalcScope::Podcast(podcast_id),
            (None, None) => RecalcScope::TenantWide,
        };

        let summary = self
            .jobs
            .recalculate_matches(ctx.tenant.as_ref(), scope, RecalcOrigin::Scheduler)
            .await?;
        Ok(serde_json::to_value(summary)?)
    }
}

fn param_uuid(params: &serde_json::Value, key: &str) -> Result<Option<Uuid>, DataError> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| DataError::validation(format!("{} is not a valid UUID: {}", key, raw))),
        None => Ok(None),
    }
}

/// Register the automation jobs with the scheduler, honoring feature gates
pub fn register_automation_jobs(
    scheduler: &SmartScheduler,
    jobs: &Arc<AutomationJobs>,
    features: &FeatureGates,
) {
    if features.automation_jobs {
        scheduler.register_job(
            ScheduledJob::new(
                "check_etl_health",
                "ETL health probe",
                "*/30 * * * *",
                Arc::new(EtlHealthHandler { jobs: jobs.clone() }),
            )
            .with_priority(JobPriority::High)
            .with_timeout_seconds(120),
        );

        scheduler.register_job(
            ScheduledJob::new(
                "refresh_metrics_daily",
                "Daily metric view refresh",
                "daily",
                Arc::new(RefreshMetricsHandler { jobs: jobs.clone() }),
            )
            .with_timeout_seconds(600),
        );

        if features.deal_pipeline {
            scheduler.register_job(
                ScheduledJob::new(
                    "check_deal_pipeline_alerts",
                    "Deal pipeline alerts",
                    "daily",
                    Arc::new(PipelineAlertsHandler { jobs: jobs.clone() }),
                )
                .with_timeout_seconds(300),
            );
        }
    }

    if features.matchmaking {
        scheduler.register_job(
            ScheduledJob::new(
                "recalculate_matches",
                "Matchmaking recalculation",
                "daily",
                Arc::new(RecalculateMatchesHandler { jobs: jobs.clone() }),
            )
            .with_priority(JobPriority::Background)
            .with_max_retries(1)
            .with_timeout_seconds(3600)
            .with_resources(ResourceRequirements {
                cpu: 50,
                memory_mb: 2048,
                concurrent_jobs: 1,
            }),
        );
    }
}

/// Task definitions mirrored into `scheduled_tasks` for external runners
pub fn task_definitions() -> Vec<TaskDefinition> {
    vec![
        TaskDefinition {
            task_name: "refresh_metrics_daily",
            task_type: "function",
            schedule_cron: "0 2 * * *",
            enabled: true,
            description: "Refresh metrics_daily materialized view",
        },
        TaskDefinition {
            task_name: "check_etl_health",
            task_type: "function",
            schedule_cron: "*/30 * * * *",
            enabled: true,
            description: "Check ETL import health",
        },
        TaskDefinition {
            task_name: "check_deal_pipeline_alerts",
            task_type: "function",
            schedule_cron: "0 9 * * *",
            enabled: true,
            description: "Check for deal pipeline alerts",
        },
        TaskDefinition {
            task_name: "recalculate_matches",
            task_type: "function",
            schedule_cron: "0 3 * * 0",
            enabled: true,
            description: "Recalculate matchmaking scores",
        },
    ]
}
