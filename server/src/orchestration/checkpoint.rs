//! Scheduler checkpointing to the relational store
//!
//! The scheduler itself is in-memory; `scheduled_tasks` rows exist so
//! operators and external cron runners can see (and re-seed) the automation
//! schedule. Definition upserts happen via the `schedule` CLI command,
//! last-run/next-run markers are written best-effort as jobs fire, and
//! exhausted jobs record a backoff hint for their next reschedule.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::core::constants::RESCHEDULE_BASE_DELAY_SECS;
use crate::data::{DataError, ReadReplicaRouter};

/// A row in `scheduled_tasks`
#[derive(Debug, Clone, Copy)]
pub struct TaskDefinition {
    pub task_name: &'static str,
    pub task_type: &'static str,
    /// Full cron string for external runners (not the reduced grammar)
    pub schedule_cron: &'static str,
    pub enabled: bool,
    pub description: &'static str,
}

/// Delay before a task-store reschedule: 60s doubling per prior failure
pub fn retry_backoff(retry_count: u32) -> Duration {
    let factor = 2u64.saturating_pow(retry_count.min(24));
    Duration::from_secs(RESCHEDULE_BASE_DELAY_SECS.saturating_mul(factor))
}

pub struct SchedulerCheckpoint {
    db: Arc<ReadReplicaRouter>,
}

impl SchedulerCheckpoint {
    pub fn new(db: Arc<ReadReplicaRouter>) -> Self {
        Self { db }
    }

    /// Upsert task definitions, keyed by task_name
    pub async fn ensure_definitions(
        &self,
        definitions: &[TaskDefinition],
    ) -> Result<(), DataError> {
        for definition in definitions {
            self.db
                .execute(
                    sqlx::query(
                        r#"
                        INSERT INTO scheduled_tasks (
                            task_name, task_type, schedule_cron, enabled, description, metadata
                        )
                        VALUES ($1, $2, $3, $4, $5, '{"automation_job": true}'::jsonb)
                        ON CONFLICT (task_name) DO UPDATE
                        SET schedule_cron = EXCLUDED.schedule_cron,
                            enabled = EXCLUDED.enabled,
                            description = EXCLUDED.description
                        "#,
                    )
                    .bind(definition.task_name)
                    .bind(definition.task_type)
                    .bind(definition.schedule_cron)
                    .bind(definition.enabled)
                    .bind(definition.description),
                )
                .await?;

            tracing::info!(
                task_name = definition.task_name,
                schedule = definition.schedule_cron,
                "Scheduled task definition upserted"
            );
        }
        Ok(())
    }

    /// Record a fired run and the recomputed next run time
    pub async fn record_run(
        &self,
        task_name: &str,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), DataError> {
        self.db
            .execute(
                sqlx::query(
                    "UPDATE scheduled_tasks
                     SET metadata = metadata
                         || jsonb_build_object('last_run', $2::text, 'next_run', $3::text)
                     WHERE task_name = $1",
                )
                .bind(task_name)
                .bind(last_run.to_rfc3339())
                .bind(next_run.map(|t| t.to_rfc3339())),
            )
            .await?;
        Ok(())
    }

    /// Record exhausted retries and the backoff hint for the next reschedule
    pub async fn record_failure(
        &self,
        task_name: &str,
        failed_count: u32,
    ) -> Result<(), DataError> {
        let next_retry_at = Utc::now() + retry_backoff(failed_count);
        self.db
            .execute(
                sqlx::query(
                    "UPDATE scheduled_tasks
                     SET metadata = metadata
                         || jsonb_build_object(
                                'failed_count', $2::int,
                                'next_retry_at', $3::text
                            )
                     WHERE task_name = $1",
                )
                .bind(task_name)
                .bind(failed_count as i32)
                .bind(next_retry_at.to_rfc3339()),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_backoff_doubles() {
        assert_eq!(retry_backoff(0), Duration::from_secs(60));
        assert_eq!(retry_backoff(1), Duration::from_secs(120));
        assert_eq!(retry_backoff(2), Duration::from_secs(240));
        assert_eq!(retry_backoff(5), Duration::from_secs(1920));
    }

    #[test]
    fn test_retry_backoff_saturates() {
        // Absurd retry counts never overflow
        let huge = retry_backoff(u32::MAX);
        assert!(huge >= retry_backoff(24));
    }
}
