//! Structured event logging
//!
//! Appends significant domain events (alerts, job completions, refreshes) to
//! the `events` table. Writes go to the primary and are retried on transient
//! errors, giving at-least-once append; an event that still cannot be written
//! is logged and counted, never propagated to the caller.

use std::sync::Arc;

use uuid::Uuid;

use crate::data::{DataError, ReadReplicaRouter};
use crate::telemetry::MetricsCollector;
use crate::utils::retry::retry_with_backoff;

const EVENT_MAX_ATTEMPTS: u32 = 3;
const EVENT_BASE_DELAY_MS: u64 = 100;

pub struct EventLogger {
    db: Arc<ReadReplicaRouter>,
    metrics: Arc<MetricsCollector>,
}

impl EventLogger {
    pub fn new(db: Arc<ReadReplicaRouter>, metrics: Arc<MetricsCollector>) -> Self {
        Self { db, metrics }
    }

    /// Append one event row
    pub async fn log_event(
        &self,
        event_type: &str,
        tenant_id: Option<Uuid>,
        user_id: Option<Uuid>,
        properties: serde_json::Value,
    ) {
        let db = &self.db;
        let result = retry_with_backoff(
            EVENT_MAX_ATTEMPTS,
            EVENT_BASE_DELAY_MS,
            |e: &DataError| e.is_transient(),
            || {
                let properties = &properties;
                async move {
                    db.execute(
                        sqlx::query(
                            "INSERT INTO events (event_type, tenant_id, user_id, properties)
                             VALUES ($1, $2, $3, $4)",
                        )
                        .bind(event_type)
                        .bind(tenant_id)
                        .bind(user_id)
                        .bind(properties),
                    )
                    .await
                    .map(|_| ())
                }
            },
        )
        .await;

        match result {
            Ok(()) => {
                self.metrics
                    .increment_counter("events_logged", &[("event_type", event_type)]);
            }
            Err((e, attempts)) => {
                tracing::warn!(
                    event_type,
                    error = %e,
                    attempts,
                    "Dropping event after failed append"
                );
                self.metrics
                    .increment_counter("events_dropped", &[("event_type", event_type)]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

    #[tokio::test]
    async fn test_unreachable_store_drops_event_and_counts() {
        let options: PgConnectOptions = "postgres://localhost:1/none".parse().unwrap();
        let pool = PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_millis(100))
            .connect_lazy_with(options);
        let metrics = Arc::new(MetricsCollector::new());
        let logger = EventLogger::new(
            Arc::new(ReadReplicaRouter::new(pool, None)),
            metrics.clone(),
        );

        logger
            .log_event("etl.health_alert", None, None, serde_json::json!({}))
            .await;

        assert_eq!(
            metrics.counter_value("events_dropped", &[("event_type", "etl.health_alert")]),
            1
        );
        assert_eq!(
            metrics.counter_value("events_logged", &[("event_type", "etl.health_alert")]),
            0
        );
    }
}
