//! TimescaleDB time-series service
//!
//! Owns the time-series side of the store: the `listener_metrics` hypertable,
//! its hourly continuous aggregate, and the retention policy. Attribution
//! events are colocated in the same database but stay a plain table: their
//! upsert key is `event_id` alone, which a hypertable's partitioning rules
//! would not allow.
//!
//! Bootstrap is `IF NOT EXISTS`-style throughout; "already exists" failures
//! mid-statement are treated as success.

use std::sync::Arc;

use sqlx::PgPool;

use super::error::DataError;
use super::postgres::PostgresService;
use super::replica::ReadReplicaRouter;
use crate::core::config::PostgresConfig;

const LISTENER_METRICS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS listener_metrics (
    timestamp TIMESTAMPTZ NOT NULL,
    tenant_id UUID NOT NULL,
    podcast_id UUID NOT NULL,
    episode_id UUID,
    metric_type TEXT NOT NULL,
    value DOUBLE PRECISION NOT NULL,
    platform TEXT,
    country TEXT,
    device TEXT
);
CREATE INDEX IF NOT EXISTS idx_listener_metrics_lookup
    ON listener_metrics (tenant_id, podcast_id, metric_type, timestamp);
"#;

const ATTRIBUTION_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS attribution_events (
    event_id UUID PRIMARY KEY,
    tenant_id UUID NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL,
    campaign_id UUID NOT NULL,
    podcast_id UUID NOT NULL,
    episode_id UUID,
    attribution_method TEXT NOT NULL,
    conversion_type TEXT,
    conversion_value DOUBLE PRECISION,
    user_id TEXT,
    session_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_attribution_events_campaign
    ON attribution_events (tenant_id, campaign_id, timestamp DESC);
"#;

const HOURLY_AGGREGATE: &str = r#"
CREATE MATERIALIZED VIEW IF NOT EXISTS listener_metrics_hourly
WITH (timescaledb.continuous) AS
SELECT
    time_bucket('1 hour', timestamp) AS bucket,
    tenant_id,
    podcast_id,
    metric_type,
    SUM(value) AS value_sum,
    COUNT(*) AS sample_count
FROM listener_metrics
GROUP BY bucket, tenant_id, podcast_id, metric_type
WITH NO DATA
"#;

/// Time-series database service
pub struct TimescaleService {
    router: Arc<ReadReplicaRouter>,
    retention_days: u32,
}

impl TimescaleService {
    pub async fn init(config: &PostgresConfig, retention_days: u32) -> Result<Self, DataError> {
        let pool = PostgresService::connect(config).await?;
        let service = Self {
            router: Arc::new(ReadReplicaRouter::new(pool, None)),
            retention_days,
        };
        service.bootstrap().await?;
        tracing::debug!(
            host = %config.host,
            database = %config.database,
            retention_days,
            "TimescaleService initialized"
        );
        Ok(service)
    }

    /// Query routing surface for the time-series store
    pub fn router(&self) -> &Arc<ReadReplicaRouter> {
        &self.router
    }

    #[cfg(test)]
    pub(crate) fn from_router_for_test(router: Arc<ReadReplicaRouter>) -> Self {
        Self {
            router,
            retention_days: 90,
        }
    }

    pub fn pool(&self) -> &PgPool {
        self.router.primary()
    }

    /// Ensure tables, hypertable, continuous aggregate, and retention policy
    /// exist. Idempotent: re-running against a bootstrapped database is a
    /// no-op.
    pub async fn bootstrap(&self) -> Result<(), DataError> {
        let pool = self.pool();

        sqlx::raw_sql(LISTENER_METRICS_TABLE).execute(pool).await?;
        sqlx::raw_sql(ATTRIBUTION_EVENTS_TABLE).execute(pool).await?;

        // The extension may be missing in development databases; hypertable
        // management degrades to plain tables in that case.
        if let Err(e) = sqlx::query("CREATE EXTENSION IF NOT EXISTS timescaledb")
            .execute(pool)
            .await
        {
            tracing::debug!(error = %e, "Could not ensure timescaledb extension");
        }

        self.tolerant(
            sqlx::query(
                "SELECT create_hypertable('listener_metrics', 'timestamp', \
                 if_not_exists => TRUE, migrate_data => TRUE)",
            )
            .execute(pool)
            .await,
            "create_hypertable(listener_metrics)",
        )?;

        self.tolerant(
            sqlx::raw_sql(HOURLY_AGGREGATE).execute(pool).await,
            "continuous aggregate listener_metrics_hourly",
        )?;

        self.tolerant(
            sqlx::query(
                "SELECT add_continuous_aggregate_policy('listener_metrics_hourly', \
                 start_offset => INTERVAL '3 hours', \
                 end_offset => INTERVAL '1 minute', \
                 schedule_interval => INTERVAL '1 hour', \
                 if_not_exists => TRUE)",
            )
            .execute(pool)
            .await,
            "continuous aggregate policy",
        )?;

        let retention = format!(
            "SELECT add_retention_policy('listener_metrics', INTERVAL '{} days', \
             if_not_exists => TRUE)",
            self.retention_days
        );
        self.tolerant(
            sqlx::query(&retention).execute(pool).await,
            "retention policy",
        )?;

        Ok(())
    }

    /// Treat "already exists" and "extension missing" outcomes as success
    fn tolerant<T>(
        &self,
        result: Result<T, sqlx::Error>,
        context: &'static str,
    ) -> Result<(), DataError> {
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("already exists")
                    || msg.contains("already a hypertable")
                    || msg.contains("does not exist")
                {
                    tracing::debug!(context, error = %msg, "Skipping time-series bootstrap step");
                    Ok(())
                } else {
                    Err(e.into())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // TimescaleDB bootstrap requires a running database instance and is
    // exercised by integration environments
}
