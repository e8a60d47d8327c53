//! PostgreSQL database service
//!
//! Provides centralized database management for the relational store:
//! - Connection pooling with min/max bounds
//! - Idle connection cleanup and connection lifetime cycling
//! - Statement timeout protection
//! - Schema initialization (idempotent)

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use super::error::DataError;
use crate::core::config::PostgresConfig;

/// Relational schema, applied idempotently at bootstrap.
///
/// The `metrics_daily` materialized view and its `refresh_metrics_daily()`
/// function are owned by the warehouse migrations outside this service; the
/// automation layer only invokes the function.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY,
    version INTEGER NOT NULL,
    applied_at BIGINT NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS sponsors (
    sponsor_id UUID PRIMARY KEY,
    tenant_id UUID NOT NULL,
    name TEXT NOT NULL,
    target_geos TEXT[],
    target_demographics TEXT[],
    categories TEXT[],
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_sponsors_tenant ON sponsors (tenant_id);

CREATE TABLE IF NOT EXISTS podcasts (
    podcast_id UUID PRIMARY KEY,
    tenant_id UUID NOT NULL,
    name TEXT NOT NULL,
    listener_geos TEXT[],
    listener_demographics TEXT[],
    categories TEXT[],
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_podcasts_tenant ON podcasts (tenant_id);

CREATE TABLE IF NOT EXISTS episodes (
    episode_id UUID PRIMARY KEY,
    tenant_id UUID NOT NULL,
    podcast_id UUID NOT NULL,
    title TEXT,
    publish_date TIMESTAMPTZ,
    explicit BOOLEAN NOT NULL DEFAULT FALSE,
    ad_slots JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_episodes_podcast ON episodes (podcast_id, publish_date);

CREATE TABLE IF NOT EXISTS campaigns (
    campaign_id UUID PRIMARY KEY,
    tenant_id UUID NOT NULL,
    podcast_id UUID NOT NULL,
    sponsor_id UUID NOT NULL,
    campaign_name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'draft',
    start_date TIMESTAMPTZ NOT NULL,
    end_date TIMESTAMPTZ NOT NULL,
    campaign_value DOUBLE PRECISION NOT NULL DEFAULT 0,
    attribution_method TEXT NOT NULL DEFAULT 'promo_code',
    promo_code TEXT,
    pixel_url TEXT,
    utm_source TEXT,
    utm_medium TEXT,
    utm_campaign TEXT,
    custom_tracking_id TEXT,
    episode_ids UUID[] NOT NULL DEFAULT '{}',
    stage TEXT,
    stage_changed_at TIMESTAMPTZ,
    notes TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_campaigns_tenant ON campaigns (tenant_id, status);
CREATE INDEX IF NOT EXISTS idx_campaigns_stage ON campaigns (tenant_id, stage, stage_changed_at);

CREATE TABLE IF NOT EXISTS matches (
    match_id UUID PRIMARY KEY,
    tenant_id UUID NOT NULL,
    advertiser_id UUID NOT NULL,
    podcast_id UUID NOT NULL,
    score DOUBLE PRECISION NOT NULL,
    rationale TEXT NOT NULL,
    signals JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (tenant_id, advertiser_id, podcast_id)
);

CREATE TABLE IF NOT EXISTS etl_imports (
    import_id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    tenant_id UUID,
    source TEXT,
    status TEXT NOT NULL,
    started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    completed_at TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS idx_etl_imports_started ON etl_imports (started_at);

CREATE TABLE IF NOT EXISTS events (
    event_id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    event_type TEXT NOT NULL,
    tenant_id UUID,
    user_id UUID,
    properties JSONB NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_events_type_time ON events (event_type, created_at);

CREATE TABLE IF NOT EXISTS scheduled_tasks (
    task_name TEXT PRIMARY KEY,
    task_type TEXT NOT NULL,
    schedule_cron TEXT NOT NULL,
    enabled BOOLEAN NOT NULL DEFAULT TRUE,
    description TEXT,
    metadata JSONB NOT NULL DEFAULT '{}'
);
"#;

const SCHEMA_VERSION: i32 = 1;

/// PostgreSQL database service
///
/// Handles pool initialization and schema bootstrap. Created once at server
/// startup; pools are cheap to clone and shared across all modules.
pub struct PostgresService {
    pool: PgPool,
}

impl PostgresService {
    /// Initialize the database service from configuration
    ///
    /// Creates a connection pool with:
    /// - Min connections kept warm for low latency
    /// - Max connections sized for concurrent load
    /// - Idle timeout to release unused connections
    /// - Max lifetime to cycle connections and prevent stale state
    /// - Statement timeout to prevent runaway queries
    pub async fn init(config: &PostgresConfig) -> Result<Self, DataError> {
        let pool = Self::connect(config).await?;

        run_migrations(&pool).await?;

        tracing::debug!(
            host = %config.host,
            database = %config.database,
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            statement_timeout_secs = config.statement_timeout_secs,
            "PostgresService initialized"
        );
        Ok(Self { pool })
    }

    /// Open a pool without running migrations (read replicas, TimescaleDB)
    pub async fn connect(config: &PostgresConfig) -> Result<PgPool, DataError> {
        if config.host.is_empty() {
            return Err(DataError::Config("PostgreSQL host is required".into()));
        }

        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user);

        if !config.password.is_empty() {
            options = options.password(&config.password);
        }

        if config.statement_timeout_secs > 0 {
            options = options.options([(
                "statement_timeout",
                format!("{}s", config.statement_timeout_secs),
            )]);
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .connect_with(options)
            .await
            .map_err(|e| DataError::transport(format!("PostgreSQL connect failed: {}", e)))?;

        Ok(pool)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the connection pool gracefully
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("PostgreSQL pool closed");
    }
}

/// Apply the relational schema idempotently and record the version
async fn run_migrations(pool: &PgPool) -> Result<(), DataError> {
    let current_version: Option<i32> = sqlx::query_scalar(
        r#"
        SELECT version FROM schema_version WHERE id = 1
        "#,
    )
    .fetch_optional(pool)
    .await
    .ok()
    .flatten();

    if current_version == Some(SCHEMA_VERSION) {
        tracing::debug!("PostgreSQL schema is up to date (v{})", SCHEMA_VERSION);
        return Ok(());
    }

    tracing::debug!("Applying PostgreSQL schema v{}", SCHEMA_VERSION);
    sqlx::raw_sql(SCHEMA).execute(pool).await?;

    sqlx::query(
        "INSERT INTO schema_version (id, version, applied_at, description)
         VALUES (1, $1, $2, 'Initial schema')
         ON CONFLICT (id) DO UPDATE SET version = $1, applied_at = $2",
    )
    .bind(SCHEMA_VERSION)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;

    tracing::debug!("PostgreSQL schema v{} applied", SCHEMA_VERSION);
    Ok(())
}
