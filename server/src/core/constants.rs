//! Application-wide constants and tuning defaults

/// Application name used in logging filters
pub const APP_NAME_LOWER: &str = "adcast";

/// Environment variable for the log filter (falls back to RUST_LOG)
pub const ENV_LOG: &str = "ADCAST_LOG";

// =============================================================================
// PostgreSQL pool defaults
// =============================================================================

pub const POSTGRES_DEFAULT_PORT: u16 = 5432;
pub const POSTGRES_DEFAULT_DB: &str = "adcast";
pub const POSTGRES_DEFAULT_MIN_CONNECTIONS: u32 = 5;
pub const POSTGRES_DEFAULT_MAX_CONNECTIONS: u32 = 20;
pub const POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;
pub const POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
pub const POSTGRES_DEFAULT_MAX_LIFETIME_SECS: u64 = 1800;
pub const POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 30;

/// Interval between replica/primary health probes
pub const DB_HEALTH_CHECK_INTERVAL_SECS: u64 = 60;

// =============================================================================
// Cache
// =============================================================================

/// Version prefix on every cache key; bump to invalidate all cached data
pub const CACHE_KEY_VERSION: &str = "v1";

pub const REDIS_DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_CACHE_MAX_ENTRIES: u64 = 10_000;

/// TTL for cached campaign rows
pub const CAMPAIGN_CACHE_TTL_SECS: u64 = 300;

// =============================================================================
// Time-series store
// =============================================================================

/// Default retention for listener metrics
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

// =============================================================================
// Attribution ingestion
// =============================================================================

pub const INGEST_MAX_ATTEMPTS: u32 = 3;
pub const INGEST_BASE_DELAY_MS: u64 = 100;

// =============================================================================
// Scheduler
// =============================================================================

pub const DEFAULT_MAX_CONCURRENT_JOBS: u32 = 10;
pub const SCHEDULER_IDLE_SLEEP_SECS: u64 = 1;
pub const SCHEDULER_ERROR_SLEEP_SECS: u64 = 5;

/// Fixed resource budget the scheduler allocates from
pub const RESOURCE_BUDGET_CPU: u32 = 100;
pub const RESOURCE_BUDGET_MEMORY_MB: u32 = 8192;

/// Base delay for task-store reschedules (doubles per retry)
pub const RESCHEDULE_BASE_DELAY_SECS: u64 = 60;

// =============================================================================
// Automation thresholds
// =============================================================================

/// Last successful import younger than this is healthy
pub const ETL_HEALTHY_HOURS: i64 = 6;
/// Last successful import younger than this (but not healthy) is degraded
pub const ETL_DEGRADED_HOURS: i64 = 24;

/// Deals sitting in a non-terminal stage longer than this are stuck
pub const PIPELINE_STUCK_DAYS: i64 = 7;
/// Negotiations older than this are flagged
pub const PIPELINE_NEGOTIATION_DAYS: i64 = 14;

// =============================================================================
// Shutdown
// =============================================================================

pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;
