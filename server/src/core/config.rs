//! Environment-driven application configuration
//!
//! All configuration is read from the environment (optionally seeded from an
//! env file by the CLI). Validation failures surface as [`ConfigError`] and
//! map to exit code 2.

use std::env;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::constants::{
    DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_MAX_CONCURRENT_JOBS, DEFAULT_RETENTION_DAYS,
    POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS, POSTGRES_DEFAULT_DB, POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS,
    POSTGRES_DEFAULT_MAX_CONNECTIONS, POSTGRES_DEFAULT_MAX_LIFETIME_SECS,
    POSTGRES_DEFAULT_MIN_CONNECTIONS, POSTGRES_DEFAULT_PORT,
    POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS, REDIS_DEFAULT_PORT, RESOURCE_BUDGET_CPU,
    RESOURCE_BUDGET_MEMORY_MB,
};

/// Configuration error (exit code 2 at startup)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

// =============================================================================
// Cache Backend Enum
// =============================================================================

/// Cache backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheBackendType {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for CacheBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheBackendType::Memory => write!(f, "memory"),
            CacheBackendType::Redis => write!(f, "redis"),
        }
    }
}

// =============================================================================
// Listener Count Mode
// =============================================================================

/// How `campaign_performance` counts distinct listeners.
///
/// `Legacy` counts distinct metric values (parity with the historical
/// behavior); `DeviceIdentity` counts distinct device identifiers and is the
/// corrected semantic, opt-in via `ADCAST_LISTENER_COUNT_MODE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListenerCountMode {
    #[default]
    Legacy,
    DeviceIdentity,
}

impl FromStr for ListenerCountMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" => Ok(Self::Legacy),
            "device_identity" => Ok(Self::DeviceIdentity),
            other => Err(other.to_string()),
        }
    }
}

// =============================================================================
// PostgreSQL
// =============================================================================

/// Connection settings for one PostgreSQL endpoint
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub statement_timeout_secs: u64,
}

impl PostgresConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_or("POSTGRES_HOST", "localhost"),
            port: env_parse("POSTGRES_PORT", POSTGRES_DEFAULT_PORT)?,
            database: env_or("POSTGRES_DB", POSTGRES_DEFAULT_DB),
            user: env_or("POSTGRES_USER", "postgres"),
            password: env_or("POSTGRES_PASSWORD", ""),
            min_connections: env_parse("POSTGRES_MIN_CONNECTIONS", POSTGRES_DEFAULT_MIN_CONNECTIONS)?,
            max_connections: env_parse("POSTGRES_MAX_CONNECTIONS", POSTGRES_DEFAULT_MAX_CONNECTIONS)?,
            acquire_timeout_secs: POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS,
            idle_timeout_secs: POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS,
            max_lifetime_secs: POSTGRES_DEFAULT_MAX_LIFETIME_SECS,
            statement_timeout_secs: env_parse(
                "POSTGRES_STATEMENT_TIMEOUT_SECS",
                POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS,
            )?,
        })
    }

    /// Same endpoint with a different host (read replica)
    fn with_host(&self, host: String) -> Self {
        Self {
            host,
            ..self.clone()
        }
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Cache configuration; the Redis backend is selected when REDIS_HOST is set
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackendType,
    pub max_entries: u64,
    pub redis_url: Option<String>,
}

fn redis_url(host: &str, port: u16, password: Option<&str>) -> String {
    match password {
        Some(password) if !password.is_empty() => {
            format!("redis://:{}@{}:{}", password, host, port)
        }
        _ => format!("redis://{}:{}", host, port),
    }
}

// =============================================================================
// Feature gates
// =============================================================================

/// Feature gates mirrored from the deployment environment.
///
/// The HTTP collaborator uses these to hide routes; the core uses them to
/// decide which automation jobs are registered and whether the scheduler
/// loop starts at all.
#[derive(Debug, Clone, Copy)]
pub struct FeatureGates {
    pub matchmaking: bool,
    pub io_bookings: bool,
    pub deal_pipeline: bool,
    pub automation_jobs: bool,
    pub monetization: bool,
    pub orchestration: bool,
}

// =============================================================================
// Scheduler
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub max_concurrent_jobs: u32,
    pub budget_cpu: u32,
    pub budget_memory_mb: u32,
}

// =============================================================================
// Analytics
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct AnalyticsConfig {
    pub listener_count_mode: ListenerCountMode,
    pub retention_days: u32,
}

// =============================================================================
// AppConfig
// =============================================================================

/// Fully-resolved application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub postgres: PostgresConfig,
    /// Read replica endpoint; None disables replica routing
    pub replica: Option<PostgresConfig>,
    /// Time-series store endpoint; defaults to the primary (colocated)
    pub timescale: PostgresConfig,
    pub cache: CacheConfig,
    pub features: FeatureGates,
    pub scheduler: SchedulerConfig,
    pub analytics: AnalyticsConfig,
    /// Session token secret; consumed by the HTTP edge, not the core
    pub jwt_secret: Option<String>,
    /// Template base for tracking URL generation at the edge
    pub vanity_url_base: Option<String>,
}

impl AppConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self, ConfigError> {
        let postgres = PostgresConfig::from_env()?;

        let replica = env_opt("POSTGRES_READ_REPLICA_HOST").map(|host| postgres.with_host(host));

        // Time-series store falls back to the primary endpoint when no
        // dedicated TimescaleDB host is configured.
        let timescale = match env_opt("TIMESCALE_HOST") {
            Some(host) => {
                let mut ts = postgres.with_host(host);
                ts.port = env_parse("TIMESCALE_PORT", postgres.port)?;
                if let Some(db) = env_opt("TIMESCALE_DB") {
                    ts.database = db;
                }
                ts
            }
            None => postgres.clone(),
        };

        let redis_host = env_opt("REDIS_HOST");
        let cache = CacheConfig {
            backend: if redis_host.is_some() {
                CacheBackendType::Redis
            } else {
                CacheBackendType::Memory
            },
            max_entries: env_parse("ADCAST_CACHE_MAX_ENTRIES", DEFAULT_CACHE_MAX_ENTRIES)?,
            redis_url: match redis_host {
                Some(host) => {
                    let port = env_parse("REDIS_PORT", REDIS_DEFAULT_PORT)?;
                    let password = env_opt("REDIS_PASSWORD");
                    Some(redis_url(&host, port, password.as_deref()))
                }
                None => None,
            },
        };

        let features = FeatureGates {
            matchmaking: env_bool("ENABLE_MATCHMAKING", true)?,
            io_bookings: env_bool("ENABLE_IO_BOOKINGS", false)?,
            deal_pipeline: env_bool("ENABLE_DEAL_PIPELINE", true)?,
            automation_jobs: env_bool("ENABLE_AUTOMATION_JOBS", true)?,
            monetization: env_bool("ENABLE_MONETIZATION", false)?,
            orchestration: env_bool("ENABLE_ORCHESTRATION", false)?,
        };

        let scheduler = SchedulerConfig {
            max_concurrent_jobs: env_parse("ADCAST_MAX_CONCURRENT_JOBS", DEFAULT_MAX_CONCURRENT_JOBS)?,
            budget_cpu: RESOURCE_BUDGET_CPU,
            budget_memory_mb: RESOURCE_BUDGET_MEMORY_MB,
        };

        let analytics = AnalyticsConfig {
            listener_count_mode: match env_opt("ADCAST_LISTENER_COUNT_MODE") {
                Some(raw) => raw.parse().map_err(|value| ConfigError::Invalid {
                    name: "ADCAST_LISTENER_COUNT_MODE",
                    value,
                })?,
                None => ListenerCountMode::default(),
            },
            retention_days: env_parse("ADCAST_RETENTION_DAYS", DEFAULT_RETENTION_DAYS)?,
        };

        Ok(Self {
            postgres,
            replica,
            timescale,
            cache,
            features,
            scheduler,
            analytics,
            jwt_secret: env_opt("JWT_SECRET"),
            vanity_url_base: env_opt("VANITY_URL_BASE"),
        })
    }
}

// =============================================================================
// Env helpers
// =============================================================================

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_parse<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
{
    match env_opt(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        None => Ok(default),
    }
}

fn env_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env_opt(name) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { name, value: raw }),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_count_mode_parsing() {
        assert_eq!(
            "legacy".parse::<ListenerCountMode>().unwrap(),
            ListenerCountMode::Legacy
        );
        assert_eq!(
            "DEVICE_IDENTITY".parse::<ListenerCountMode>().unwrap(),
            ListenerCountMode::DeviceIdentity
        );
        assert!("ml".parse::<ListenerCountMode>().is_err());
    }

    #[test]
    fn test_redis_url_with_password() {
        assert_eq!(
            redis_url("cache.internal", 6380, Some("s3cret")),
            "redis://:s3cret@cache.internal:6380"
        );
    }

    #[test]
    fn test_redis_url_without_password() {
        assert_eq!(redis_url("localhost", 6379, None), "redis://localhost:6379");
        assert_eq!(
            redis_url("localhost", 6379, Some("")),
            "redis://localhost:6379"
        );
    }

    #[test]
    fn test_cache_backend_display() {
        assert_eq!(CacheBackendType::Memory.to_string(), "memory");
        assert_eq!(CacheBackendType::Redis.to_string(), "redis");
    }
}
