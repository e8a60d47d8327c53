//! Read-replica query routing
//!
//! Routes read statements to the replica when one is configured and healthy,
//! and everything else to the primary. Detection is by statement shape
//! (`SELECT`/`WITH`), with an explicit per-call override for callers that
//! know better. Writes always go to the primary; a replica that fails its
//! health probe is transparently bypassed until it recovers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::{Query, QueryScalar};
use sqlx::{Execute, PgPool, Postgres, Transaction};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::error::DataError;
use crate::core::constants::DB_HEALTH_CHECK_INTERVAL_SECS;

/// Determine if a statement is a read operation
fn is_read_query(sql: &str) -> bool {
    let head = sql.trim_start();
    let upper = head
        .get(..head.len().min(8))
        .unwrap_or("")
        .to_ascii_uppercase();
    upper.starts_with("SELECT") || upper.starts_with("WITH")
}

/// Primary/replica pool pair with health-aware routing
pub struct ReadReplicaRouter {
    primary: PgPool,
    replica: Option<PgPool>,
    replica_healthy: AtomicBool,
}

impl ReadReplicaRouter {
    pub fn new(primary: PgPool, replica: Option<PgPool>) -> Self {
        let has_replica = replica.is_some();
        Self {
            primary,
            replica,
            replica_healthy: AtomicBool::new(has_replica),
        }
    }

    pub fn primary(&self) -> &PgPool {
        &self.primary
    }

    pub fn replica_available(&self) -> bool {
        self.replica.is_some() && self.replica_healthy.load(Ordering::Relaxed)
    }

    /// Pick the pool for a statement.
    ///
    /// `use_read_replica`: `Some(false)` forces the primary, everything else
    /// is auto-detected. Only read statements are ever routed to the replica.
    pub fn route(&self, sql: &str, use_read_replica: Option<bool>) -> &PgPool {
        let want_replica = is_read_query(sql) && use_read_replica.unwrap_or(true);
        if want_replica && self.replica_available() {
            self.replica.as_ref().unwrap_or(&self.primary)
        } else {
            &self.primary
        }
    }

    // =========================================================================
    // Query surface
    // =========================================================================

    /// Execute a statement on the primary, returning the affected row count
    pub async fn execute(
        &self,
        query: Query<'_, Postgres, PgArguments>,
    ) -> Result<u64, DataError> {
        let result = query.execute(&self.primary).await?;
        Ok(result.rows_affected())
    }

    /// Fetch exactly one row, routing reads to the replica when allowed
    pub async fn fetch_one(
        &self,
        query: Query<'_, Postgres, PgArguments>,
        use_read_replica: Option<bool>,
    ) -> Result<PgRow, DataError> {
        let sql = query.sql();
        let pool = self.route(sql, use_read_replica);
        Ok(query.fetch_one(pool).await?)
    }

    /// Fetch at most one row
    pub async fn fetch_optional(
        &self,
        query: Query<'_, Postgres, PgArguments>,
        use_read_replica: Option<bool>,
    ) -> Result<Option<PgRow>, DataError> {
        let sql = query.sql();
        let pool = self.route(sql, use_read_replica);
        Ok(query.fetch_optional(pool).await?)
    }

    /// Fetch all rows
    pub async fn fetch_many(
        &self,
        query: Query<'_, Postgres, PgArguments>,
        use_read_replica: Option<bool>,
    ) -> Result<Vec<PgRow>, DataError> {
        let sql = query.sql();
        let pool = self.route(sql, use_read_replica);
        Ok(query.fetch_all(pool).await?)
    }

    /// Fetch a single scalar value
    pub async fn fetch_scalar<T>(
        &self,
        query: QueryScalar<'_, Postgres, T, PgArguments>,
        use_read_replica: Option<bool>,
    ) -> Result<T, DataError>
    where
        T: Send + Unpin,
        (T,): Send + Unpin + for<'r> sqlx::FromRow<'r, PgRow>,
    {
        let sql = query.sql();
        let pool = self.route(sql, use_read_replica);
        Ok(query.fetch_one(pool).await?)
    }

    /// Begin a transaction on the primary
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, DataError> {
        Ok(self.primary.begin().await?)
    }

    // =========================================================================
    // Health
    // =========================================================================

    /// Probe both endpoints, updating replica routing eligibility
    pub async fn health_check(&self) -> (bool, Option<bool>) {
        let primary_ok = sqlx::query("SELECT 1").execute(&self.primary).await.is_ok();

        let replica_ok = match &self.replica {
            Some(replica) => {
                let ok = sqlx::query("SELECT 1").execute(replica).await.is_ok();
                let was = self.replica_healthy.swap(ok, Ordering::Relaxed);
                if was != ok {
                    if ok {
                        tracing::info!("Read replica recovered; resuming replica routing");
                    } else {
                        tracing::warn!("Read replica unhealthy; routing all reads to primary");
                    }
                }
                Some(ok)
            }
            None => None,
        };

        (primary_ok, replica_ok)
    }

    /// Start a background health probe under the shutdown signal
    pub fn start_health_check_task(
        self: &std::sync::Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let router = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(DB_HEALTH_CHECK_INTERVAL_SECS));
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("Database health check task shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let (primary_ok, _) = router.health_check().await;
                        if !primary_ok {
                            tracing::warn!("PostgreSQL primary health check failed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lazy_pool(name: &str) -> PgPool {
        PgPool::connect_lazy(&format!("postgres://localhost:1/{}", name)).unwrap()
    }

    #[test]
    fn test_is_read_query() {
        assert!(is_read_query("SELECT 1"));
        assert!(is_read_query("  select * from campaigns"));
        assert!(is_read_query("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(!is_read_query("INSERT INTO events VALUES (1)"));
        assert!(!is_read_query("UPDATE campaigns SET stage = 'won'"));
        assert!(!is_read_query("DELETE FROM matches"));
    }

    #[tokio::test]
    async fn test_route_without_replica_always_primary() {
        let router = ReadReplicaRouter::new(lazy_pool("primary"), None);
        assert!(std::ptr::eq(
            router.route("SELECT 1", Some(true)),
            router.primary()
        ));
        assert!(!router.replica_available());
    }

    #[tokio::test]
    async fn test_route_reads_to_replica() {
        let router = ReadReplicaRouter::new(lazy_pool("primary"), Some(lazy_pool("replica")));
        assert!(!std::ptr::eq(
            router.route("SELECT 1", None),
            router.primary()
        ));
    }

    #[tokio::test]
    async fn test_writes_always_primary() {
        let router = ReadReplicaRouter::new(lazy_pool("primary"), Some(lazy_pool("replica")));
        assert!(std::ptr::eq(
            router.route("INSERT INTO events VALUES (1)", Some(true)),
            router.primary()
        ));
    }

    #[tokio::test]
    async fn test_explicit_primary_override() {
        let router = ReadReplicaRouter::new(lazy_pool("primary"), Some(lazy_pool("replica")));
        assert!(std::ptr::eq(
            router.route("SELECT 1", Some(false)),
            router.primary()
        ));
    }

    #[tokio::test]
    async fn test_unhealthy_replica_falls_back() {
        let router = ReadReplicaRouter::new(lazy_pool("primary"), Some(lazy_pool("replica")));
        router.replica_healthy.store(false, Ordering::Relaxed);
        assert!(std::ptr::eq(
            router.route("SELECT 1", None),
            router.primary()
        ));
    }
}
