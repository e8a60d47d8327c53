//! Core application
//!
//! Wires configuration, persistence, telemetry, the analytics and
//! matchmaking engines, and the scheduler into one handle. The HTTP
//! collaborator embeds a [`CoreApp`] and calls into its services with a
//! per-request tenant context.

use std::sync::Arc;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::analytics::{RoiCalculator, TimescaleAnalyticsStore};
use crate::automation::AutomationJobs;
use crate::automation::handlers::{register_automation_jobs, task_definitions};
use crate::campaigns::CampaignStore;
use crate::core::cli::{self, Commands};
use crate::core::config::{AppConfig, ConfigError};
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::data::cache::CacheService;
use crate::data::{PostgresService, ReadReplicaRouter, TimescaleService};
use crate::matchmaking::MatchEngine;
use crate::orchestration::{SchedulerCheckpoint, SmartScheduler};
use crate::telemetry::{EventLogger, MetricsCollector};

/// Startup failure classes, mapped to process exit codes by `main`
#[derive(Error, Debug)]
pub enum StartupError {
    /// Exit code 2
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Exit code 1
    #[error(transparent)]
    Bootstrap(#[from] anyhow::Error),
}

pub struct CoreApp {
    pub config: AppConfig,
    pub shutdown: ShutdownService,
    pub metrics: Arc<MetricsCollector>,
    pub events: Arc<EventLogger>,
    pub db: Arc<ReadReplicaRouter>,
    pub timescale: Arc<TimescaleService>,
    pub cache: Arc<CacheService>,
    pub campaigns: Arc<CampaignStore>,
    pub analytics: Arc<TimescaleAnalyticsStore>,
    pub roi: Arc<RoiCalculator>,
    pub matchmaking: Arc<MatchEngine>,
    pub automation: Arc<AutomationJobs>,
    pub checkpoint: Arc<SchedulerCheckpoint>,
    pub scheduler: Arc<SmartScheduler>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<(), StartupError> {
        dotenvy::dotenv().ok();
        let cli = cli::parse();
        if let Some(path) = &cli.env_file {
            dotenvy::from_path(path).ok();
        }
        Self::init_logging();

        tracing::debug!("Application starting");

        let config = AppConfig::load()?;
        let app = Self::init(config).await.map_err(StartupError::Bootstrap)?;

        match cli.command {
            Some(Commands::Schedule) => {
                app.checkpoint
                    .ensure_definitions(&task_definitions())
                    .await
                    .context("Failed to write scheduled task definitions")
                    .map_err(StartupError::Bootstrap)?;
                app.shutdown.shutdown().await;
                Ok(())
            }
            Some(Commands::Start) | None => {
                app.start().await.map_err(StartupError::Bootstrap)
            }
        }
    }

    async fn init(config: AppConfig) -> Result<Self> {
        let cache = Arc::new(
            CacheService::new(&config.cache)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize cache service: {}", e))?,
        );
        tracing::debug!(backend = cache.backend_name(), "Cache initialized");

        let (primary, timescale) = tokio::try_join!(
            async {
                PostgresService::init(&config.postgres)
                    .await
                    .context("PostgreSQL primary unreachable")
            },
            async {
                TimescaleService::init(&config.timescale, config.analytics.retention_days)
                    .await
                    .context("Time-series store unreachable")
            },
        )?;
        let timescale = Arc::new(timescale);

        // A missing replica degrades to primary-only routing; it never
        // blocks startup
        let replica = match &config.replica {
            Some(replica_config) => match PostgresService::connect(replica_config).await {
                Ok(pool) => Some(pool),
                Err(e) => {
                    tracing::warn!(error = %e, "Read replica unavailable; using primary only");
                    None
                }
            },
            None => None,
        };

        let db = Arc::new(ReadReplicaRouter::new(primary.pool().clone(), replica));

        let metrics = Arc::new(MetricsCollector::new());
        let events = Arc::new(EventLogger::new(db.clone(), metrics.clone()));
        let campaigns = Arc::new(CampaignStore::new(db.clone(), cache.clone()));
        let analytics = Arc::new(TimescaleAnalyticsStore::new(
            timescale.clone(),
            metrics.clone(),
            config.analytics.listener_count_mode,
        ));
        let roi = Arc::new(RoiCalculator::new(metrics.clone()));
        let matchmaking = Arc::new(MatchEngine::new(
            db.clone(),
            timescale.clone(),
            metrics.clone(),
        ));
        let automation = Arc::new(AutomationJobs::new(
            db.clone(),
            metrics.clone(),
            events.clone(),
            matchmaking.clone(),
        ));

        let checkpoint = Arc::new(SchedulerCheckpoint::new(db.clone()));
        let scheduler = Arc::new(SmartScheduler::new(
            metrics.clone(),
            events.clone(),
            Some(checkpoint.clone()),
            config.scheduler,
        ));

        register_automation_jobs(&scheduler, &automation, &config.features);

        let shutdown = ShutdownService::new();
        shutdown.register_pool(db.primary().clone()).await;
        shutdown.register_pool(timescale.pool().clone()).await;

        Ok(Self {
            config,
            shutdown,
            metrics,
            events,
            db,
            timescale,
            cache,
            campaigns,
            analytics,
            roi,
            matchmaking,
            automation,
            checkpoint,
            scheduler,
        })
    }

    async fn start(self) -> Result<()> {
        self.shutdown.install_signal_handlers();

        let health_task = self.db.start_health_check_task(self.shutdown.subscribe());
        self.shutdown.register(health_task).await;

        if self.config.features.orchestration {
            let scheduler_task = self.scheduler.start(self.shutdown.subscribe());
            self.shutdown.register(scheduler_task).await;
        } else {
            tracing::info!("Orchestration disabled; scheduler loop not started");
        }

        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            orchestration = self.config.features.orchestration,
            "adcast started"
        );

        self.shutdown.wait().await;
        self.shutdown.shutdown().await;
        Ok(())
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }
}
