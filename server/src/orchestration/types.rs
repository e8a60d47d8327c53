//! Scheduler job and execution types

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::tenant::TenantContext;
use crate::data::DataError;

/// Job priority levels; lower values dispatch first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Critical,
    High,
    Normal,
    Low,
    Background,
}

impl JobPriority {
    pub fn value(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
            Self::Background => 4,
        }
    }

    /// Map a raw queue priority value back to a level, clamping past
    /// `Background`
    pub fn from_value(value: u8) -> Self {
        match value {
            0 => Self::Critical,
            1 => Self::High,
            2 => Self::Normal,
            3 => Self::Low,
            _ => Self::Background,
        }
    }

    /// One step lower priority, clamped at `Background`
    pub fn demoted(&self) -> Self {
        Self::from_value(self.value().saturating_add(1))
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Resource requirements declared by a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceRequirements {
    pub cpu: u32,
    pub memory_mb: u32,
    pub concurrent_jobs: u32,
}

/// Fixed budget the scheduler allocates job resources from
#[derive(Debug, Clone, Copy)]
pub struct ResourceBudget {
    pub cpu: u32,
    pub memory_mb: u32,
    pub concurrent_jobs: u32,
}

/// Running tally of allocated resources against the budget.
///
/// Mutated only from the dispatcher task.
#[derive(Debug)]
pub struct ResourceLedger {
    budget: ResourceBudget,
    used: ResourceRequirements,
}

impl ResourceLedger {
    pub fn new(budget: ResourceBudget) -> Self {
        Self {
            budget,
            used: ResourceRequirements::default(),
        }
    }

    pub fn can_fit(&self, required: &ResourceRequirements) -> bool {
        required.cpu <= self.budget.cpu.saturating_sub(self.used.cpu)
            && required.memory_mb <= self.budget.memory_mb.saturating_sub(self.used.memory_mb)
            && required.concurrent_jobs
                <= self
                    .budget
                    .concurrent_jobs
                    .saturating_sub(self.used.concurrent_jobs)
    }

    pub fn allocate(&mut self, required: &ResourceRequirements) {
        self.used.cpu += required.cpu;
        self.used.memory_mb += required.memory_mb;
        self.used.concurrent_jobs += required.concurrent_jobs;
    }

    pub fn release(&mut self, required: &ResourceRequirements) {
        self.used.cpu = self.used.cpu.saturating_sub(required.cpu);
        self.used.memory_mb = self.used.memory_mb.saturating_sub(required.memory_mb);
        self.used.concurrent_jobs = self
            .used
            .concurrent_jobs
            .saturating_sub(required.concurrent_jobs);
    }
}

/// Context handed to a job handler for one execution
#[derive(Clone)]
pub struct JobContext {
    pub tenant: Option<TenantContext>,
    pub params: serde_json::Value,
    /// Observed by cancellation-safe handlers at suspension points
    pub cancel: CancellationToken,
}

/// A unit of schedulable work
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: JobContext) -> Result<serde_json::Value, DataError>;
}

/// Scheduled job definition
#[derive(Clone)]
pub struct ScheduledJob {
    pub job_id: String,
    pub name: String,
    pub handler: Arc<dyn JobHandler>,
    /// Reduced cron grammar: "immediate", "daily", "hourly", "*/N * * * *"
    pub schedule: String,
    pub priority: JobPriority,
    pub depends_on: Vec<String>,
    pub max_retries: u32,
    pub timeout_seconds: Option<u64>,
    pub resources: ResourceRequirements,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    pub fn new(job_id: &str, name: &str, schedule: &str, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            job_id: job_id.to_string(),
            name: name.to_string(),
            handler,
            schedule: schedule.to_string(),
            priority: JobPriority::Normal,
            depends_on: Vec::new(),
            max_retries: 3,
            timeout_seconds: None,
            resources: ResourceRequirements::default(),
            enabled: true,
            last_run: None,
            next_run: None,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_depends_on(mut self, depends_on: &[&str]) -> Self {
        self.depends_on = depends_on.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    pub fn with_resources(mut self, resources: ResourceRequirements) -> Self {
        self.resources = resources;
        self
    }
}

/// Job execution instance
#[derive(Debug, Clone, Serialize)]
pub struct JobExecution {
    pub execution_id: Uuid,
    pub job_id: String,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
}
