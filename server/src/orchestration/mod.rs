//! Orchestration layer
//!
//! The smart scheduler (priority queue, dependency and resource gating,
//! retries, timeouts), the reduced cron grammar, and best-effort task
//! checkpointing.

pub mod checkpoint;
pub mod cron;
pub mod scheduler;
pub mod types;

pub use checkpoint::{SchedulerCheckpoint, TaskDefinition};
pub use scheduler::SmartScheduler;
pub use types::{
    JobContext, JobExecution, JobHandler, JobPriority, JobStatus, ResourceRequirements,
    ScheduledJob,
};
