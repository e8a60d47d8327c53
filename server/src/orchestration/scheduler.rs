//! Smart job scheduler
//!
//! Single-dispatcher cooperative scheduler over a priority min-heap with
//! dependency resolution, resource-aware execution, retries, and per-job
//! timeouts. Each loop iteration enqueues due jobs, then drains the queue
//! while concurrency allows. Handlers run as their own tasks and report
//! terminal outcomes back over a channel; the dispatcher alone mutates the
//! resource ledger and evaluates retries, so ordering within a job id is
//! observed without locks in the handlers.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::checkpoint::SchedulerCheckpoint;
use super::cron;
use super::types::{
    JobContext, JobExecution, JobPriority, JobStatus, ResourceBudget, ResourceLedger,
    ScheduledJob,
};
use crate::core::config::SchedulerConfig;
use crate::core::constants::{SCHEDULER_ERROR_SLEEP_SECS, SCHEDULER_IDLE_SLEEP_SECS};
use crate::core::tenant::TenantContext;
use crate::data::DataError;
use crate::telemetry::{EventLogger, MetricsCollector};

/// Heap entry; min-heap by (priority value, insertion sequence)
struct QueueEntry {
    priority: u8,
    seq: u64,
    execution_id: Uuid,
    params: serde_json::Value,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap pops the lowest (priority, seq) first
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

enum Outcome {
    Completed { result: serde_json::Value },
    Failed { error: String },
    TimedOut { timeout_secs: u64 },
    Cancelled,
}

struct Completion {
    execution_id: Uuid,
    job_id: String,
    params: serde_json::Value,
    outcome: Outcome,
}

/// Deferred async side effects computed under the state lock
enum FollowUp {
    Event {
        event_type: &'static str,
        properties: serde_json::Value,
    },
    CheckpointRun {
        job_id: String,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    },
    CheckpointFailure {
        job_id: String,
        failed_count: u32,
    },
}

struct SchedulerState {
    jobs: HashMap<String, ScheduledJob>,
    queue: BinaryHeap<QueueEntry>,
    seq: u64,
    executions: HashMap<Uuid, JobExecution>,
    running: HashMap<Uuid, CancellationToken>,
    ledger: ResourceLedger,
}

/// Priority-based job scheduler with dependency resolution and resource
/// accounting
pub struct SmartScheduler {
    metrics: Arc<MetricsCollector>,
    events: Arc<EventLogger>,
    checkpoint: Option<Arc<SchedulerCheckpoint>>,
    max_concurrent: usize,
    state: Mutex<SchedulerState>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: Mutex<mpsc::UnboundedReceiver<Completion>>,
}

impl SmartScheduler {
    pub fn new(
        metrics: Arc<MetricsCollector>,
        events: Arc<EventLogger>,
        checkpoint: Option<Arc<SchedulerCheckpoint>>,
        config: SchedulerConfig,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            metrics,
            events,
            checkpoint,
            max_concurrent: config.max_concurrent_jobs as usize,
            state: Mutex::new(SchedulerState {
                jobs: HashMap::new(),
                queue: BinaryHeap::new(),
                seq: 0,
                executions: HashMap::new(),
                running: HashMap::new(),
                ledger: ResourceLedger::new(ResourceBudget {
                    cpu: config.budget_cpu,
                    memory_mb: config.budget_memory_mb,
                    concurrent_jobs: config.max_concurrent_jobs,
                }),
            }),
            completion_tx,
            completion_rx: Mutex::new(completion_rx),
        }
    }

    /// Register a scheduled job and compute its first run time
    pub fn register_job(&self, mut job: ScheduledJob) {
        let now = Utc::now();
        job.next_run = Some(cron::next_run(&job.schedule, now));

        tracing::info!(
            job_id = %job.job_id,
            name = %job.name,
            next_run = ?job.next_run,
            "Registered job"
        );

        self.state.lock().jobs.insert(job.job_id.clone(), job);
    }

    /// Queue a job for execution, optionally overriding its priority.
    /// Returns the execution id.
    pub fn schedule_job(
        &self,
        job_id: &str,
        priority: Option<JobPriority>,
        params: serde_json::Value,
    ) -> Result<Uuid, DataError> {
        let mut state = self.state.lock();
        Self::enqueue_locked(&mut state, job_id, priority, params)
    }

    fn enqueue_locked(
        state: &mut SchedulerState,
        job_id: &str,
        priority: Option<JobPriority>,
        params: serde_json::Value,
    ) -> Result<Uuid, DataError> {
        let job = state
            .jobs
            .get(job_id)
            .filter(|j| j.enabled)
            .ok_or_else(|| {
                DataError::validation(format!("job {} not found or disabled", job_id))
            })?;

        let priority = priority.unwrap_or(job.priority);
        let execution_id = Uuid::new_v4();
        let execution = JobExecution {
            execution_id,
            job_id: job.job_id.clone(),
            status: JobStatus::Queued,
            priority,
            started_at: None,
            completed_at: None,
            error_message: None,
            result: None,
        };

        state.executions.insert(execution_id, execution);
        state.seq += 1;
        let seq = state.seq;
        state.queue.push(QueueEntry {
            priority: priority.value(),
            seq,
            execution_id,
            params,
        });

        tracing::debug!(job_id, %execution_id, "Scheduled job execution");
        Ok(execution_id)
    }

    /// Get a job execution record
    pub fn get_status(&self, execution_id: Uuid) -> Option<JobExecution> {
        self.state.lock().executions.get(&execution_id).cloned()
    }

    /// Cancel a queued or running execution
    pub fn cancel(&self, execution_id: Uuid) -> Result<(), DataError> {
        let mut state = self.state.lock();
        let execution = state
            .executions
            .get_mut(&execution_id)
            .ok_or(DataError::not_found("execution"))?;

        match execution.status {
            JobStatus::Queued | JobStatus::Pending => {
                execution.status = JobStatus::Cancelled;
                execution.completed_at = Some(Utc::now());
                let remaining: Vec<QueueEntry> = state
                    .queue
                    .drain()
                    .filter(|entry| entry.execution_id != execution_id)
                    .collect();
                state.queue = remaining.into_iter().collect();
                Ok(())
            }
            JobStatus::Running => {
                execution.status = JobStatus::Cancelled;
                // The handler observes the token at its next suspension point
                if let Some(token) = state.running.get(&execution_id) {
                    token.cancel();
                }
                Ok(())
            }
            status => Err(DataError::validation(format!(
                "execution {} is already {:?}",
                execution_id, status
            ))),
        }
    }

    /// Start the scheduler loop under the shutdown signal
    pub fn start(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!("Smart scheduler started");
            loop {
                let sleep_secs = match scheduler.tick(Utc::now()).await {
                    Ok(()) => SCHEDULER_IDLE_SLEEP_SECS,
                    Err(e) => {
                        tracing::error!(error = %e, "Error in scheduler loop");
                        SCHEDULER_ERROR_SLEEP_SECS
                    }
                };

                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_secs(sleep_secs)) => {}
                }
            }

            // In-flight handlers observe cancellation at their next
            // suspension point
            for token in scheduler.state.lock().running.values() {
                token.cancel();
            }
            tracing::info!("Smart scheduler stopped");
        })
    }

    /// One loop iteration: settle finished work, enqueue due jobs, dispatch
    async fn tick(&self, now: DateTime<Utc>) -> Result<(), DataError> {
        self.drain_completions(now).await;
        self.check_due_jobs(now).await;
        self.dispatch_ready(now);
        Ok(())
    }

    // =========================================================================
    // Completions
    // =========================================================================

    async fn drain_completions(&self, now: DateTime<Utc>) {
        let completions: Vec<Completion> = {
            let mut rx = self.completion_rx.lock();
            let mut batch = Vec::new();
            while let Ok(completion) = rx.try_recv() {
                batch.push(completion);
            }
            batch
        };

        for completion in completions {
            let follow_ups = self.apply_completion(completion, now);
            self.run_follow_ups(follow_ups).await;
        }
    }

    fn apply_completion(&self, completion: Completion, now: DateTime<Utc>) -> Vec<FollowUp> {
        let mut follow_ups = Vec::new();
        let mut state = self.state.lock();

        state.running.remove(&completion.execution_id);
        if let Some(job) = state.jobs.get(&completion.job_id) {
            let resources = job.resources;
            state.ledger.release(&resources);
        }

        let Some(execution) = state.executions.get_mut(&completion.execution_id) else {
            return follow_ups;
        };

        // A cancel that raced the handler's own completion wins
        if execution.status == JobStatus::Cancelled {
            execution.completed_at.get_or_insert(now);
            return follow_ups;
        }

        match completion.outcome {
            Outcome::Completed { result } => {
                execution.status = JobStatus::Completed;
                execution.result = Some(result);
                execution.completed_at = Some(now);

                let duration_seconds = execution
                    .started_at
                    .map(|started| (now - started).num_milliseconds() as f64 / 1000.0)
                    .unwrap_or(0.0);
                self.metrics.record_histogram(
                    "job_execution_duration_seconds",
                    duration_seconds,
                    &[("job_id", &completion.job_id), ("status", "completed")],
                );
                follow_ups.push(FollowUp::Event {
                    event_type: "job.completed",
                    properties: serde_json::json!({
                        "execution_id": completion.execution_id,
                        "job_id": completion.job_id,
                        "duration_seconds": duration_seconds,
                    }),
                });
            }
            Outcome::Cancelled => {
                execution.status = JobStatus::Cancelled;
                execution.completed_at = Some(now);
            }
            outcome @ (Outcome::Failed { .. } | Outcome::TimedOut { .. }) => {
                let (error_message, error_class) = match outcome {
                    Outcome::TimedOut { timeout_secs } => (
                        format!("Job timed out after {}s", timeout_secs),
                        "timeout",
                    ),
                    Outcome::Failed { error } => (error, "error"),
                    _ => unreachable!(),
                };

                execution.status = JobStatus::Failed;
                execution.error_message = Some(error_message.clone());
                execution.completed_at = Some(now);
                let demoted = execution.priority.demoted();

                self.metrics.increment_counter(
                    "job_executions_failed",
                    &[("job_id", &completion.job_id), ("error", error_class)],
                );
                tracing::error!(
                    job_id = %completion.job_id,
                    execution_id = %completion.execution_id,
                    error = %error_message,
                    "Job execution failed"
                );

                let failed_count = state
                    .executions
                    .values()
                    .filter(|e| e.job_id == completion.job_id && e.status == JobStatus::Failed)
                    .count() as u32;
                let max_retries = state
                    .jobs
                    .get(&completion.job_id)
                    .map(|j| j.max_retries)
                    .unwrap_or(0);

                if failed_count <= max_retries {
                    let retry_id = Uuid::new_v4();
                    state.executions.insert(
                        retry_id,
                        JobExecution {
                            execution_id: retry_id,
                            job_id: completion.job_id.clone(),
                            status: JobStatus::Queued,
                            priority: demoted,
                            started_at: None,
                            completed_at: None,
                            error_message: None,
                            result: None,
                        },
                    );
                    state.seq += 1;
                    let seq = state.seq;
                    state.queue.push(QueueEntry {
                        priority: demoted.value(),
                        seq,
                        execution_id: retry_id,
                        params: completion.params,
                    });
                    tracing::warn!(
                        job_id = %completion.job_id,
                        retry = failed_count,
                        max_retries,
                        "Re-queued failed job"
                    );
                } else {
                    follow_ups.push(FollowUp::CheckpointFailure {
                        job_id: completion.job_id.clone(),
                        failed_count,
                    });
                }
            }
        }

        follow_ups
    }

    async fn run_follow_ups(&self, follow_ups: Vec<FollowUp>) {
        for follow_up in follow_ups {
            match follow_up {
                FollowUp::Event {
                    event_type,
                    properties,
                } => {
                    self.events.log_event(event_type, None, None, properties).await;
                }
                FollowUp::CheckpointRun {
                    job_id,
                    last_run,
                    next_run,
                } => {
                    if let Some(checkpoint) = &self.checkpoint {
                        if let Err(e) = checkpoint.record_run(&job_id, last_run, next_run).await {
                            tracing::warn!(job_id, error = %e, "Failed to checkpoint job run");
                        }
                    }
                }
                FollowUp::CheckpointFailure {
                    job_id,
                    failed_count,
                } => {
                    if let Some(checkpoint) = &self.checkpoint {
                        if let Err(e) = checkpoint.record_failure(&job_id, failed_count).await {
                            tracing::warn!(job_id, error = %e, "Failed to checkpoint job failure");
                        }
                    }
                }
            }
        }
    }

    // =========================================================================
    // Due jobs
    // =========================================================================

    async fn check_due_jobs(&self, now: DateTime<Utc>) {
        let follow_ups: Vec<FollowUp> = {
            let mut state = self.state.lock();
            let due: Vec<String> = state
                .jobs
                .values()
                .filter(|job| job.enabled && job.next_run.is_some_and(|next| next <= now))
                .map(|job| job.job_id.clone())
                .collect();

            let mut follow_ups = Vec::new();
            for job_id in due {
                if let Err(e) = Self::enqueue_locked(&mut state, &job_id, None, serde_json::Value::Null)
                {
                    tracing::warn!(job_id, error = %e, "Failed to enqueue due job");
                    continue;
                }

                let Some(job) = state.jobs.get_mut(&job_id) else {
                    continue;
                };
                job.last_run = Some(now);
                job.next_run = if job.schedule == cron::IMMEDIATE {
                    // One-shot; a new run requires an explicit schedule call
                    None
                } else {
                    Some(cron::next_run(&job.schedule, now))
                };
                follow_ups.push(FollowUp::CheckpointRun {
                    job_id,
                    last_run: now,
                    next_run: job.next_run,
                });
            }
            follow_ups
        };

        self.run_follow_ups(follow_ups).await;
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    fn dispatch_ready(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        let mut deferred: Vec<QueueEntry> = Vec::new();

        while state.running.len() < self.max_concurrent {
            let Some(entry) = state.queue.pop() else {
                break;
            };

            let Some(execution) = state.executions.get(&entry.execution_id) else {
                continue;
            };
            if execution.status != JobStatus::Queued {
                // Cancelled while queued
                continue;
            }

            let Some(job) = state.jobs.get(&execution.job_id).cloned() else {
                let execution = state
                    .executions
                    .get_mut(&entry.execution_id)
                    .expect("execution present");
                execution.status = JobStatus::Failed;
                execution.error_message = Some("job definition missing".to_string());
                execution.completed_at = Some(now);
                continue;
            };

            // Dependency gate: every dependency needs a completed execution.
            // Ineligible entries are lightly demoted and retried next loop.
            let deps_met = job.depends_on.iter().all(|dep| {
                state
                    .executions
                    .values()
                    .any(|e| &e.job_id == dep && e.status == JobStatus::Completed)
            });
            if !deps_met {
                deferred.push(QueueEntry {
                    priority: entry.priority.saturating_add(1).min(JobPriority::Background.value()),
                    ..entry
                });
                continue;
            }

            // Resource gate: re-queued at the same priority
            if !state.ledger.can_fit(&job.resources) {
                deferred.push(entry);
                continue;
            }

            state.ledger.allocate(&job.resources);
            let token = CancellationToken::new();
            state.running.insert(entry.execution_id, token.clone());
            {
                let execution = state
                    .executions
                    .get_mut(&entry.execution_id)
                    .expect("execution present");
                execution.status = JobStatus::Running;
                execution.started_at = Some(now);
            }

            self.spawn_handler(&job, entry.execution_id, entry.params, token);
        }

        for entry in deferred {
            state.queue.push(entry);
        }
    }

    fn spawn_handler(
        &self,
        job: &ScheduledJob,
        execution_id: Uuid,
        params: serde_json::Value,
        token: CancellationToken,
    ) {
        let handler = Arc::clone(&job.handler);
        let job_id = job.job_id.clone();
        let timeout_seconds = job.timeout_seconds;
        let tx = self.completion_tx.clone();

        let tenant = params
            .get("tenant_id")
            .and_then(|v| v.as_str())
            .and_then(|raw| raw.parse().ok())
            .map(TenantContext::new);

        tokio::spawn(async move {
            let ctx = JobContext {
                tenant,
                params: params.clone(),
                cancel: token.clone(),
            };

            let work = async {
                let fut = handler.run(ctx);
                match timeout_seconds {
                    Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), fut).await
                    {
                        Ok(Ok(result)) => Outcome::Completed { result },
                        Ok(Err(e)) => Outcome::Failed {
                            error: e.to_string(),
                        },
                        Err(_) => Outcome::TimedOut { timeout_secs: secs },
                    },
                    None => match fut.await {
                        Ok(result) => Outcome::Completed { result },
                        Err(e) => Outcome::Failed {
                            error: e.to_string(),
                        },
                    },
                }
            };

            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => Outcome::Cancelled,
                outcome = work => outcome,
            };

            let _ = tx.send(Completion {
                execution_id,
                job_id,
                params,
                outcome,
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SchedulerConfig;
    use crate::data::ReadReplicaRouter;
    use crate::orchestration::types::{JobHandler, ResourceRequirements};
    use async_trait::async_trait;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    fn test_scheduler(max_concurrent: u32) -> Arc<SmartScheduler> {
        let metrics = Arc::new(MetricsCollector::new());
        let options: PgConnectOptions = "postgres://localhost:1/none".parse().unwrap();
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(10))
            .connect_lazy_with(options);
        let events = Arc::new(EventLogger::new(
            Arc::new(ReadReplicaRouter::new(pool, None)),
            metrics.clone(),
        ));
        Arc::new(SmartScheduler::new(
            metrics,
            events,
            None,
            SchedulerConfig {
                max_concurrent_jobs: max_concurrent,
                budget_cpu: 100,
                budget_memory_mb: 8192,
            },
        ))
    }

    /// Handler that records its job id in order and succeeds
    struct RecordingHandler {
        label: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl JobHandler for RecordingHandler {
        async fn run(&self, _ctx: JobContext) -> Result<serde_json::Value, DataError> {
            self.order.lock().push(self.label);
            Ok(serde_json::json!({"ok": true}))
        }
    }

    /// Handler that fails the first `failures` runs, then succeeds
    struct FlakyHandler {
        attempts: AtomicU32,
        failures: u32,
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn run(&self, _ctx: JobContext) -> Result<serde_json::Value, DataError> {
            let attempt = self.attempts.fetch_add(1, AtomicOrdering::SeqCst);
            if attempt < self.failures {
                Err(DataError::transport("connection reset"))
            } else {
                Ok(serde_json::json!({"attempt": attempt + 1}))
            }
        }
    }

    /// Handler that sleeps far longer than any test timeout
    struct SlowHandler;

    #[async_trait]
    impl JobHandler for SlowHandler {
        async fn run(&self, _ctx: JobContext) -> Result<serde_json::Value, DataError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(serde_json::Value::Null)
        }
    }

    fn recording_job(
        job_id: &str,
        order: &Arc<Mutex<Vec<&'static str>>>,
        label: &'static str,
    ) -> ScheduledJob {
        ScheduledJob::new(
            job_id,
            job_id,
            cron::IMMEDIATE,
            Arc::new(RecordingHandler {
                label,
                order: order.clone(),
            }),
        )
    }

    /// Let spawned handler tasks run and settle their completions
    async fn settle(scheduler: &SmartScheduler) {
        tokio::time::sleep(Duration::from_millis(5)).await;
        scheduler.drain_completions(Utc::now()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_ordering_with_fifo_tie_break() {
        let scheduler = test_scheduler(10);
        let order = Arc::new(Mutex::new(Vec::new()));

        scheduler.register_job(recording_job("low", &order, "low"));
        scheduler.register_job(recording_job("critical", &order, "critical"));
        scheduler.register_job(recording_job("normal_a", &order, "normal_a"));
        scheduler.register_job(recording_job("normal_b", &order, "normal_b"));

        scheduler
            .schedule_job("low", Some(JobPriority::Low), serde_json::Value::Null)
            .unwrap();
        scheduler
            .schedule_job("normal_a", None, serde_json::Value::Null)
            .unwrap();
        scheduler
            .schedule_job("normal_b", None, serde_json::Value::Null)
            .unwrap();
        scheduler
            .schedule_job("critical", Some(JobPriority::Critical), serde_json::Value::Null)
            .unwrap();

        scheduler.dispatch_ready(Utc::now());
        settle(&scheduler).await;

        assert_eq!(
            *order.lock(),
            vec!["critical", "normal_a", "normal_b", "low"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success_records_three_executions() {
        let scheduler = test_scheduler(10);
        let job = ScheduledJob::new(
            "flaky",
            "flaky",
            cron::IMMEDIATE,
            Arc::new(FlakyHandler {
                attempts: AtomicU32::new(0),
                failures: 2,
            }),
        )
        .with_max_retries(2);
        scheduler.register_job(job);

        scheduler
            .schedule_job("flaky", None, serde_json::Value::Null)
            .unwrap();

        for _ in 0..6 {
            scheduler.dispatch_ready(Utc::now());
            settle(&scheduler).await;
        }

        let executions: Vec<JobExecution> = scheduler
            .state
            .lock()
            .executions
            .values()
            .cloned()
            .collect();
        assert_eq!(executions.len(), 3);
        let failed = executions
            .iter()
            .filter(|e| e.status == JobStatus::Failed)
            .count();
        let completed = executions
            .iter()
            .filter(|e| e.status == JobStatus::Completed)
            .count();
        assert_eq!(failed, 2);
        assert_eq!(completed, 1);

        // Duration histogram only records the completed execution
        let histogram = scheduler
            .metrics
            .histogram(
                "job_execution_duration_seconds",
                &[("job_id", "flaky"), ("status", "completed")],
            )
            .unwrap();
        assert_eq!(histogram.count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhaust_at_max_retries() {
        let scheduler = test_scheduler(10);
        let job = ScheduledJob::new(
            "doomed",
            "doomed",
            cron::IMMEDIATE,
            Arc::new(FlakyHandler {
                attempts: AtomicU32::new(0),
                failures: u32::MAX,
            }),
        )
        .with_max_retries(2);
        scheduler.register_job(job);

        scheduler
            .schedule_job("doomed", None, serde_json::Value::Null)
            .unwrap();

        for _ in 0..8 {
            scheduler.dispatch_ready(Utc::now());
            settle(&scheduler).await;
        }

        let state = scheduler.state.lock();
        // Initial execution plus max_retries re-queues
        assert_eq!(state.executions.len(), 3);
        assert!(state
            .executions
            .values()
            .all(|e| e.status == JobStatus::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_produces_retryable_failure() {
        let scheduler = test_scheduler(10);
        let job = ScheduledJob::new("slow", "slow", cron::IMMEDIATE, Arc::new(SlowHandler))
            .with_timeout_seconds(2)
            .with_max_retries(0);
        scheduler.register_job(job);

        let execution_id = scheduler
            .schedule_job("slow", None, serde_json::Value::Null)
            .unwrap();

        scheduler.dispatch_ready(Utc::now());
        // Paused time auto-advances through the 2s timeout
        tokio::time::sleep(Duration::from_secs(3)).await;
        scheduler.drain_completions(Utc::now()).await;

        let execution = scheduler.get_status(execution_id).unwrap();
        assert_eq!(execution.status, JobStatus::Failed);
        assert_eq!(
            execution.error_message.as_deref(),
            Some("Job timed out after 2s")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dependency_gate_defers_until_completed() {
        let scheduler = test_scheduler(10);
        let order = Arc::new(Mutex::new(Vec::new()));

        scheduler.register_job(recording_job("upstream", &order, "upstream"));
        scheduler
            .register_job(recording_job("downstream", &order, "downstream").with_depends_on(&["upstream"]));

        let downstream_id = scheduler
            .schedule_job("downstream", None, serde_json::Value::Null)
            .unwrap();

        scheduler.dispatch_ready(Utc::now());
        settle(&scheduler).await;
        assert_eq!(
            scheduler.get_status(downstream_id).unwrap().status,
            JobStatus::Queued
        );
        assert!(order.lock().is_empty());

        scheduler
            .schedule_job("upstream", None, serde_json::Value::Null)
            .unwrap();
        scheduler.dispatch_ready(Utc::now());
        settle(&scheduler).await;
        scheduler.dispatch_ready(Utc::now());
        settle(&scheduler).await;

        assert_eq!(*order.lock(), vec!["upstream", "downstream"]);
        assert_eq!(
            scheduler.get_status(downstream_id).unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resource_gate_blocks_oversized_jobs() {
        let scheduler = test_scheduler(10);
        let order = Arc::new(Mutex::new(Vec::new()));

        let job = recording_job("heavy", &order, "heavy").with_resources(ResourceRequirements {
            cpu: 500,
            memory_mb: 0,
            concurrent_jobs: 1,
        });
        scheduler.register_job(job);

        let execution_id = scheduler
            .schedule_job("heavy", None, serde_json::Value::Null)
            .unwrap();
        scheduler.dispatch_ready(Utc::now());
        settle(&scheduler).await;

        // Requires more CPU than the whole budget; never dispatches
        assert_eq!(
            scheduler.get_status(execution_id).unwrap().status,
            JobStatus::Queued
        );
        assert!(order.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_concurrency_never_dispatches() {
        let scheduler = test_scheduler(0);
        let order = Arc::new(Mutex::new(Vec::new()));
        scheduler.register_job(recording_job("idle", &order, "idle"));

        let execution_id = scheduler
            .schedule_job("idle", None, serde_json::Value::Null)
            .unwrap();

        for _ in 0..5 {
            scheduler.dispatch_ready(Utc::now());
            settle(&scheduler).await;
        }

        assert_eq!(
            scheduler.get_status(execution_id).unwrap().status,
            JobStatus::Queued
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_queued_execution() {
        let scheduler = test_scheduler(10);
        let order = Arc::new(Mutex::new(Vec::new()));
        scheduler.register_job(recording_job("queued", &order, "queued"));

        let execution_id = scheduler
            .schedule_job("queued", None, serde_json::Value::Null)
            .unwrap();
        scheduler.cancel(execution_id).unwrap();

        scheduler.dispatch_ready(Utc::now());
        settle(&scheduler).await;

        assert_eq!(
            scheduler.get_status(execution_id).unwrap().status,
            JobStatus::Cancelled
        );
        assert!(order.lock().is_empty());

        // Terminal executions cannot be cancelled again
        assert!(scheduler.cancel(execution_id).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_running_execution() {
        let scheduler = test_scheduler(10);
        scheduler.register_job(ScheduledJob::new(
            "long",
            "long",
            cron::IMMEDIATE,
            Arc::new(SlowHandler),
        ));

        let execution_id = scheduler
            .schedule_job("long", None, serde_json::Value::Null)
            .unwrap();
        scheduler.dispatch_ready(Utc::now());
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(
            scheduler.get_status(execution_id).unwrap().status,
            JobStatus::Running
        );

        scheduler.cancel(execution_id).unwrap();
        settle(&scheduler).await;

        let execution = scheduler.get_status(execution_id).unwrap();
        assert_eq!(execution.status, JobStatus::Cancelled);
        assert!(execution.completed_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_jobs_enqueue_and_advance_next_run() {
        let scheduler = test_scheduler(10);
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut job = recording_job("hourly", &order, "hourly");
        job.schedule = "hourly".to_string();
        scheduler.register_job(job);

        // Force the job due
        let past = Utc::now() - chrono::Duration::hours(1);
        scheduler.state.lock().jobs.get_mut("hourly").unwrap().next_run = Some(past);

        let now = Utc::now();
        scheduler.check_due_jobs(now).await;

        let next_run = scheduler
            .state
            .lock()
            .jobs
            .get("hourly")
            .unwrap()
            .next_run
            .unwrap();
        assert!(next_run > now);

        scheduler.dispatch_ready(Utc::now());
        settle(&scheduler).await;
        assert_eq!(*order.lock(), vec!["hourly"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_jobs_fire_once() {
        let scheduler = test_scheduler(10);
        let order = Arc::new(Mutex::new(Vec::new()));
        scheduler.register_job(recording_job("once", &order, "once"));

        for _ in 0..3 {
            scheduler.check_due_jobs(Utc::now()).await;
            scheduler.dispatch_ready(Utc::now());
            settle(&scheduler).await;
        }

        assert_eq!(*order.lock(), vec!["once"]);
        assert!(scheduler.state.lock().jobs.get("once").unwrap().next_run.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_unknown_or_disabled_job_fails() {
        let scheduler = test_scheduler(10);
        assert!(scheduler
            .schedule_job("missing", None, serde_json::Value::Null)
            .is_err());

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut job = recording_job("disabled", &order, "disabled");
        job.enabled = false;
        scheduler.register_job(job);
        assert!(scheduler
            .schedule_job("disabled", None, serde_json::Value::Null)
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_executions_have_ordered_timestamps() {
        let scheduler = test_scheduler(10);
        let order = Arc::new(Mutex::new(Vec::new()));
        scheduler.register_job(recording_job("timed", &order, "timed"));

        let execution_id = scheduler
            .schedule_job("timed", None, serde_json::Value::Null)
            .unwrap();
        scheduler.dispatch_ready(Utc::now());
        settle(&scheduler).await;

        let execution = scheduler.get_status(execution_id).unwrap();
        assert!(execution.status.is_terminal());
        let started = execution.started_at.unwrap();
        let completed = execution.completed_at.unwrap();
        assert!(started <= completed);
    }
}
