//! Named task registration plus one-shot, periodic and
//! immediate execution over a fixed-size worker pool.
//!
//! Workers pull off a single bounded `mpsc` queue shared via an
//! `Arc<AsyncMutex<Receiver<_>>>`, the standard way to fan a single channel
//! out to a pool of workers. Periodic single-flight is an `AtomicBool` per task name
//! rather than a held mutex guard: the guard would have to outlive the
//! enqueue call across the channel send, which a `MutexGuard` can't do, so
//! the flag is cleared by the worker once the execution terminates.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock as SyncRwLock;
use rand::Rng;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

pub type TaskOutput = serde_json::Value;
type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
pub type TaskFn = Arc<dyn Fn(CancelToken) -> BoxFuture<CoreResult<TaskOutput>> + Send + Sync>;

/// Cooperative cancellation signal handed to a running callable.
#[derive(Clone)]
pub struct CancelToken(watch::Receiver<bool>);

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Builds a standalone token for callers (e.g. the optimizer) that want
    /// to pass cancellation in without going through a scheduled job. The
    /// sender is dropped immediately; `borrow()` still returns its last
    /// value once the sender side is gone.
    pub fn from_flag(cancelled: bool) -> Self {
        let (_tx, rx) = watch::channel(cancelled);
        CancelToken(rx)
    }
}

struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    fn new() -> Self {
        Self(watch::channel(false).0)
    }
    fn cancel(&self) {
        let _ = self.0.send(true);
    }
    fn token(&self) -> CancelToken {
        CancelToken(self.0.subscribe())
    }
}

#[derive(Clone)]
pub struct TaskDefinition {
    pub name: String,
    pub callable: TaskFn,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    OneShot,
    Periodic,
}

#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub task_name: String,
    pub kind: ScheduleKind,
    pub interval: Option<Duration>,
    pub jitter: Duration,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub id: Uuid,
    pub task_name: String,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub result: Option<TaskOutput>,
}

impl TaskExecution {
    fn pending(id: Uuid, task_name: &str) -> Self {
        Self {
            id,
            task_name: task_name.to_string(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            error_message: None,
            result: None,
        }
    }
}

struct QueuedJob {
    execution_id: Uuid,
    task_name: String,
    retry_count: u32,
}

/// No automatic retry for these kinds — they are preconditions, not
/// transient failures.
fn is_retryable(kind: crate::error::ErrorKind) -> bool {
    use crate::error::ErrorKind::*;
    !matches!(kind, InvalidOdds | InvalidProbability | InsufficientData | Conflict)
}

pub struct Scheduler {
    definitions: SyncRwLock<HashMap<String, TaskDefinition>>,
    scheduled: SyncRwLock<HashMap<Uuid, ScheduledTask>>,
    executions: SyncRwLock<HashMap<Uuid, TaskExecution>>,
    in_flight: SyncRwLock<HashMap<String, Arc<AtomicBool>>>,
    periodic_cancels: SyncRwLock<HashMap<Uuid, CancelHandle>>,
    queue_tx: mpsc::Sender<QueuedJob>,
    queue_capacity: usize,
    shutdown: CancelHandle,
}

impl Scheduler {
    /// Spawns `worker_count` workers pulling from a queue bounded at
    /// `queue_capacity`. Call `shutdown` to stop periodic loops and let
    /// in-flight workers drain; tests construct a fresh instance each time
    /// rather than sharing a process-wide scheduler.
    pub fn new(worker_count: usize, queue_capacity: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let scheduler = Arc::new(Self {
            definitions: SyncRwLock::new(HashMap::new()),
            scheduled: SyncRwLock::new(HashMap::new()),
            executions: SyncRwLock::new(HashMap::new()),
            in_flight: SyncRwLock::new(HashMap::new()),
            periodic_cancels: SyncRwLock::new(HashMap::new()),
            queue_tx: tx,
            queue_capacity,
            shutdown: CancelHandle::new(),
        });

        let rx = Arc::new(AsyncMutex::new(rx));
        for worker_id in 0..worker_count.max(1) {
            let scheduler = scheduler.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(job) => scheduler.run_job(job).await,
                        None => {
                            info!(worker_id, "scheduler worker exiting: queue closed");
                            break;
                        }
                    }
                }
            });
        }

        scheduler
    }

    /// Builds a scheduler sized from `config.max_concurrent_tasks` and
    /// `config.queue_capacity`. `config.tick_interval` and
    /// `config.cleanup_retention` are not consumed here: this scheduler
    /// runs each periodic task on its own interval rather than a shared
    /// polling tick, and retention is a parameter callers pass to
    /// `cleanup_completed` on whatever cadence they run upkeep.
    pub fn from_config(config: &crate::config::SchedulerConfig) -> Arc<Self> {
        Self::new(config.max_concurrent_tasks, config.queue_capacity)
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        callable: TaskFn,
        max_retries: u32,
        retry_delay: Duration,
        timeout: Option<Duration>,
    ) {
        let name = name.into();
        self.definitions.write().insert(
            name.clone(),
            TaskDefinition { name, callable, max_retries, retry_delay, timeout },
        );
    }

    fn in_flight_flag(&self, name: &str) -> Arc<AtomicBool> {
        if let Some(flag) = self.in_flight.read().get(name) {
            return flag.clone();
        }
        self.in_flight
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    fn enqueue(&self, task_name: &str) -> CoreResult<Uuid> {
        if !self.definitions.read().contains_key(task_name) {
            return Err(CoreError::NotFound(format!("task '{task_name}' is not registered")));
        }
        let execution_id = Uuid::new_v4();
        self.executions
            .write()
            .insert(execution_id, TaskExecution::pending(execution_id, task_name));

        let job = QueuedJob { execution_id, task_name: task_name.to_string(), retry_count: 0 };
        self.queue_tx.try_send(job).map_err(|_| {
            self.executions.write().remove(&execution_id);
            CoreError::QueueFull { depth: self.queue_capacity, capacity: self.queue_capacity }
        })?;
        Ok(execution_id)
    }

    /// Runs `task_name` after `delay`, once.
    pub fn schedule_once(self: &Arc<Self>, task_name: &str, delay: Duration) -> CoreResult<Uuid> {
        if !self.definitions.read().contains_key(task_name) {
            return Err(CoreError::NotFound(format!("task '{task_name}' is not registered")));
        }
        let id = Uuid::new_v4();
        self.scheduled.write().insert(
            id,
            ScheduledTask {
                id,
                task_name: task_name.to_string(),
                kind: ScheduleKind::OneShot,
                interval: None,
                jitter: Duration::ZERO,
                enabled: true,
            },
        );

        let scheduler = self.clone();
        let task_name = task_name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = scheduler.enqueue(&task_name) {
                warn!(task = %task_name, error = %err, "one-shot enqueue failed");
            }
        });
        Ok(id)
    }

    /// Runs `task_name` every `interval + U[-jitter, +jitter]`, starting
    /// after `delay`. Ticks for a task already queued or running are
    /// skipped (single-flight).
    pub fn schedule_periodic(
        self: &Arc<Self>,
        task_name: &str,
        interval: Duration,
        jitter: Duration,
        delay: Duration,
    ) -> CoreResult<Uuid> {
        if !self.definitions.read().contains_key(task_name) {
            return Err(CoreError::NotFound(format!("task '{task_name}' is not registered")));
        }
        let id = Uuid::new_v4();
        self.scheduled.write().insert(
            id,
            ScheduledTask {
                id,
                task_name: task_name.to_string(),
                kind: ScheduleKind::Periodic,
                interval: Some(interval),
                jitter,
                enabled: true,
            },
        );
        let cancel = CancelHandle::new();
        let token = cancel.token();
        self.periodic_cancels.write().insert(id, cancel);

        let scheduler = self.clone();
        let task_name = task_name.to_string();
        let mut shutdown_token = scheduler.shutdown.token();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            loop {
                let jittered = jittered_interval(interval, jitter);
                tokio::select! {
                    _ = tokio::time::sleep(jittered) => {}
                    _ = shutdown_token.0.changed() => {
                        if *shutdown_token.0.borrow() { return; }
                    }
                    _ = async {
                        let mut rx = token.0.clone();
                        let _ = rx.changed().await;
                    } => { return; }
                }
                if *shutdown_token.0.borrow() || token.is_cancelled() {
                    return;
                }
                let enabled = scheduler
                    .scheduled
                    .read()
                    .get(&id)
                    .map(|s| s.enabled)
                    .unwrap_or(false);
                if !enabled {
                    continue;
                }
                let flag = scheduler.in_flight_flag(&task_name);
                if flag.swap(true, Ordering::SeqCst) {
                    continue; // previous execution still queued or running
                }
                if let Err(err) = scheduler.enqueue(&task_name) {
                    flag.store(false, Ordering::SeqCst);
                    warn!(task = %task_name, error = %err, "periodic enqueue failed");
                }
            }
        });
        Ok(id)
    }

    pub fn set_enabled(&self, scheduled_id: Uuid, enabled: bool) -> CoreResult<()> {
        let mut scheduled = self.scheduled.write();
        let entry = scheduled
            .get_mut(&scheduled_id)
            .ok_or_else(|| CoreError::NotFound(format!("scheduled task {scheduled_id}")))?;
        entry.enabled = enabled;
        Ok(())
    }

    /// Enqueues `task_name` immediately, bypassing single-flight.
    pub fn run_now(&self, task_name: &str) -> CoreResult<Uuid> {
        self.enqueue(task_name)
    }

    pub fn task_status(&self, execution_id: Uuid) -> CoreResult<TaskExecution> {
        self.executions
            .read()
            .get(&execution_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("execution {execution_id}")))
    }

    /// Drops terminal-status executions whose `completed_at` is older than
    /// `older_than`. Returns the number removed.
    pub fn cleanup_completed(&self, older_than: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());
        let mut executions = self.executions.write();
        let before = executions.len();
        executions.retain(|_, execution| match execution.status {
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled => {
                execution.completed_at.map_or(true, |at| at >= cutoff)
            }
            ExecutionStatus::Pending | ExecutionStatus::Running => true,
        });
        before - executions.len()
    }

    async fn run_job(self: &Arc<Self>, job: QueuedJob) {
        let definition = self.definitions.read().get(&job.task_name).cloned();
        let Some(definition) = definition else {
            return;
        };

        {
            let mut executions = self.executions.write();
            if let Some(exec) = executions.get_mut(&job.execution_id) {
                exec.status = ExecutionStatus::Running;
                exec.started_at = Some(Utc::now());
                exec.retry_count = job.retry_count;
            }
        }

        let cancel = CancelHandle::new();
        let token = cancel.token();
        let future = (definition.callable)(token);
        let outcome = match definition.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, future).await {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    Err(CoreError::Timeout(timeout))
                }
            },
            None => future.await,
        };

        let terminal = match outcome {
            Ok(value) => {
                self.finish(job.execution_id, ExecutionStatus::Completed, None, Some(value));
                true
            }
            Err(err) => {
                let retryable = is_retryable(err.kind());
                if retryable && job.retry_count < definition.max_retries {
                    self.requeue_after_delay(job, definition.retry_delay, err.to_string());
                    false
                } else {
                    let status = if matches!(err.kind(), crate::error::ErrorKind::Cancelled) {
                        ExecutionStatus::Cancelled
                    } else {
                        ExecutionStatus::Failed
                    };
                    self.finish(job.execution_id, status, Some(err.to_string()), None);
                    true
                }
            }
        };

        if terminal {
            if let Some(flag) = self.in_flight.read().get(&definition.name) {
                flag.store(false, Ordering::SeqCst);
            }
        }
    }

    fn finish(&self, id: Uuid, status: ExecutionStatus, error: Option<String>, result: Option<TaskOutput>) {
        let mut executions = self.executions.write();
        if let Some(exec) = executions.get_mut(&id) {
            exec.status = status;
            exec.completed_at = Some(Utc::now());
            exec.error_message = error;
            exec.result = result;
        }
    }

    fn requeue_after_delay(self: &Arc<Self>, job: QueuedJob, delay: Duration, error: String) {
        {
            let mut executions = self.executions.write();
            if let Some(exec) = executions.get_mut(&job.execution_id) {
                exec.status = ExecutionStatus::Pending;
                exec.error_message = Some(error);
            }
        }
        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let next = QueuedJob {
                execution_id: job.execution_id,
                task_name: job.task_name,
                retry_count: job.retry_count + 1,
            };
            if scheduler.queue_tx.try_send(next).is_err() {
                scheduler.finish(
                    job.execution_id,
                    ExecutionStatus::Failed,
                    Some("queue full on retry".into()),
                    None,
                );
            }
        });
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

fn jittered_interval(interval: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return interval;
    }
    let jitter_ms = jitter.as_millis() as i64;
    let offset = rand::thread_rng().gen_range(-jitter_ms..=jitter_ms);
    let total_ms = (interval.as_millis() as i64 + offset).max(0);
    Duration::from_millis(total_ms as u64)
}
