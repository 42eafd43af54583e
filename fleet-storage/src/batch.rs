//! Deferred, coalesced batch updates.
//!
//! Model helpers register tasks per entity kind (for example "recompute the
//! tag index"). Every durable write of that kind calls
//! [`BatchUpdateQueue::notify_write`]; the first notification schedules a
//! drain after the configured delay, and further notifications before the
//! drain starts are absorbed. Each kind moves through
//! `Idle -> Scheduled -> Draining -> Idle`.
//!
//! A write that lands while a drain is running marks the kind dirty, and the
//! drain schedules one more pass when it finishes. Task failures and panics
//! are logged and never reach the writer.
//!
//! [`BatchUpdateQueue::drain_now`] supersedes a drain that is already
//! scheduled: the pending job still fires but finds nothing to do.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use fleet_core::FleetResult;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::scheduler::{Job, Scheduler};

type TaskFn = dyn Fn() -> BoxFuture<'static, FleetResult<()>> + Send + Sync;

/// A named, repeatable batch task.
#[derive(Clone)]
pub struct BatchTask {
    name: String,
    run: Arc<TaskFn>,
}

impl BatchTask {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FleetResult<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(move || f().boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for BatchTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchTask").field("name", &self.name).finish()
    }
}

/// Drain state of one entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// No drain pending.
    Idle,
    /// A drain is scheduled and has not started.
    Scheduled,
    /// Tasks are running.
    Draining,
}

#[derive(Debug)]
struct KindQueue {
    tasks: Vec<BatchTask>,
    state: QueueState,
    rerun: bool,
    drains: u64,
    /// Bumped on every schedule and every immediate drain; a scheduled job
    /// only runs if the epoch it was given is still current.
    epoch: u64,
}

impl Default for KindQueue {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            state: QueueState::Idle,
            rerun: false,
            drains: 0,
            epoch: 0,
        }
    }
}

struct Shared {
    kinds: Mutex<HashMap<String, KindQueue>>,
    scheduler: Arc<dyn Scheduler>,
    delay: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, KindQueue>> {
        match self.kinds.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn schedule_drain(self: &Arc<Self>, kind: &str, epoch: u64) {
        let shared = Arc::clone(self);
        let kind = kind.to_string();
        let job: Job =
            Box::new(move || Box::pin(async move { shared.drain(&kind, Some(epoch)).await }));
        self.scheduler.schedule(self.delay, job);
    }

    /// Run every task of `kind`. `scheduled` carries the epoch of a
    /// scheduled job; `None` is an immediate drain.
    async fn drain(self: &Arc<Self>, kind: &str, scheduled: Option<u64>) {
        let tasks = {
            let mut kinds = self.lock();
            let queue = kinds.entry(kind.to_string()).or_default();
            match scheduled {
                Some(epoch) if queue.state != QueueState::Scheduled || queue.epoch != epoch => {
                    tracing::debug!(kind, epoch, "Scheduled drain superseded, skipping");
                    return;
                }
                Some(_) => {}
                None => queue.epoch += 1,
            }
            queue.state = QueueState::Draining;
            queue.rerun = false;
            queue.drains += 1;
            queue.tasks.clone()
        };

        tracing::debug!(kind, tasks = tasks.len(), "Draining batch updates");
        for task in &tasks {
            run_task(kind, task).await;
        }

        let rerun = {
            let mut kinds = self.lock();
            let queue = kinds.entry(kind.to_string()).or_default();
            if queue.rerun {
                queue.rerun = false;
                queue.state = QueueState::Scheduled;
                queue.epoch += 1;
                Some(queue.epoch)
            } else {
                queue.state = QueueState::Idle;
                None
            }
        };
        if let Some(epoch) = rerun {
            tracing::debug!(kind, "Writes arrived during drain, scheduling another pass");
            self.schedule_drain(kind, epoch);
        }
    }
}

async fn run_task(kind: &str, task: &BatchTask) {
    let started = std::panic::catch_unwind(AssertUnwindSafe(|| (task.run)()));
    let outcome = match started {
        Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
        Err(panic) => Err(panic),
    };
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(kind, task = %task.name, error = %e, "Batch update task failed");
        }
        Err(_) => {
            tracing::error!(kind, task = %task.name, "Batch update task panicked");
        }
    }
}

/// Per-kind queue of deferred refresh tasks.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct BatchUpdateQueue {
    shared: Arc<Shared>,
}

impl BatchUpdateQueue {
    pub fn new(scheduler: Arc<dyn Scheduler>, delay: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                kinds: Mutex::new(HashMap::new()),
                scheduler,
                delay,
            }),
        }
    }

    /// Delay between the first notification and the drain.
    pub fn delay(&self) -> Duration {
        self.shared.delay
    }

    /// Register a task to run on every drain of `kind`.
    pub fn register_task(&self, kind: &str, task: BatchTask) {
        let mut kinds = self.shared.lock();
        let queue = kinds.entry(kind.to_string()).or_default();
        tracing::debug!(kind, task = %task.name, "Registered batch update task");
        queue.tasks.push(task);
    }

    /// Record a durable write of `kind`.
    ///
    /// Kinds without registered tasks are ignored.
    pub fn notify_write(&self, kind: &str) {
        let schedule = {
            let mut kinds = self.shared.lock();
            let Some(queue) = kinds.get_mut(kind) else {
                return;
            };
            if queue.tasks.is_empty() {
                return;
            }
            match queue.state {
                QueueState::Idle => {
                    queue.state = QueueState::Scheduled;
                    queue.epoch += 1;
                    Some(queue.epoch)
                }
                QueueState::Scheduled => None,
                QueueState::Draining => {
                    queue.rerun = true;
                    None
                }
            }
        };
        if let Some(epoch) = schedule {
            self.shared.schedule_drain(kind, epoch);
        }
    }

    /// Run every task of `kind` now, outside the schedule.
    ///
    /// A drain already scheduled for `kind` becomes a no-op.
    pub async fn drain_now(&self, kind: &str) {
        self.shared.drain(kind, None).await;
    }

    pub fn state(&self, kind: &str) -> QueueState {
        self.shared
            .lock()
            .get(kind)
            .map(|q| q.state)
            .unwrap_or(QueueState::Idle)
    }

    /// Number of drains started for `kind`.
    pub fn drain_count(&self, kind: &str) -> u64 {
        self.shared.lock().get(kind).map(|q| q.drains).unwrap_or(0)
    }

    pub fn task_count(&self, kind: &str) -> usize {
        self.shared
            .lock()
            .get(kind)
            .map(|q| q.tasks.len())
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for BatchUpdateQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchUpdateQueue")
            .field("delay", &self.shared.delay)
            .finish_non_exhaustive()
    }
}
