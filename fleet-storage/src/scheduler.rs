//! Deferred job execution.
//!
//! The batch-update queue hands its drain jobs to a [`Scheduler`]. In
//! production that is [`TokioScheduler`]; tests use [`ManualScheduler`]
//! and run due jobs explicitly.

use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;

/// A deferred unit of work.
pub type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Runs jobs after a delay.
pub trait Scheduler: Send + Sync {
    /// Arrange for `job` to run once, no earlier than `delay` from now.
    fn schedule(&self, delay: Duration, job: Job);
}

/// Scheduler that spawns a sleeping task on a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Scheduler bound to the runtime of the calling task, if any.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, job: Job) {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            job().await;
        });
    }
}

/// Scheduler that holds jobs until [`ManualScheduler::run_pending`] is called.
#[derive(Default)]
pub struct ManualScheduler {
    pending: Mutex<Vec<(Duration, Job)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Delays requested by the waiting jobs, in scheduling order.
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.pending
            .lock()
            .map(|p| p.iter().map(|(d, _)| *d).collect())
            .unwrap_or_default()
    }

    /// Run every job scheduled so far, ignoring delays.
    ///
    /// Jobs scheduled while these run are kept for the next call. Returns the
    /// number of jobs run.
    pub async fn run_pending(&self) -> usize {
        let jobs = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        let count = jobs.len();
        for (_, job) in jobs {
            job().await;
        }
        count
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, job: Job) {
        match self.pending.lock() {
            Ok(mut pending) => pending.push((delay, job)),
            Err(poisoned) => poisoned.into_inner().push((delay, job)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_job(counter: &Arc<AtomicUsize>) -> Job {
        let counter = counter.clone();
        Box::new(move || {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test]
    async fn test_manual_scheduler_runs_on_demand() {
        let scheduler = ManualScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(Duration::from_secs(10), counting_job(&counter));
        scheduler.schedule(Duration::from_secs(5), counting_job(&counter));
        assert_eq!(scheduler.pending(), 2);
        assert_eq!(
            scheduler.pending_delays(),
            vec![Duration::from_secs(10), Duration::from_secs(5)]
        );
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        assert_eq!(scheduler.run_pending().await, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_tokio_scheduler_waits_for_delay() {
        let scheduler = TokioScheduler::current().expect("inside a runtime");
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(Duration::from_millis(20), counting_job(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
