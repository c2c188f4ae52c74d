//! Task scheduling and cancellation
//!
//! The connection manager never sleeps or spawns on its own. It hands jobs
//! to an injected [`TaskScheduler`] and keeps the returned [`PendingTask`]
//! handles in [`TaskSlot`]s, one slot per kind of work. Installing a task in
//! a slot cancels whatever was there before, so there is never more than one
//! live connect attempt or health check per session.
//!
//! Cancellation is cooperative: every job receives the [`CancellationToken`]
//! of its own task and is expected to check it between steps.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{BrainError, Result};

/// A job run once after a delay
pub type OnceJob = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>;

/// A job run repeatedly with a fixed delay between runs
pub type RecurringJob = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, ()> + Send + Sync>;

/// Capability to run delayed and recurring work
pub trait TaskScheduler: Send + Sync {
    /// Run `job` once after `delay`
    fn schedule_once(&self, delay: Duration, job: OnceJob) -> PendingTask;

    /// Run `job` every `interval`, waiting `interval` before the first run
    /// and between the end of one run and the start of the next
    fn schedule_recurring(&self, interval: Duration, job: RecurringJob) -> PendingTask;
}

/// Handle to outstanding scheduled work
pub struct PendingTask {
    token: CancellationToken,
    finished: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PendingTask {
    /// Create a handle for work driven by something other than a tokio task
    pub fn new(token: CancellationToken, finished: Arc<AtomicBool>) -> Self {
        Self {
            token,
            finished,
            handle: None,
        }
    }

    fn spawned(token: CancellationToken, finished: Arc<AtomicBool>, handle: JoinHandle<()>) -> Self {
        Self {
            token,
            finished,
            handle: Some(handle),
        }
    }

    /// Request cancellation; the job observes it at its next check
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the job ran to completion (or its loop exited)
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
            || self.handle.as_ref().is_some_and(|h| h.is_finished())
    }

    /// Neither cancelled nor finished
    pub fn is_active(&self) -> bool {
        !self.is_cancelled() && !self.is_finished()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl fmt::Debug for PendingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTask")
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Single-owner cell holding at most one [`PendingTask`]
///
/// The swap happens under a short lock that is never held across an await;
/// the displaced task is cancelled after the lock is released.
#[derive(Debug, Default)]
pub struct TaskSlot {
    name: &'static str,
    task: Mutex<Option<PendingTask>>,
}

impl TaskSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            task: Mutex::new(None),
        }
    }

    /// Install `task`, cancelling the one it replaces
    pub fn replace(&self, task: PendingTask) {
        let previous = self.task.lock().replace(task);
        if let Some(previous) = previous {
            trace!(slot = self.name, "cancelling replaced task");
            previous.cancel();
        }
    }

    /// Remove and cancel the current task, if any
    pub fn cancel(&self) {
        let previous = self.task.lock().take();
        if let Some(previous) = previous {
            trace!(slot = self.name, "cancelling task");
            previous.cancel();
        }
    }

    /// Whether the slot holds a task that is neither cancelled nor finished
    pub fn is_active(&self) -> bool {
        self.task.lock().as_ref().is_some_and(PendingTask::is_active)
    }
}

/// [`TaskScheduler`] spawning onto a tokio runtime
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Scheduler bound to the runtime of the calling context
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| BrainError::Configuration(format!("No tokio runtime available: {e}")))?;
        Ok(Self::new(handle))
    }
}

impl TaskScheduler for TokioScheduler {
    fn schedule_once(&self, delay: Duration, job: OnceJob) -> PendingTask {
        let token = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));

        let task_token = token.clone();
        let task_finished = Arc::clone(&finished);
        let handle = self.handle.spawn(async move {
            tokio::select! {
                _ = task_token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    job(task_token).await;
                }
            }
            task_finished.store(true, Ordering::Release);
        });

        PendingTask::spawned(token, finished, handle)
    }

    fn schedule_recurring(&self, interval: Duration, job: RecurringJob) -> PendingTask {
        let token = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));

        let task_token = token.clone();
        let task_finished = Arc::clone(&finished);
        let handle = self.handle.spawn(async move {
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                job(task_token.clone()).await;
                if task_token.is_cancelled() {
                    break;
                }
            }
            task_finished.store(true, Ordering::Release);
        });

        PendingTask::spawned(token, finished, handle)
    }
}

/// Return [`BrainError::Interrupted`] once `token` has been cancelled
pub fn check_interrupt(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(BrainError::Interrupted)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_once(counter: &Arc<AtomicUsize>) -> OnceJob {
        let counter = Arc::clone(counter);
        Box::new(move |_token: CancellationToken| -> BoxFuture<'static, ()> {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_runs_after_delay() {
        let scheduler = TokioScheduler::current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let task = scheduler.schedule_once(Duration::from_secs(5), counting_once(&counter));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(task.is_active());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());
        assert!(!task.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_once_never_runs() {
        let scheduler = TokioScheduler::current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let task = scheduler.schedule_once(Duration::from_secs(5), counting_once(&counter));
        task.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(task.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recurring_runs_until_cancelled() {
        let scheduler = TokioScheduler::current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let job_counter = Arc::clone(&counter);
        let job: RecurringJob = Arc::new(move |_token: CancellationToken| -> BoxFuture<'static, ()> {
            let counter = Arc::clone(&job_counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });

        let task = scheduler.schedule_recurring(Duration::from_secs(10), job);

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        task.cancel();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recurring_job_can_cancel_itself() {
        let scheduler = TokioScheduler::current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let job_counter = Arc::clone(&counter);
        let job: RecurringJob = Arc::new(move |token: CancellationToken| -> BoxFuture<'static, ()> {
            let counter = Arc::clone(&job_counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                token.cancel();
            })
        });

        let task = scheduler.schedule_recurring(Duration::from_secs(1), job);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_replace_cancels_previous() {
        let scheduler = TokioScheduler::current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let slot = TaskSlot::new("connect");

        for _ in 0..5 {
            slot.replace(scheduler.schedule_once(Duration::from_secs(5), counting_once(&counter)));
        }
        assert!(slot.is_active());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!slot.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_cancel_empties_slot() {
        let scheduler = TokioScheduler::current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let slot = TaskSlot::new("check-status");

        slot.replace(scheduler.schedule_once(Duration::from_secs(5), counting_once(&counter)));
        slot.cancel();
        slot.cancel();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(!slot.is_active());
    }

    #[test]
    fn test_check_interrupt() {
        let token = CancellationToken::new();
        assert!(check_interrupt(&token).is_ok());
        token.cancel();
        assert!(matches!(check_interrupt(&token), Err(BrainError::Interrupted)));
    }

    #[test]
    fn test_current_without_runtime_fails() {
        assert!(TokioScheduler::current().is_err());
    }
}
