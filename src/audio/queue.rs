//! Serialized audio task queue
//!
//! Tasks run strictly one at a time in FIFO order. A "return to idle"
//! barrier queued behind audio therefore never overtakes the audio.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};

/// Future produced by a queued task
pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

type TaskFactory = Box<dyn FnOnce() -> TaskFuture + Send>;

/// FIFO of deferred async tasks, executed one at a time
#[derive(Clone, Default)]
pub struct AudioTaskQueue {
    inner: Arc<Mutex<QueueInner>>,
    idle: Arc<Notify>,
}

#[derive(Default)]
struct QueueInner {
    pending: VecDeque<TaskFactory>,
    /// True from the moment a drain loop is spawned until it finds the
    /// queue empty
    running: bool,
    drain: Option<AbortHandle>,
    current: Option<AbortHandle>,
}

impl AudioTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task. The factory is invoked only when the task's turn comes.
    pub fn add_task<F, Fut>(&self, factory: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let task: TaskFactory = Box::new(move || Box::pin(factory()));
        let mut inner = self.lock();
        inner.pending.push_back(task);
        debug!(pending = inner.pending.len(), "audio task queued");

        if !inner.running {
            inner.running = true;
            let queue = self.clone();
            let handle = tokio::spawn(async move { queue.drain().await });
            inner.drain = Some(handle.abort_handle());
        }
    }

    /// Drop every task that has not started yet. A running task completes.
    pub fn clear_queue(&self) {
        let mut inner = self.lock();
        let dropped = inner.pending.len();
        inner.pending.clear();
        if dropped > 0 {
            debug!(dropped, "audio queue cleared");
        }
    }

    /// Whether any task is pending or running
    pub fn has_task(&self) -> bool {
        let inner = self.lock();
        inner.running || !inner.pending.is_empty()
    }

    /// Number of tasks waiting to start
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Resolve once the queue has nothing pending or running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.has_task() {
                return;
            }
            notified.await;
        }
    }

    /// Drop pending tasks and abort the running one
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.pending.clear();
        if let Some(current) = inner.current.take() {
            current.abort();
        }
        if let Some(drain) = inner.drain.take() {
            drain.abort();
        }
        inner.running = false;
        drop(inner);
        self.idle.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn drain(self) {
        loop {
            let task = {
                let mut inner = self.lock();
                match inner.pending.pop_front() {
                    Some(task) => task,
                    None => {
                        inner.running = false;
                        inner.drain = None;
                        inner.current = None;
                        break;
                    }
                }
            };

            let handle = tokio::spawn(task());
            self.lock().current = Some(handle.abort_handle());

            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "audio task failed"),
                Err(e) if e.is_panic() => error!("audio task panicked"),
                Err(_) => debug!("audio task aborted"),
            }
        }
        self.idle.notify_waiters();
    }
}
