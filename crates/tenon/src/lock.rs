//! Workspace read/write lock.
//!
//! Writes (builds and updates) run one at a time. Reads run together, but
//! never while a write runs. Queued writes go before queued reads.
//!
//! Issuing a write cancels the token of the previously issued write. A
//! running write sees the cancellation cooperatively; a write still in the
//! queue is dropped without running and resolves to [`Error::Cancelled`].

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Default)]
struct LockState {
    writes: VecDeque<Job>,
    reads: VecDeque<Job>,
    running: bool,
    previous_write: Option<CancellationToken>,
}

enum Batch {
    Write(Job),
    Reads(Vec<Job>),
}

/// Serializes workspace writes against each other and against reads.
#[derive(Clone, Default)]
pub struct WorkspaceLock {
    state: Arc<Mutex<LockState>>,
}

impl std::fmt::Debug for WorkspaceLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WorkspaceLock")
            .field("queued_writes", &state.writes.len())
            .field("queued_reads", &state.reads.len())
            .field("running", &state.running)
            .finish()
    }
}

impl WorkspaceLock {
    /// An idle lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a write and cancel the previously issued one.
    ///
    /// The write is queued when this is called, not when the returned future
    /// is first polled. `action` receives the write's cancellation token.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Resolves to [`Error::Cancelled`] if a newer write was issued before
    /// this one started, to [`Error::Internal`] if `action` panicked, and
    /// otherwise to the result of `action`.
    pub fn write<F, Fut, T>(&self, action: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let token = CancellationToken::new();
        let (reply, result) = oneshot::channel();
        let job_token = token.clone();
        let job: Job = Box::new(move || {
            async move {
                let outcome = if job_token.is_cancelled() {
                    trace!("Skipping cancelled write");
                    Err(Error::Cancelled)
                } else {
                    guarded(async move { action(job_token).await })
                        .await
                        .and_then(|outcome| outcome)
                };
                let _ = reply.send(outcome);
            }
            .boxed()
        });

        {
            let mut state = self.state.lock();
            if let Some(previous) = state.previous_write.replace(token) {
                previous.cancel();
            }
            state.writes.push_back(job);
            debug!(writes = state.writes.len(), reads = state.reads.len(), "Queued write");
        }
        self.drive();

        async move {
            result
                .await
                .map_err(|_| Error::Internal("workspace lock dropped a write".into()))?
        }
    }

    /// Queue a read.
    ///
    /// Like [`WorkspaceLock::write`], the read is queued immediately.
    ///
    /// # Errors
    ///
    /// Resolves to [`Error::Internal`] if `action` panicked.
    pub fn read<F, Fut, T>(&self, action: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        let job: Job = Box::new(move || {
            async move {
                let _ = reply.send(guarded(async move { action().await }).await);
            }
            .boxed()
        });

        {
            let mut state = self.state.lock();
            state.reads.push_back(job);
            trace!(writes = state.writes.len(), reads = state.reads.len(), "Queued read");
        }
        self.drive();

        async move {
            result
                .await
                .map_err(|_| Error::Internal("workspace lock dropped a read".into()))?
        }
    }

    /// Cancel the most recently issued write.
    pub fn cancel_write(&self) {
        if let Some(token) = &self.state.lock().previous_write {
            token.cancel();
        }
    }

    #[cfg(test)]
    fn is_busy(&self) -> bool {
        self.state.lock().running
    }

    fn drive(&self) {
        {
            let mut state = self.state.lock();
            if state.running {
                return;
            }
            state.running = true;
        }
        tokio::spawn(run_queue(Arc::clone(&self.state)));
    }
}

async fn run_queue(state: Arc<Mutex<LockState>>) {
    loop {
        let batch = {
            let mut state = state.lock();
            if let Some(write) = state.writes.pop_front() {
                Batch::Write(write)
            } else if state.reads.is_empty() {
                state.running = false;
                return;
            } else {
                Batch::Reads(state.reads.drain(..).collect())
            }
        };
        match batch {
            Batch::Write(job) => job().await,
            Batch::Reads(jobs) => {
                trace!(reads = jobs.len(), "Running reads");
                join_all(jobs.into_iter().map(|job| job())).await;
            }
        }
    }
}

async fn guarded<T>(action: impl Future<Output = T> + Send) -> Result<T> {
    AssertUnwindSafe(action).catch_unwind().await.map_err(|_| {
        warn!("Workspace operation panicked");
        Error::Internal("workspace operation panicked".into())
    })
}
