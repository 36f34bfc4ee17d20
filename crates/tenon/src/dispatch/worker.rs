//! Worker-thread parsing.
//!
//! The pool owns up to `thread_count` long-lived OS threads, each with its
//! own [`AstParser`]. A request claims an idle worker, starts a new one while
//! the pool is below its limit, or waits in a FIFO queue for the next worker
//! that becomes free.
//!
//! Results cross the thread boundary in wire form and are hydrated on the
//! requesting side.
//!
//! # Cancellation
//!
//! - A queued request whose token fires leaves the queue and fails with
//!   [`Error::Cancelled`].
//! - A running request whose token fires gets `termination_delay` to finish.
//!   A result arriving in that window is delivered. Otherwise the worker's
//!   abort flag is raised, the worker is evicted, and a replacement is started
//!   the next time one is needed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tenon_syntax::{AstParser, ParseAborted, ParseResult, wire};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ParserDispatcher;
use crate::cancel;
use crate::error::{Error, Result};

/// Default number of worker threads.
pub const DEFAULT_THREAD_COUNT: usize = 8;

/// Default grace period between cancellation and worker termination.
pub const DEFAULT_TERMINATION_DELAY: Duration = Duration::from_millis(200);

/// Sizing and timing of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Maximum number of worker threads
    pub thread_count: usize,
    /// Grace period for a cancelled parse before its worker is terminated
    pub termination_delay: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            thread_count: DEFAULT_THREAD_COUNT,
            termination_delay: DEFAULT_TERMINATION_DELAY,
        }
    }
}

struct Job {
    text: String,
    reply: oneshot::Sender<Reply>,
}

enum Reply {
    Parsed(String),
    Aborted,
    Failed(String),
}

struct Worker {
    id: usize,
    jobs: mpsc::Sender<Job>,
    abort: Arc<AtomicBool>,
}

impl Worker {
    fn spawn(id: usize, parser: AstParser) -> std::io::Result<Self> {
        let (jobs, inbox) = mpsc::channel();
        let abort = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&abort);
        std::thread::Builder::new()
            .name(format!("tenon-parser-{id}"))
            .spawn(move || serve(&parser, &inbox, &flag))?;
        Ok(Self { id, jobs, abort })
    }

    /// Raise the abort flag. The running parse stops at its next token and
    /// the thread exits once its job channel is closed.
    fn terminate(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }
}

fn serve(parser: &AstParser, inbox: &mpsc::Receiver<Job>, abort: &AtomicBool) {
    while let Ok(job) = inbox.recv() {
        let reply = match parser.parse_interruptible(&job.text, abort) {
            Ok(result) => match wire::to_wire(&result) {
                Ok(wire) => Reply::Parsed(wire),
                Err(e) => Reply::Failed(e.to_string()),
            },
            Err(ParseAborted) => Reply::Aborted,
        };
        // The requester may have given up already.
        let _ = job.reply.send(reply);
        if abort.load(Ordering::Relaxed) {
            break;
        }
    }
}

struct Waiter {
    id: u64,
    handoff: oneshot::Sender<Worker>,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<Worker>,
    live: usize,
    queue: VecDeque<Waiter>,
    next_worker: usize,
    next_waiter: u64,
}

impl PoolState {
    fn reserve_worker(&mut self) -> usize {
        self.live += 1;
        self.next_worker += 1;
        self.next_worker
    }
}

/// [`ParserDispatcher`] running parses on a bounded pool of OS threads.
pub struct WorkerPool {
    parser: AstParser,
    config: WorkerPoolConfig,
    state: Mutex<PoolState>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("workers", &self.worker_count())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Create a pool. Workers are started on demand; each gets a clone of
    /// `parser`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config.thread_count` is zero.
    pub fn new(parser: AstParser, config: WorkerPoolConfig) -> Result<Self> {
        if config.thread_count == 0 {
            return Err(Error::Config("worker pool needs at least one thread".into()));
        }
        Ok(Self {
            parser,
            config,
            state: Mutex::new(PoolState::default()),
        })
    }

    /// Number of live workers, busy or idle.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.state.lock().live
    }

    /// Number of idle workers.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Number of requests waiting for a worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<Worker> {
        let mut queued = {
            let mut state = self.state.lock();
            if let Some(worker) = state.idle.pop() {
                debug!(worker = worker.id, "Claimed idle parser worker");
                return Ok(worker);
            }
            if state.live < self.config.thread_count {
                let id = state.reserve_worker();
                drop(state);
                return self.start(id);
            }
            let id = state.next_waiter;
            state.next_waiter += 1;
            let (handoff, receiver) = oneshot::channel();
            state.queue.push_back(Waiter { id, handoff });
            debug!(queued = state.queue.len(), "All parser workers busy, request queued");
            Queued {
                pool: self,
                id,
                handoff: receiver,
            }
        };

        tokio::select! {
            biased;
            worker = &mut queued.handoff => {
                worker.map_err(|_| Error::Worker("parser pool dropped a queued request".into()))
            }
            () = cancel.cancelled() => {
                debug!("Queued parse request cancelled");
                Err(Error::Cancelled)
            }
        }
    }

    fn start(&self, id: usize) -> Result<Worker> {
        match Worker::spawn(id, self.parser.clone()) {
            Ok(worker) => {
                debug!(worker = id, "Started parser worker");
                Ok(worker)
            }
            Err(e) => {
                self.state.lock().live -= 1;
                Err(e.into())
            }
        }
    }

    fn release(&self, worker: Worker) {
        Self::hand_over(&mut self.state.lock(), worker);
    }

    fn hand_over(state: &mut PoolState, mut worker: Worker) {
        while let Some(waiter) = state.queue.pop_front() {
            match waiter.handoff.send(worker) {
                Ok(()) => return,
                Err(returned) => worker = returned,
            }
        }
        state.idle.push(worker);
    }

    fn evict(&self, worker: Worker) {
        worker.terminate();
        let id = worker.id;
        drop(worker);
        let replacement = {
            let mut state = self.state.lock();
            state.live -= 1;
            (!state.queue.is_empty()).then(|| state.reserve_worker())
        };
        debug!(worker = id, "Evicted parser worker");

        // Queued requests would otherwise wait for a worker that never frees up.
        if let Some(id) = replacement {
            match self.start(id) {
                Ok(worker) => self.release(worker),
                Err(e) => warn!(error = %e, "Failed to start replacement parser worker"),
            }
        }
    }
}

/// A request waiting for a worker. However the wait ends (handoff,
/// cancellation or the request future being dropped), the request leaves
/// the queue, and a worker already handed to it moves on to the next waiter
/// or back to the idle list.
struct Queued<'p> {
    pool: &'p WorkerPool,
    id: u64,
    handoff: oneshot::Receiver<Worker>,
}

impl Drop for Queued<'_> {
    fn drop(&mut self) {
        let mut state = self.pool.state.lock();
        state.queue.retain(|waiter| waiter.id != self.id);
        // Handoffs happen under the lock, so a worker sent before the waiter
        // was removed is already in the channel.
        if let Ok(worker) = self.handoff.try_recv() {
            WorkerPool::hand_over(&mut state, worker);
        }
    }
}

/// A claimed worker. Dropping the lease without releasing it evicts the
/// worker, since its job may still be running.
struct Lease<'p> {
    pool: &'p WorkerPool,
    worker: Option<Worker>,
}

impl Lease<'_> {
    fn release(mut self) {
        if let Some(worker) = self.worker.take() {
            self.pool.release(worker);
        }
    }

    fn evict(mut self) {
        if let Some(worker) = self.worker.take() {
            self.pool.evict(worker);
        }
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.pool.evict(worker);
        }
    }
}

#[async_trait]
impl ParserDispatcher for WorkerPool {
    async fn parse(&self, text: &str, cancel: &CancellationToken) -> Result<ParseResult> {
        cancel::check(cancel)?;
        let worker = self.acquire(cancel).await?;
        let id = worker.id;

        let (reply, mut outcome) = oneshot::channel();
        let job = Job {
            text: text.to_owned(),
            reply,
        };
        if worker.jobs.send(job).is_err() {
            self.evict(worker);
            return Err(Error::Worker(format!("parser worker {id} exited")));
        }
        let lease = Lease {
            pool: self,
            worker: Some(worker),
        };

        let finished = tokio::select! {
            biased;
            result = &mut outcome => Some(result),
            () = cancel.cancelled() => None,
        };
        let result = match finished {
            Some(result) => result,
            None => match tokio::time::timeout(self.config.termination_delay, outcome).await {
                Ok(result) => result,
                Err(_) => {
                    debug!(worker = id, "Parse cancelled and not finished within the termination delay");
                    lease.evict();
                    return Err(Error::Cancelled);
                }
            },
        };

        match result {
            Ok(Reply::Parsed(wire)) => {
                lease.release();
                Ok(wire::from_wire(&wire)?)
            }
            Ok(Reply::Aborted) => {
                lease.evict();
                Err(Error::Cancelled)
            }
            Ok(Reply::Failed(message)) => {
                lease.release();
                Err(Error::Worker(message))
            }
            Err(_) => {
                warn!(worker = id, "Parser worker died during a parse");
                lease.evict();
                Err(Error::Worker(format!("parser worker {id} terminated unexpectedly")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use tenon_syntax::{ConvertContext, DefaultValueConverter, Value, ValueConverter};

    use super::*;
    use crate::domainmodel;

    /// Sleeps on every converted token, making parse time proportional to
    /// the number of names in the text.
    struct SlowConverter(Duration);

    impl ValueConverter for SlowConverter {
        fn convert(&self, input: &str, context: &ConvertContext<'_>) -> Value {
            std::thread::sleep(self.0);
            assert_ne!(input, "Boom", "converter exploded");
            DefaultValueConverter.convert(input, context)
        }
    }

    fn pool(per_token: Duration, thread_count: usize, termination_delay: Duration) -> WorkerPool {
        let grammar = domainmodel::grammar().unwrap();
        let parser = AstParser::with_converter(grammar, Arc::new(SlowConverter(per_token))).unwrap();
        WorkerPool::new(
            parser,
            WorkerPoolConfig {
                thread_count,
                termination_delay,
            },
        )
        .unwrap()
    }

    fn datatypes(count: usize) -> String {
        (0..count).map(|i| format!("datatype T{i}\n")).collect()
    }

    #[tokio::test]
    async fn parses_on_a_worker_and_hydrates() {
        let pool = pool(Duration::ZERO, 2, DEFAULT_TERMINATION_DELAY);

        let result = pool.parse("datatype String", &CancellationToken::new()).await.unwrap();

        let root = result.root().unwrap();
        let child = result.ast.children(root)[0];
        assert_eq!(result.ast.node(child).container().map(|c| c.node), Some(root));
        assert_eq!(pool.worker_count(), 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn result_within_grace_window_is_delivered() {
        let pool = pool(Duration::from_millis(100), 1, Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let (result, ()) = tokio::join!(pool.parse("datatype A", &cancel), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        assert!(result.is_ok());
        assert_eq!(pool.worker_count(), 1);
    }

    #[tokio::test]
    async fn worker_is_evicted_after_grace_window() {
        let pool = pool(Duration::from_millis(100), 1, Duration::from_millis(50));
        let cancel = CancellationToken::new();
        let started = Instant::now();

        let text = datatypes(50);

        let (result, ()) = tokio::join!(pool.parse(&text, &cancel), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(pool.worker_count(), 0);

        let result = pool.parse("datatype A", &CancellationToken::new()).await;
        assert!(result.is_ok());
        assert_eq!(pool.worker_count(), 1);
    }

    #[tokio::test]
    async fn cancelled_queued_request_leaves_the_queue() {
        let pool = pool(Duration::from_millis(100), 1, DEFAULT_TERMINATION_DELAY);
        let queued_cancel = CancellationToken::new();
        let text = datatypes(3);
        let first_cancel = CancellationToken::new();

        let (first, second, ()) = tokio::join!(
            pool.parse(&text, &first_cancel),
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                pool.parse("datatype B", &queued_cancel).await
            },
            async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                queued_cancel.cancel();
            }
        );

        assert!(first.is_ok());
        assert!(matches!(second, Err(Error::Cancelled)));
        assert_eq!(pool.queued(), 0);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn dropping_a_request_after_its_handoff_returns_the_worker() {
        let pool = pool(Duration::from_millis(50), 1, DEFAULT_TERMINATION_DELAY);
        let text = datatypes(3);
        let cancel = CancellationToken::new();

        let mut running = pool.parse(&text, &cancel);
        assert!(futures::poll!(running.as_mut()).is_pending());
        let mut waiting = pool.parse("datatype B", &cancel);
        assert!(futures::poll!(waiting.as_mut()).is_pending());
        assert_eq!(pool.queued(), 1);

        running.await.unwrap();
        assert_eq!(pool.queued(), 0);
        assert_eq!(pool.idle_count(), 0);
        drop(waiting);

        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.worker_count(), 1);
        let next = tokio::time::timeout(Duration::from_secs(2), pool.parse("datatype C", &cancel)).await;
        assert!(matches!(next, Ok(Ok(_))));
    }

    #[tokio::test]
    async fn already_cancelled_requests_fail_fast() {
        let pool = pool(Duration::ZERO, 1, DEFAULT_TERMINATION_DELAY);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = pool.parse("datatype A", &cancel).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(pool.worker_count(), 0);
    }

    #[tokio::test]
    async fn panicking_worker_surfaces_as_worker_error() {
        let pool = pool(Duration::ZERO, 1, DEFAULT_TERMINATION_DELAY);

        let result = pool.parse("datatype Boom", &CancellationToken::new()).await;

        assert!(matches!(result, Err(Error::Worker(_))));
        assert_eq!(pool.worker_count(), 0);
        assert!(pool.parse("datatype Fine", &CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_thread_count() {
        let pool = pool(Duration::from_millis(30), 2, DEFAULT_TERMINATION_DELAY);
        let cancel = CancellationToken::new();

        let results = futures::future::join_all((0..5).map(|i| {
            let text = format!("datatype T{i}");
            let pool = &pool;
            let cancel = &cancel;
            async move { pool.parse(&text, cancel).await }
        }))
        .await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(pool.worker_count(), 2);
        assert_eq!(pool.queued(), 0);
    }

    #[test]
    fn zero_threads_is_a_config_error() {
        let parser = domainmodel::parser().unwrap();
        let config = WorkerPoolConfig {
            thread_count: 0,
            termination_delay: DEFAULT_TERMINATION_DELAY,
        };

        assert!(matches!(WorkerPool::new(parser, config), Err(Error::Config(_))));
    }
}
