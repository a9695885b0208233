//! Bounded task queue and the worker pool that drains it.
//!
//! # Design
//! - The queue is a bounded `mpsc` channel of request ids; a full queue is
//!   reported to the submitter rather than buffered.
//! - Workers share the receiver and wait at most one poll interval per turn so
//!   they notice shutdown promptly.
//! - Each run executes on its own task. A panic is observed through the join
//!   handle and recorded against the request; the worker keeps going.
//! - An in-flight registry ensures one id is never processed by two workers at once.

use std::any::Any;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use proxyseed_telemetry::Metrics;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::executor::PipelineExecutor;

enum Dequeued {
    Id(Uuid),
    Idle,
    Closed,
}

struct QueueInner {
    sender: mpsc::Sender<Uuid>,
    receiver: AsyncMutex<mpsc::Receiver<Uuid>>,
    capacity: usize,
    metrics: Option<Metrics>,
}

/// FIFO of request ids awaiting a worker.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    /// Queue holding at most `capacity` ids (minimum one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, None)
    }

    /// Queue that reports its depth to `metrics`.
    #[must_use]
    pub fn with_metrics(capacity: usize, metrics: Metrics) -> Self {
        Self::build(capacity, Some(metrics))
    }

    fn build(capacity: usize, metrics: Option<Metrics>) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            inner: Arc::new(QueueInner {
                sender,
                receiver: AsyncMutex::new(receiver),
                capacity,
                metrics,
            }),
        }
    }

    /// Push `id` without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] at capacity.
    pub fn enqueue(&self, id: Uuid) -> Result<(), QueueError> {
        match self.inner.sender.try_send(id) {
            Ok(()) => {
                self.report_depth();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(QueueError::Full {
                capacity: self.inner.capacity,
            }),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    /// Ids waiting for a worker.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.capacity - self.inner.sender.capacity()
    }

    /// Whether no ids are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    async fn next(&self, wait: Duration) -> Dequeued {
        let mut receiver = self.inner.receiver.lock().await;
        let received = tokio::time::timeout(wait, receiver.recv()).await;
        drop(receiver);
        match received {
            Err(_) => Dequeued::Idle,
            Ok(None) => Dequeued::Closed,
            Ok(Some(id)) => {
                self.report_depth();
                Dequeued::Id(id)
            }
        }
    }

    fn report_depth(&self) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.set_queue_depth(i64::try_from(self.len()).unwrap_or(i64::MAX));
        }
    }
}

struct PoolShared {
    queue: TaskQueue,
    executor: Arc<PipelineExecutor>,
    poll_interval: Duration,
    in_flight: Mutex<HashSet<Uuid>>,
    metrics: Option<Metrics>,
}

/// Fixed-size set of workers draining a [`TaskQueue`].
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Pool draining `queue` with `executor`.
    #[must_use]
    pub fn new(queue: TaskQueue, executor: Arc<PipelineExecutor>, poll_interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(PoolShared {
                queue,
                executor,
                poll_interval,
                in_flight: Mutex::new(HashSet::new()),
                metrics: None,
            }),
            shutdown,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Report active workers to `metrics`. Must be called before [`Self::start`].
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.metrics = Some(metrics);
        }
        self
    }

    /// Queue drained by this pool.
    #[must_use]
    pub fn queue(&self) -> &TaskQueue {
        &self.shared.queue
    }

    /// Spawn `worker_count` workers (minimum one). Calling `start` on a running pool is a no-op.
    pub fn start(&self, worker_count: usize) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if !workers.is_empty() {
            warn!("worker pool already started");
            return;
        }
        self.shutdown.send_replace(false);
        let count = worker_count.max(1);
        for index in 0..count {
            let shared = Arc::clone(&self.shared);
            let shutdown = self.shutdown.subscribe();
            workers.push(tokio::spawn(worker_loop(shared, index, shutdown)));
        }
        drop(workers);
        info!(workers = count, "worker pool started");
    }

    /// Signal workers to finish their current run and wait for them.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handles = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "worker task ended abnormally");
            }
        }
        info!(pending = self.shared.queue.len(), "worker pool stopped");
    }

    /// Requests currently being processed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

async fn worker_loop(shared: Arc<PoolShared>, index: usize, mut shutdown: watch::Receiver<bool>) {
    debug!(worker = index, "worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let next = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = shared.queue.next(shared.poll_interval) => next,
        };
        match next {
            Dequeued::Id(id) => shared.run_one(id).await,
            Dequeued::Idle => {}
            Dequeued::Closed => break,
        }
    }
    debug!(worker = index, "worker exiting");
}

impl PoolShared {
    async fn run_one(&self, id: Uuid) {
        if !self.claim(id) {
            debug!(request_id = %id, "request already in flight; dropping duplicate");
            return;
        }
        if let Some(metrics) = &self.metrics {
            metrics.inc_active_workers();
        }

        let executor = Arc::clone(&self.executor);
        let joined = tokio::spawn(async move { executor.process(id).await }).await;
        if let Err(err) = joined {
            let detail = if err.is_panic() {
                panic_detail(err.into_panic())
            } else {
                err.to_string()
            };
            error!(request_id = %id, detail = %detail, "pipeline run aborted");
            self.executor.fail_unexpected(id, detail).await;
        }

        if let Some(metrics) = &self.metrics {
            metrics.dec_active_workers();
        }
        self.release(id);
    }

    fn claim(&self, id: Uuid) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id)
    }

    fn release(&self, id: Uuid) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

fn panic_detail(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| payload.downcast_ref::<&str>().map(|text| (*text).to_string()))
        .unwrap_or_else(|| "worker panicked".to_string())
}
