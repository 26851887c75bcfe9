//! The request queue engine
//!
//! Admission, priority scheduling, bounded concurrency, batching, retry and
//! timeout for asynchronous tasks. A queue is a cheap cloneable handle; all
//! shared state lives behind one mutex and settlement runs on spawned Tokio
//! tasks, so enqueueing requires an ambient Tokio runtime.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, join_all};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use chatwire_types::{ApiError, Listeners, Retryable, Subscription};

use crate::backoff::BackoffCalculator;
use crate::config::QueueConfig;
use crate::events::{QueueEvent, QueueStatus};
use crate::stats::QueueStats;

/// Scheduling priority; buckets drain strictly in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePriority {
    High,
    #[default]
    Normal,
    Low,
}

/// Per-enqueue options; unset fields fall back to the queue config
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: QueuePriority,
    pub batchable: bool,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
}

impl EnqueueOptions {
    pub fn with_priority(mut self, priority: QueuePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn batchable(mut self) -> Self {
        self.batchable = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

type TaskFn<T> = Box<dyn FnMut() -> BoxFuture<'static, Result<T, ApiError>> + Send>;

/// One admitted unit of work
struct QueueItem<T> {
    id: u64,
    task: TaskFn<T>,
    priority: QueuePriority,
    timeout: Duration,
    max_retries: u32,
    retry_count: u32,
    enqueued_at: Instant,
    tx: oneshot::Sender<Result<T, ApiError>>,
}

/// Bookkeeping for a running task or batch
struct ActiveRequest {
    batch_size: Option<usize>,
    started_at: Instant,
}

/// Snapshot of one occupied concurrency slot
#[derive(Debug, Clone)]
pub struct ActiveInfo {
    /// `Some(n)` for a batch of `n` members, `None` for a single task
    pub batch_size: Option<usize>,
    /// Time since the slot was claimed
    pub in_flight: Duration,
}

struct State<T> {
    high: VecDeque<QueueItem<T>>,
    normal: VecDeque<QueueItem<T>>,
    low: VecDeque<QueueItem<T>>,
    /// Batchable items waiting for a size- or delay-triggered flush
    batch: Vec<QueueItem<T>>,
    /// Flushed batches waiting for a free slot
    ready_batches: VecDeque<Vec<QueueItem<T>>>,
    batch_timer: Option<JoinHandle<()>>,
    batch_epoch: u64,
    active: HashMap<u64, ActiveRequest>,
    /// Items sitting out a retry backoff; counted so the queue is not
    /// reported empty while work is still owed
    backing_off: usize,
    paused: bool,
    status: QueueStatus,
    stats: QueueStats,
    next_id: u64,
}

impl<T> State<T> {
    fn new() -> Self {
        Self {
            high: VecDeque::new(),
            normal: VecDeque::new(),
            low: VecDeque::new(),
            batch: Vec::new(),
            ready_batches: VecDeque::new(),
            batch_timer: None,
            batch_epoch: 0,
            active: HashMap::new(),
            backing_off: 0,
            paused: false,
            status: QueueStatus::Idle,
            stats: QueueStats::default(),
            next_id: 0,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Pending size used for admission control: priority buckets plus the
    /// batch buffer. Dispatched work does not count.
    fn pending_len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len() + self.batch.len()
    }

    fn pop_next(&mut self) -> Option<QueueItem<T>> {
        self.high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())
    }

    fn bucket_mut(&mut self, priority: QueuePriority) -> &mut VecDeque<QueueItem<T>> {
        match priority {
            QueuePriority::High => &mut self.high,
            QueuePriority::Normal => &mut self.normal,
            QueuePriority::Low => &mut self.low,
        }
    }

    fn is_drained(&self) -> bool {
        self.pending_len() == 0
            && self.ready_batches.is_empty()
            && self.active.is_empty()
            && self.backing_off == 0
    }
}

struct Inner<T> {
    config: QueueConfig,
    backoff: BackoffCalculator,
    state: Mutex<State<T>>,
    events: Listeners<QueueEvent>,
}

/// Priority/concurrency/batching/retry engine for asynchronous tasks
///
/// `T` is the success value produced by every task on this queue.
pub struct RequestQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for RequestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> RequestQueue<T> {
    pub fn new(config: QueueConfig) -> Self {
        let backoff = BackoffCalculator::new(
            config.base_retry_delay,
            config.max_retry_delay,
            config.jitter,
        );
        Self {
            inner: Arc::new(Inner {
                config,
                backoff,
                state: Mutex::new(State::new()),
                events: Listeners::new(),
            }),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(QueueConfig::default())
    }

    /// Admit a task and settle with its result or a queue-level error
    ///
    /// The task is a re-invocable async closure so transient failures can be
    /// retried. Admission happens synchronously; the returned future only
    /// waits for settlement, so dropping it does not cancel the work.
    pub fn enqueue<F, Fut>(
        &self,
        task: F,
        options: EnqueueOptions,
    ) -> impl Future<Output = Result<T, ApiError>>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        self.enqueue_with_id(task, options).1
    }

    /// Like [`enqueue`](Self::enqueue), also returning the queue id so the
    /// item can later be removed with [`cancel_pending`](Self::cancel_pending)
    pub fn enqueue_with_id<F, Fut>(
        &self,
        task: F,
        options: EnqueueOptions,
    ) -> (u64, impl Future<Output = Result<T, ApiError>>)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let mut task = task;
        let (tx, rx) = oneshot::channel();
        let id = self.admit(Box::new(move || task().boxed()), options, tx);

        let settled = async move {
            match rx.await {
                Ok(result) => result,
                // The queue was dropped with this item still pending
                Err(_) => Err(ApiError::Cancelled),
            }
        };
        (id, settled)
    }

    fn admit(
        &self,
        task: TaskFn<T>,
        options: EnqueueOptions,
        tx: oneshot::Sender<Result<T, ApiError>>,
    ) -> u64 {
        let mut events = Vec::new();
        let mut start_timer = false;
        let mut flush_now = false;
        let id;
        {
            let mut state = self.inner.state.lock();
            id = state.allocate_id();
            let pending = state.pending_len();
            if pending >= self.inner.config.max_queue_size {
                state.stats.overflowed += 1;
                if state.status != QueueStatus::Overflow {
                    events.push(QueueEvent::StatusChange {
                        old: state.status,
                        new: QueueStatus::Overflow,
                    });
                    state.status = QueueStatus::Overflow;
                }
                events.push(QueueEvent::Overflow {
                    queue_size: pending,
                    max_size: self.inner.config.max_queue_size,
                });
                warn!(
                    pending,
                    limit = self.inner.config.max_queue_size,
                    "queue overflow, rejecting admission"
                );
                let _ = tx.send(Err(ApiError::Overflow {
                    size: pending,
                    limit: self.inner.config.max_queue_size,
                }));
            } else {
                state.stats.queued += 1;
                let item = QueueItem {
                    id,
                    task,
                    priority: options.priority,
                    timeout: options.timeout.unwrap_or(self.inner.config.default_timeout),
                    max_retries: options
                        .max_retries
                        .unwrap_or(self.inner.config.default_max_retries),
                    retry_count: 0,
                    enqueued_at: Instant::now(),
                    tx,
                };
                if options.batchable {
                    state.batch.push(item);
                    if state.batch.len() >= self.inner.config.batch_size {
                        flush_now = true;
                    } else if state.batch.len() == 1 {
                        start_timer = true;
                    }
                } else {
                    state.bucket_mut(options.priority).push_back(item);
                }
            }
        }
        self.emit_all(events);
        if flush_now {
            self.flush_batch(None);
        } else if start_timer {
            self.start_batch_timer();
        }
        self.pump();
        id
    }

    /// Remove a still-pending item, rejecting it with a cancelled error
    ///
    /// Covers the priority buckets, the batch buffer and flushed-but-not-
    /// dispatched batches; the task is never invoked. Dispatched items are
    /// left alone. Returns whether an item was removed.
    pub fn cancel_pending(&self, id: u64) -> bool {
        let removed = {
            let mut state = self.inner.state.lock();
            Self::take_pending(&mut state, id)
        };
        match removed {
            Some(item) => {
                debug!(id, "cancelled pending item before dispatch");
                let _ = item.tx.send(Err(ApiError::Cancelled));
                true
            }
            None => false,
        }
    }

    fn take_pending(state: &mut State<T>, id: u64) -> Option<QueueItem<T>> {
        for bucket in [&mut state.high, &mut state.normal, &mut state.low] {
            if let Some(pos) = bucket.iter().position(|item| item.id == id) {
                return bucket.remove(pos);
            }
        }
        if let Some(pos) = state.batch.iter().position(|item| item.id == id) {
            return Some(state.batch.remove(pos));
        }
        for idx in 0..state.ready_batches.len() {
            let members = &mut state.ready_batches[idx];
            if let Some(pos) = members.iter().position(|item| item.id == id) {
                let item = members.remove(pos);
                // An emptied batch must never reach dispatch
                if members.is_empty() {
                    state.ready_batches.remove(idx);
                }
                return Some(item);
            }
        }
        None
    }

    /// Stop dispatching; admitted items keep queueing
    pub fn pause(&self) {
        let mut events = Vec::new();
        {
            let mut state = self.inner.state.lock();
            state.paused = true;
            Self::refresh_status(&mut state, &mut events);
        }
        self.emit_all(events);
    }

    /// Resume dispatch in priority order
    pub fn resume(&self) {
        let mut events = Vec::new();
        {
            let mut state = self.inner.state.lock();
            state.paused = false;
            Self::refresh_status(&mut state, &mut events);
        }
        self.emit_all(events);
        self.pump();
    }

    /// Reject every pending and buffered item with a queue-cleared error
    ///
    /// Already-dispatched tasks are unaffected. Returns the number of items
    /// dropped.
    pub fn clear(&self) -> usize {
        let mut dropped = Vec::new();
        let mut events = Vec::new();
        {
            let mut state = self.inner.state.lock();
            state.batch_epoch += 1;
            if let Some(timer) = state.batch_timer.take() {
                timer.abort();
            }
            dropped.extend(state.high.drain(..));
            dropped.extend(state.normal.drain(..));
            dropped.extend(state.low.drain(..));
            dropped.extend(state.batch.drain(..));
            for members in state.ready_batches.drain(..) {
                dropped.extend(members);
            }
            Self::refresh_status(&mut state, &mut events);
        }
        let count = dropped.len();
        for item in dropped {
            let _ = item.tx.send(Err(ApiError::QueueCleared));
        }
        if count > 0 {
            debug!(count, "cleared pending queue items");
        }
        self.emit_all(events);
        count
    }

    /// Number of pending (non-dispatched) items
    pub fn len(&self) -> usize {
        self.inner.state.lock().pending_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of occupied concurrency slots
    pub fn active_count(&self) -> usize {
        self.inner.state.lock().active.len()
    }

    /// Snapshots of the occupied slots with their in-flight durations
    pub fn active_requests(&self) -> Vec<ActiveInfo> {
        let state = self.inner.state.lock();
        state
            .active
            .values()
            .map(|active| ActiveInfo {
                batch_size: active.batch_size,
                in_flight: active.started_at.elapsed(),
            })
            .collect()
    }

    pub fn status(&self) -> QueueStatus {
        self.inner.state.lock().status
    }

    /// Snapshot of the queue statistics
    pub fn stats(&self) -> QueueStats {
        self.inner.state.lock().stats.clone()
    }

    /// Register a lifecycle event listener
    pub fn on_event<F>(&self, listener: F) -> Subscription<QueueEvent>
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener)
    }

    // Internal scheduling

    fn emit_all(&self, events: Vec<QueueEvent>) {
        for event in events {
            self.inner.events.emit(&event);
        }
    }

    fn refresh_status(state: &mut State<T>, events: &mut Vec<QueueEvent>) {
        let new = if state.paused {
            QueueStatus::Paused
        } else if !state.active.is_empty() {
            QueueStatus::Processing
        } else {
            QueueStatus::Idle
        };
        if state.status != new {
            events.push(QueueEvent::StatusChange {
                old: state.status,
                new,
            });
            state.status = new;
        }
    }

    /// Fill free slots from the priority buckets, then from ready batches.
    /// Runs synchronously to completion; dispatch passes never interleave
    /// because the state lock is held while slots are claimed.
    fn pump(&self) {
        let mut singles = Vec::new();
        let mut batches = Vec::new();
        let mut events = Vec::new();
        {
            let mut state = self.inner.state.lock();
            if !state.paused {
                while state.active.len() < self.inner.config.max_concurrent {
                    if let Some(item) = state.pop_next() {
                        let wait_ms = item.enqueued_at.elapsed().as_secs_f64() * 1000.0;
                        state.stats.record_wait(wait_ms);
                        state.active.insert(
                            item.id,
                            ActiveRequest {
                                batch_size: None,
                                started_at: Instant::now(),
                            },
                        );
                        singles.push(item);
                    } else if let Some(members) = state.ready_batches.pop_front() {
                        for member in &members {
                            let wait_ms = member.enqueued_at.elapsed().as_secs_f64() * 1000.0;
                            state.stats.record_wait(wait_ms);
                        }
                        let batch_id = state.allocate_id();
                        state.active.insert(
                            batch_id,
                            ActiveRequest {
                                batch_size: Some(members.len()),
                                started_at: Instant::now(),
                            },
                        );
                        batches.push((batch_id, members));
                    } else {
                        break;
                    }
                }
            }
            Self::refresh_status(&mut state, &mut events);
        }
        self.emit_all(events);
        for item in singles {
            let queue = self.clone();
            tokio::spawn(async move { queue.run_single(item).await });
        }
        for (batch_id, members) in batches {
            let queue = self.clone();
            tokio::spawn(async move { queue.run_batch(batch_id, members).await });
        }
    }

    async fn run_single(&self, mut item: QueueItem<T>) {
        let started = Instant::now();
        // The timeout race drops the task future on expiry, discarding any
        // late completion.
        let outcome = match tokio::time::timeout(item.timeout, (item.task)()).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout {
                timeout: item.timeout,
            }),
        };
        let processing_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut events = Vec::new();
        let mut retry = None;
        {
            let mut state = self.inner.state.lock();
            state.active.remove(&item.id);
            match outcome {
                Ok(value) => {
                    state.stats.processed += 1;
                    state.stats.record_processing(processing_ms);
                    events.push(QueueEvent::RequestComplete {
                        id: item.id,
                        success: true,
                    });
                    let _ = item.tx.send(Ok(value));
                }
                Err(err) if err.is_retryable() && item.retry_count < item.max_retries => {
                    item.retry_count += 1;
                    let delay = self.inner.backoff.delay_for_attempt(item.retry_count);
                    debug!(
                        id = item.id,
                        retry = item.retry_count,
                        max = item.max_retries,
                        ?delay,
                        error = %err,
                        "retrying task after backoff"
                    );
                    state.backing_off += 1;
                    retry = Some((delay, item));
                }
                Err(err) => {
                    state.stats.failed += 1;
                    state.stats.record_processing(processing_ms);
                    warn!(id = item.id, error = %err, "task failed terminally");
                    events.push(QueueEvent::RequestComplete {
                        id: item.id,
                        success: false,
                    });
                    let _ = item.tx.send(Err(err));
                }
            }
            if state.is_drained() {
                events.push(QueueEvent::Empty);
            }
            Self::refresh_status(&mut state, &mut events);
        }
        self.emit_all(events);

        if let Some((delay, item)) = retry {
            let queue = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                queue.requeue_front(item);
            });
        }
        self.pump();
    }

    /// Re-insert a retried item at the head of its bucket: retries jump
    /// ahead of fresh same-priority work.
    fn requeue_front(&self, item: QueueItem<T>) {
        {
            let mut state = self.inner.state.lock();
            state.backing_off -= 1;
            let priority = item.priority;
            state.bucket_mut(priority).push_front(item);
        }
        self.pump();
    }

    async fn run_batch(&self, batch_id: u64, members: Vec<QueueItem<T>>) {
        let size = members.len();
        debug!(batch_id, size, "dispatching batch");
        // Members run concurrently and settle independently; one member's
        // failure never affects its siblings.
        let drivers: Vec<_> = members
            .into_iter()
            .map(|member| self.run_member(member))
            .collect();
        join_all(drivers).await;

        let mut events = Vec::new();
        {
            let mut state = self.inner.state.lock();
            state.active.remove(&batch_id);
            if state.is_drained() {
                events.push(QueueEvent::Empty);
            }
            Self::refresh_status(&mut state, &mut events);
        }
        self.emit_all(events);
        self.pump();
    }

    /// Drive one batch member to settlement, retrying in place
    async fn run_member(&self, mut item: QueueItem<T>) {
        loop {
            let started = Instant::now();
            let outcome = match tokio::time::timeout(item.timeout, (item.task)()).await {
                Ok(result) => result,
                Err(_) => Err(ApiError::Timeout {
                    timeout: item.timeout,
                }),
            };
            let processing_ms = started.elapsed().as_secs_f64() * 1000.0;

            match outcome {
                Ok(value) => {
                    let event = {
                        let mut state = self.inner.state.lock();
                        state.stats.processed += 1;
                        state.stats.record_processing(processing_ms);
                        QueueEvent::RequestComplete {
                            id: item.id,
                            success: true,
                        }
                    };
                    self.inner.events.emit(&event);
                    let _ = item.tx.send(Ok(value));
                    return;
                }
                Err(err) if err.is_retryable() && item.retry_count < item.max_retries => {
                    item.retry_count += 1;
                    let delay = self.inner.backoff.delay_for_attempt(item.retry_count);
                    debug!(
                        id = item.id,
                        retry = item.retry_count,
                        ?delay,
                        error = %err,
                        "retrying batch member after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    let event = {
                        let mut state = self.inner.state.lock();
                        state.stats.failed += 1;
                        state.stats.record_processing(processing_ms);
                        QueueEvent::RequestComplete {
                            id: item.id,
                            success: false,
                        }
                    };
                    self.inner.events.emit(&event);
                    let _ = item.tx.send(Err(err));
                    return;
                }
            }
        }
    }

    fn start_batch_timer(&self) {
        let queue = self.clone();
        let epoch = self.inner.state.lock().batch_epoch;
        let delay = self.inner.config.batch_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.flush_batch(Some(epoch));
        });
        self.inner.state.lock().batch_timer = Some(handle);
    }

    /// Move the batch buffer into the ready queue. With `expected_epoch`
    /// set (the delay timer path), a buffer already flushed by size is left
    /// alone.
    fn flush_batch(&self, expected_epoch: Option<u64>) {
        {
            let mut state = self.inner.state.lock();
            if let Some(epoch) = expected_epoch {
                if state.batch_epoch != epoch {
                    return;
                }
            }
            state.batch_epoch += 1;
            if let Some(timer) = state.batch_timer.take() {
                timer.abort();
            }
            if state.batch.is_empty() {
                return;
            }
            let members = std::mem::take(&mut state.batch);
            debug!(size = members.len(), "flushing batch buffer");
            state.ready_batches.push_back(members);
        }
        self.pump();
    }
}
