//! C9: an async channel pipeline. Each `add_block` call appends a stage;
//! a stage's `parallelism` fans the upstream channel out to that many
//! worker tasks and immediately fans their output back into one channel, so
//! the pipeline's "tail" is always a single channel regardless of any
//! individual stage's internal fan-out width. `preserve_order` materializes
//! a terminal reorder stage at `build()` time that restores the original
//! write order across whatever fan-out happened upstream.

use crate::envelope::Envelope;
use crate::storage::{self, PipelineId, Storage};
use futures::future::BoxFuture;
use lattice_core::{Error, Result, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A stage transform: given an envelope and a cancellation token scoped to
/// this invocation, asynchronously produce the next envelope or fail.
pub type Transform<V> =
    Arc<dyn Fn(Envelope<V>, CancellationToken) -> BoxFuture<'static, Result<Envelope<V>>> + Send + Sync>;

type StageItem<V> = Result<Envelope<V>>;

/// Configuration for one [`ChannelPipeline::add_block`] call.
pub struct BlockOptions<V> {
    /// The user transform this block applies to each envelope.
    pub transform: Transform<V>,
    /// Number of concurrent worker tasks fed from this block's upstream
    /// channel. `0` is treated as `1`.
    pub parallelism: usize,
    /// Modifiers to wrap around `transform`, first element outermost.
    pub modifiers: Vec<crate::modifiers::Modifier<V>>,
    /// Invoked on a transform failure instead of propagating it downstream;
    /// when present, the failed envelope is dropped and the stage keeps
    /// processing subsequent envelopes.
    pub on_error: Option<Arc<dyn Fn(&Error) + Send + Sync>>,
}

impl<V: Value> Default for BlockOptions<V> {
    fn default() -> Self {
        Self {
            transform: Arc::new(|envelope, _cancel| Box::pin(async move { Ok(envelope) })),
            parallelism: 1,
            modifiers: Vec::new(),
            on_error: None,
        }
    }
}

const DEFAULT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_REORDER_CAPACITY: usize = 10_000;
const DEFAULT_DISPOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// An async channel pipeline: a chain of stages connected by bounded
/// channels, optionally terminating in an order-restoring reorder buffer.
pub struct ChannelPipeline<V> {
    id: PipelineId,
    next_index: AtomicU64,
    cancel: CancellationToken,
    channel_capacity: usize,
    reorder_capacity: usize,
    preserve_order: bool,
    input_tx: Mutex<Option<mpsc::Sender<StageItem<V>>>>,
    tail: Mutex<Option<mpsc::Receiver<StageItem<V>>>>,
    output: Mutex<Option<mpsc::Receiver<StageItem<V>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    built: AtomicBool,
    disposed: AtomicBool,
}

impl<V: Value> ChannelPipeline<V> {
    /// Build an empty pipeline. `preserve_order` controls whether
    /// [`build`](Self::build) installs a terminal reorder stage.
    #[must_use]
    pub fn new(preserve_order: bool) -> Self {
        Self::with_capacities(preserve_order, DEFAULT_CHANNEL_CAPACITY, DEFAULT_REORDER_CAPACITY)
    }

    /// As [`new`](Self::new), with explicit channel and reorder-buffer
    /// capacities.
    #[must_use]
    pub fn with_capacities(preserve_order: bool, channel_capacity: usize, reorder_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        Self {
            id: PipelineId::new(),
            next_index: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            channel_capacity: channel_capacity.max(1),
            reorder_capacity,
            preserve_order,
            input_tx: Mutex::new(Some(tx)),
            tail: Mutex::new(Some(rx)),
            output: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            built: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Attach `storage` so blocks on this pipeline can reach it via
    /// [`storage`](Self::storage). Per spec §4.9, storages are injected
    /// before stages are added.
    pub fn attach_storage(&self, key: impl Into<String>, storage: Arc<dyn Storage>) {
        storage::attach(self.id, key, storage);
    }

    /// Look up storage previously attached under `key`.
    #[must_use]
    pub fn storage(&self, key: &str) -> Option<Arc<dyn Storage>> {
        storage::lookup(self.id, key)
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_tail(&self) -> Result<mpsc::Receiver<StageItem<V>>> {
        self.tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| {
                Error::invalid_operation(
                    "no pipeline tail available (build already called, or add_block called out of order)",
                )
            })
    }

    /// Wrap `transform` with `modifiers` in order, first element outermost.
    fn wrap_modifiers(transform: Transform<V>, modifiers: Vec<crate::modifiers::Modifier<V>>) -> Transform<V> {
        modifiers
            .into_iter()
            .rev()
            .fold(transform, |inner, modifier| modifier.wrap(inner))
    }

    /// Append a stage. Must not be called after [`build`](Self::build).
    pub fn add_block(&self, options: BlockOptions<V>) -> Result<()> {
        if self.built.load(Ordering::SeqCst) {
            return Err(Error::invalid_operation("add_block called after build"));
        }

        let transform = Self::wrap_modifiers(options.transform, options.modifiers);
        let upstream = self.take_tail()?;
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let parallelism = options.parallelism.max(1);
        let cancel = self.cancel.clone();

        if parallelism == 1 {
            let handle = tokio::spawn(run_worker(upstream, tx, transform, options.on_error, cancel));
            self.lock_tasks().push(handle);
        } else {
            let mut dist_txs = Vec::with_capacity(parallelism);
            let mut worker_handles = Vec::with_capacity(parallelism);
            for _ in 0..parallelism {
                let (worker_tx, worker_rx) = mpsc::channel(self.channel_capacity);
                dist_txs.push(worker_tx);
                worker_handles.push(tokio::spawn(run_worker(
                    worker_rx,
                    tx.clone(),
                    Arc::clone(&transform),
                    options.on_error.clone(),
                    cancel.clone(),
                )));
            }
            let distributor = tokio::spawn(run_distributor(upstream, dist_txs));
            let mut guard = self.lock_tasks();
            guard.push(distributor);
            guard.extend(worker_handles);
        }

        *self.tail.lock().unwrap_or_else(PoisonError::into_inner) = Some(rx);
        Ok(())
    }

    /// Allocate a fresh index and enqueue `value` on the pipeline's input
    /// channel. Fails if the pipeline has been disposed or its input
    /// already completed.
    pub async fn write_async(&self, value: V, cancel: CancellationToken) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::invalid_operation("write after dispose"));
        }
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let tx = self
            .input_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::invalid_operation("pipeline input already completed"))?;

        tokio::select! {
            () = cancel.cancelled() => Err(Error::Cancelled),
            result = tx.send(Ok(Envelope { index, value })) => {
                result.map_err(|_| Error::invalid_operation("pipeline input channel closed"))
            }
        }
    }

    /// Signal no more inputs and await every stage task draining its queue.
    pub async fn complete_async(&self) {
        self.input_tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.lock_tasks());
        let _ = futures::future::join_all(handles).await;
    }

    /// Materialize the terminal reader: a reorder stage if `preserve_order`
    /// was set, otherwise the last stage's output channel directly.
    /// Idempotent after the first call.
    pub fn build(&self) -> Result<()> {
        if self.built.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let tail = self.take_tail()?;
        if self.preserve_order {
            let (tx, rx) = mpsc::channel(self.channel_capacity);
            let capacity = self.reorder_capacity;
            let handle = tokio::spawn(run_reorder_stage(tail, tx, capacity));
            self.lock_tasks().push(handle);
            *self.output.lock().unwrap_or_else(PoisonError::into_inner) = Some(rx);
        } else {
            *self.output.lock().unwrap_or_else(PoisonError::into_inner) = Some(tail);
        }
        Ok(())
    }

    /// Read the next output envelope, or `None` once the pipeline has
    /// drained. Assumes a single reader; concurrent callers may each see a
    /// subset of the stream rather than all of it.
    pub async fn read_async(&self) -> Option<Result<Envelope<V>>> {
        let mut rx = self.output.lock().unwrap_or_else(PoisonError::into_inner).take()?;
        let item = rx.recv().await;
        *self.output.lock().unwrap_or_else(PoisonError::into_inner) = Some(rx);
        item
    }

    /// Cancel the completion token, complete all writers, await outstanding
    /// tasks up to 30 seconds, and release this pipeline's storage entries.
    pub async fn dispose_async(&self) {
        self.cancel.cancel();
        self.disposed.store(true, Ordering::SeqCst);
        self.input_tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.lock_tasks());
        if tokio::time::timeout(DEFAULT_DISPOSE_TIMEOUT, futures::future::join_all(handles))
            .await
            .is_err()
        {
            tracing::warn!("pipeline dispose timed out waiting for stage tasks, treating as leaked");
        }
        storage::release(self.id);
    }
}

async fn run_worker<V: Value>(
    mut rx: mpsc::Receiver<StageItem<V>>,
    tx: mpsc::Sender<StageItem<V>>,
    transform: Transform<V>,
    on_error: Option<Arc<dyn Fn(&Error) + Send + Sync>>,
    cancel: CancellationToken,
) {
    while let Some(item) = rx.recv().await {
        match item {
            Ok(envelope) => match transform(envelope, cancel.child_token()).await {
                Ok(out) => {
                    if tx.send(Ok(out)).await.is_err() {
                        break;
                    }
                }
                Err(Error::Cancelled) => {}
                Err(e) => {
                    if let Some(callback) = &on_error {
                        callback(&e);
                    } else if tx.send(Err(e)).await.is_err() {
                        break;
                    }
                }
            },
            Err(e) => {
                if tx.send(Err(e)).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn run_distributor<V: Value>(mut rx: mpsc::Receiver<StageItem<V>>, targets: Vec<mpsc::Sender<StageItem<V>>>) {
    let mut next = 0usize;
    while let Some(item) = rx.recv().await {
        let target = &targets[next % targets.len()];
        if target.send(item).await.is_err() {
            break;
        }
        next += 1;
    }
}

async fn run_reorder_stage<V: Value>(
    mut rx: mpsc::Receiver<StageItem<V>>,
    tx: mpsc::Sender<StageItem<V>>,
    capacity: usize,
) {
    let mut buffer: HashMap<u64, StageItem<V>> = HashMap::new();
    let mut next_expected = 0u64;

    while let Some(item) = rx.recv().await {
        let Ok(envelope) = &item else {
            // An upstream failure carries no ordering guarantee of its own;
            // surface it immediately rather than blocking the buffer on it.
            let _ = tx.send(item).await;
            continue;
        };
        buffer.insert(envelope.index, item);

        if buffer.len() > capacity {
            let _ = tx
                .send(Err(Error::invalid_operation("reorder buffer overflow")))
                .await;
            return;
        }

        while let Some(next_item) = buffer.remove(&next_expected) {
            if tx.send(next_item).await.is_err() {
                return;
            }
            next_expected += 1;
        }
    }
}
