use std::sync::Arc;

use rayon::ThreadPool;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;

use quill_core::panic_payload_to_str;

use crate::{task::BlockingTask, CancellationToken, Cancelled, TaskError};

enum BlockingPool {
    Rayon(ThreadPool),
    Inline,
}

impl BlockingPool {
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            BlockingPool::Rayon(pool) => pool.spawn(job),
            BlockingPool::Inline => job(),
        }
    }
}

fn build_rayon_pool(prefix: &'static str, threads: usize) -> BlockingPool {
    // Thread creation can fail under low process limits; shrink the pool and
    // finally run jobs inline rather than failing startup.
    let mut threads = threads.max(1);
    loop {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |idx| format!("{prefix}-{idx}"))
            .build()
        {
            Ok(pool) => return BlockingPool::Rayon(pool),
            Err(_) if threads > 1 => {
                threads = (threads / 2).max(1);
            }
            Err(err) => {
                tracing::warn!(
                    target: "quill.scheduler",
                    pool = prefix,
                    error = %err,
                    "failed to start worker threads; running jobs inline"
                );
                return BlockingPool::Inline;
            }
        }
    }
}

fn build_io_runtime(threads: usize) -> Runtime {
    let mut threads = threads.max(1);
    loop {
        match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads)
            .enable_time()
            .thread_name("quill-io")
            .build()
        {
            Ok(rt) => return rt,
            Err(_) if threads > 1 => {
                threads = 1;
            }
            Err(err) => {
                return tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .unwrap_or_else(|_| panic!("failed to build IO runtime: {err}"));
            }
        }
    }
}

/// The background execution contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// Full parses requested by the re-parse scheduler.
    Parse,
    /// Drains of batched derived-artifact work.
    Batch,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub parse_threads: usize,
    pub batch_threads: usize,
    pub io_threads: usize,
}

impl SchedulerConfig {
    /// Apply optional thread-count overrides, keeping defaults for `None`.
    pub fn with_overrides(mut self, parse: Option<usize>, batch: Option<usize>) -> Self {
        if let Some(parse) = parse {
            self.parse_threads = parse;
        }
        if let Some(batch) = batch {
            self.batch_threads = batch;
        }
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            // `available_parallelism()` can report the host CPU count inside
            // containers; keep the defaults small.
            parse_threads: available.saturating_sub(1).clamp(1, 4),
            batch_threads: available.clamp(1, 2),
            io_threads: 1,
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    parse_pool: BlockingPool,
    batch_pool: BlockingPool,
    io_runtime: Option<Runtime>,
    io_handle: tokio::runtime::Handle,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let parse_pool = build_rayon_pool("quill-parse", config.parse_threads);
        let batch_pool = build_rayon_pool("quill-batch", config.batch_threads);
        let io_runtime = build_io_runtime(config.io_threads);
        let io_handle = io_runtime.handle().clone();

        Self {
            inner: Arc::new(SchedulerInner {
                parse_pool,
                batch_pool,
                io_runtime: Some(io_runtime),
                io_handle,
            }),
        }
    }

    /// Build a scheduler that reuses an existing Tokio runtime for timers.
    pub fn new_with_io_handle(config: SchedulerConfig, io_handle: tokio::runtime::Handle) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                parse_pool: build_rayon_pool("quill-parse", config.parse_threads),
                batch_pool: build_rayon_pool("quill-batch", config.batch_threads),
                io_runtime: None,
                io_handle,
            }),
        }
    }

    /// A scheduler that runs every blocking job on the calling thread.
    ///
    /// Combined with [`ManualClock`](crate::ManualClock) this makes the whole
    /// pipeline deterministic.
    pub fn new_inline() -> Self {
        let io_runtime = build_io_runtime(1);
        let io_handle = io_runtime.handle().clone();
        Self {
            inner: Arc::new(SchedulerInner {
                parse_pool: BlockingPool::Inline,
                batch_pool: BlockingPool::Inline,
                io_runtime: Some(io_runtime),
                io_handle,
            }),
        }
    }

    pub fn io_handle(&self) -> tokio::runtime::Handle {
        self.inner.io_handle.clone()
    }

    /// Run `f` on `pool`, catching panics.
    ///
    /// A panic is logged and surfaces as [`TaskError::Panicked`] from the
    /// returned task; it never tears down the worker thread.
    pub fn spawn_blocking_on<T, F>(
        &self,
        pool: PoolKind,
        token: CancellationToken,
        f: F,
    ) -> BlockingTask<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Result<T, Cancelled> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        if token.is_cancelled() {
            let _ = tx.send(Err(TaskError::Cancelled));
            return BlockingTask::new(token, rx);
        }

        let token_for_job = token.clone();
        let job = move || {
            let result =
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(token_for_job))) {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => Err(TaskError::from(err)),
                    Err(panic) => {
                        let message = panic_payload_to_str(&*panic);
                        tracing::error!(
                            target: "quill.scheduler",
                            pool = ?pool,
                            panic = %message,
                            "task panicked"
                        );
                        Err(TaskError::Panicked)
                    }
                };
            let _ = tx.send(result);
        };

        self.pool(pool).spawn(job);
        BlockingTask::new(token, rx)
    }

    /// Fire-and-forget variant of [`Scheduler::spawn_blocking_on`].
    pub fn execute<F>(&self, pool: PoolKind, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        drop(self.spawn_blocking_on(pool, CancellationToken::new(), move |_| {
            f();
            Ok(())
        }));
    }

    fn pool(&self, kind: PoolKind) -> &BlockingPool {
        match kind {
            PoolKind::Parse => &self.inner.parse_pool,
            PoolKind::Batch => &self.inner.batch_pool,
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        if let Some(runtime) = self.io_runtime.take() {
            runtime.shutdown_background();
        }
    }
}
