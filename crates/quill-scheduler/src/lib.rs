//! Execution contexts, timers, and debounced queues for Quill.
//!
//! - [`Scheduler`] owns the background thread pools (parsing and batch work)
//!   and a small IO runtime used for timers.
//! - [`HostClock`] is the single-shot timer primitive; [`TokioClock`] drives it
//!   from the IO runtime and [`ManualClock`] from explicit `advance` calls.
//! - [`InteractiveHandle`] / [`Interactive`] model the interactive (UI-affine)
//!   context as a capability instead of thread assertions.
//! - [`DebounceState`] is the transition function shared by every debounced
//!   queue, and [`BatchWorker`] is the keyed latest-wins batch queue.

mod batch;
mod clock;
mod debounce;
mod executor;
mod scheduler;
mod task;

pub use batch::{BatchHooks, BatchProcessor, BatchWorker, ItemError};
pub use clock::{HostClock, ManualClock, TimerCallback, TimerHandle, TokioClock};
pub use debounce::{DebounceAction, DebounceEvent, DebouncePolicy, DebounceState, Rearm, Window};
pub use executor::{Interactive, InteractiveHandle, InteractiveQueue};
pub use scheduler::{PoolKind, Scheduler, SchedulerConfig};
pub use task::BlockingTask;
pub use tokio_util::sync::CancellationToken;

/// Marker error for cooperative cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("cancelled")]
pub struct Cancelled;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task was cancelled")]
    Cancelled,
    #[error("task panicked")]
    Panicked,
}

impl From<Cancelled> for TaskError {
    fn from(_: Cancelled) -> Self {
        TaskError::Cancelled
    }
}
