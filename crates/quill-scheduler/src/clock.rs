//! Single-shot timers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::CancellationToken;

pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Host-provided single-shot timer.
///
/// Implementations invoke the callback at most once, after at least `delay`,
/// unless the returned handle is cancelled first. Callbacks must be invoked
/// without any clock-internal lock held.
pub trait HostClock: Send + Sync {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;
}

/// Cancels a scheduled timer. Dropping the handle does *not* cancel it.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Timers driven by a Tokio runtime.
#[derive(Clone)]
pub struct TokioClock {
    handle: tokio::runtime::Handle,
}

impl TokioClock {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }
}

impl HostClock for TokioClock {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let token = CancellationToken::new();
        let token_for_task = token.clone();
        self.handle.spawn(async move {
            tokio::select! {
                biased;
                _ = token_for_task.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if !token_for_task.is_cancelled() {
                        callback();
                    }
                }
            }
        });
        TimerHandle::new(token)
    }
}

struct ManualTimer {
    token: CancellationToken,
    callback: TimerCallback,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    timers: BTreeMap<(Duration, u64), ManualTimer>,
}

/// A clock that only advances when told to.
///
/// Timers fire from [`ManualClock::advance`] on the calling thread, in
/// deadline order (ties in scheduling order).
#[derive(Clone, Default)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
    next_seq: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Number of scheduled timers that have neither fired nor been cancelled.
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .timers
            .values()
            .filter(|timer| !timer.token.is_cancelled())
            .count()
    }

    /// Move time forward by `by`, firing every timer that becomes due.
    ///
    /// Timers scheduled by a callback fire in the same call if their deadline
    /// is still within the advanced window.
    pub fn advance(&self, by: Duration) {
        let target = self.state.lock().now + by;
        loop {
            let due = {
                let mut state = self.state.lock();
                let next_key = state
                    .timers
                    .keys()
                    .next()
                    .copied()
                    .filter(|(deadline, _)| *deadline <= target);
                match next_key {
                    Some(key) => {
                        state.now = state.now.max(key.0);
                        state.timers.remove(&key)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };

            let Some(timer) = due else {
                break;
            };
            if !timer.token.is_cancelled() {
                (timer.callback)();
            }
        }
    }
}

impl HostClock for ManualClock {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let token = CancellationToken::new();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        let deadline = state.now + delay;
        state.timers.insert(
            (deadline, seq),
            ManualTimer {
                token: token.clone(),
                callback,
            },
        );
        TimerHandle::new(token)
    }
}
