//! Keyed, latest-wins batch queue.
//!
//! `enqueue` overwrites any pending payload for the same key. The first
//! enqueue into an empty queue arms one fixed-delay timer; when it fires, the
//! whole pending map is swapped out under the lock and drained on the batch
//! pool. Items enqueued during a drain start a fresh map and re-arm the timer
//! once the drain completes.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use quill_core::{ErrorContext, ErrorSink, PanicError};

use crate::{
    DebounceAction, DebounceEvent, DebouncePolicy, DebounceState, HostClock, PoolKind, Scheduler,
    TimerHandle,
};

const POLICY: DebouncePolicy = DebouncePolicy::FIXED;

/// Failure while processing one batch item.
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ItemError {
    /// Races with the file system (a file renamed or deleted underneath us)
    /// that are expected and not worth reporting.
    pub fn is_transient(&self) -> bool {
        match self {
            ItemError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::NotFound
                    | io::ErrorKind::PermissionDenied
                    | io::ErrorKind::AlreadyExists
                    | io::ErrorKind::Interrupted
            ),
            ItemError::Other(_) => false,
        }
    }
}

pub trait BatchProcessor<K, P>: Send + Sync {
    fn process(&self, key: &K, payload: P) -> Result<(), ItemError>;
}

impl<K, P, F> BatchProcessor<K, P> for F
where
    F: Fn(&K, P) -> Result<(), ItemError> + Send + Sync,
{
    fn process(&self, key: &K, payload: P) -> Result<(), ItemError> {
        self(key, payload)
    }
}

type Hook = Arc<dyn Fn() + Send + Sync>;
type WorkloadHook<K> = Arc<dyn Fn(&[K]) + Send + Sync>;

/// Synchronization points for tests. Not used for control flow.
pub struct BatchHooks<K> {
    pub on_drain_start: Option<Hook>,
    pub on_workload_captured: Option<WorkloadHook<K>>,
    pub on_drain_complete: Option<Hook>,
}

impl<K> Default for BatchHooks<K> {
    fn default() -> Self {
        Self {
            on_drain_start: None,
            on_workload_captured: None,
            on_drain_complete: None,
        }
    }
}

struct BatchState<K, P> {
    machine: DebounceState,
    pending: HashMap<K, P>,
    timer: Option<TimerHandle>,
    // Identifies the armed timer; stale callbacks are ignored.
    generation: u64,
}

struct BatchInner<K, P> {
    name: &'static str,
    delay: Duration,
    state: Mutex<BatchState<K, P>>,
    processor: Arc<dyn BatchProcessor<K, P>>,
    clock: Arc<dyn HostClock>,
    scheduler: Scheduler,
    errors: Arc<dyn ErrorSink>,
    hooks: BatchHooks<K>,
}

pub struct BatchWorker<K, P> {
    inner: Arc<BatchInner<K, P>>,
}

impl<K, P> Clone for BatchWorker<K, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, P> BatchWorker<K, P>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    P: Send + 'static,
{
    pub fn new(
        name: &'static str,
        delay: Duration,
        processor: Arc<dyn BatchProcessor<K, P>>,
        clock: Arc<dyn HostClock>,
        scheduler: Scheduler,
        errors: Arc<dyn ErrorSink>,
    ) -> Self {
        Self::with_hooks(
            name,
            delay,
            processor,
            clock,
            scheduler,
            errors,
            BatchHooks::default(),
        )
    }

    pub fn with_hooks(
        name: &'static str,
        delay: Duration,
        processor: Arc<dyn BatchProcessor<K, P>>,
        clock: Arc<dyn HostClock>,
        scheduler: Scheduler,
        errors: Arc<dyn ErrorSink>,
        hooks: BatchHooks<K>,
    ) -> Self {
        Self {
            inner: Arc::new(BatchInner {
                name,
                delay,
                state: Mutex::new(BatchState {
                    machine: DebounceState::Idle,
                    pending: HashMap::new(),
                    timer: None,
                    generation: 0,
                }),
                processor,
                clock,
                scheduler,
                errors,
                hooks,
            }),
        }
    }

    /// Insert or overwrite the payload for `key`. Never blocks on a drain.
    pub fn enqueue(&self, key: K, payload: P) {
        let mut state = self.inner.state.lock();
        state.pending.insert(key, payload);
        let (machine, action) = state.machine.on(DebounceEvent::Enqueued, POLICY);
        state.machine = machine;
        if action == DebounceAction::ArmTimer {
            BatchInner::arm(&self.inner, &mut state);
        }
    }

    pub fn state(&self) -> DebounceState {
        self.inner.state.lock().machine
    }

    /// Items waiting for the next drain.
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Drop pending items and cancel the armed timer. A drain in flight
    /// finishes normally.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.pending.clear();
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
        state.generation += 1;
        if state.machine == DebounceState::Scheduled {
            state.machine = DebounceState::Idle;
        }
    }
}

impl<K, P> BatchInner<K, P>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    P: Send + 'static,
{
    // Called with the state lock held; `HostClock` never fires synchronously.
    fn arm(this: &Arc<Self>, state: &mut BatchState<K, P>) {
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
        state.generation += 1;
        let generation = state.generation;
        let weak = Arc::downgrade(this);
        state.timer = Some(this.clock.schedule_once(
            this.delay,
            Box::new(move || Self::on_timer(weak, generation)),
        ));
    }

    fn on_timer(weak: Weak<Self>, generation: u64) {
        let Some(this) = weak.upgrade() else {
            return;
        };

        let workload = {
            let mut state = this.state.lock();
            if state.generation != generation {
                tracing::trace!(
                    target: "quill.batch",
                    worker = this.name,
                    "ignoring superseded timer"
                );
                return;
            }
            let (machine, action) = state.machine.on(DebounceEvent::TimerFired, POLICY);
            state.machine = machine;
            if action != DebounceAction::StartRun {
                return;
            }
            state.timer = None;
            std::mem::take(&mut state.pending)
        };

        let scheduler = this.scheduler.clone();
        scheduler.execute(PoolKind::Batch, move || this.drain(workload));
    }

    fn drain(self: Arc<Self>, workload: HashMap<K, P>) {
        if let Some(hook) = &self.hooks.on_drain_start {
            hook();
        }
        if let Some(hook) = &self.hooks.on_workload_captured {
            let keys: Vec<K> = workload.keys().cloned().collect();
            hook(&keys);
        }

        tracing::debug!(
            target: "quill.batch",
            worker = self.name,
            items = workload.len(),
            "draining batch"
        );

        for (key, payload) in workload {
            self.process_one(&key, payload);
        }

        {
            let mut state = self.state.lock();
            let more_work = !state.pending.is_empty();
            let (machine, action) = state
                .machine
                .on(DebounceEvent::RunFinished { more_work }, POLICY);
            state.machine = machine;
            if action == DebounceAction::ArmTimer {
                Self::arm(&self, &mut state);
            }
        }

        if let Some(hook) = &self.hooks.on_drain_complete {
            hook();
        }
    }

    fn process_one(&self, key: &K, payload: P) {
        let context = || ErrorContext::new(self.name).with_key(key);
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.processor.process(key, payload))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.is_transient() => {
                tracing::trace!(target: "quill.batch", ?key, error = %err, "dropping transient failure");
            }
            Ok(Err(err)) => self.errors.report(&err, context()),
            Err(panic) => {
                let err = PanicError::from_payload(&*panic);
                self.errors.report(&err, context());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use quill_core::RecordingErrorSink;

    use super::*;
    use crate::ManualClock;

    const DELAY: Duration = Duration::from_millis(1_000);

    struct Harness {
        clock: ManualClock,
        errors: Arc<RecordingErrorSink>,
        seen: Arc<Mutex<Vec<(String, u32)>>>,
        worker: BatchWorker<String, u32>,
    }

    fn harness(fail_on: Option<&'static str>) -> Harness {
        let clock = ManualClock::new();
        let errors = Arc::new(RecordingErrorSink::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_processor = Arc::clone(&seen);
        let processor = move |key: &String, payload: u32| -> Result<(), ItemError> {
            if Some(key.as_str()) == fail_on {
                return Err(anyhow::anyhow!("cannot process {key}").into());
            }
            seen_in_processor.lock().push((key.clone(), payload));
            Ok(())
        };
        let worker = BatchWorker::new(
            "batch",
            DELAY,
            Arc::new(processor),
            Arc::new(clock.clone()),
            Scheduler::new_inline(),
            errors.clone(),
        );
        Harness {
            clock,
            errors,
            seen,
            worker,
        }
    }

    #[test]
    fn latest_payload_wins() {
        let h = harness(None);
        h.worker.enqueue("a".into(), 1);
        h.worker.enqueue("a".into(), 2);
        assert_eq!(h.worker.pending_len(), 1);
        assert_eq!(h.clock.pending(), 1);

        h.clock.advance(DELAY);
        assert_eq!(*h.seen.lock(), vec![("a".to_owned(), 2)]);
        assert_eq!(h.worker.state(), DebounceState::Idle);
    }

    #[test]
    fn nothing_runs_before_the_delay() {
        let h = harness(None);
        h.worker.enqueue("a".into(), 1);
        h.clock.advance(DELAY - Duration::from_millis(1));
        assert!(h.seen.lock().is_empty());
        h.clock.advance(Duration::from_millis(1));
        assert_eq!(h.seen.lock().len(), 1);
    }

    #[test]
    fn one_failure_does_not_stop_the_batch() {
        let h = harness(Some("bad"));
        h.worker.enqueue("bad".into(), 1);
        h.worker.enqueue("good".into(), 2);
        h.clock.advance(DELAY);

        assert_eq!(*h.seen.lock(), vec![("good".to_owned(), 2)]);
        let reports = h.errors.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].context.key.as_deref(), Some("\"bad\""));
        assert_eq!(reports[0].message, "cannot process bad");
    }

    #[test]
    fn transient_io_errors_are_silent_and_panics_are_reported() {
        let clock = ManualClock::new();
        let errors = Arc::new(RecordingErrorSink::new());
        let processed = Arc::new(AtomicUsize::new(0));
        let processed_in = Arc::clone(&processed);
        let processor = move |key: &&'static str, _: ()| -> Result<(), ItemError> {
            processed_in.fetch_add(1, Ordering::SeqCst);
            match *key {
                "gone" => Err(io::Error::new(io::ErrorKind::NotFound, "gone").into()),
                "boom" => panic!("processor exploded"),
                _ => Ok(()),
            }
        };
        let worker = BatchWorker::new(
            "batch",
            DELAY,
            Arc::new(processor),
            Arc::new(clock.clone()),
            Scheduler::new_inline(),
            errors.clone(),
        );
        worker.enqueue("gone", ());
        worker.enqueue("boom", ());
        worker.enqueue("fine", ());
        clock.advance(DELAY);

        assert_eq!(processed.load(Ordering::SeqCst), 3);
        let reports = errors.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].message, "panicked: processor exploded");
        assert_eq!(reports[0].context.key.as_deref(), Some("\"boom\""));
    }

    #[test]
    fn enqueue_during_drain_rearms() {
        let clock = ManualClock::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let worker_slot: Arc<Mutex<Option<BatchWorker<u32, ()>>>> = Arc::new(Mutex::new(None));

        let seen_in = Arc::clone(&seen);
        let slot_in = Arc::clone(&worker_slot);
        let processor = move |key: &u32, _: ()| -> Result<(), ItemError> {
            seen_in.lock().push(*key);
            if *key == 1 {
                let worker = slot_in.lock().clone();
                if let Some(worker) = worker {
                    worker.enqueue(2, ());
                }
            }
            Ok(())
        };
        let captured = Arc::new(Mutex::new(Vec::new()));
        let captured_in = Arc::clone(&captured);
        let hooks = BatchHooks {
            on_workload_captured: Some(Arc::new(move |keys: &[u32]| {
                captured_in.lock().push(keys.to_vec());
            })),
            ..BatchHooks::default()
        };
        let worker = BatchWorker::with_hooks(
            "batch",
            DELAY,
            Arc::new(processor),
            Arc::new(clock.clone()),
            Scheduler::new_inline(),
            Arc::new(RecordingErrorSink::new()),
            hooks,
        );
        *worker_slot.lock() = Some(worker.clone());

        worker.enqueue(1, ());
        clock.advance(DELAY);
        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(worker.state(), DebounceState::Scheduled);
        assert_eq!(clock.pending(), 1);

        clock.advance(DELAY);
        assert_eq!(*seen.lock(), vec![1, 2]);
        assert_eq!(*captured.lock(), vec![vec![1], vec![2]]);
        assert_eq!(worker.state(), DebounceState::Idle);
    }

    #[test]
    fn shutdown_cancels_the_timer() {
        let h = harness(None);
        h.worker.enqueue("a".into(), 1);
        h.worker.shutdown();
        h.clock.advance(DELAY);
        assert!(h.seen.lock().is_empty());
        assert_eq!(h.worker.state(), DebounceState::Idle);
    }

    /// Hands out timers that the test fires by index, cancelled or not.
    #[derive(Default)]
    struct CapturingClock {
        timers: Mutex<Vec<(TimerHandle, Option<crate::TimerCallback>)>>,
    }

    impl CapturingClock {
        fn fire(&self, idx: usize) {
            let callback = self.timers.lock()[idx].1.take();
            if let Some(callback) = callback {
                callback();
            }
        }
    }

    impl HostClock for CapturingClock {
        fn schedule_once(&self, _delay: Duration, callback: crate::TimerCallback) -> TimerHandle {
            let handle = TimerHandle::new(tokio_util::sync::CancellationToken::new());
            self.timers.lock().push((handle.clone(), Some(callback)));
            handle
        }
    }

    #[test]
    fn timer_cancelled_by_shutdown_is_ignored() {
        let clock = Arc::new(CapturingClock::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_processor = Arc::clone(&seen);
        let processor = move |key: &String, payload: u32| -> Result<(), ItemError> {
            seen_in_processor.lock().push((key.clone(), payload));
            Ok(())
        };
        let worker = BatchWorker::new(
            "batch",
            DELAY,
            Arc::new(processor),
            clock.clone(),
            Scheduler::new_inline(),
            Arc::new(RecordingErrorSink::new()),
        );

        worker.enqueue("a".into(), 1);
        worker.shutdown();
        worker.enqueue("b".into(), 2);

        // The first timer fires after losing the race with `shutdown`.
        clock.fire(0);
        assert!(seen.lock().is_empty());
        assert_eq!(worker.state(), DebounceState::Scheduled);
        assert_eq!(worker.pending_len(), 1);

        clock.fire(1);
        assert_eq!(*seen.lock(), vec![("b".to_owned(), 2)]);
        assert_eq!(worker.state(), DebounceState::Idle);
    }
}
