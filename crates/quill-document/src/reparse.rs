//! Debounced background full parses for one document.
//!
//! The scheduler owns a single pending slot. Every enqueue replaces the slot
//! (the replaced reference is not cancelled, it simply never runs) and restarts
//! the debounce timer. When the timer fires, the latest reference is taken and
//! parsed on the parse pool; work that arrived in the meantime is picked up by
//! looping straight into another run, so at most one parse is in flight.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use quill_core::{ErrorContext, ErrorSink, PanicError, Snapshot, TextEdit};
use quill_scheduler::{
    CancellationToken, DebounceAction, DebounceEvent, DebouncePolicy, DebounceState, HostClock,
    PoolKind, Scheduler, TimerHandle,
};
use quill_syntax::{Parse, Tree};

const POLICY: DebouncePolicy = DebouncePolicy::TRAILING;

/// One unit of pending background work.
#[derive(Clone)]
pub struct ChangeReference {
    inner: Arc<ChangeInner>,
}

struct ChangeInner {
    id: u64,
    edit: Option<TextEdit>,
    snapshot: Snapshot,
    token: CancellationToken,
    latest: Arc<AtomicU64>,
}

impl ChangeReference {
    fn new(id: u64, edit: Option<TextEdit>, snapshot: Snapshot, latest: Arc<AtomicU64>) -> Self {
        Self {
            inner: Arc::new(ChangeInner {
                id,
                edit,
                snapshot,
                token: CancellationToken::new(),
                latest,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The edit that triggered this work; `None` means "reparse the snapshot".
    pub fn edit(&self) -> Option<&TextEdit> {
        self.inner.edit.as_ref()
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.inner.snapshot
    }

    pub fn version(&self) -> u64 {
        self.inner.snapshot.version()
    }

    /// `false` once a newer reference was enqueued.
    pub fn is_latest(&self) -> bool {
        self.inner.latest.load(Ordering::Acquire) == self.inner.id
    }

    /// Prevent this reference from running if it has not been dispatched, and
    /// discard its result if it has.
    pub fn cancel(&self) {
        self.inner.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }
}

impl fmt::Debug for ChangeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeReference")
            .field("id", &self.inner.id)
            .field("version", &self.version())
            .field("edit", &self.inner.edit)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Receives the results of background parses.
pub trait ReparseListener: Send + Sync {
    /// Tree the next full parse may reuse.
    fn prior_tree(&self) -> Option<Tree>;

    /// Called on the parse pool with the tree for `reference.snapshot()`.
    fn reparsed(&self, reference: &ChangeReference, tree: Tree);
}

#[derive(Clone)]
pub struct ReparseScheduler {
    inner: Arc<ReparseInner>,
}

struct ReparseState {
    machine: DebounceState,
    pending: Option<ChangeReference>,
    timer: Option<TimerHandle>,
    // Bumped whenever `timer` is replaced or cancelled; a firing timer whose
    // generation no longer matches is stale.
    generation: u64,
    next_id: u64,
    shut_down: bool,
}

struct ReparseInner {
    debounce: Duration,
    state: Mutex<ReparseState>,
    latest: Arc<AtomicU64>,
    runs: AtomicUsize,
    parser: Arc<dyn Parse>,
    errors: Arc<dyn ErrorSink>,
    clock: Arc<dyn HostClock>,
    scheduler: Scheduler,
    listener: Weak<dyn ReparseListener>,
}

impl ReparseScheduler {
    pub fn new(
        debounce: Duration,
        parser: Arc<dyn Parse>,
        errors: Arc<dyn ErrorSink>,
        clock: Arc<dyn HostClock>,
        scheduler: Scheduler,
        listener: Weak<dyn ReparseListener>,
    ) -> Self {
        Self {
            inner: Arc::new(ReparseInner {
                debounce,
                state: Mutex::new(ReparseState {
                    machine: DebounceState::Idle,
                    pending: None,
                    timer: None,
                    generation: 0,
                    next_id: 1,
                    shut_down: false,
                }),
                latest: Arc::new(AtomicU64::new(0)),
                runs: AtomicUsize::new(0),
                parser,
                errors,
                clock,
                scheduler,
                listener,
            }),
        }
    }

    /// Make `snapshot` the latest pending work. Never blocks on a parse.
    pub fn enqueue(&self, edit: Option<TextEdit>, snapshot: Snapshot) -> ChangeReference {
        let mut state = self.inner.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        self.inner.latest.store(id, Ordering::Release);
        let reference = ChangeReference::new(id, edit, snapshot, Arc::clone(&self.inner.latest));

        if state.shut_down {
            reference.cancel();
            return reference;
        }

        tracing::trace!(
            target: "quill.reparse",
            id,
            version = reference.version(),
            state = ?state.machine,
            "enqueue full parse"
        );

        state.pending = Some(reference.clone());
        let (machine, action) = state.machine.on(DebounceEvent::Enqueued, POLICY);
        state.machine = machine;
        if matches!(
            action,
            DebounceAction::ArmTimer | DebounceAction::RestartTimer
        ) {
            ReparseInner::rearm(&self.inner, &mut state);
        }
        reference
    }

    /// Drop the pending reference, if any. A parse already running finishes.
    pub fn cancel_pending(&self) -> Option<ChangeReference> {
        let mut state = self.inner.state.lock();
        let pending = state.pending.take()?;
        pending.cancel();
        if state.machine == DebounceState::Scheduled {
            if let Some(timer) = state.timer.take() {
                timer.cancel();
            }
            state.generation += 1;
            state.machine = DebounceState::Idle;
        }
        Some(pending)
    }

    pub fn pending(&self) -> Option<ChangeReference> {
        self.inner.state.lock().pending.clone()
    }

    pub fn state(&self) -> DebounceState {
        self.inner.state.lock().machine
    }

    /// Number of full parses started so far.
    pub fn run_count(&self) -> usize {
        self.inner.runs.load(Ordering::SeqCst)
    }

    /// Stop accepting work. Later enqueues return cancelled references.
    pub fn shutdown(&self) {
        self.inner.state.lock().shut_down = true;
        self.cancel_pending();
    }
}

impl ReparseInner {
    // Called with the state lock held; `HostClock` never fires synchronously.
    fn rearm(this: &Arc<Self>, state: &mut ReparseState) {
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
        state.generation += 1;
        let generation = state.generation;
        let weak = Arc::downgrade(this);
        state.timer = Some(this.clock.schedule_once(
            this.debounce,
            Box::new(move || Self::on_timer(weak, generation)),
        ));
    }

    // A cancelled timer may already be running when it is superseded, so the
    // generation is checked under the lock before acting on it.
    fn on_timer(weak: Weak<Self>, generation: u64) {
        let Some(this) = weak.upgrade() else {
            return;
        };
        {
            let mut state = this.state.lock();
            if state.generation != generation {
                tracing::trace!(
                    target: "quill.reparse",
                    generation,
                    current = state.generation,
                    "ignoring superseded debounce timer"
                );
                return;
            }
            let (machine, action) = state.machine.on(DebounceEvent::TimerFired, POLICY);
            state.machine = machine;
            if action != DebounceAction::StartRun {
                return;
            }
            state.timer = None;
        }

        let scheduler = this.scheduler.clone();
        scheduler.execute(PoolKind::Parse, move || this.run_loop());
    }

    fn run_loop(&self) {
        loop {
            let reference = self.state.lock().pending.take();
            match reference {
                Some(reference) if reference.is_cancelled() => {
                    tracing::trace!(target: "quill.reparse", id = reference.id(), "skipping cancelled reference");
                }
                Some(reference) => self.run_once(&reference),
                None => {}
            }

            let mut state = self.state.lock();
            let more_work = state.pending.is_some();
            let (machine, action) = state
                .machine
                .on(DebounceEvent::RunFinished { more_work }, POLICY);
            state.machine = machine;
            if action != DebounceAction::RunAgain {
                return;
            }
        }
    }

    fn run_once(&self, reference: &ChangeReference) {
        let Some(listener) = self.listener.upgrade() else {
            return;
        };
        let snapshot = reference.snapshot();
        let context = || ErrorContext::new("reparse").with_version(snapshot.version());
        self.runs.fetch_add(1, Ordering::SeqCst);

        let prior = listener.prior_tree();
        let parsed = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.parser.parse(snapshot, prior.as_ref())
        }));
        let tree = match parsed {
            Ok(Ok(tree)) => tree,
            Ok(Err(err)) => {
                self.errors.report(&err, context());
                return;
            }
            Err(panic) => {
                self.errors.report(&PanicError::from_payload(&*panic), context());
                return;
            }
        };

        if reference.is_cancelled() {
            tracing::debug!(
                target: "quill.reparse",
                version = snapshot.version(),
                "discarding result of cancelled parse"
            );
            return;
        }

        tracing::debug!(
            target: "quill.reparse",
            version = tree.version(),
            errors = tree.errors().len(),
            "full parse finished"
        );
        let published = std::panic::catch_unwind(AssertUnwindSafe(|| {
            listener.reparsed(reference, tree);
        }));
        if let Err(panic) = published {
            self.errors.report(&PanicError::from_payload(&*panic), context());
        }
    }
}

#[cfg(test)]
mod tests {
    use quill_core::RecordingErrorSink;
    use quill_scheduler::ManualClock;
    use quill_syntax::{parse_snapshot, ParseError};

    use super::*;

    const DEBOUNCE: Duration = Duration::from_millis(250);

    #[derive(Default)]
    struct Collect {
        trees: Mutex<Vec<Tree>>,
    }

    impl ReparseListener for Collect {
        fn prior_tree(&self) -> Option<Tree> {
            self.trees.lock().last().cloned()
        }

        fn reparsed(&self, _reference: &ChangeReference, tree: Tree) {
            self.trees.lock().push(tree);
        }
    }

    fn scheduler_with(
        parser: Arc<dyn Parse>,
    ) -> (ReparseScheduler, ManualClock, Arc<Collect>, Arc<RecordingErrorSink>) {
        let clock = ManualClock::new();
        let listener = Arc::new(Collect::default());
        let errors = Arc::new(RecordingErrorSink::new());
        let weak: Weak<Collect> = Arc::downgrade(&listener);
        let scheduler = ReparseScheduler::new(
            DEBOUNCE,
            parser,
            errors.clone(),
            Arc::new(clock.clone()),
            Scheduler::new_inline(),
            weak,
        );
        (scheduler, clock, listener, errors)
    }

    fn full_parser() -> Arc<dyn Parse> {
        Arc::new(|snapshot: &Snapshot, _: Option<&Tree>| -> Result<Tree, ParseError> {
            Ok(parse_snapshot(snapshot))
        })
    }

    #[test]
    fn edits_within_the_window_coalesce_into_one_parse() {
        let (scheduler, clock, listener, _) = scheduler_with(full_parser());
        let first = scheduler.enqueue(None, Snapshot::new(1, "a"));
        clock.advance(Duration::from_millis(100));
        let second = scheduler.enqueue(None, Snapshot::new(2, "ab"));
        assert!(!first.is_latest());
        assert!(!first.is_cancelled());
        assert!(second.is_latest());

        clock.advance(Duration::from_millis(200));
        assert_eq!(scheduler.run_count(), 0, "window restarts on every enqueue");

        clock.advance(Duration::from_millis(50));
        assert_eq!(scheduler.run_count(), 1);
        let trees = listener.trees.lock();
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].version(), 2);
        assert!(scheduler.state().is_idle());
    }

    #[test]
    fn parser_failures_are_reported_and_the_scheduler_recovers() {
        let parser: Arc<dyn Parse> =
            Arc::new(|snapshot: &Snapshot, _: Option<&Tree>| -> Result<Tree, ParseError> {
                match snapshot.text() {
                    "panic" => panic!("parser blew up"),
                    "fail" => Err(ParseError::Failed("bad input".to_owned())),
                    _ => Ok(parse_snapshot(snapshot)),
                }
            });
        let (scheduler, clock, listener, errors) = scheduler_with(parser);

        scheduler.enqueue(None, Snapshot::new(1, "panic"));
        clock.advance(DEBOUNCE);
        assert!(scheduler.state().is_idle());

        scheduler.enqueue(None, Snapshot::new(2, "fail"));
        clock.advance(DEBOUNCE);
        assert!(scheduler.state().is_idle());

        scheduler.enqueue(None, Snapshot::new(3, "ok"));
        clock.advance(DEBOUNCE);

        let messages: Vec<_> = errors.reports().into_iter().map(|r| r.message).collect();
        assert_eq!(
            messages,
            vec!["panicked: parser blew up", "parser failed: bad input"]
        );
        assert_eq!(errors.reports()[0].context.version, Some(1));
        assert_eq!(listener.trees.lock().len(), 1);
        assert_eq!(scheduler.run_count(), 3);
    }

    #[test]
    fn work_arriving_during_a_run_loops_into_another_run() {
        let slot: Arc<Mutex<Option<ReparseScheduler>>> = Arc::new(Mutex::new(None));
        let slot_in = Arc::clone(&slot);
        let parser: Arc<dyn Parse> =
            Arc::new(move |snapshot: &Snapshot, _: Option<&Tree>| -> Result<Tree, ParseError> {
                if snapshot.version() == 1 {
                    let scheduler = slot_in.lock().clone();
                    if let Some(scheduler) = scheduler {
                        assert_eq!(scheduler.state(), DebounceState::Running);
                        scheduler.enqueue(None, Snapshot::new(2, "newer"));
                    }
                }
                Ok(parse_snapshot(snapshot))
            });
        let (scheduler, clock, listener, _) = scheduler_with(parser);
        *slot.lock() = Some(scheduler.clone());

        scheduler.enqueue(None, Snapshot::new(1, "older"));
        clock.advance(DEBOUNCE);

        let versions: Vec<_> = listener.trees.lock().iter().map(Tree::version).collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(scheduler.run_count(), 2);
        assert!(scheduler.state().is_idle());
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn cancelled_pending_work_never_runs() {
        let (scheduler, clock, listener, _) = scheduler_with(full_parser());
        let reference = scheduler.enqueue(None, Snapshot::new(1, "a"));
        let cancelled = scheduler.cancel_pending().unwrap();
        assert_eq!(cancelled.id(), reference.id());
        assert!(reference.is_cancelled());
        assert!(scheduler.state().is_idle());

        clock.advance(DEBOUNCE);
        assert_eq!(scheduler.run_count(), 0);
        assert!(listener.trees.lock().is_empty());
    }

    /// Hands out callbacks instead of firing them, so a test can run a timer
    /// after it was cancelled, as a real clock racing `cancel` would.
    #[derive(Default)]
    struct CapturingClock {
        timers: Mutex<Vec<(TimerHandle, Option<quill_scheduler::TimerCallback>)>>,
    }

    impl CapturingClock {
        fn fire(&self, idx: usize) {
            let callback = self.timers.lock()[idx].1.take();
            if let Some(callback) = callback {
                callback();
            }
        }

        fn live(&self) -> Vec<usize> {
            self.timers
                .lock()
                .iter()
                .enumerate()
                .filter(|(_, (handle, _))| !handle.is_cancelled())
                .map(|(idx, _)| idx)
                .collect()
        }
    }

    impl HostClock for CapturingClock {
        fn schedule_once(
            &self,
            _delay: Duration,
            callback: quill_scheduler::TimerCallback,
        ) -> TimerHandle {
            let handle = TimerHandle::new(CancellationToken::new());
            self.timers.lock().push((handle.clone(), Some(callback)));
            handle
        }
    }

    #[test]
    fn superseded_timers_never_start_a_run() {
        let clock = Arc::new(CapturingClock::default());
        let listener = Arc::new(Collect::default());
        let weak: Weak<Collect> = Arc::downgrade(&listener);
        let scheduler = ReparseScheduler::new(
            DEBOUNCE,
            full_parser(),
            Arc::new(RecordingErrorSink::new()),
            clock.clone(),
            Scheduler::new_inline(),
            weak,
        );

        scheduler.enqueue(None, Snapshot::new(1, "a"));
        scheduler.enqueue(None, Snapshot::new(2, "ab"));
        assert_eq!(clock.live(), vec![1]);

        // The first timer lost the race with its cancellation.
        clock.fire(0);
        assert_eq!(scheduler.run_count(), 0);
        assert_eq!(scheduler.state(), DebounceState::Scheduled);

        scheduler.enqueue(None, Snapshot::new(3, "abc"));
        assert_eq!(clock.live(), vec![2], "exactly one timer armed");
        clock.fire(1);
        assert_eq!(scheduler.run_count(), 0);

        clock.fire(2);
        let versions: Vec<_> = listener.trees.lock().iter().map(Tree::version).collect();
        assert_eq!(versions, vec![3]);
        assert!(scheduler.state().is_idle());
        assert_eq!(clock.timers.lock().len(), 3, "no timer armed after the run");
    }

    #[test]
    fn shutdown_rejects_new_work() {
        let (scheduler, clock, _, _) = scheduler_with(full_parser());
        scheduler.shutdown();
        let reference = scheduler.enqueue(None, Snapshot::new(1, "a"));
        assert!(reference.is_cancelled());
        clock.advance(DEBOUNCE);
        assert_eq!(scheduler.run_count(), 0);
    }
}
