//! The interactive execution context.
//!
//! Work that touches interactive-only state (structure-changed listeners, the
//! busy probe) runs through an [`InteractiveHandle`]. Closures receive an
//! [`Interactive`] capability, which can only be constructed here and is not
//! `Send`, so interactive-only APIs can demand `&Interactive` instead of
//! asserting on the current thread.
//!
//! A queued context mints the capability only on the thread that owns its
//! [`InteractiveQueue`]. An inline context has no owning thread: hosts that
//! choose [`InteractiveHandle::inline`] give up thread affinity and must make
//! their listeners safe to run from any thread.

use std::marker::PhantomData;

use crossbeam_channel::{Receiver, Sender};

type InteractiveJob = Box<dyn FnOnce(&Interactive) + Send + 'static>;

/// Proof that the caller runs in the interactive context.
#[derive(Debug)]
pub struct Interactive {
    _not_send: PhantomData<*const ()>,
}

impl Interactive {
    fn new() -> Self {
        Self {
            _not_send: PhantomData,
        }
    }

    fn enter<R>(f: impl FnOnce(&Interactive) -> R) -> R {
        f(&Interactive::new())
    }

    /// Run `f` with a capability minted on the current thread, for hosts that
    /// use [`InteractiveHandle::inline`].
    ///
    /// This waives thread affinity. Jobs dispatched through an inline handle
    /// run on whichever thread dispatches them, including background parse
    /// threads, so nothing guarantees that two holders of `&Interactive` share
    /// a thread.
    pub fn assume_inline<R>(f: impl FnOnce(&Interactive) -> R) -> R {
        Self::enter(f)
    }
}

/// Posts work to the interactive context.
#[derive(Clone)]
pub enum InteractiveHandle {
    /// Run dispatched jobs immediately on the dispatching thread, which may
    /// be a pool thread. See [`Interactive::assume_inline`].
    Inline,
    /// Queue jobs until the owning [`InteractiveQueue`] runs them.
    Queue(Sender<InteractiveJob>),
}

impl InteractiveHandle {
    pub fn inline() -> Self {
        InteractiveHandle::Inline
    }

    pub fn queued() -> (Self, InteractiveQueue) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let queue = InteractiveQueue {
            rx,
            _owner: PhantomData,
        };
        (InteractiveHandle::Queue(tx), queue)
    }

    pub fn dispatch<F>(&self, f: F)
    where
        F: FnOnce(&Interactive) + Send + 'static,
    {
        match self {
            InteractiveHandle::Inline => Interactive::enter(f),
            InteractiveHandle::Queue(tx) => {
                if tx.send(Box::new(f)).is_err() {
                    tracing::debug!(
                        target: "quill.scheduler",
                        "interactive queue closed; dropping job"
                    );
                }
            }
        }
    }
}

/// The receiving end of a queued interactive context.
///
/// Neither `Send` nor `Sync`: the thread that created it is the interactive
/// thread.
///
/// ```compile_fail
/// fn assert_send<T: Send>() {}
/// assert_send::<quill_scheduler::InteractiveQueue>();
/// ```
pub struct InteractiveQueue {
    rx: Receiver<InteractiveJob>,
    _owner: PhantomData<*const ()>,
}

impl InteractiveQueue {
    /// Run `f` in the interactive context.
    pub fn enter<R>(&self, f: impl FnOnce(&Interactive) -> R) -> R {
        Interactive::enter(f)
    }

    /// Run queued jobs until the queue is empty, including jobs queued by the
    /// jobs themselves. Returns the number of jobs run.
    pub fn run_pending(&self) -> usize {
        let cx = Interactive::new();
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job(&cx);
            ran += 1;
        }
        ran
    }

    /// Block until one job arrives, then run everything queued.
    pub fn run_next_blocking(&self) -> usize {
        let Ok(job) = self.rx.recv() else {
            return 0;
        };
        let cx = Interactive::new();
        job(&cx);
        1 + self.run_pending()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
