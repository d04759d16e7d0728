use std::sync::atomic::{AtomicBool, Ordering};

/// Host hook consulted before a confirming full parse is forced.
///
/// Returns `true` while the interactive context is busy with something that
/// a reparse would disturb (an open completion popup, for instance). Only
/// called on the interactive context.
pub trait BusyProbe: Send + Sync {
    fn is_interactive_busy(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NeverBusy;

impl BusyProbe for NeverBusy {
    fn is_interactive_busy(&self) -> bool {
        false
    }
}

impl BusyProbe for AtomicBool {
    fn is_interactive_busy(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}
