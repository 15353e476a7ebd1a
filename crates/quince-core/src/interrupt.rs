use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::QuinceError;
use once_cell::sync::Lazy;

static INTERRUPTED: Lazy<Arc<AtomicBool>> = Lazy::new(|| Arc::new(AtomicBool::new(false)));

/// Shared flag handed to signal-hook's flag API.
pub fn interrupt_flag() -> Arc<AtomicBool> {
    Arc::clone(&INTERRUPTED)
}

pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Cleared at the start of each top-level evaluation.
pub fn clear_interrupt() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

/// Executed by the `check_interrupts` instruction that every `recur` emits.
pub fn check_for_interrupt() -> Result<(), QuinceError> {
    if is_interrupted() {
        clear_interrupt();
        Err(QuinceError::Interrupted)
    } else {
        Ok(())
    }
}
