//! Change transactions
//!
//! Multiple knob mutations can be batched on the owner so that dependency
//! notifications (re-evaluation, hash invalidation, UI refresh) fire once at
//! the end of the batch rather than once per mutation. [`ChangeScope`] is
//! the RAII guard knobs open around mutations; [`ChangeBatch`] is the depth
//! counter + pending queue a holder implementation can embed to get the
//! flattening semantics.

use parking_lot::Mutex;

use crate::traits::KnobHolder;
use crate::types::ValueChange;

/// RAII transaction scope over a holder. Opens the transaction on
/// construction and closes it on drop, including early returns and panics,
/// so the coalesced end-of-batch always fires.
pub struct ChangeScope<'a> {
    holder: &'a dyn KnobHolder,
}

impl<'a> ChangeScope<'a> {
    pub fn new(holder: &'a dyn KnobHolder) -> Self {
        holder.begin_changes();
        Self { holder }
    }

    /// Record one value change inside the scope
    pub fn append(&self, change: ValueChange) {
        self.holder.append_value_change(change);
    }
}

impl Drop for ChangeScope<'_> {
    fn drop(&mut self) {
        self.holder.end_changes();
    }
}

/// Nestable batch state for holder implementations.
///
/// `begin`/`end` pairs flatten: only the `end` matching the outermost
/// `begin` drains the queue and reports `true`, at which point the holder
/// dispatches its coalesced notifications.
#[derive(Default)]
pub struct ChangeBatch {
    inner: Mutex<BatchState>,
}

#[derive(Default)]
struct BatchState {
    depth: u32,
    pending: Vec<ValueChange>,
}

impl ChangeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a (possibly nested) transaction
    pub fn begin(&self) {
        self.inner.lock().depth += 1;
    }

    /// Close a transaction. Returns the queued changes when the outermost
    /// scope closed; `None` while still nested.
    pub fn end(&self) -> Option<Vec<ValueChange>> {
        let mut state = self.inner.lock();
        if state.depth == 0 {
            log::warn!("end_changes called without matching begin_changes");
            return None;
        }
        state.depth -= 1;
        if state.depth == 0 {
            return Some(std::mem::take(&mut state.pending));
        }
        None
    }

    /// Queue a change; dispatch immediately only when no transaction is open
    pub fn queue(&self, change: ValueChange) -> QueueOutcome {
        let mut state = self.inner.lock();
        if state.depth > 0 {
            state.pending.push(change);
            QueueOutcome::Deferred
        } else {
            QueueOutcome::DispatchNow(change)
        }
    }

    /// Whether a transaction is currently open
    pub fn is_blocked(&self) -> bool {
        self.inner.lock().depth > 0
    }
}

/// Result of queuing a change on a [`ChangeBatch`]
pub enum QueueOutcome {
    /// No transaction open; the holder should dispatch right away
    DispatchNow(ValueChange),
    /// Queued; dispatched in the coalesced batch at the outermost `end`
    Deferred,
}
