//! Single-active-command state for one device.

use std::sync::{Arc, Mutex, MutexGuard};

use hardware::AbortToken;
use protocol::BusyState;

struct ActiveCommand {
    operation: &'static str,
    abort: AbortToken,
}

/// The `Idle`/`Executing` state of a device, with one point of mutation.
///
/// [`try_begin`](ExecutionSlot::try_begin) atomically checks for an active
/// command and claims the slot, closing the race where two connections both
/// observe idle and both start executing. The claim is released when the
/// returned [`ExecutionPermit`] drops — including on panic of the executing
/// task, so a crashed command never wedges the device in `Executing`.
#[derive(Default)]
pub struct ExecutionSlot {
    active: Mutex<Option<ActiveCommand>>,
}

impl ExecutionSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveCommand>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the slot for a long-running command, or return `None` if one
    /// is already executing.
    pub fn try_begin(self: &Arc<Self>, operation: &'static str) -> Option<ExecutionPermit> {
        let mut active = self.lock();
        if active.is_some() {
            return None;
        }
        let abort = AbortToken::new();
        *active = Some(ActiveCommand {
            operation,
            abort: abort.clone(),
        });
        Some(ExecutionPermit {
            slot: Arc::clone(self),
            abort,
        })
    }

    pub fn busy_state(&self) -> BusyState {
        if self.lock().is_some() {
            BusyState::Busy
        } else {
            BusyState::Idle
        }
    }

    /// Run `f` with the busy state while the slot lock is held.
    ///
    /// A claim cannot slip in between `f` observing idle and acting on it,
    /// so synchronous handlers gated on the busy state stay consistent
    /// with concurrent long-running dispatch. `f` must be bounded-time.
    pub fn with_busy_state<R>(&self, f: impl FnOnce(BusyState) -> R) -> R {
        let active = self.lock();
        let busy = if active.is_some() {
            BusyState::Busy
        } else {
            BusyState::Idle
        };
        f(busy)
    }

    /// Trip the active command's abort token.
    ///
    /// Returns the operation name for the `OK: aborting <op>` reply, or
    /// `None` when idle. The slot stays claimed until the aborted command
    /// actually finishes and drops its permit.
    pub fn abort_active(&self) -> Option<&'static str> {
        let active = self.lock();
        active.as_ref().map(|cmd| {
            cmd.abort.trigger();
            cmd.operation
        })
    }
}

/// Exclusive right to execute one long-running command.
pub struct ExecutionPermit {
    slot: Arc<ExecutionSlot>,
    abort: AbortToken,
}

impl ExecutionPermit {
    /// The abort token issued for this command.
    pub fn abort_token(&self) -> &AbortToken {
        &self.abort
    }
}

impl Drop for ExecutionPermit {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}
