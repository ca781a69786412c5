//! The seam between the generic connection loop and a device's behavior.

use protocol::{BusyState, Command, Response, StatusReport};

use hardware::AbortToken;

/// How a device handles a particular command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handled inline on the connection task, in any state.
    Sync,
    /// Claims the execution slot and runs on the blocking pool. Carries the
    /// operation name used in `OK: aborting <op>` / `BAD: <op> ...` text.
    LongRunning(&'static str),
    /// Not a command this device understands.
    Invalid,
}

/// Behavior of one device behind a [`CommandServer`].
///
/// Implementations own the device's adapter and all mutable device state.
/// `status` and `handle_sync` are called from connection tasks and must be
/// bounded-time: they may read shared state but never wait on an in-flight
/// hardware operation. `execute` runs on the blocking pool with the
/// execution slot held.
///
/// [`CommandServer`]: crate::CommandServer
pub trait DeviceService: Send + Sync + 'static {
    /// Device name for logs.
    fn name(&self) -> &'static str;

    /// Classify a parsed command for this device.
    fn classify(&self, command: &Command) -> Dispatch;

    /// Busy state plus device telemetry. Must not block on hardware.
    fn status(&self, busy: BusyState) -> StatusReport;

    /// Handle a [`Dispatch::Sync`] command. `busy` lets parameter updates
    /// that are unsafe mid-operation answer `BAD: busy`.
    fn handle_sync(&self, command: &Command, busy: BusyState) -> Response;

    /// Execute a [`Dispatch::LongRunning`] command. Blocks until the
    /// hardware operation completes or `abort` trips.
    fn execute(&self, command: Command, abort: &AbortToken) -> Response;

    /// Tell the underlying adapter to halt its in-flight operation. Called
    /// by the `stop` path after the abort token has been tripped.
    fn abort_hardware(&self);
}
