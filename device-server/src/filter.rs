//! Filter wheel command service.

use hardware::{AbortToken, AdapterError, FilterAdapter};
use protocol::{BusyState, Command, ParseError, Response, StatusReport};
use tracing::warn;

/// Number of positions on the wheel, numbered from 1.
pub const SLOT_COUNT: u8 = 5;

/// State and command handling for the filter wheel server.
///
/// The wheel's only motion command arrives as `set slot=N`, so unlike the
/// other devices its `set` is long-running: the wheel physically rotates and
/// the device reports `BUSY` until it settles.
pub struct FilterService<F: FilterAdapter> {
    wheel: F,
}

impl<F: FilterAdapter> FilterService<F> {
    pub fn new(wheel: F) -> Self {
        FilterService { wheel }
    }

    fn move_to(&self, params: &[(String, String)], abort: &AbortToken) -> Response {
        let Some((_, value)) = params.iter().find(|(key, _)| key == "slot") else {
            return Response::bad(ParseError::InvalidCommand);
        };
        let slot = match value.parse::<u8>() {
            Ok(slot @ 1..) if slot <= SLOT_COUNT => slot,
            _ => return Response::bad("Invalid slot"),
        };
        match self.wheel.set_slot(slot, abort) {
            Ok(()) => Response::ok().with_payload([format!("slot = {slot}")]),
            Err(AdapterError::Aborted) => Response::bad("move aborted"),
            Err(e) => {
                warn!(error = %e, slot, "filter move failed");
                Response::bad("move failed")
            }
        }
    }
}

impl<F: FilterAdapter> crate::service::DeviceService for FilterService<F> {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn classify(&self, command: &Command) -> crate::service::Dispatch {
        use crate::service::Dispatch;
        match command {
            Command::Set(params) if params.iter().any(|(key, _)| key == "slot") => {
                Dispatch::LongRunning("move")
            }
            _ => Dispatch::Invalid,
        }
    }

    fn status(&self, busy: BusyState) -> StatusReport {
        let mut report = StatusReport::new(busy);
        report = match self.wheel.slot() {
            Ok(slot) => report.field("slot", slot),
            Err(_) => report.field("slot", "unknown"),
        };
        report
    }

    fn handle_sync(&self, _command: &Command, _busy: BusyState) -> Response {
        Response::bad(ParseError::InvalidCommand)
    }

    fn execute(&self, command: Command, abort: &AbortToken) -> Response {
        match command {
            Command::Set(params) => self.move_to(&params, abort),
            _ => Response::bad(ParseError::InvalidCommand),
        }
    }

    fn abort_hardware(&self) {
        self.wheel.abort();
    }
}
