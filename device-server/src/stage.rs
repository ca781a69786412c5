//! Stage assembly command service (R/θ/Z axes).

use hardware::{AbortToken, AdapterError, Axis, StageAdapter, StepMove};
use protocol::{AxisTargets, BusyState, Command, ParseError, Response, StatusReport};
use tracing::{info, warn};

/// State and command handling for the stage server.
///
/// `move` and `offset` act on whichever axes the command names, converting
/// physical units (mm for R and Z, degrees for θ) to step/microstep pairs
/// per axis. `home` drives all three axes to their reference switches.
pub struct StageService<S: StageAdapter> {
    stage: S,
}

impl<S: StageAdapter> StageService<S> {
    pub fn new(stage: S) -> Self {
        StageService { stage }
    }

    fn named_axes(targets: &AxisTargets) -> impl Iterator<Item = (Axis, f64)> {
        [
            (Axis::R, targets.r),
            (Axis::T, targets.t),
            (Axis::Z, targets.z),
        ]
        .into_iter()
        .filter_map(|(axis, value)| value.map(|v| (axis, v)))
    }

    fn run_motion(&self, targets: &AxisTargets, relative: bool, abort: &AbortToken) -> Response {
        let op = if relative { "offset" } else { "move" };
        for (axis, units) in Self::named_axes(targets) {
            if !units.is_finite() {
                return Response::bad(ParseError::InvalidValue(axis.as_str().to_string()));
            }
            let steps = StepMove::from_units(axis, units);
            info!(%axis, units, steps = steps.steps, microsteps = steps.microsteps, op, "axis motion");
            let result = if relative {
                self.stage.move_rel(axis, steps, abort)
            } else {
                self.stage.move_abs(axis, steps, abort)
            };
            match result {
                Ok(()) => {}
                Err(AdapterError::Aborted) => return Response::bad(format!("{op} aborted")),
                Err(e) => {
                    warn!(%axis, error = %e, "{op} failed");
                    return Response::bad(format!("{op} failed"));
                }
            }
        }
        Response::ok()
    }

    fn run_home(&self, abort: &AbortToken) -> Response {
        match self.stage.home(abort) {
            Ok(()) => Response::ok(),
            Err(AdapterError::Aborted) => Response::bad("home aborted"),
            Err(e) => {
                warn!(error = %e, "home failed");
                Response::bad("home failed")
            }
        }
    }

    fn set_speeds(&self, targets: &AxisTargets) -> Response {
        for (axis, units_per_sec) in Self::named_axes(targets) {
            if !units_per_sec.is_finite() || units_per_sec <= 0.0 {
                return Response::bad(ParseError::InvalidValue(axis.as_str().to_string()));
            }
            let steps_per_sec = axis.scale().to_counts(units_per_sec);
            if let Err(e) = self.stage.set_speed(axis, steps_per_sec) {
                warn!(%axis, error = %e, "set speed failed");
                return Response::bad("speed failed");
            }
        }
        Response::ok()
    }
}

impl<S: StageAdapter> crate::service::DeviceService for StageService<S> {
    fn name(&self) -> &'static str {
        "stage"
    }

    fn classify(&self, command: &Command) -> crate::service::Dispatch {
        use crate::service::Dispatch;
        match command {
            Command::Move(_) => Dispatch::LongRunning("move"),
            Command::Offset(_) => Dispatch::LongRunning("offset"),
            Command::Home => Dispatch::LongRunning("home"),
            Command::Speed(_) => Dispatch::Sync,
            _ => Dispatch::Invalid,
        }
    }

    fn status(&self, busy: BusyState) -> StatusReport {
        let mut report = StatusReport::new(busy);
        match self.stage.telemetry() {
            Ok(telemetry) => {
                // Raw encoder counts, then positions and speeds in
                // physical units.
                for axis in Axis::ALL {
                    report = report.field(
                        format!("{axis}_e"),
                        format!("{:.3}", telemetry.position(axis)),
                    );
                }
                for axis in Axis::ALL {
                    let units = axis.scale().to_units(telemetry.position(axis));
                    report = report.field(axis.as_str(), format!("{units:.6}"));
                }
                for axis in Axis::ALL {
                    let units = axis.scale().to_units(telemetry.speed(axis));
                    report = report.field(format!("{axis}_s"), format!("{units:.6}"));
                }
            }
            Err(e) => {
                warn!(error = %e, "stage telemetry unavailable");
                report = report.field("telemetry", "unavailable");
            }
        }
        report
    }

    fn handle_sync(&self, command: &Command, busy: BusyState) -> Response {
        match command {
            // Changing speed under an in-flight move would alter the motion
            // profile mid-travel.
            Command::Speed(_) if busy.is_busy() => Response::bad("busy"),
            Command::Speed(targets) => self.set_speeds(targets),
            _ => Response::bad(ParseError::InvalidCommand),
        }
    }

    fn execute(&self, command: Command, abort: &AbortToken) -> Response {
        match command {
            Command::Move(targets) => self.run_motion(&targets, false, abort),
            Command::Offset(targets) => self.run_motion(&targets, true, abort),
            Command::Home => self.run_home(abort),
            _ => Response::bad(ParseError::InvalidCommand),
        }
    }

    fn abort_hardware(&self) {
        self.stage.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{DeviceService, Dispatch};
    use approx::assert_abs_diff_eq;
    use hardware::sim::{SimStage, StageEvent};

    fn service() -> StageService<SimStage> {
        StageService::new(SimStage::new())
    }

    #[test]
    fn move_converts_units_per_axis() {
        let svc = service();
        let cmd = Command::parse("move r=1.0 z=0.5").unwrap();
        assert_eq!(svc.classify(&cmd), Dispatch::LongRunning("move"));
        let response = svc.execute(cmd, &AbortToken::new());
        assert!(response.is_ok());

        // 1.0 mm radial is 800 counts; 0.5 mm focus is 8000 counts.
        let telemetry = svc.stage.telemetry().unwrap();
        assert_abs_diff_eq!(telemetry.position(Axis::R), 800.0, epsilon = 1e-9);
        assert_abs_diff_eq!(telemetry.position(Axis::Z), 8000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(telemetry.position(Axis::T), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn offset_accumulates_from_current_position() {
        let svc = service();
        let mv = Command::parse("move z=1.0").unwrap();
        svc.execute(mv, &AbortToken::new());
        let off = Command::parse("offset z=-0.25").unwrap();
        let response = svc.execute(off, &AbortToken::new());
        assert!(response.is_ok());

        let telemetry = svc.stage.telemetry().unwrap();
        assert_abs_diff_eq!(
            Axis::Z.scale().to_units(telemetry.position(Axis::Z)),
            0.75,
            epsilon = 1e-6
        );
    }

    #[test]
    fn home_zeroes_all_axes() {
        let svc = service();
        svc.execute(Command::parse("move r=2.0 t=10.0").unwrap(), &AbortToken::new());
        let response = svc.execute(Command::Home, &AbortToken::new());
        assert!(response.is_ok());
        let telemetry = svc.stage.telemetry().unwrap();
        for axis in Axis::ALL {
            assert_abs_diff_eq!(telemetry.position(axis), 0.0, epsilon = 1e-9);
        }
        assert!(svc.stage.history().contains(&StageEvent::Home));
    }

    #[test]
    fn speed_is_sync_but_gated_while_busy() {
        let svc = service();
        let cmd = Command::parse("speed r=1.0").unwrap();
        assert_eq!(svc.classify(&cmd), Dispatch::Sync);

        let response = svc.handle_sync(&cmd, BusyState::Busy);
        assert_eq!(response.bad_reason(), Some("busy"));

        let response = svc.handle_sync(&cmd, BusyState::Idle);
        assert!(response.is_ok());
        // 1.0 mm/s radial is 800 steps/s.
        let telemetry = svc.stage.telemetry().unwrap();
        assert_abs_diff_eq!(telemetry.speed(Axis::R), 800.0, epsilon = 1e-9);
    }

    #[test]
    fn nonpositive_speed_is_rejected() {
        let svc = service();
        let cmd = Command::parse("speed z=-1.0").unwrap();
        let response = svc.handle_sync(&cmd, BusyState::Idle);
        assert_eq!(response.bad_reason(), Some("Invalid value for z"));
    }

    #[test]
    fn status_reports_counts_and_units() {
        let svc = service();
        svc.execute(Command::parse("move r=1.0").unwrap(), &AbortToken::new());
        let status = svc.status(BusyState::Idle);
        assert_eq!(status.get("r_e"), Some("800.000"));
        assert_eq!(status.get("r"), Some("1.000000"));
        assert!(status.get("z_s").is_some());
    }

    #[test]
    fn aborted_move_reports_bad() {
        let svc = StageService::new(
            SimStage::new().with_move_time(std::time::Duration::from_secs(5)),
        );
        let abort = AbortToken::new();
        abort.trigger();
        let cmd = Command::parse("move r=1.0").unwrap();
        let response = svc.execute(cmd, &abort);
        assert_eq!(response.bad_reason(), Some("move aborted"));
    }

    #[test]
    fn camera_commands_are_invalid_for_the_stage() {
        let svc = service();
        for line in ["expose light 1.0", "set bin=2"] {
            let cmd = Command::parse(line).unwrap();
            assert_eq!(svc.classify(&cmd), Dispatch::Invalid, "{line}");
        }
    }
}
