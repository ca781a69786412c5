//! Simulated rig hardware.
//!
//! These adapters stand in for the Standa stage controllers, the SX CCD,
//! and the filter wheel when no hardware is attached. Latencies are
//! configurable so integration tests can exercise the busy-state machinery
//! quickly, and every command is recorded so tests can assert on the exact
//! sequence a scan produced.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use protocol::FrameType;
use tracing::debug;

use crate::adapter::{
    axis_index, AbortToken, AdapterResult, CameraAdapter, FilterAdapter, StageAdapter,
    StageTelemetry,
};
use crate::units::{Axis, StepMove};

/// Default simulated move/settle time.
const DEFAULT_MOVE_TIME: Duration = Duration::from_millis(50);

/// A stage command observed by [`SimStage`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageEvent {
    MoveAbs { axis: Axis, target: StepMove },
    MoveRel { axis: Axis, distance: StepMove },
    Home,
    SetSpeed { axis: Axis, steps_per_sec: f64 },
}

#[derive(Debug, Default)]
struct StageState {
    position: [f64; 3],
    speed: [f64; 3],
}

/// Simulated R/θ/Z stage assembly.
pub struct SimStage {
    state: Mutex<StageState>,
    events: Mutex<Vec<StageEvent>>,
    move_time: Duration,
}

impl SimStage {
    pub fn new() -> Self {
        SimStage {
            state: Mutex::new(StageState {
                position: [0.0; 3],
                speed: [2000.0; 3],
            }),
            events: Mutex::new(Vec::new()),
            move_time: DEFAULT_MOVE_TIME,
        }
    }

    /// Override how long each simulated move blocks.
    pub fn with_move_time(mut self, move_time: Duration) -> Self {
        self.move_time = move_time;
        self
    }

    /// Every command this stage has executed, in order.
    pub fn history(&self) -> Vec<StageEvent> {
        self.lock_events().clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, StageState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_events(&self) -> MutexGuard<'_, Vec<StageEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SimStage {
    fn default() -> Self {
        Self::new()
    }
}

impl StageAdapter for SimStage {
    fn move_abs(&self, axis: Axis, target: StepMove, abort: &AbortToken) -> AdapterResult<()> {
        debug!(%axis, ?target, "sim stage move");
        abort.sleep(self.move_time)?;
        self.lock_state().position[axis_index(axis)] = target.as_counts();
        self.lock_events().push(StageEvent::MoveAbs { axis, target });
        Ok(())
    }

    fn move_rel(&self, axis: Axis, distance: StepMove, abort: &AbortToken) -> AdapterResult<()> {
        debug!(%axis, ?distance, "sim stage offset");
        abort.sleep(self.move_time)?;
        self.lock_state().position[axis_index(axis)] += distance.as_counts();
        self.lock_events().push(StageEvent::MoveRel { axis, distance });
        Ok(())
    }

    fn home(&self, abort: &AbortToken) -> AdapterResult<()> {
        debug!("sim stage home");
        abort.sleep(self.move_time)?;
        self.lock_state().position = [0.0; 3];
        self.lock_events().push(StageEvent::Home);
        Ok(())
    }

    fn set_speed(&self, axis: Axis, steps_per_sec: f64) -> AdapterResult<()> {
        self.lock_state().speed[axis_index(axis)] = steps_per_sec;
        self.lock_events().push(StageEvent::SetSpeed {
            axis,
            steps_per_sec,
        });
        Ok(())
    }

    fn abort(&self) {
        debug!("sim stage abort");
    }

    fn telemetry(&self) -> AdapterResult<StageTelemetry> {
        let state = self.lock_state();
        Ok(StageTelemetry {
            position_counts: state.position,
            speed: state.speed,
        })
    }
}

/// One exposure observed by [`SimCamera`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureEvent {
    pub frame: FrameType,
    pub seconds: f64,
}

#[derive(Debug)]
struct CameraState {
    bin: u8,
    cooler_on: bool,
    setpoint: f64,
    temperature: f64,
}

/// Simulated CCD camera.
///
/// Exposure wall-clock time is `seconds * time_scale`; tests set a small
/// scale so multi-second exposures finish quickly while still exercising
/// the busy window.
pub struct SimCamera {
    state: Mutex<CameraState>,
    exposures: Mutex<Vec<ExposureEvent>>,
    time_scale: f64,
}

impl SimCamera {
    pub fn new() -> Self {
        SimCamera {
            state: Mutex::new(CameraState {
                bin: 1,
                cooler_on: true,
                setpoint: -10.0,
                temperature: -10.0,
            }),
            exposures: Mutex::new(Vec::new()),
            time_scale: 1.0,
        }
    }

    /// Scale factor from commanded exposure seconds to simulated wall time.
    pub fn with_time_scale(mut self, time_scale: f64) -> Self {
        self.time_scale = time_scale;
        self
    }

    /// Force the reported CCD temperature, e.g. to simulate a fault.
    pub fn force_temperature(&self, celsius: f64) {
        self.lock_state().temperature = celsius;
    }

    /// Every exposure this camera has taken, in order.
    pub fn history(&self) -> Vec<ExposureEvent> {
        self.exposures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, CameraState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SimCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraAdapter for SimCamera {
    fn expose(
        &self,
        frame: FrameType,
        seconds: f64,
        abort: &AbortToken,
    ) -> AdapterResult<Vec<u8>> {
        debug!(%frame, seconds, "sim exposure");
        let wall = Duration::from_secs_f64(seconds * self.time_scale);
        abort.sleep(wall)?;
        self.exposures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ExposureEvent { frame, seconds });
        let bin = self.lock_state().bin;
        // Opaque stand-in for FITS bytes; content only needs to be stable.
        Ok(format!("SIM-FRAME type={frame} exptime={seconds} bin={bin}\n").into_bytes())
    }

    fn abort(&self) {
        debug!("sim camera abort");
    }

    fn set_bin(&self, bin: u8) -> AdapterResult<()> {
        self.lock_state().bin = bin;
        Ok(())
    }

    fn set_cooler(&self, on: bool) -> AdapterResult<()> {
        self.lock_state().cooler_on = on;
        Ok(())
    }

    fn set_temperature(&self, celsius: f64) -> AdapterResult<()> {
        let mut state = self.lock_state();
        state.setpoint = celsius;
        // The sim cooler settles instantly.
        state.temperature = celsius;
        Ok(())
    }

    fn temperature(&self) -> AdapterResult<f64> {
        Ok(self.lock_state().temperature)
    }

    fn bin(&self) -> AdapterResult<u8> {
        Ok(self.lock_state().bin)
    }
}

/// Simulated filter wheel.
pub struct SimFilter {
    slot: Mutex<u8>,
    moves: Mutex<Vec<u8>>,
    move_time: Duration,
}

impl SimFilter {
    pub fn new() -> Self {
        SimFilter {
            slot: Mutex::new(1),
            moves: Mutex::new(Vec::new()),
            move_time: DEFAULT_MOVE_TIME,
        }
    }

    pub fn with_move_time(mut self, move_time: Duration) -> Self {
        self.move_time = move_time;
        self
    }

    /// Every slot this wheel has been commanded to, in order.
    pub fn history(&self) -> Vec<u8> {
        self.moves.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for SimFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterAdapter for SimFilter {
    fn set_slot(&self, slot: u8, abort: &AbortToken) -> AdapterResult<()> {
        debug!(slot, "sim filter move");
        abort.sleep(self.move_time)?;
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = slot;
        self.moves
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(slot);
        Ok(())
    }

    fn abort(&self) {
        debug!("sim filter abort");
    }

    fn slot(&self) -> AdapterResult<u8> {
        Ok(*self.slot.lock().unwrap_or_else(|e| e.into_inner()))
    }
}
