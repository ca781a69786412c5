//! Adapter traits between a device command server and its vendor driver.
//!
//! Adapters are blocking: the command server runs long operations on a
//! dedicated blocking task and stays responsive for status queries. Every
//! long-running call takes an [`AbortToken`] and is expected to observe it
//! promptly; a tripped token surfaces as [`AdapterError::Aborted`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use protocol::FrameType;
use thiserror::Error;

use crate::units::{Axis, StepMove};

/// Errors reported by a device adapter.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// The vendor driver returned a non-success result code.
    #[error("device result code {0}")]
    ResultCode(i32),

    /// The operation observed a tripped [`AbortToken`] and stopped early.
    #[error("operation aborted")]
    Aborted,

    /// The device is absent or in a state where the call cannot proceed.
    #[error("device not ready: {0}")]
    NotReady(String),

    /// Filesystem or transport failure inside the adapter.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Cooperative cancellation flag for one long-running command.
///
/// The server's `stop` path trips the token; the executing adapter call
/// polls it and bails out with [`AdapterError::Aborted`]. A fresh token is
/// issued per command, so a `stop` can never cancel a later command.
#[derive(Debug, Clone, Default)]
pub struct AbortToken {
    flag: Arc<AtomicBool>,
}

impl AbortToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the operation holding this token.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Bail out with [`AdapterError::Aborted`] if cancellation was requested.
    pub fn check(&self) -> AdapterResult<()> {
        if self.is_triggered() {
            Err(AdapterError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early if the token trips.
    ///
    /// Returns `Err(Aborted)` when interrupted. Used by adapters to make
    /// multi-second hardware waits cancellable.
    pub fn sleep(&self, duration: Duration) -> AdapterResult<()> {
        const SLICE: Duration = Duration::from_millis(5);
        let mut remaining = duration;
        while remaining > Duration::ZERO {
            self.check()?;
            let step = remaining.min(SLICE);
            std::thread::sleep(step);
            remaining -= step;
        }
        self.check()
    }
}

/// Position and speed telemetry for the three stage axes, in device counts.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTelemetry {
    /// Encoder position per axis, in counts (fractional: includes microsteps).
    pub position_counts: [f64; 3],
    /// Configured speed per axis, in steps per second.
    pub speed: [f64; 3],
}

impl StageTelemetry {
    pub fn position(&self, axis: Axis) -> f64 {
        self.position_counts[axis_index(axis)]
    }

    pub fn speed(&self, axis: Axis) -> f64 {
        self.speed[axis_index(axis)]
    }
}

pub(crate) fn axis_index(axis: Axis) -> usize {
    match axis {
        Axis::R => 0,
        Axis::T => 1,
        Axis::Z => 2,
    }
}

/// Driver interface for the R/θ/Z stage assembly.
pub trait StageAdapter: Send + Sync + 'static {
    /// Move one axis to an absolute step position. Blocks until the move
    /// settles or `abort` trips.
    fn move_abs(&self, axis: Axis, target: StepMove, abort: &AbortToken) -> AdapterResult<()>;

    /// Move one axis by a relative step distance.
    fn move_rel(&self, axis: Axis, distance: StepMove, abort: &AbortToken) -> AdapterResult<()>;

    /// Home all axes. Blocks until complete or `abort` trips.
    fn home(&self, abort: &AbortToken) -> AdapterResult<()>;

    /// Set one axis speed in steps per second. Synchronous.
    fn set_speed(&self, axis: Axis, steps_per_sec: f64) -> AdapterResult<()>;

    /// Signal the motor controller to halt motion immediately.
    fn abort(&self);

    /// Current positions and speeds. Must not block on in-flight motion.
    fn telemetry(&self) -> AdapterResult<StageTelemetry>;
}

// Shared handles work wherever an adapter does; tests keep one side to
// inspect a sim's recorded history while the server owns the other.
impl<T: StageAdapter> StageAdapter for Arc<T> {
    fn move_abs(&self, axis: Axis, target: StepMove, abort: &AbortToken) -> AdapterResult<()> {
        (**self).move_abs(axis, target, abort)
    }

    fn move_rel(&self, axis: Axis, distance: StepMove, abort: &AbortToken) -> AdapterResult<()> {
        (**self).move_rel(axis, distance, abort)
    }

    fn home(&self, abort: &AbortToken) -> AdapterResult<()> {
        (**self).home(abort)
    }

    fn set_speed(&self, axis: Axis, steps_per_sec: f64) -> AdapterResult<()> {
        (**self).set_speed(axis, steps_per_sec)
    }

    fn abort(&self) {
        (**self).abort()
    }

    fn telemetry(&self) -> AdapterResult<StageTelemetry> {
        (**self).telemetry()
    }
}

/// Driver interface for the CCD camera.
pub trait CameraAdapter: Send + Sync + 'static {
    /// Take an exposure and return the raw image bytes. Blocks for the
    /// duration of the exposure plus readout, or until `abort` trips.
    fn expose(
        &self,
        frame: FrameType,
        seconds: f64,
        abort: &AbortToken,
    ) -> AdapterResult<Vec<u8>>;

    /// Signal the camera to abort the in-flight exposure.
    fn abort(&self);

    /// Set bin mode (1x1 or 2x2). Synchronous; rejected by the server while
    /// an exposure is executing.
    fn set_bin(&self, bin: u8) -> AdapterResult<()>;

    /// Switch the cooler on or off.
    fn set_cooler(&self, on: bool) -> AdapterResult<()>;

    /// Set the cooler temperature setpoint in °C.
    fn set_temperature(&self, celsius: f64) -> AdapterResult<()>;

    /// Current CCD temperature in °C. Must not block on an exposure.
    fn temperature(&self) -> AdapterResult<f64>;

    /// Current bin mode.
    fn bin(&self) -> AdapterResult<u8>;
}

impl<T: CameraAdapter> CameraAdapter for Arc<T> {
    fn expose(
        &self,
        frame: FrameType,
        seconds: f64,
        abort: &AbortToken,
    ) -> AdapterResult<Vec<u8>> {
        (**self).expose(frame, seconds, abort)
    }

    fn abort(&self) {
        (**self).abort()
    }

    fn set_bin(&self, bin: u8) -> AdapterResult<()> {
        (**self).set_bin(bin)
    }

    fn set_cooler(&self, on: bool) -> AdapterResult<()> {
        (**self).set_cooler(on)
    }

    fn set_temperature(&self, celsius: f64) -> AdapterResult<()> {
        (**self).set_temperature(celsius)
    }

    fn temperature(&self) -> AdapterResult<f64> {
        (**self).temperature()
    }

    fn bin(&self) -> AdapterResult<u8> {
        (**self).bin()
    }
}

/// Driver interface for the filter wheel.
pub trait FilterAdapter: Send + Sync + 'static {
    /// Rotate to the given slot. Blocks until the wheel settles or `abort`
    /// trips.
    fn set_slot(&self, slot: u8, abort: &AbortToken) -> AdapterResult<()>;

    /// Signal the wheel to halt motion.
    fn abort(&self);

    /// Currently selected slot.
    fn slot(&self) -> AdapterResult<u8>;
}

impl<T: FilterAdapter> FilterAdapter for Arc<T> {
    fn set_slot(&self, slot: u8, abort: &AbortToken) -> AdapterResult<()> {
        (**self).set_slot(slot, abort)
    }

    fn abort(&self) {
        (**self).abort()
    }

    fn slot(&self) -> AdapterResult<u8> {
        (**self).slot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_token_trips_once_triggered() {
        let token = AbortToken::new();
        assert!(token.check().is_ok());
        token.trigger();
        assert!(matches!(token.check(), Err(AdapterError::Aborted)));
        // Clones observe the same flag.
        let clone = token.clone();
        assert!(clone.is_triggered());
    }

    #[test]
    fn abort_sleep_wakes_early() {
        let token = AbortToken::new();
        let waker = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            waker.trigger();
        });
        let start = std::time::Instant::now();
        let result = token.sleep(Duration::from_secs(10));
        handle.join().unwrap();
        assert!(matches!(result, Err(AdapterError::Aborted)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
