//! The rig handle: one client per device server plus the shared cancel flag.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use protocol::{AxisTargets, BusyState, Command, DeviceClient, FrameType, Response};
use tracing::{debug, info, warn};

use crate::error::RigError;

/// CCD operating range, °C exclusive. Outside it the sensor is either
/// uncooled or reporting a fault, and exposures are not worth taking.
const CCD_TEMP_RANGE: (f64, f64) = (-40.0, 30.0);

/// Addresses and timing knobs for a [`Rig`].
#[derive(Debug, Clone)]
pub struct RigConfig {
    pub camera_addr: String,
    pub filter_addr: String,
    pub stage_addr: String,
    /// Status poll cadence inside [`Rig::wait_all_idle`].
    pub poll_interval: Duration,
    /// How long one wait-for-idle checkpoint may take before it is an error.
    pub idle_timeout: Duration,
    /// Round-trip timeout for commands whose response arrives at
    /// completion (moves, exposures).
    pub command_timeout: Duration,
}

impl Default for RigConfig {
    fn default() -> Self {
        RigConfig {
            camera_addr: format!("localhost:{}", protocol::CAMERA_PORT),
            filter_addr: format!("localhost:{}", protocol::FILTER_PORT),
            stage_addr: format!("localhost:{}", protocol::STAGE_PORT),
            poll_interval: Duration::from_millis(100),
            idle_timeout: Duration::from_secs(120),
            command_timeout: Duration::from_secs(300),
        }
    }
}

/// Handle to the three device servers making up the test rig.
///
/// All methods are blocking; orchestration runs on a blocking task and the
/// async side only handles signals. The cancel flag is checked at every
/// wait checkpoint, so a cancel takes effect at the next poll even while a
/// long command is in flight on some device.
pub struct Rig {
    camera: DeviceClient,
    filter: DeviceClient,
    stage: DeviceClient,
    poll_interval: Duration,
    idle_timeout: Duration,
    cancelled: AtomicBool,
}

impl Rig {
    pub fn new(config: RigConfig) -> Arc<Self> {
        Arc::new(Rig {
            camera: DeviceClient::new(config.camera_addr).with_timeout(config.command_timeout),
            filter: DeviceClient::new(config.filter_addr).with_timeout(config.command_timeout),
            stage: DeviceClient::new(config.stage_addr).with_timeout(config.command_timeout),
            poll_interval: config.poll_interval,
            idle_timeout: config.idle_timeout,
            cancelled: AtomicBool::new(false),
        })
    }

    /// Trip the cancel flag and tell every device to stop what it is doing.
    ///
    /// Stop failures are logged and swallowed: an idle device answers
    /// `BAD: idle`, and an unreachable one is already beyond help.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        for (device, client) in self.devices() {
            match client.stop() {
                Ok(response) => debug!(device, ?response, "stop sent"),
                Err(e) => warn!(device, error = %e, "stop failed"),
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check_cancelled(&self) -> Result<(), RigError> {
        if self.is_cancelled() {
            Err(RigError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn devices(&self) -> [(&'static str, &DeviceClient); 3] {
        [
            ("camera", &self.camera),
            ("filter", &self.filter),
            ("stage", &self.stage),
        ]
    }

    /// Busy-wait until every device reports `IDLE`.
    ///
    /// The single wait primitive used at every orchestration checkpoint:
    /// polls each device at the configured interval, honors the cancel
    /// flag, and fails with [`RigError::IdleTimeout`] naming the device
    /// that never settled.
    pub fn wait_all_idle(&self) -> Result<(), RigError> {
        let deadline = Instant::now() + self.idle_timeout;
        for (device, client) in self.devices() {
            loop {
                self.check_cancelled()?;
                let status = client.status()?;
                if status.busy == BusyState::Idle {
                    break;
                }
                if Instant::now() >= deadline {
                    return Err(RigError::IdleTimeout {
                        device,
                        timeout: self.idle_timeout,
                    });
                }
                std::thread::sleep(self.poll_interval);
            }
        }
        Ok(())
    }

    fn expect_ok(
        &self,
        device: &'static str,
        client: &DeviceClient,
        command: &Command,
    ) -> Result<Response, RigError> {
        let response = client.round_trip(command)?;
        match response.bad_reason() {
            Some(reason) => Err(RigError::Rejected {
                device,
                command: command.encode(),
                reason: reason.to_string(),
            }),
            None => Ok(response),
        }
    }

    /// Absolute stage move; blocks until the stage settles.
    pub fn move_stage(&self, targets: AxisTargets) -> Result<(), RigError> {
        self.expect_ok("stage", &self.stage, &Command::Move(targets))?;
        Ok(())
    }

    /// Select a filter slot; blocks until the wheel settles.
    pub fn set_filter(&self, slot: u8) -> Result<(), RigError> {
        let command = Command::Set(vec![("slot".to_string(), slot.to_string())]);
        self.expect_ok("filter", &self.filter, &command)?;
        Ok(())
    }

    /// Take one exposure; blocks for its full duration and returns the
    /// path the camera server wrote.
    pub fn expose(&self, frame: FrameType, seconds: f64) -> Result<PathBuf, RigError> {
        let command = Command::Expose { frame, seconds };
        info!(%frame, seconds, "exposing");
        let response = self.expect_ok("camera", &self.camera, &command)?;
        let filename = response.payload_value("filename").ok_or_else(|| {
            protocol::ProtocolError::MalformedResponse(
                "exposure response missing filename".to_string(),
            )
        })?;
        Ok(PathBuf::from(filename))
    }

    /// Current CCD temperature from camera telemetry.
    pub fn ccd_temperature(&self) -> Result<f64, RigError> {
        let status = self.camera.status()?;
        status
            .get("ccd_temp")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| {
                protocol::ProtocolError::MalformedResponse(
                    "camera status missing ccd_temp".to_string(),
                )
                .into()
            })
    }

    /// Fail the run if the CCD is outside its safe operating range.
    pub fn check_ccd_temperature(&self) -> Result<(), RigError> {
        let celsius = self.ccd_temperature()?;
        let (lo, hi) = CCD_TEMP_RANGE;
        if celsius <= lo || celsius >= hi {
            return Err(RigError::TemperatureOutOfRange { celsius });
        }
        debug!(celsius, "CCD temperature in range");
        Ok(())
    }
}
