use std::path::PathBuf;
use std::time::Duration;

use protocol::ProtocolError;
use thiserror::Error;

/// Everything that can go wrong during an orchestrated scan.
#[derive(Error, Debug)]
pub enum RigError {
    /// Transport failure talking to a device server. Connectivity problems
    /// are fatal to the run: a missing server will not come back mid-scan.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A device answered `BAD`. Soft: the scan logs it and moves on to the
    /// next target.
    #[error("{device} rejected `{command}`: {reason}")]
    Rejected {
        device: &'static str,
        command: String,
        reason: String,
    },

    /// A device never returned to idle within the configured wait.
    #[error("{device} still busy after {timeout:?}")]
    IdleTimeout {
        device: &'static str,
        timeout: Duration,
    },

    /// Every exposure attempt for a target was rejected by image quality.
    /// Soft: the scan continues with the next target.
    #[error("exposure rejected after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    /// The CCD is outside its safe operating range; exposures would be
    /// garbage, so the whole run stops.
    #[error("CCD temperature {celsius} °C outside safe range")]
    TemperatureOutOfRange { celsius: f64 },

    /// Coordinate file could not be read or a row failed to parse.
    #[error("coordinate file {}: {source}", path.display())]
    TargetFile {
        path: PathBuf,
        source: csv::Error,
    },

    /// The cancel flag tripped (Ctrl-C or a caller's request).
    #[error("run cancelled")]
    Cancelled,
}

impl RigError {
    /// Soft failures end the current target; everything else ends the run.
    pub fn is_soft(&self) -> bool {
        matches!(self, RigError::Rejected { .. } | RigError::RetryExhausted { .. })
    }
}
