//! Coordinate file loading.

use std::path::Path;

use protocol::AxisTargets;
use serde::Deserialize;

use crate::error::RigError;

/// One row of a scan coordinate file.
///
/// Columns: `r` (mm), `t` (deg), `z` (mm), `expTime` (s), `filterSlot`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScanTarget {
    pub r: f64,
    pub t: f64,
    pub z: f64,
    #[serde(rename = "expTime")]
    pub exp_time: f64,
    #[serde(rename = "filterSlot")]
    pub filter_slot: u8,
}

impl ScanTarget {
    /// Stage move naming all three axes.
    pub fn axis_targets(&self) -> AxisTargets {
        AxisTargets {
            r: Some(self.r),
            t: Some(self.t),
            z: Some(self.z),
        }
    }

    /// The same target at a different focus position.
    pub fn with_z(&self, z: f64) -> Self {
        ScanTarget { z, ..self.clone() }
    }
}

/// Load scan targets from a headered CSV file, preserving file order.
pub fn load_targets(path: &Path) -> Result<Vec<ScanTarget>, RigError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| RigError::TargetFile {
            path: path.to_path_buf(),
            source,
        })?;
    reader
        .deserialize()
        .collect::<Result<Vec<ScanTarget>, _>>()
        .map_err(|source| RigError::TargetFile {
            path: path.to_path_buf(),
            source,
        })
}
