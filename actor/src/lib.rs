//! Orchestration client for focal surface scans.
//!
//! Drives the three device servers (camera, filter wheel, stage assembly)
//! through coordinate scans: position, filter, expose, assess, retry. The
//! protocol gives no push notifications, so progress is observed by
//! polling `status`; [`Rig::wait_all_idle`] is the one busy-wait primitive
//! every sequence checkpoints through.

pub mod error;
pub mod quality;
pub mod rig;
pub mod sequence;
pub mod targets;

pub use error::RigError;
pub use quality::{Adjust, AlwaysAccept, ImageQuality, Scripted, Verdict};
pub use rig::{Rig, RigConfig};
pub use sequence::{focus_sweep, run_single_exposure, scan_targets, ExposureTuning, SweepParams};
pub use targets::{load_targets, ScanTarget};
