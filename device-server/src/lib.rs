//! Per-device command servers for the FSC rig.
//!
//! One server process per hardware device (camera, filter wheel, stage
//! assembly), each exposing the line protocol from the `protocol` crate on
//! its own TCP port. A server accepts unboundedly many concurrent
//! connections but executes at most one long-running command at a time:
//! the [`ExecutionSlot`] is the single point of mutation for the
//! `Idle`/`Executing` state, so two connections can never both observe idle
//! and both start a command.
//!
//! Long-running commands (move, offset, home, expose, filter slot changes)
//! run on the blocking pool; the issuing connection gets its response when
//! the command completes, while every other connection keeps receiving
//! prompt `status` answers. `stop` trips the in-flight command's abort
//! token and acknowledges receipt — completion is observed by polling
//! `status` back to `IDLE`.

pub mod camera;
pub mod filter;
pub mod logging;
pub mod server;
pub mod service;
pub mod slot;
pub mod stage;

pub use camera::CameraService;
pub use filter::FilterService;
pub use server::CommandServer;
pub use service::{DeviceService, Dispatch};
pub use slot::{ExecutionPermit, ExecutionSlot};
pub use stage::StageService;
