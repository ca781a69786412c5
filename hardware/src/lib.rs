//! Hardware adapter seam for the FSC rig.
//!
//! Each device server owns exactly one adapter and talks to it through the
//! narrow traits in [`adapter`]: the command server never sees vendor SDK
//! types, and nothing outside a server process touches a device except
//! through the wire protocol.
//!
//! [`units`] holds the fixed linear scales between physical units (mm, deg)
//! and motor encoder counts, including the 1/256 microstep split the stage
//! controllers expect.
//!
//! [`sim`] provides simulated adapters with configurable latencies and
//! recorded command histories. The server binaries run them when no rig is
//! attached, and the integration tests use them as scriptable stand-ins.

pub mod adapter;
pub mod sim;
pub mod units;

pub use adapter::{
    AbortToken, AdapterError, AdapterResult, CameraAdapter, FilterAdapter, StageAdapter,
    StageTelemetry,
};
pub use units::{Axis, AxisScale, StepMove, MICROSTEPS_PER_STEP};
