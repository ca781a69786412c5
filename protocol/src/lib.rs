//! Wire protocol shared by the FSC rig device servers and the actor client.
//!
//! Every device on the rig (camera, filter wheel, stage assembly) speaks the
//! same line-oriented protocol over TCP:
//!
//! - A request is a single newline-terminated ASCII line: a verb followed by
//!   optional `key=value` parameters, e.g. `move r=12.5 t=0.0 z=1.0`.
//! - A response is zero or more payload lines followed by exactly one
//!   sentinel line containing `OK` (success) or `BAD: <reason>` (failure).
//!   The sentinel, not a length prefix, delimits the response; readers must
//!   tolerate multi-line payloads before it.
//! - `status` responses carry `BUSY`/`IDLE` as the first payload line, then
//!   `key = value` telemetry lines.
//!
//! Raw text exists only at the transport boundary: commands are parsed into
//! [`Command`] on the way in and responses are built from / parsed into
//! [`Response`] so everything above the socket works with typed values.
//!
//! # Example
//!
//! ```
//! use protocol::{Command, Response};
//!
//! let cmd: Command = "move r=12.5 z=0.5".parse()?;
//! assert_eq!(cmd.encode(), "move r=12.5 z=0.5");
//!
//! let resp = Response::ok().with_payload(["filename = raw-00000001.fits"]);
//! assert_eq!(resp.encode(), "filename = raw-00000001.fits\nOK\n");
//! # Ok::<(), protocol::ParseError>(())
//! ```

mod client;
mod command;
mod error;
mod response;

pub use client::{DeviceClient, DEFAULT_TIMEOUT};
pub use command::{AxisTargets, Command, FrameType};
pub use error::{ParseError, ProtocolError};
pub use response::{BusyState, Outcome, Response, ResponseReader, StatusReport};

/// Conventional TCP port of the camera server.
pub const CAMERA_PORT: u16 = 9999;
/// Conventional TCP port of the filter wheel server.
pub const FILTER_PORT: u16 = 9998;
/// Conventional TCP port of the stage server.
pub const STAGE_PORT: u16 = 9997;
