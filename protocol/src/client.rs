use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, trace};

use crate::command::Command;
use crate::error::ProtocolError;
use crate::response::{Response, ResponseReader, StatusReport};

/// Default round-trip timeout, matching the PI stage driver's 7 s default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(7);

/// Blocking client for one device server.
///
/// Each exchange opens a fresh TCP connection, writes one newline-terminated
/// command line, reads until the `OK`/`BAD` sentinel line, and closes. The
/// per-exchange connection keeps concurrent commands from interleaving on a
/// shared socket.
///
/// # Example
///
/// ```no_run
/// use protocol::{Command, DeviceClient};
///
/// let stage = DeviceClient::new("localhost:9997");
/// let status = stage.status()?;
/// println!("stage is {}", status.busy);
/// # Ok::<(), protocol::ProtocolError>(())
/// ```
#[derive(Debug, Clone)]
pub struct DeviceClient {
    addr: String,
    timeout: Duration,
}

impl DeviceClient {
    pub fn new(addr: impl Into<String>) -> Self {
        DeviceClient {
            addr: addr.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the connect/read/write timeout. Long stage moves or
    /// multi-second exposures need more than the default when the caller
    /// blocks on the command's completion response.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send a typed command and read the full response.
    pub fn round_trip(&self, command: &Command) -> Result<Response, ProtocolError> {
        self.send_line(&command.encode())
    }

    /// Send a raw request line and read the full response.
    pub fn send_line(&self, line: &str) -> Result<Response, ProtocolError> {
        let addr = self.resolve()?;
        let mut stream =
            TcpStream::connect_timeout(&addr, self.timeout).map_err(|source| {
                ProtocolError::ConnectionFailed {
                    addr: self.addr.clone(),
                    source,
                }
            })?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        debug!(addr = %self.addr, command = line, "sending");
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;

        let mut reader = BufReader::new(stream);
        let mut assembler = ResponseReader::new();
        let mut buf = String::new();
        loop {
            buf.clear();
            let n = reader.read_line(&mut buf).map_err(|e| {
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) {
                    ProtocolError::Timeout(self.addr.clone())
                } else {
                    ProtocolError::Io(e)
                }
            })?;
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed);
            }
            trace!(addr = %self.addr, line = buf.trim_end(), "received");
            if let Some(response) = assembler.push_line(&buf) {
                return Ok(response);
            }
        }
    }

    /// Query the device's busy state and telemetry.
    pub fn status(&self) -> Result<StatusReport, ProtocolError> {
        let response = self.round_trip(&Command::Status)?;
        StatusReport::from_response(&response)
    }

    /// Issue `stop`. The response acknowledges receipt of the abort, not its
    /// completion; poll [`status`](Self::status) to observe the device
    /// returning to idle.
    pub fn stop(&self) -> Result<Response, ProtocolError> {
        self.round_trip(&Command::Stop)
    }

    fn resolve(&self) -> Result<SocketAddr, ProtocolError> {
        self.addr
            .to_socket_addrs()
            .map_err(|source| ProtocolError::ConnectionFailed {
                addr: self.addr.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| ProtocolError::ConnectionFailed {
                addr: self.addr.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no addresses resolved",
                ),
            })
    }
}
