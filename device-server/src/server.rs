//! Generic TCP command server: accept loop and per-connection dispatch.

use std::net::SocketAddr;
use std::sync::Arc;

use protocol::{Command, ParseError, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::service::{DeviceService, Dispatch};
use crate::slot::ExecutionSlot;

/// TCP front end for one device.
///
/// Accepts unboundedly many concurrent connections; each runs its own
/// receive/dispatch loop until the peer closes, sends an empty line, or
/// sends `quit`. Long-running commands are serialized through the device's
/// [`ExecutionSlot`]; everything else is answered inline.
pub struct CommandServer<S: DeviceService> {
    service: Arc<S>,
    slot: Arc<ExecutionSlot>,
}

impl<S: DeviceService> CommandServer<S> {
    pub fn new(service: S) -> Self {
        CommandServer {
            service: Arc::new(service),
            slot: ExecutionSlot::new(),
        }
    }

    /// Bind and serve forever.
    pub async fn serve(self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener).await
    }

    /// Serve on an already-bound listener (lets tests bind port 0).
    pub async fn serve_on(self, listener: TcpListener) -> std::io::Result<()> {
        let local = listener.local_addr()?;
        info!(device = self.service.name(), addr = %local, "command server listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let service = Arc::clone(&self.service);
            let slot = Arc::clone(&self.slot);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(service, slot, stream, peer).await {
                    debug!(%peer, error = %e, "connection ended with error");
                }
            });
        }
    }
}

async fn handle_connection<S: DeviceService>(
    service: Arc<S>,
    slot: Arc<ExecutionSlot>,
    stream: TcpStream,
    peer: SocketAddr,
) -> std::io::Result<()> {
    debug!(%peer, device = service.name(), "connection opened");
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        let request = line.trim();
        // An empty command line closes the connection without a response.
        if request.is_empty() {
            break;
        }
        info!(device = service.name(), %peer, command = request, "COMMAND");

        let lower = request.to_ascii_lowercase();
        // `status` and `stop` are special-cased ahead of general parsing,
        // case-insensitively, so they work even while a command executes.
        let response = if lower.contains("status") {
            service.status(slot.busy_state()).to_response()
        } else if lower.contains("stop") {
            handle_stop(&service, &slot)
        } else {
            match Command::parse(request) {
                Ok(Command::Quit) => break,
                Ok(command) => dispatch(&service, &slot, command).await,
                Err(e) => Response::bad(e),
            }
        };

        if let Some(reason) = response.bad_reason() {
            warn!(device = service.name(), %peer, reason, "RESPONSE: BAD");
        }
        write_half.write_all(response.encode().as_bytes()).await?;
        write_half.flush().await?;
    }

    debug!(%peer, device = service.name(), "connection closed");
    Ok(())
}

fn handle_stop<S: DeviceService>(service: &Arc<S>, slot: &Arc<ExecutionSlot>) -> Response {
    match slot.abort_active() {
        Some(operation) => {
            service.abort_hardware();
            Response::ok_msg(format!("aborting {operation}"))
        }
        None => Response::bad("idle"),
    }
}

async fn dispatch<S: DeviceService>(
    service: &Arc<S>,
    slot: &Arc<ExecutionSlot>,
    command: Command,
) -> Response {
    match service.classify(&command) {
        Dispatch::Invalid => Response::bad(ParseError::InvalidCommand),
        // The busy check and the handler run under the slot lock, so a
        // long-running claim cannot land between them.
        Dispatch::Sync => slot.with_busy_state(|busy| service.handle_sync(&command, busy)),
        Dispatch::LongRunning(operation) => {
            // Claiming the slot and spawning are atomic with respect to
            // other connections: the claim happens under the slot's lock.
            let Some(permit) = slot.try_begin(operation) else {
                return Response::bad("busy");
            };
            let service = Arc::clone(service);
            let result = tokio::task::spawn_blocking(move || {
                let abort = permit.abort_token().clone();
                let response = service.execute(command, &abort);
                drop(permit);
                response
            })
            .await;
            match result {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, operation, "long-running command panicked");
                    Response::bad(format!("{operation} failed"))
                }
            }
        }
    }
}
