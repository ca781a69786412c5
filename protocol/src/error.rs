use thiserror::Error;

/// Errors produced while parsing a request line into a [`Command`].
///
/// The `Display` text of each variant is exactly what a server reports after
/// the `BAD: ` prefix, so parse failures map directly onto the wire error
/// vocabulary the original servers used (`BAD: Invalid Command`,
/// `BAD: Invalid axis ...`, ...).
///
/// [`Command`]: crate::Command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Unknown verb, wrong argument shape, or duplicate keys.
    #[error("Invalid Command")]
    InvalidCommand,

    /// A `key=` that is not one of the r/t/z axes.
    #[error("Invalid axis {0}")]
    InvalidAxis(String),

    /// A key's value failed numeric conversion.
    #[error("Invalid value for {0}")]
    InvalidValue(String),

    /// Exposure seconds missing, non-numeric, or not positive.
    #[error("Invalid Exposure Time")]
    InvalidExposureTime,
}

/// Errors crossing the TCP transport in the client.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Low-level socket read/write failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TCP connection could not be established (refused, unresolvable, ...).
    ///
    /// Distinguished from [`Timeout`](Self::Timeout) because a refused
    /// connection means the device server is not running at all, which the
    /// actor treats as fatal to the whole run.
    #[error("Connection to {addr} failed: {source}")]
    ConnectionFailed {
        addr: String,
        source: std::io::Error,
    },

    /// No complete response within the configured timeout.
    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    /// Peer closed the connection before sending a sentinel line.
    #[error("Connection closed before response sentinel")]
    ConnectionClosed,

    /// Response text did not match the expected structure.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}
