use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Whether a device currently has a long-running command executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusyState {
    Busy,
    Idle,
}

impl BusyState {
    pub fn is_busy(&self) -> bool {
        matches!(self, BusyState::Busy)
    }
}

impl fmt::Display for BusyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusyState::Busy => f.write_str("BUSY"),
            BusyState::Idle => f.write_str("IDLE"),
        }
    }
}

impl FromStr for BusyState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "BUSY" => Ok(BusyState::Busy),
            "IDLE" => Ok(BusyState::Idle),
            _ => Err(()),
        }
    }
}

/// The sentinel line of a response: success with an optional message, or a
/// failure reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok(Option<String>),
    Bad(String),
}

/// A complete response: payload lines followed by one sentinel line.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub payload: Vec<String>,
    pub outcome: Outcome,
}

impl Response {
    pub fn ok() -> Self {
        Response {
            payload: Vec::new(),
            outcome: Outcome::Ok(None),
        }
    }

    /// `OK: <message>` success, e.g. `OK: aborting move`.
    pub fn ok_msg(message: impl Into<String>) -> Self {
        Response {
            payload: Vec::new(),
            outcome: Outcome::Ok(Some(message.into())),
        }
    }

    /// `BAD: <reason>` failure.
    pub fn bad(reason: impl fmt::Display) -> Self {
        Response {
            payload: Vec::new(),
            outcome: Outcome::Bad(reason.to_string()),
        }
    }

    pub fn with_payload<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.payload.extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, Outcome::Ok(_))
    }

    /// Failure reason, if this is a `BAD` response.
    pub fn bad_reason(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Bad(reason) => Some(reason),
            Outcome::Ok(_) => None,
        }
    }

    /// The value of a `key = value` payload line, if present.
    pub fn payload_value(&self, key: &str) -> Option<&str> {
        self.payload.iter().find_map(|line| {
            let (k, v) = line.split_once('=')?;
            (k.trim() == key).then(|| v.trim())
        })
    }

    /// Encode as wire text: each payload line then the sentinel, all
    /// newline-terminated.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for line in &self.payload {
            out.push_str(line);
            out.push('\n');
        }
        match &self.outcome {
            Outcome::Ok(None) => out.push_str("OK\n"),
            Outcome::Ok(Some(msg)) => out.push_str(&format!("OK: {msg}\n")),
            Outcome::Bad(reason) => out.push_str(&format!("BAD: {reason}\n")),
        }
        out
    }
}

/// Sentinel scan: a line terminates a response if it contains `OK` or `BAD`
/// anywhere. Payload text (lowercase telemetry) never contains either, but
/// the substring match keeps us wire-compatible with the original clients.
fn parse_sentinel(line: &str) -> Option<Outcome> {
    let trimmed = line.trim();
    if let Some(rest) = trimmed.strip_prefix("BAD") {
        let reason = rest.trim_start_matches(':').trim();
        return Some(Outcome::Bad(reason.to_string()));
    }
    if let Some(rest) = trimmed.strip_prefix("OK") {
        let msg = rest.trim_start_matches(':').trim();
        let msg = (!msg.is_empty()).then(|| msg.to_string());
        return Some(Outcome::Ok(msg));
    }
    if trimmed.contains("BAD") {
        return Some(Outcome::Bad(trimmed.to_string()));
    }
    if trimmed.contains("OK") {
        return Some(Outcome::Ok(None));
    }
    None
}

/// Incremental response assembler for the read side of the transport.
///
/// Feed it lines as they arrive; it returns the completed [`Response`] once
/// the sentinel line shows up.
#[derive(Debug, Default)]
pub struct ResponseReader {
    payload: Vec<String>,
}

impl ResponseReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one line. Returns `Some(response)` when `line` is the
    /// sentinel, `None` while more payload is expected.
    pub fn push_line(&mut self, line: &str) -> Option<Response> {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(outcome) = parse_sentinel(line) {
            return Some(Response {
                payload: std::mem::take(&mut self.payload),
                outcome,
            });
        }
        self.payload.push(line.to_string());
        None
    }
}

/// Parsed `status` response: busy state plus ordered telemetry fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub busy: BusyState,
    /// Device telemetry in emission order, as `(key, value)` pairs.
    pub fields: Vec<(String, String)>,
}

impl StatusReport {
    pub fn new(busy: BusyState) -> Self {
        StatusReport {
            busy,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.fields.push((key.into(), value.to_string()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v.as_str()))
    }

    /// Render as response payload lines: the busy marker then
    /// `key = value` telemetry.
    pub fn to_response(&self) -> Response {
        let mut payload = vec![self.busy.to_string()];
        payload.extend(self.fields.iter().map(|(k, v)| format!("{k} = {v}")));
        Response::ok().with_payload(payload)
    }

    /// Parse from a status response payload. The first payload line must be
    /// the `BUSY`/`IDLE` marker.
    pub fn from_response(response: &Response) -> Result<Self, ProtocolError> {
        if let Some(reason) = response.bad_reason() {
            return Err(ProtocolError::MalformedResponse(format!(
                "status query rejected: {reason}"
            )));
        }
        let mut lines = response.payload.iter();
        let busy = lines
            .next()
            .and_then(|line| line.parse().ok())
            .ok_or_else(|| {
                ProtocolError::MalformedResponse(
                    "status payload missing BUSY/IDLE marker".to_string(),
                )
            })?;
        let fields = lines
            .filter_map(|line| {
                let (k, v) = line.split_once('=')?;
                Some((k.trim().to_string(), v.trim().to_string()))
            })
            .collect();
        Ok(StatusReport { busy, fields })
    }
}
