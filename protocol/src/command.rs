use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// CCD frame type for an exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    Light,
    Dark,
    Bias,
    Flat,
}

impl FrameType {
    /// All frame types, in the order the camera hardware indexes them.
    pub const ALL: [FrameType; 4] = [
        FrameType::Light,
        FrameType::Dark,
        FrameType::Bias,
        FrameType::Flat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::Light => "light",
            FrameType::Dark => "dark",
            FrameType::Bias => "bias",
            FrameType::Flat => "flat",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Ok(FrameType::Light),
            "dark" => Ok(FrameType::Dark),
            "bias" => Ok(FrameType::Bias),
            "flat" => Ok(FrameType::Flat),
            _ => Err(ParseError::InvalidCommand),
        }
    }
}

/// Per-axis values carried by `move`, `offset`, and `speed` commands.
///
/// Each field is in physical units: millimeters for `r` and `z`, degrees for
/// `t`. Axes not named in the command are `None` and untouched by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisTargets {
    pub r: Option<f64>,
    pub t: Option<f64>,
    pub z: Option<f64>,
}

impl AxisTargets {
    pub fn is_empty(&self) -> bool {
        self.r.is_none() && self.t.is_none() && self.z.is_none()
    }

    /// Parse `r=`/`t=`/`z=` pairs. Keys are unique per command; a repeated
    /// or unknown key is an error.
    fn parse(pairs: &[&str]) -> Result<Self, ParseError> {
        let mut targets = AxisTargets::default();
        for pair in pairs {
            let (key, value) = pair.split_once('=').ok_or(ParseError::InvalidCommand)?;
            let slot = match key {
                "r" => &mut targets.r,
                "t" => &mut targets.t,
                "z" => &mut targets.z,
                other => return Err(ParseError::InvalidAxis(other.to_string())),
            };
            if slot.is_some() {
                return Err(ParseError::InvalidCommand);
            }
            let parsed: f64 = value
                .parse()
                .map_err(|_| ParseError::InvalidValue(key.to_string()))?;
            *slot = Some(parsed);
        }
        if targets.is_empty() {
            return Err(ParseError::InvalidCommand);
        }
        Ok(targets)
    }

    fn encode_into(&self, line: &mut String) {
        for (key, value) in [("r", self.r), ("t", self.t), ("z", self.z)] {
            if let Some(v) = value {
                line.push_str(&format!(" {key}={v}"));
            }
        }
    }
}

/// A parsed request line.
///
/// Verbs are matched case-sensitively; the server additionally special-cases
/// `status` and `stop` case-insensitively before general parsing (see the
/// device-server crate), matching the original wire behavior.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Absolute move in physical units.
    Move(AxisTargets),
    /// Relative move in physical units.
    Offset(AxisTargets),
    /// Home all axes.
    Home,
    /// Set axis speeds in physical units per second.
    Speed(AxisTargets),
    /// Take an exposure. `seconds` is 0.0 for bias frames.
    Expose { frame: FrameType, seconds: f64 },
    /// Set named device parameters. Interpretation is device-specific;
    /// keys are unique per command.
    Set(Vec<(String, String)>),
    /// Query busy state and telemetry.
    Status,
    /// Abort the in-flight long-running command.
    Stop,
    /// Close the connection.
    Quit,
}

impl Command {
    /// True for commands whose hardware effect outlasts the round trip.
    ///
    /// At most one of these may execute per device at a time.
    pub fn is_long_running(&self) -> bool {
        matches!(
            self,
            Command::Move(_) | Command::Offset(_) | Command::Home | Command::Expose { .. }
        )
    }

    /// Short operation name used in `OK: aborting <op>` and
    /// `BAD: <op> failed` messages.
    pub fn operation(&self) -> &'static str {
        match self {
            Command::Move(_) => "move",
            Command::Offset(_) => "offset",
            Command::Home => "home",
            Command::Speed(_) => "speed",
            Command::Expose { .. } => "exposure",
            Command::Set(_) => "set",
            Command::Status => "status",
            Command::Stop => "stop",
            Command::Quit => "quit",
        }
    }

    /// Parse a request line.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (&verb, args) = tokens.split_first().ok_or(ParseError::InvalidCommand)?;

        match verb {
            "move" => Ok(Command::Move(AxisTargets::parse(args)?)),
            "offset" => Ok(Command::Offset(AxisTargets::parse(args)?)),
            "speed" => Ok(Command::Speed(AxisTargets::parse(args)?)),
            "home" if args.is_empty() => Ok(Command::Home),
            "expose" => Self::parse_expose(args),
            "set" => Self::parse_set(args),
            "status" if args.is_empty() => Ok(Command::Status),
            "stop" if args.is_empty() => Ok(Command::Stop),
            "quit" if args.is_empty() => Ok(Command::Quit),
            _ => Err(ParseError::InvalidCommand),
        }
    }

    /// `expose <frameType> [<seconds>]` — seconds required and positive
    /// except for bias frames, where it is omitted or ignored.
    fn parse_expose(args: &[&str]) -> Result<Self, ParseError> {
        let (&frame, rest) = args.split_first().ok_or(ParseError::InvalidCommand)?;
        let frame: FrameType = frame.parse()?;

        let seconds = match (frame, rest) {
            (FrameType::Bias, []) | (FrameType::Bias, [_]) => 0.0,
            (_, [secs]) => {
                let secs: f64 = secs.parse().map_err(|_| ParseError::InvalidExposureTime)?;
                if secs <= 0.0 || !secs.is_finite() {
                    return Err(ParseError::InvalidExposureTime);
                }
                secs
            }
            (_, []) => return Err(ParseError::InvalidExposureTime),
            _ => return Err(ParseError::InvalidCommand),
        };

        Ok(Command::Expose { frame, seconds })
    }

    fn parse_set(args: &[&str]) -> Result<Self, ParseError> {
        if args.is_empty() {
            return Err(ParseError::InvalidCommand);
        }
        let mut params = Vec::with_capacity(args.len());
        for pair in args {
            let (key, value) = pair.split_once('=').ok_or(ParseError::InvalidCommand)?;
            if key.is_empty() || params.iter().any(|(k, _)| k == key) {
                return Err(ParseError::InvalidCommand);
            }
            params.push((key.to_string(), value.to_string()));
        }
        Ok(Command::Set(params))
    }

    /// Encode back into a request line (no trailing newline).
    pub fn encode(&self) -> String {
        match self {
            Command::Move(targets) => {
                let mut line = String::from("move");
                targets.encode_into(&mut line);
                line
            }
            Command::Offset(targets) => {
                let mut line = String::from("offset");
                targets.encode_into(&mut line);
                line
            }
            Command::Speed(targets) => {
                let mut line = String::from("speed");
                targets.encode_into(&mut line);
                line
            }
            Command::Home => String::from("home"),
            Command::Expose { frame, seconds } => {
                if *frame == FrameType::Bias {
                    format!("expose {frame}")
                } else {
                    format!("expose {frame} {seconds}")
                }
            }
            Command::Set(params) => {
                let mut line = String::from("set");
                for (key, value) in params {
                    line.push_str(&format!(" {key}={value}"));
                }
                line
            }
            Command::Status => String::from("status"),
            Command::Stop => String::from("stop"),
            Command::Quit => String::from("quit"),
        }
    }
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::parse(s)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
