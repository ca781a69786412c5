//! Image-quality verdicts driving the exposure retry loop.

use std::path::Path;

/// Which way to adjust the exposure time after a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjust {
    /// Frame underexposed: lengthen the next attempt.
    Increase,
    /// Frame saturated: shorten the next attempt.
    Decrease,
}

/// Outcome of assessing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(Adjust),
}

/// Assessor consulted after each exposure.
///
/// Image bytes are opaque to the orchestrator; implementations get the
/// written file's path and the exposure time that produced it — counts
/// only mean something relative to how long the shutter was open.
pub trait ImageQuality: Send {
    fn assess(&mut self, image: &Path, seconds: f64) -> Verdict;
}

/// Accepts every frame. The production default until a real analyzer lands.
#[derive(Debug, Default)]
pub struct AlwaysAccept;

impl ImageQuality for AlwaysAccept {
    fn assess(&mut self, _image: &Path, _seconds: f64) -> Verdict {
        Verdict::Accept
    }
}

/// Replays a fixed verdict sequence, then accepts. Test double.
#[derive(Debug)]
pub struct Scripted {
    verdicts: std::vec::IntoIter<Verdict>,
}

impl Scripted {
    pub fn new(verdicts: impl Into<Vec<Verdict>>) -> Self {
        Scripted {
            verdicts: verdicts.into().into_iter(),
        }
    }
}

impl ImageQuality for Scripted {
    fn assess(&mut self, _image: &Path, _seconds: f64) -> Verdict {
        self.verdicts.next().unwrap_or(Verdict::Accept)
    }
}
