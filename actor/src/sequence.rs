//! Orchestration sequences: single exposures with retry, focus sweeps,
//! and whole-file coordinate scans.

use protocol::FrameType;
use tracing::{info, warn};

use crate::error::RigError;
use crate::quality::{Adjust, ImageQuality, Verdict};
use crate::rig::Rig;
use crate::targets::ScanTarget;

/// Exposure retry tuning. `time_factor` is the fractional adjustment per
/// rejected attempt; `max_attempts` bounds total exposures per target.
#[derive(Debug, Clone, Copy)]
pub struct ExposureTuning {
    pub time_factor: f64,
    pub max_attempts: u32,
}

impl Default for ExposureTuning {
    fn default() -> Self {
        ExposureTuning {
            time_factor: 0.5,
            max_attempts: 3,
        }
    }
}

/// Focus sweep shape: `offset_count` exposures either side of the target's
/// focus position, `offset_step` mm apart.
#[derive(Debug, Clone, Copy)]
pub struct SweepParams {
    pub offset_step: f64,
    pub offset_count: u32,
}

impl SweepParams {
    /// Z offsets in visit order: all positive steps outward, then all
    /// negative. The center position itself is not revisited.
    pub fn offsets(&self) -> impl Iterator<Item = f64> + '_ {
        let positive = (1..=self.offset_count).map(move |n| self.offset_step * n as f64);
        let negative = (1..=self.offset_count).map(move |n| -self.offset_step * n as f64);
        positive.chain(negative)
    }
}

/// Position the rig on `target` and expose until accepted or out of
/// attempts. Returns the accepted exposure time so callers can carry it
/// into the next step.
pub fn run_single_exposure(
    rig: &Rig,
    quality: &mut dyn ImageQuality,
    tuning: ExposureTuning,
    target: &ScanTarget,
    frame: FrameType,
    start_time: f64,
) -> Result<f64, RigError> {
    rig.check_cancelled()?;
    rig.wait_all_idle()?;

    rig.set_filter(target.filter_slot)?;
    rig.move_stage(target.axis_targets())?;
    rig.wait_all_idle()?;

    let mut seconds = start_time;
    for attempt in 1..=tuning.max_attempts {
        rig.check_cancelled()?;
        rig.check_ccd_temperature()?;

        let image = rig.expose(frame, seconds)?;
        match quality.assess(&image, seconds) {
            Verdict::Accept => {
                info!(image = %image.display(), seconds, attempt, "exposure accepted");
                return Ok(seconds);
            }
            Verdict::Reject(adjust) => {
                let next = match adjust {
                    Adjust::Increase => seconds * (1.0 + tuning.time_factor),
                    Adjust::Decrease => seconds * (1.0 - tuning.time_factor),
                };
                warn!(
                    image = %image.display(),
                    seconds,
                    next,
                    attempt,
                    ?adjust,
                    "exposure rejected"
                );
                seconds = next;
            }
        }
    }
    Err(RigError::RetryExhausted {
        attempts: tuning.max_attempts,
    })
}

/// Step the focus axis through `sweep` around `target`, exposing at each
/// position. R, θ, and the filter stay fixed; the exposure time accepted at
/// one step seeds the next.
pub fn focus_sweep(
    rig: &Rig,
    quality: &mut dyn ImageQuality,
    tuning: ExposureTuning,
    target: &ScanTarget,
    frame: FrameType,
    sweep: SweepParams,
    start_time: f64,
) -> Result<f64, RigError> {
    let mut seconds = start_time;
    for offset in sweep.offsets() {
        let step = target.with_z(target.z + offset);
        info!(z = step.z, offset, "focus sweep step");
        seconds = run_single_exposure(rig, quality, tuning, &step, frame, seconds)?;
    }
    Ok(seconds)
}

/// Visit every target in file order.
///
/// Each target is exposed at its own focus position; with `sweep`, the
/// focus sweep follows, seeded with the exposure time accepted at center.
/// Soft failures (a `BAD` mid-sequence, or the retry ceiling) log and move
/// on to the next target; connectivity, precondition, and cancellation
/// failures end the run. With `repeat`, the whole file loops until
/// cancelled.
pub fn scan_targets(
    rig: &Rig,
    quality: &mut dyn ImageQuality,
    tuning: ExposureTuning,
    targets: &[ScanTarget],
    frame: FrameType,
    sweep: Option<SweepParams>,
    repeat: bool,
) -> Result<(), RigError> {
    rig.check_ccd_temperature()?;
    loop {
        for (index, target) in targets.iter().enumerate() {
            info!(index, ?target, "starting target");
            // The target's own focus position is always exposed; with a
            // sweep configured, the time accepted there seeds the sweep.
            let result = run_single_exposure(rig, quality, tuning, target, frame, target.exp_time)
                .and_then(|seconds| match sweep {
                    Some(sweep) => {
                        focus_sweep(rig, quality, tuning, target, frame, sweep, seconds)
                    }
                    None => Ok(seconds),
                });
            match result {
                Ok(seconds) => info!(index, seconds, "target complete"),
                Err(e) if e.is_soft() => warn!(index, error = %e, "target skipped"),
                Err(e) => return Err(e),
            }
        }
        if !repeat {
            return Ok(());
        }
        rig.check_cancelled()?;
        info!("repeat mode: restarting coordinate file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_offsets_go_positive_then_negative() {
        let sweep = SweepParams {
            offset_step: 1.0,
            offset_count: 2,
        };
        let offsets: Vec<f64> = sweep.offsets().collect();
        assert_eq!(offsets, vec![1.0, 2.0, -1.0, -2.0]);
    }

    #[test]
    fn sweep_with_zero_count_is_empty() {
        let sweep = SweepParams {
            offset_step: 0.5,
            offset_count: 0,
        };
        assert_eq!(sweep.offsets().count(), 0);
    }

    #[test]
    fn default_tuning_matches_rig_defaults() {
        let tuning = ExposureTuning::default();
        assert_eq!(tuning.time_factor, 0.5);
        assert_eq!(tuning.max_attempts, 3);
    }
}
