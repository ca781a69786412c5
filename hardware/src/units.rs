//! Physical-unit ↔ motor-step conversion for the three stage axes.
//!
//! The Standa stage controllers address position as an integer full-step
//! count plus a microstep in 1/256 of a step. Commands arrive in physical
//! units (mm for R and Z, degrees for θ) and are converted through a fixed
//! linear scale per axis; the fractional remainder below one step is
//! preserved as microsteps rather than rounded away.

use std::fmt;

/// Microstep resolution of the stage motors (1/256 step mode).
pub const MICROSTEPS_PER_STEP: i32 = 256;

/// The three stage axes: radial (mm), rotation (deg), focus (mm).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    R,
    T,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::R, Axis::T, Axis::Z];

    /// Fixed conversion scale for this axis.
    pub fn scale(&self) -> AxisScale {
        match self {
            // mm per encoder count
            Axis::R => AxisScale::new(0.00125),
            // deg per encoder count (25.9 arcsec per count)
            Axis::T => AxisScale::new(25.9 / 3600.0),
            // mm per encoder count
            Axis::Z => AxisScale::new(0.0000625),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::R => "r",
            Axis::T => "t",
            Axis::Z => "z",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Linear scale between physical units and encoder/step counts.
///
/// Conversion is exact multiplication/division; any rounding happens only
/// when a count is quantized to hardware step granularity in
/// [`StepMove::from_counts`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisScale {
    units_per_count: f64,
}

impl AxisScale {
    pub const fn new(units_per_count: f64) -> Self {
        AxisScale { units_per_count }
    }

    pub fn units_per_count(&self) -> f64 {
        self.units_per_count
    }

    /// Physical units → fractional step count.
    pub fn to_counts(&self, units: f64) -> f64 {
        units / self.units_per_count
    }

    /// Fractional step count → physical units.
    pub fn to_units(&self, counts: f64) -> f64 {
        counts * self.units_per_count
    }
}

/// A stage move target: integer full steps plus 1/256-step microsteps.
///
/// `microsteps` carries the sign of the move and stays in
/// `-255..=255`; `steps` and `microsteps` never disagree in sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepMove {
    pub steps: i32,
    pub microsteps: i32,
}

impl StepMove {
    /// Quantize a fractional step count to hardware granularity.
    ///
    /// The fractional part is rounded to the nearest microstep, carrying
    /// into `steps` when it rounds to a whole step.
    pub fn from_counts(counts: f64) -> Self {
        let mut steps = counts.trunc() as i32;
        let mut microsteps = (counts.fract() * MICROSTEPS_PER_STEP as f64).round() as i32;
        if microsteps.abs() >= MICROSTEPS_PER_STEP {
            steps += microsteps.signum();
            microsteps = 0;
        }
        StepMove { steps, microsteps }
    }

    /// Physical units → step/microstep pair through the axis scale.
    pub fn from_units(axis: Axis, units: f64) -> Self {
        Self::from_counts(axis.scale().to_counts(units))
    }

    /// Back to a fractional step count.
    pub fn as_counts(&self) -> f64 {
        self.steps as f64 + self.microsteps as f64 / MICROSTEPS_PER_STEP as f64
    }

    /// Back to physical units through the axis scale.
    pub fn as_units(&self, axis: Axis) -> f64 {
        axis.scale().to_units(self.as_counts())
    }
}
