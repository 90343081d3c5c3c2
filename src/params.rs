//! Per-frame configuration block shared by the simulation stages.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{f32::consts::PI, fmt::Debug, ops::RangeBounds};

/// Policy applied when a coordinate leaves the field.
///
/// The same policy governs agent motion, sensor lookups and the neighbor
/// lookups of the diffusion kernel.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    /// Toroidal field: leaving one edge re-enters at the opposite edge.
    #[default]
    Wrap,
    /// Mirrored field: coordinates fold back at the edges.
    Reflect,
}

impl Boundary {
    /// Bring a continuous coordinate into `[0, extent)`.
    ///
    /// Also reports whether the coordinate was mirrored, so callers can flip
    /// the matching heading component.
    pub fn fold(self, coord: f32, extent: f32) -> (f32, bool) {
        match self {
            Boundary::Wrap => {
                let folded = coord.rem_euclid(extent);
                // rem_euclid rounds tiny negative inputs up to `extent`.
                if folded >= extent {
                    (0.0, false)
                } else {
                    (folded, false)
                }
            }
            Boundary::Reflect => {
                let period = 2.0 * extent;
                let phase = coord.rem_euclid(period);
                if phase >= extent {
                    let mirrored = period - phase;
                    (mirrored.min(just_below(extent)).max(0.0), true)
                } else {
                    (phase, false)
                }
            }
        }
    }

    /// Map a signed cell index into `[0, len)`.
    ///
    /// Reflection repeats the edge cell (half-sample symmetric), which keeps
    /// box kernels mass-preserving.
    pub fn index(self, idx: i64, len: usize) -> usize {
        let len = len as i64;
        match self {
            Boundary::Wrap => idx.rem_euclid(len) as usize,
            Boundary::Reflect => {
                let phase = idx.rem_euclid(2 * len);
                if phase >= len {
                    (2 * len - 1 - phase) as usize
                } else {
                    phase as usize
                }
            }
        }
    }
}

fn just_below(extent: f32) -> f32 {
    f32::from_bits(extent.to_bits() - 1)
}

/// Parameter set governing motion and diffusion.
///
/// Copied at the top of every step; kernels never observe a change mid-step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimParams {
    pub move_speed: f32,
    pub speed_multiplier: f32,
    pub sensor_angle_offset: f32,
    pub sensor_distance: f32,
    pub rotation_speed: f32,

    pub deposit_amount: f32,
    pub trail_radius: u32,
    pub decay_rate: f32,
    pub diffuse_rate: f32,
    pub cutoff: f32,

    pub field_width: u32,
    pub field_height: u32,
    pub boundary: Boundary,

    pub max_particles: usize,
}

impl SimParams {
    /// Distance an agent advances per step.
    pub fn step_length(&self) -> f32 {
        self.move_speed * self.speed_multiplier
    }

    pub fn n_cells(&self) -> usize {
        self.field_width as usize * self.field_height as usize
    }

    /// Whether `other` describes the same field geometry and capacity.
    pub fn same_layout(&self, other: &SimParams) -> bool {
        self.field_width == other.field_width
            && self.field_height == other.field_height
            && self.boundary == other.boundary
            && self.max_particles == other.max_particles
    }

    /// Check every parameter against its allowed range.
    ///
    /// # Errors
    /// Returns an error naming the first parameter that is out of range or
    /// not a finite number.
    pub fn validate(&self) -> Result<()> {
        check_num(self.field_width, 1..=8192).context("invalid field width")?;
        check_num(self.field_height, 1..=8192).context("invalid field height")?;
        check_num(self.max_particles, 0..=4_194_304).context("invalid max particles")?;

        check_num(self.move_speed, 0.0..=1024.0).context("invalid move speed")?;
        check_num(self.speed_multiplier, 0.0..=6.0).context("invalid speed multiplier")?;
        check_num(self.sensor_angle_offset, 0.0..=PI / 2.0)
            .context("invalid sensor angle offset")?;
        check_num(self.sensor_distance, 0.0..=64.0).context("invalid sensor distance")?;
        check_num(self.rotation_speed, 0.0..=PI).context("invalid rotation speed")?;

        check_num(self.deposit_amount, 0.0..=1e6).context("invalid deposit amount")?;
        check_num(self.trail_radius, 0..=5).context("invalid trail radius")?;
        check_num(self.decay_rate, 0.0..=1.0).context("invalid decay rate")?;
        check_num(self.diffuse_rate, 0.0..=1.0).context("invalid diffuse rate")?;
        check_num(self.cutoff, 0.0..=1e6).context("invalid cutoff")?;

        Ok(())
    }
}

pub(crate) fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_params(width: u32, height: u32, boundary: Boundary) -> SimParams {
    SimParams {
        move_speed: 1.0,
        speed_multiplier: 1.0,
        sensor_angle_offset: std::f32::consts::FRAC_PI_4,
        sensor_distance: 3.0,
        rotation_speed: std::f32::consts::FRAC_PI_8,
        deposit_amount: 1.0,
        trail_radius: 0,
        decay_rate: 0.1,
        diffuse_rate: 0.5,
        cutoff: 0.0,
        field_width: width,
        field_height: height,
        boundary,
        max_particles: 64,
    }
}
