//! Sense-and-move stage.

use crate::model::{Agent, wrap_angle};
use crate::params::SimParams;
use crate::trail::{DepositChannel, TrailBuffer, footprint};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rayon::prelude::*;
use std::f32::consts::PI;

/// Reproducible coin used when the left and right sensors read the same.
///
/// The outcome depends only on the session seed, the agent index and the
/// step index, so it is independent of thread scheduling.
#[derive(Debug, Clone, Copy)]
pub struct TieBreak {
    seed: u64,
}

impl TieBreak {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// `true` turns left, `false` turns right.
    pub fn turn_left(&self, i_agt: usize, step: u64) -> bool {
        let mut rng = ChaCha12Rng::seed_from_u64(self.seed);
        rng.set_stream(i_agt as u64);
        // random_bool consumes two 32-bit words.
        rng.set_word_pos(2 * step as u128);
        rng.random_bool(0.5)
    }
}

/// Heading after one steering decision.
///
/// Keeps the heading only if the forward sensor is strictly the strongest;
/// otherwise turns toward the stronger side, asking `turn_left` on a tie.
pub fn steer(
    heading: f32,
    (left, forward, right): (f32, f32, f32),
    rotation: f32,
    turn_left: impl FnOnce() -> bool,
) -> f32 {
    let turn = if forward > left && forward > right {
        0.0
    } else if left > right {
        rotation
    } else if right > left {
        -rotation
    } else if turn_left() {
        rotation
    } else {
        -rotation
    };
    wrap_angle(heading + turn)
}

/// Trail intensity at the left, forward and right sensors of an agent.
pub fn sense(agt: &Agent, trail: &TrailBuffer, params: &SimParams) -> (f32, f32, f32) {
    let reading = |angle: f32| {
        let x = agt.x + params.sensor_distance * angle.cos();
        let y = agt.y + params.sensor_distance * angle.sin();
        trail.sample(x, y, params.boundary)
    };
    let offset = params.sensor_angle_offset;
    (
        reading(agt.heading + offset),
        reading(agt.heading),
        reading(agt.heading - offset),
    )
}

/// Advance an agent along its heading and fold it back into the field.
pub fn advance(agt: &mut Agent, params: &SimParams) {
    let len = params.step_length();
    let (x, flip_x) = params
        .boundary
        .fold(agt.x + len * agt.heading.cos(), params.field_width as f32);
    let (y, flip_y) = params
        .boundary
        .fold(agt.y + len * agt.heading.sin(), params.field_height as f32);

    let mut heading = agt.heading;
    if flip_x {
        heading = PI - heading;
    }
    if flip_y {
        heading = -heading;
    }

    agt.x = x;
    agt.y = y;
    agt.heading = wrap_angle(heading);
}

/// Run one sense-and-move pass over the live agents.
///
/// Reads `current` only; writes the agents and adds each agent's deposit to
/// `deposits`.
pub fn sense_and_move(
    agents: &mut [Agent],
    current: &TrailBuffer,
    deposits: &DepositChannel,
    params: &SimParams,
    tie_break: TieBreak,
    step: u64,
) {
    let width = params.field_width as usize;
    let height = params.field_height as usize;
    let offsets = footprint(params.trail_radius);
    let share = params.deposit_amount / offsets.len() as f32;

    agents.par_iter_mut().enumerate().for_each(|(i_agt, agt)| {
        let readings = sense(agt, current, params);
        agt.heading = steer(agt.heading, readings, params.rotation_speed, || {
            tie_break.turn_left(i_agt, step)
        });

        advance(agt, params);

        if share <= 0.0 {
            return;
        }
        let (i_x, i_y) = agt.cell(params.field_width, params.field_height);
        for &(d_x, d_y) in &offsets {
            let c_x = params.boundary.index(i_x as i64 + d_x, width);
            let c_y = params.boundary.index(i_y as i64 + d_y, height);
            deposits.add(c_y * width + c_x, share);
        }
    });
}
