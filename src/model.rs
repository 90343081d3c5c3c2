//! Agents and the fixed-capacity agent store.

use crate::bindings::BoundResources;
use crate::params::SimParams;
use anyhow::{Result, bail};
use rand::prelude::*;
use rand_distr::Uniform;
use serde::{Deserialize, Serialize};
use std::f32::consts::{PI, TAU};

/// A single slime particle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Horizontal position in cells, within `[0, width)`.
    pub x: f32,
    /// Vertical position in cells, within `[0, height)`.
    pub y: f32,
    /// Heading in radians, within `[0, 2π)`.
    pub heading: f32,
    /// Palette entry used by the presentation stage.
    pub species: u32,
}

impl Agent {
    pub fn new(x: f32, y: f32, heading: f32, species: u32) -> Self {
        Self {
            x,
            y,
            heading: wrap_angle(heading),
            species,
        }
    }

    /// Field cell currently occupied by the agent.
    pub fn cell(&self, width: u32, height: u32) -> (usize, usize) {
        let i_x = (self.x as usize).min(width as usize - 1);
        let i_y = (self.y as usize).min(height as usize - 1);
        (i_x, i_y)
    }
}

/// Bring an angle into `[0, 2π)`.
pub fn wrap_angle(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(TAU);
    if wrapped >= TAU { 0.0 } else { wrapped }
}

/// Initial spatial distribution of the agents.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Spawn {
    /// Uniform over the field with random headings.
    #[default]
    Uniform,
    /// Filled disk around the center, heading inward.
    Disk,
    /// Thin ring around the center, heading inward.
    Ring,
}

/// Fixed-capacity collection of agents plus the live count.
///
/// Records beyond the live count are kept but never stepped. The live count
/// can shrink during a session but never grow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStore {
    agents: Vec<Agent>,
    count: usize,
    capacity: usize,
}

impl AgentStore {
    /// Spawn `capacity` agents and mark the first `count` of them live.
    pub fn spawn<R: Rng>(
        params: &SimParams,
        count: usize,
        n_species: u32,
        spawn: Spawn,
        rng: &mut R,
    ) -> Result<Self> {
        let capacity = params.max_particles;
        if count > capacity {
            bail!("live count {count} exceeds capacity {capacity}");
        }

        let width = params.field_width as f32;
        let height = params.field_height as f32;
        let (c_x, c_y) = (width / 2.0, height / 2.0);
        let max_radius = 0.4 * width.min(height);

        let unit_dist = Uniform::new(0.0f32, 1.0)?;
        let angle_dist = Uniform::new(0.0f32, TAU)?;
        let species_dist = Uniform::new(0, n_species.max(1))?;

        let mut agents = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            let species = species_dist.sample(rng);
            let agent = match spawn {
                Spawn::Uniform => Agent::new(
                    unit_dist.sample(rng) * width,
                    unit_dist.sample(rng) * height,
                    angle_dist.sample(rng),
                    species,
                ),
                Spawn::Disk | Spawn::Ring => {
                    let theta = angle_dist.sample(rng);
                    let radius = match spawn {
                        Spawn::Disk => max_radius * unit_dist.sample(rng).sqrt(),
                        _ => max_radius * (0.95 + 0.05 * unit_dist.sample(rng)),
                    };
                    Agent::new(
                        c_x + radius * theta.cos(),
                        c_y + radius * theta.sin(),
                        theta + PI,
                        species,
                    )
                }
            };
            agents.push(confine(agent, params));
        }

        Ok(Self {
            agents,
            count,
            capacity,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Shrink the live count.
    ///
    /// # Errors
    /// Returns an error if `count` would grow the live subset, since the
    /// store cannot revive agents mid-session.
    pub fn set_count(&mut self, count: usize) -> Result<()> {
        if count > self.count {
            bail!(
                "live count may only decrease (current {}, requested {count})",
                self.count
            );
        }
        self.count = count;
        Ok(())
    }

    /// Check the store invariants after loading it from outside.
    ///
    /// # Errors
    /// Returns an error if the record count differs from the capacity or
    /// the live count exceeds it.
    pub fn check(&self) -> Result<()> {
        if self.agents.len() != self.capacity {
            bail!(
                "store holds {} records, but its capacity is {}",
                self.agents.len(),
                self.capacity
            );
        }
        if self.count > self.capacity {
            bail!("live count {} exceeds capacity {}", self.count, self.capacity);
        }
        Ok(())
    }

    /// Every record, live or dormant.
    #[cfg(test)]
    pub(crate) fn all(&self) -> &[Agent] {
        &self.agents
    }

    /// The live agents `[0, count)`.
    pub fn live(&self) -> &[Agent] {
        &self.agents[..self.count]
    }

    pub fn live_mut(&mut self) -> &mut [Agent] {
        &mut self.agents[..self.count]
    }
}

fn confine(agent: Agent, params: &SimParams) -> Agent {
    let (x, _) = params
        .boundary
        .fold(agent.x, params.field_width as f32);
    let (y, _) = params
        .boundary
        .fold(agent.y, params.field_height as f32);
    Agent { x, y, ..agent }
}

/// Snapshot of the simulation written to trajectory files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Number of completed steps.
    pub step: u64,
    /// Live agent count.
    pub live_count: usize,
    /// Summed trail intensity of the current buffer.
    pub trail_mass: f64,
    /// Fraction of cells with non-zero intensity.
    pub occupied_fraction: f64,
    /// Live agents per species.
    pub species_counts: Vec<usize>,
    /// Live agent records, when requested.
    pub agents: Option<Vec<Agent>>,
    /// Current trail cells (row-major), when requested.
    pub trail: Option<Vec<f32>>,
}

impl Frame {
    pub fn capture(
        bound: &BoundResources<'_>,
        step: u64,
        n_species: usize,
        save_agents: bool,
        save_trail: bool,
    ) -> Self {
        let trail = bound.path_input;
        let n_cells = trail.cells().len();
        let n_occupied = trail.cells().iter().filter(|&&val| val > 0.0).count();

        let mut species_counts = vec![0; n_species];
        for agt in bound.particles {
            if let Some(count) = species_counts.get_mut(agt.species as usize) {
                *count += 1;
            }
        }

        Self {
            step,
            live_count: bound.particle_count() as usize,
            trail_mass: trail.mass(),
            occupied_fraction: if n_cells > 0 {
                n_occupied as f64 / n_cells as f64
            } else {
                0.0
            },
            species_counts,
            agents: save_agents.then(|| bound.particles.to_vec()),
            trail: save_trail.then(|| trail.cells().to_vec()),
        }
    }
}
