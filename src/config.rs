//! TOML configuration of a simulation directory.

use crate::model::Spawn;
use crate::params::{Boundary, SimParams, check_num};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Simulation configuration.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub field: FieldConfig,
    pub agents: AgentsConfig,
    pub motion: MotionConfig,
    pub trail: TrailConfig,
    pub palette: PaletteConfig,
    pub output: OutputConfig,
}

/// Field geometry.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    /// Number of cells per row.
    pub width: u32,
    /// Number of rows.
    pub height: u32,
    /// Edge policy for motion, sensing and diffusion.
    #[serde(default)]
    pub boundary: Boundary,
}

/// Agent population.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentsConfig {
    /// Capacity of the agent store.
    pub max_particles: usize,
    /// Initial live count.
    pub count: usize,
    /// Number of species (palette entries in use).
    #[serde(default = "default_n_species")]
    pub n_species: u32,
    /// Initial spatial distribution.
    #[serde(default)]
    pub spawn: Spawn,
    /// Seed of the session generator; drawn from the OS when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Agent motion and sensing.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MotionConfig {
    /// Cells advanced per step.
    pub move_speed: f32,
    /// Multiplier applied to `move_speed`.
    #[serde(default = "default_speed_multiplier")]
    pub speed_multiplier: f32,
    /// Angle between the forward and side sensors (radians).
    pub sensor_angle_offset: f32,
    /// Distance of the sensors from the agent (cells).
    pub sensor_distance: f32,
    /// Maximum turn per step (radians).
    pub rotation_speed: f32,
}

/// Trail deposit, diffusion and decay.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrailConfig {
    /// Intensity each agent adds per step.
    pub deposit_amount: f32,
    /// Radius of the deposit footprint (cells).
    #[serde(default)]
    pub trail_radius: u32,
    /// Fraction of intensity lost per step.
    pub decay_rate: f32,
    /// Blend between the raw and the neighborhood-averaged intensity.
    pub diffuse_rate: f32,
    /// Intensities below this value are flushed to zero.
    #[serde(default)]
    pub cutoff: f32,
}

/// Color table read by the presentation stage.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaletteConfig {
    /// RGBA colors, one per species.
    pub colors: Vec<[f32; 4]>,
}

/// Trajectory output.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Number of steps between frame saves.
    pub steps_per_save: usize,
    /// Number of frames written per file.
    pub saves_per_file: usize,
    /// Whether frames carry the live agent records.
    #[serde(default)]
    pub save_agents: bool,
    /// Whether frames carry the full trail field.
    #[serde(default)]
    pub save_trail: bool,
}

fn default_n_species() -> u32 {
    1
}

fn default_speed_multiplier() -> f32 {
    1.0
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate a [`Config`] from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.params().validate()?;

        check_num(self.agents.count, 0..=self.agents.max_particles)
            .context("invalid live particle count")?;
        let n_colors = self.palette.colors.len();
        check_num(self.agents.n_species as usize, 1..=n_colors)
            .context("invalid number of species")?;

        for (i_color, color) in self.palette.colors.iter().enumerate() {
            for &channel in color {
                check_num(channel, 0.0..=1.0)
                    .with_context(|| format!("invalid palette color {i_color}"))?;
            }
        }

        check_num(self.output.steps_per_save, 1..10_000).context("invalid number of steps per save")?;
        check_num(self.output.saves_per_file, 1..10_000).context("invalid number of saves per file")?;

        Ok(())
    }

    /// The per-frame configuration block described by this file.
    pub fn params(&self) -> SimParams {
        SimParams {
            move_speed: self.motion.move_speed,
            speed_multiplier: self.motion.speed_multiplier,
            sensor_angle_offset: self.motion.sensor_angle_offset,
            sensor_distance: self.motion.sensor_distance,
            rotation_speed: self.motion.rotation_speed,
            deposit_amount: self.trail.deposit_amount,
            trail_radius: self.trail.trail_radius,
            decay_rate: self.trail.decay_rate,
            diffuse_rate: self.trail.diffuse_rate,
            cutoff: self.trail.cutoff,
            field_width: self.field.width,
            field_height: self.field.height,
            boundary: self.field.boundary,
            max_particles: self.agents.max_particles,
        }
    }
}

#[cfg(test)]
pub(crate) const EXAMPLE_TOML: &str = r#"
[field]
width = 64
height = 48
boundary = "wrap"

[agents]
max_particles = 512
count = 400
n_species = 2
spawn = "disk"
seed = 1234

[motion]
move_speed = 1.0
speed_multiplier = 2.0
sensor_angle_offset = 0.3927
sensor_distance = 10.0
rotation_speed = 0.1963

[trail]
deposit_amount = 1.0
trail_radius = 1
decay_rate = 0.02
diffuse_rate = 0.5
cutoff = 0.01

[palette]
colors = [[1.0, 0.8, 0.2, 1.0], [0.2, 0.6, 1.0, 1.0]]

[output]
steps_per_save = 4
saves_per_file = 8
save_agents = true
save_trail = true
"#;
