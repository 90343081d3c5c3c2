//! Simulation session: lifecycle, trajectory output and checkpoints.

use crate::bindings::{BindingLayout, BoundResources};
use crate::config::Config;
use crate::diffusion::diffuse_and_decay;
use crate::model::{AgentStore, Frame};
use crate::motion::{TieBreak, sense_and_move};
use crate::params::SimParams;
use crate::trail::TrailField;
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Simulation session.
///
/// Owns the configuration, the agent store and the trail buffer pair for
/// the whole session, and provides methods to initialize, step, save and
/// load simulations.
#[derive(Serialize, Deserialize)]
pub struct Engine {
    cfg: Config,
    params: SimParams,
    layout: BindingLayout,
    agents: AgentStore,
    trail: TrailField,
    seed: u64,
    step: u64,
}

impl Engine {
    /// Create a new `Engine` with the given configuration and a freshly
    /// spawned population.
    pub fn generate_initial_condition(cfg: Config) -> Result<Self> {
        let seed = match cfg.agents.seed {
            Some(seed) => seed,
            None => ChaCha12Rng::try_from_os_rng()?.random(),
        };
        let mut rng = ChaCha12Rng::seed_from_u64(seed);

        let layout = BindingLayout::current();
        layout.validate().context("invalid binding layout")?;
        log::debug!(
            "binding revision {}, core writes {:?}",
            layout.revision,
            layout.written_slots()
        );

        let params = cfg.params();
        let agents = AgentStore::spawn(
            &params,
            cfg.agents.count,
            cfg.agents.n_species,
            cfg.agents.spawn,
            &mut rng,
        )
        .context("failed to spawn agents")?;
        let trail = TrailField::new(params.field_width as usize, params.field_height as usize);

        log::info!(
            "spawned {} of {} agents on a {}x{} field (seed {seed})",
            agents.count(),
            agents.capacity(),
            params.field_width,
            params.field_height
        );

        Ok(Self {
            cfg,
            params,
            layout,
            agents,
            trail,
            seed,
            step: 0,
        })
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn step_count(&self) -> u64 {
        self.step
    }

    pub fn agents(&self) -> &AgentStore {
        &self.agents
    }

    /// Replace the motion and trail parameters used from the next step on.
    ///
    /// # Errors
    /// Returns an error if a parameter is out of range, or if `params`
    /// changes the field geometry, the boundary policy or the capacity,
    /// none of which can change mid-session.
    pub fn apply_params(&mut self, params: SimParams) -> Result<()> {
        params.validate().context("invalid parameters")?;
        if !self.params.same_layout(&params) {
            bail!("field geometry and capacity are fixed for the session");
        }
        self.params = params;
        Ok(())
    }

    /// Adopt an edited configuration between steps.
    ///
    /// Motion, trail and palette settings may change freely. The live count
    /// may shrink. Everything else is fixed for the session.
    pub fn reconfigure(&mut self, cfg: Config) -> Result<()> {
        let (own, new) = (&self.cfg.agents, &cfg.agents);
        if cfg.field != self.cfg.field || cfg.output != self.cfg.output {
            bail!("field and output settings are fixed for the session");
        }
        if new.max_particles != own.max_particles
            || new.n_species != own.n_species
            || new.spawn != own.spawn
            || new.seed != own.seed
        {
            bail!("only the live count of the agent settings may change");
        }
        if new.count > self.agents.count() {
            bail!(
                "live count may only decrease (current {}, requested {})",
                self.agents.count(),
                new.count
            );
        }

        self.apply_params(cfg.params())?;
        if new.count < self.agents.count() {
            self.set_live_count(new.count)?;
            log::info!("live count reduced to {}", new.count);
        }
        self.cfg = cfg;
        Ok(())
    }

    /// Shrink the number of live agents.
    pub fn set_live_count(&mut self, count: usize) -> Result<()> {
        self.agents
            .set_count(count)
            .context("failed to set live count")
    }

    /// Advance the simulation by one step.
    ///
    /// Agents move and deposit, the field diffuses and decays into the next
    /// buffer, and the buffers swap roles.
    pub fn step(&mut self) {
        let params = self.params;

        self.trail.begin_step();
        sense_and_move(
            self.agents.live_mut(),
            self.trail.current(),
            self.trail.deposits(),
            &params,
            TieBreak::new(self.seed),
            self.step,
        );
        log::debug!(
            "step {}: deposited {:.3}",
            self.step,
            self.trail.deposits().total()
        );

        diffuse_and_decay(self.trail.diffusion_pass(), &params);

        self.trail.swap();
        self.step += 1;
    }

    /// Read-only view for the presentation stage.
    pub fn bindings(&self) -> BoundResources<'_> {
        BoundResources {
            colours: &self.cfg.palette.colors,
            particles: self.agents.live(),
            params: self.params,
            path_input: self.trail.current(),
            path_output: self.trail.next(),
        }
    }

    /// Like [`Engine::bindings`], for a consumer built against `expected`.
    pub fn bind(&self, expected: &BindingLayout) -> Result<BoundResources<'_>> {
        self.layout
            .check_compatible(expected)
            .context("incompatible binding layout")?;
        let bound = self.bindings();
        bound.check().context("inconsistent bound resources")?;
        Ok(bound)
    }

    /// Run one file's worth of steps and save the frames to a binary file.
    pub fn run_simulation<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        let output = self.cfg.output.clone();
        let n_species = self.cfg.agents.n_species as usize;

        for i_save in 0..output.saves_per_file {
            for _ in 0..output.steps_per_save {
                self.step();
            }

            let bound = self
                .bind(&BindingLayout::current())
                .context("failed to bind resources")?;
            let frame = Frame::capture(
                &bound,
                self.step,
                n_species,
                output.save_agents,
                output.save_trail,
            );
            encode::write(&mut writer, &frame).context("failed to serialize frame")?;

            let progress = 100.0 * (i_save + 1) as f64 / output.saves_per_file as f64;
            log::info!("completed {progress:06.2}%");
        }

        writer.flush().context("failed to flush writer stream")?;

        Ok(())
    }

    /// Save a checkpoint of the entire session.
    ///
    /// Can be used to resume the simulation later.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, &self).context("failed to serialize engine")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    /// Load a previously saved session checkpoint.
    pub fn load_checkpoint<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let engine: Engine =
            decode::from_read(&mut reader).context("failed to deserialize engine")?;
        engine
            .layout
            .check_compatible(&BindingLayout::current())
            .context("checkpoint uses an outdated binding layout")?;
        engine.check().context("checkpoint is inconsistent")?;
        Ok(engine)
    }

    fn check(&self) -> Result<()> {
        self.params.validate().context("invalid parameters")?;
        self.agents.check().context("invalid agent store")?;
        self.trail.check().context("invalid trail field")?;

        if self.agents.capacity() != self.params.max_particles {
            bail!(
                "agent capacity {} differs from max particles {}",
                self.agents.capacity(),
                self.params.max_particles
            );
        }
        let n_cells = self.trail.width() * self.trail.height();
        if self.trail.width() != self.params.field_width as usize || n_cells != self.params.n_cells()
        {
            bail!(
                "trail field is {}x{}, but the parameters give {}x{}",
                self.trail.width(),
                self.trail.height(),
                self.params.field_width,
                self.params.field_height
            );
        }
        Ok(())
    }

    /// End the session, releasing the agent store and the trail buffers.
    pub fn teardown(self) {
        log::info!("session ended after {} steps", self.step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EXAMPLE_TOML;
    use crate::params::Boundary;
    use std::{env, fs};

    fn engine_from(text: &str) -> Engine {
        let cfg = Config::from_toml(text).unwrap();
        Engine::generate_initial_condition(cfg).unwrap()
    }

    #[test]
    fn positions_stay_in_bounds() {
        for boundary in ["wrap", "reflect"] {
            let text = EXAMPLE_TOML
                .replace("boundary = \"wrap\"", &format!("boundary = \"{boundary}\""))
                .replace("move_speed = 1.0", "move_speed = 7.3");
            let mut engine = engine_from(&text);
            for _ in 0..60 {
                engine.step();
            }
            let params = *engine.params();
            for agt in engine.agents().live() {
                assert!((0.0..params.field_width as f32).contains(&agt.x));
                assert!((0.0..params.field_height as f32).contains(&agt.y));
            }
        }
    }

    #[test]
    fn deposits_match_live_agents() {
        let text = EXAMPLE_TOML.replace("trail_radius = 1", "trail_radius = 0");
        let mut engine = engine_from(&text);
        for _ in 0..5 {
            engine.step();
            let expected = engine.agents().count() as f64 * engine.params().deposit_amount as f64;
            let deposited = engine.trail.deposits().total();
            assert!((deposited - expected).abs() < 1e-3, "{deposited} vs {expected}");
        }
    }

    #[test]
    fn step_mass_follows_decay() {
        let text = EXAMPLE_TOML.replace("cutoff = 0.01", "cutoff = 0.0");
        let mut engine = engine_from(&text);
        let retain = 1.0 - engine.params().decay_rate as f64;
        for _ in 0..10 {
            let before = engine.trail.current().mass();
            engine.step();
            let deposited = engine.trail.deposits().total();
            let after = engine.trail.current().mass();
            let expected = (before + deposited) * retain;
            assert!((after - expected).abs() < 1e-4 * expected.max(1.0));
        }
    }

    #[test]
    fn zero_particles_only_diffuses() {
        let text = EXAMPLE_TOML
            .replace("max_particles = 512", "max_particles = 0")
            .replace("count = 400", "count = 0");
        let mut engine = engine_from(&text);
        let n_cells = engine.params().n_cells();
        engine.trail.load_current(&vec![1.0; n_cells]).unwrap();

        for _ in 0..3 {
            engine.step();
        }

        assert_eq!(engine.agents().count(), 0);
        assert_eq!(engine.agents().capacity(), 0);
        assert_eq!(engine.step_count(), 3);
        let mass = engine.trail.current().mass();
        let expected = n_cells as f64 * 0.98f64.powi(3);
        assert!((mass - expected).abs() < 1e-2, "{mass} vs {expected}");
    }

    #[test]
    fn same_seed_same_trajectory() {
        let mut a = engine_from(EXAMPLE_TOML);
        let mut b = engine_from(EXAMPLE_TOML);
        for _ in 0..20 {
            a.step();
            b.step();
        }
        assert_eq!(a.agents().live(), b.agents().live());
        assert_eq!(a.trail.current(), b.trail.current());
    }

    #[test]
    fn dormant_agents_are_untouched() {
        let mut engine = engine_from(EXAMPLE_TOML);
        engine.set_live_count(100).unwrap();
        assert!(engine.set_live_count(200).is_err());
        let before = engine.agents().all().to_vec();

        engine.step();

        let after = engine.agents().all();
        assert_eq!(after.len(), 512);
        assert_eq!(&after[100..], &before[100..]);
        assert_ne!(&after[..100], &before[..100]);
        assert_eq!(engine.bindings().particles.len(), 100);
    }

    #[test]
    fn apply_params_rejects_geometry_change() {
        let mut engine = engine_from(EXAMPLE_TOML);
        let mut params = *engine.params();
        params.rotation_speed = 0.5;
        engine.apply_params(params).unwrap();
        assert_eq!(engine.params().rotation_speed, 0.5);

        params.field_width += 1;
        assert!(engine.apply_params(params).is_err());

        let mut params = *engine.params();
        params.boundary = Boundary::Reflect;
        assert!(engine.apply_params(params).is_err());
    }

    #[test]
    fn apply_params_rejects_invalid_values() {
        let mut engine = engine_from(EXAMPLE_TOML);
        let valid = *engine.params();

        let mut params = valid;
        params.move_speed = f32::NAN;
        assert!(engine.apply_params(params).is_err());

        let mut params = valid;
        params.trail_radius = 1000;
        params.deposit_amount = -5.0;
        assert!(engine.apply_params(params).is_err());

        assert_eq!(engine.params(), &valid);
        engine.step();
        for agt in engine.agents().live() {
            assert!((0.0..valid.field_width as f32).contains(&agt.x));
            assert!((0.0..valid.field_height as f32).contains(&agt.y));
        }
    }

    #[test]
    fn reconfigure_accepts_tuning_and_shrinking() {
        let mut engine = engine_from(EXAMPLE_TOML);

        let text = EXAMPLE_TOML
            .replace("decay_rate = 0.02", "decay_rate = 0.1")
            .replace("count = 400", "count = 250");
        engine.reconfigure(Config::from_toml(&text).unwrap()).unwrap();
        assert_eq!(engine.params().decay_rate, 0.1);
        assert_eq!(engine.agents().count(), 250);
        assert_eq!(engine.cfg().agents.count, 250);

        let grown = EXAMPLE_TOML.replace("count = 400", "count = 300");
        assert!(engine.reconfigure(Config::from_toml(&grown).unwrap()).is_err());

        let resized = text.replace("width = 64", "width = 65");
        assert!(engine.reconfigure(Config::from_toml(&resized).unwrap()).is_err());

        let reseeded = text.replace("seed = 1234", "seed = 1");
        assert!(engine.reconfigure(Config::from_toml(&reseeded).unwrap()).is_err());
        assert_eq!(engine.agents().count(), 250);
    }

    #[test]
    fn load_checkpoint_rejects_corrupt_file() {
        let dir = env::temp_dir().join(format!("slime-corrupt-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("checkpoint.msgpack");

        let mut engine = engine_from(EXAMPLE_TOML);
        engine.params.field_width += 1;
        engine.save_checkpoint(&file).unwrap();
        assert!(Engine::load_checkpoint(&file).is_err());

        let mut engine = engine_from(EXAMPLE_TOML);
        engine.params.max_particles = 100;
        engine.save_checkpoint(&file).unwrap();
        assert!(Engine::load_checkpoint(&file).is_err());

        fs::write(&file, b"not a checkpoint").unwrap();
        assert!(Engine::load_checkpoint(&file).is_err());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn bindings_expose_swapped_roles() {
        let mut engine = engine_from(EXAMPLE_TOML);
        engine.step();
        let bound = engine.bind(&BindingLayout::current()).unwrap();
        assert_eq!(bound.particle_count(), 400);
        assert_eq!(bound.colours.len(), 2);
        assert!(std::ptr::eq(bound.path_input, engine.trail.current()));
        assert!(std::ptr::eq(bound.path_output, engine.trail.next()));

        let mut stale = BindingLayout::current();
        stale.revision += 1;
        assert!(engine.bind(&stale).is_err());
    }

    #[test]
    fn checkpoint_resumes_identically() {
        let dir = env::temp_dir().join(format!("slime-checkpoint-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("checkpoint.msgpack");

        let mut engine = engine_from(EXAMPLE_TOML);
        for _ in 0..5 {
            engine.step();
        }
        engine.save_checkpoint(&file).unwrap();
        let mut resumed = Engine::load_checkpoint(&file).unwrap();

        for _ in 0..5 {
            engine.step();
            resumed.step();
        }
        assert_eq!(engine.step_count(), resumed.step_count());
        assert_eq!(engine.agents().live(), resumed.agents().live());
        assert_eq!(engine.trail.current(), resumed.trail.current());

        fs::remove_dir_all(&dir).ok();
    }
}
