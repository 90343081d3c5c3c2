//! Binding slots shared with the presentation pipeline.
//!
//! Slot indices are part of a versioned contract: every producer and consumer
//! must agree on the same `revision`, and a layout is only accepted after
//! [`BindingLayout::validate`].

use crate::model::Agent;
use crate::params::SimParams;
use crate::trail::TrailBuffer;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    Colours,
    Particles,
    ParticleCount,
    Config,
    Drawable,
    PathInput,
    PathOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Buffer,
    Texture,
}

/// How the simulation core touches a slot during a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
    /// Written by presentation only.
    None,
}

impl Slot {
    pub fn kind(self) -> SlotKind {
        match self {
            Slot::Colours | Slot::Particles | Slot::ParticleCount | Slot::Config => {
                SlotKind::Buffer
            }
            Slot::Drawable | Slot::PathInput | Slot::PathOutput => SlotKind::Texture,
        }
    }

    pub fn access(self) -> Access {
        match self {
            Slot::Colours | Slot::ParticleCount | Slot::Config | Slot::PathInput => Access::Read,
            Slot::Particles => Access::ReadWrite,
            Slot::PathOutput => Access::Write,
            Slot::Drawable => Access::None,
        }
    }
}

/// Assignment of slots to binding indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingLayout {
    pub revision: u32,
    pub entries: Vec<(Slot, u32)>,
}

impl BindingLayout {
    pub const REVISION: u32 = 3;

    /// The layout this build produces and consumes.
    pub fn current() -> Self {
        Self {
            revision: Self::REVISION,
            entries: vec![
                (Slot::Colours, 0),
                (Slot::Particles, 1),
                (Slot::ParticleCount, 2),
                (Slot::Config, 3),
                (Slot::Drawable, 0),
                (Slot::PathInput, 1),
                (Slot::PathOutput, 2),
            ],
        }
    }

    pub fn index_of(&self, slot: Slot) -> Option<u32> {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == slot)
            .map(|&(_, idx)| idx)
    }

    pub fn validate(&self) -> Result<()> {
        for (i_entry, &(slot, idx)) in self.entries.iter().enumerate() {
            for &(other, other_idx) in &self.entries[..i_entry] {
                if other == slot {
                    bail!("slot {slot:?} is bound twice");
                }
                if other.kind() == slot.kind() && other_idx == idx {
                    bail!("slots {other:?} and {slot:?} share {:?} index {idx}", slot.kind());
                }
            }
        }

        match self.index_of(Slot::Colours) {
            Some(0) => {}
            Some(idx) => bail!("colour table must be bound at index 0, but is at {idx}"),
            None => bail!("colour table is not bound"),
        }
        for slot in [
            Slot::Particles,
            Slot::ParticleCount,
            Slot::Config,
            Slot::PathInput,
            Slot::PathOutput,
        ] {
            if self.index_of(slot).is_none() {
                bail!("required slot {slot:?} is not bound");
            }
        }

        Ok(())
    }

    /// Slots the core writes during a step.
    pub fn written_slots(&self) -> Vec<Slot> {
        self.entries
            .iter()
            .map(|&(slot, _)| slot)
            .filter(|slot| matches!(slot.access(), Access::Write | Access::ReadWrite))
            .collect()
    }

    /// Ensure a consumer expecting `other` reads the same data from the same
    /// indices.
    pub fn check_compatible(&self, other: &BindingLayout) -> Result<()> {
        if self.revision != other.revision {
            bail!(
                "binding revision mismatch: produced {}, expected {}",
                self.revision,
                other.revision
            );
        }
        for &(slot, idx) in &other.entries {
            match self.index_of(slot) {
                Some(own) if own == idx => {}
                Some(own) => bail!("slot {slot:?} is at index {own}, but expected {idx}"),
                None => bail!("slot {slot:?} is not produced"),
            }
        }
        Ok(())
    }
}

/// Read-only view of the simulation handed out after a completed step.
#[derive(Debug, Clone, Copy)]
pub struct BoundResources<'a> {
    pub colours: &'a [[f32; 4]],
    pub particles: &'a [Agent],
    pub params: SimParams,
    /// Trail produced by the last step.
    pub path_input: &'a TrailBuffer,
    /// Buffer the next step will write.
    pub path_output: &'a TrailBuffer,
}

impl BoundResources<'_> {
    pub fn particle_count(&self) -> u32 {
        self.particles.len() as u32
    }

    /// Check that the view is usable by a consumer.
    ///
    /// # Errors
    /// Returns an error if a particle's species has no colour, if the path
    /// textures alias or do not match the configured field, or if the
    /// particle count exceeds the configured capacity.
    pub fn check(&self) -> Result<()> {
        let n_colours = self.colours.len();
        if let Some(agt) = self.particles.iter().find(|agt| agt.species as usize >= n_colours) {
            bail!("species {} has no entry in a colour table of {n_colours}", agt.species);
        }
        if self.particles.len() > self.params.max_particles {
            bail!(
                "{} particles bound, but the capacity is {}",
                self.particles.len(),
                self.params.max_particles
            );
        }

        if std::ptr::eq(self.path_input, self.path_output) {
            bail!("path input and output are the same buffer");
        }
        let n_cells = self.params.n_cells();
        for (slot, buffer) in [
            (Slot::PathInput, self.path_input),
            (Slot::PathOutput, self.path_output),
        ] {
            if buffer.width() != self.params.field_width as usize
                || buffer.height() != self.params.field_height as usize
                || buffer.cells().len() != n_cells
            {
                bail!(
                    "{slot:?} is {}x{}, but the field is {}x{}",
                    buffer.width(),
                    buffer.height(),
                    self.params.field_width,
                    self.params.field_height
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_layout_is_valid() {
        let layout = BindingLayout::current();
        layout.validate().unwrap();
        layout.check_compatible(&BindingLayout::current()).unwrap();
        assert_eq!(layout.index_of(Slot::Colours), Some(0));
        assert_eq!(layout.index_of(Slot::Drawable), Some(0));
    }

    #[test]
    fn rejects_shared_index_within_kind() {
        let mut layout = BindingLayout::current();
        layout.entries.retain(|(slot, _)| *slot != Slot::PathOutput);
        layout.entries.push((Slot::PathOutput, 1));
        assert!(layout.validate().is_err());
    }

    #[test]
    fn rejects_moved_colour_table() {
        let mut layout = BindingLayout::current();
        for entry in &mut layout.entries {
            entry.1 = match entry.0 {
                Slot::Colours => 4,
                _ => entry.1,
            };
        }
        assert!(layout.validate().is_err());
    }

    #[test]
    fn renumbered_consumer_is_incompatible() {
        let produced = BindingLayout::current();
        let mut expected = BindingLayout::current();
        for entry in &mut expected.entries {
            if entry.0 == Slot::Config {
                entry.1 = 5;
            }
        }
        assert!(produced.check_compatible(&expected).is_err());

        let mut older = BindingLayout::current();
        older.revision -= 1;
        assert!(produced.check_compatible(&older).is_err());
    }

    #[test]
    fn check_rejects_inconsistent_view() {
        use crate::params::{Boundary, test_params};

        let params = test_params(4, 3, Boundary::Wrap);
        let colours = [[1.0, 0.0, 0.0, 1.0], [0.0, 1.0, 0.0, 1.0]];
        let particles = [Agent::new(1.0, 1.0, 0.0, 0), Agent::new(2.0, 2.0, 0.0, 1)];
        let (input, output) = (TrailBuffer::new(4, 3), TrailBuffer::new(4, 3));
        let bound = BoundResources {
            colours: &colours,
            particles: &particles,
            params,
            path_input: &input,
            path_output: &output,
        };
        bound.check().unwrap();

        let missing_colour = BoundResources {
            colours: &colours[..1],
            ..bound
        };
        assert!(missing_colour.check().is_err());

        let aliased = BoundResources {
            path_output: &input,
            ..bound
        };
        assert!(aliased.check().is_err());

        let wrong_size = TrailBuffer::new(3, 4);
        let resized = BoundResources {
            path_output: &wrong_size,
            ..bound
        };
        assert!(resized.check().is_err());
    }

    #[test]
    fn slot_kinds() {
        assert_eq!(Slot::Colours.kind(), SlotKind::Buffer);
        assert_eq!(Slot::PathInput.kind(), SlotKind::Texture);
        assert_eq!(Slot::Drawable.kind(), SlotKind::Texture);
        assert_eq!(Slot::Drawable.access(), Access::None);
    }

    #[test]
    fn core_writes_particles_and_next_path() {
        let written = BindingLayout::current().written_slots();
        assert_eq!(written, vec![Slot::Particles, Slot::PathOutput]);
    }
}
