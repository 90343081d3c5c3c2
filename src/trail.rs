//! Double-buffered trail field.
//!
//! Two pre-allocated buffers alternate between the "current" role (read by
//! the sensors, source of diffusion) and the "next" role (target of
//! diffusion). Agent deposits for the step accumulate in an atomic channel
//! that belongs to the next buffer until diffusion folds them in. Swapping
//! roles flips an index and never moves cell data.

use crate::params::Boundary;
use anyhow::{Result, bail};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// One scalar intensity grid, stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailBuffer {
    width: usize,
    height: usize,
    cells: Vec<f32>,
}

impl TrailBuffer {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![0.0; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, i_x: usize, i_y: usize) -> f32 {
        self.cells[i_y * self.width + i_x]
    }

    /// Intensity at a continuous point, folded into the field by `boundary`.
    pub fn sample(&self, x: f32, y: f32, boundary: Boundary) -> f32 {
        let (x, _) = boundary.fold(x, self.width as f32);
        let (y, _) = boundary.fold(y, self.height as f32);
        let i_x = (x as usize).min(self.width - 1);
        let i_y = (y as usize).min(self.height - 1);
        self.get(i_x, i_y)
    }

    pub fn cells(&self) -> &[f32] {
        &self.cells
    }

    pub(crate) fn cells_mut(&mut self) -> &mut [f32] {
        &mut self.cells
    }

    /// Summed intensity over the whole grid.
    pub fn mass(&self) -> f64 {
        self.cells.par_iter().map(|&val| val as f64).sum()
    }
}

/// Per-cell additive accumulator for one step's deposits.
///
/// Cells hold `f32` bit patterns so that any number of agents may add to the
/// same cell concurrently without losing updates.
#[derive(Debug, Default)]
pub struct DepositChannel {
    cells: Vec<AtomicU32>,
}

impl DepositChannel {
    fn reset(&mut self, len: usize) {
        if self.cells.len() != len {
            self.cells = (0..len).map(|_| AtomicU32::new(0)).collect();
            return;
        }
        let zero = 0.0f32.to_bits();
        self.cells
            .par_iter()
            .for_each(|cell| cell.store(zero, Ordering::Relaxed));
    }

    /// Add `amount` to the cell at `idx`.
    pub fn add(&self, idx: usize, amount: f32) {
        let cell = &self.cells[idx];
        let mut old = cell.load(Ordering::Relaxed);
        loop {
            let new = (f32::from_bits(old) + amount).to_bits();
            match cell.compare_exchange_weak(old, new, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(actual) => old = actual,
            }
        }
    }

    pub fn get(&self, idx: usize) -> f32 {
        f32::from_bits(self.cells[idx].load(Ordering::Relaxed))
    }

    pub fn total(&self) -> f64 {
        self.cells
            .par_iter()
            .map(|cell| f32::from_bits(cell.load(Ordering::Relaxed)) as f64)
            .sum()
    }
}

/// Borrowed view of the field for the diffusion stage: the current buffer
/// and deposit channel are shared, the next buffer is exclusive.
pub struct DiffusionPass<'a> {
    pub current: &'a TrailBuffer,
    pub deposits: &'a DepositChannel,
    pub next: &'a mut TrailBuffer,
}

/// The pair of trail buffers and their role assignment.
#[derive(Debug, Serialize, Deserialize)]
pub struct TrailField {
    buffers: [TrailBuffer; 2],
    i_current: usize,

    #[serde(skip)]
    deposits: DepositChannel,
}

impl TrailField {
    pub fn new(width: usize, height: usize) -> Self {
        let mut deposits = DepositChannel::default();
        deposits.reset(width * height);
        Self {
            buffers: [TrailBuffer::new(width, height), TrailBuffer::new(width, height)],
            i_current: 0,
            deposits,
        }
    }

    pub fn width(&self) -> usize {
        self.buffers[0].width
    }

    pub fn height(&self) -> usize {
        self.buffers[0].height
    }

    /// Check the role index and buffer sizes after loading from outside.
    ///
    /// # Errors
    /// Returns an error if the role index is not 0 or 1, or if a buffer does
    /// not hold `width * height` cells of the shared geometry.
    pub fn check(&self) -> Result<()> {
        if self.i_current > 1 {
            bail!("role index must be 0 or 1, but is {}", self.i_current);
        }
        let (width, height) = (self.width(), self.height());
        for (i_buffer, buffer) in self.buffers.iter().enumerate() {
            if buffer.width != width || buffer.height != height {
                bail!(
                    "buffer {i_buffer} is {}x{}, expected {width}x{height}",
                    buffer.width,
                    buffer.height
                );
            }
            if buffer.cells.len() != width * height {
                bail!(
                    "buffer {i_buffer} holds {} cells, expected {}",
                    buffer.cells.len(),
                    width * height
                );
            }
        }
        Ok(())
    }

    /// Index of the buffer currently holding the "current" role.
    #[cfg(test)]
    pub(crate) fn current_index(&self) -> usize {
        self.i_current
    }

    pub fn current(&self) -> &TrailBuffer {
        &self.buffers[self.i_current]
    }

    pub fn next(&self) -> &TrailBuffer {
        &self.buffers[1 - self.i_current]
    }

    pub fn deposits(&self) -> &DepositChannel {
        &self.deposits
    }

    /// Zero the deposit channel ahead of a new step.
    pub fn begin_step(&mut self) {
        let len = self.width() * self.height();
        self.deposits.reset(len);
    }

    /// Split the field for the diffusion stage.
    pub fn diffusion_pass(&mut self) -> DiffusionPass<'_> {
        let (lo, hi) = self.buffers.split_at_mut(1);
        let (current, next) = if self.i_current == 0 {
            (&lo[0], &mut hi[0])
        } else {
            (&hi[0], &mut lo[0])
        };
        DiffusionPass {
            current,
            deposits: &self.deposits,
            next,
        }
    }

    /// Exchange the roles of the two buffers.
    pub fn swap(&mut self) {
        self.i_current = 1 - self.i_current;
    }

    /// Seed the current buffer.
    #[cfg(test)]
    pub(crate) fn load_current(&mut self, cells: &[f32]) -> Result<()> {
        let buffer = &mut self.buffers[self.i_current];
        let len = buffer.cells.len();
        if cells.len() != len {
            bail!("expected {len} cells, but got {}", cells.len());
        }
        buffer.cells.copy_from_slice(cells);
        Ok(())
    }
}

/// Cell offsets covered by a deposit of the given radius.
pub fn footprint(radius: u32) -> Vec<(i64, i64)> {
    let r = radius as i64;
    let mut offsets = Vec::new();
    for d_y in -r..=r {
        for d_x in -r..=r {
            if d_x * d_x + d_y * d_y <= r * r {
                offsets.push((d_x, d_y));
            }
        }
    }
    offsets
}
