//! Diffuse-and-decay stage.

use crate::params::SimParams;
use crate::trail::DiffusionPass;
use rayon::prelude::*;

/// Run one diffuse-and-decay pass.
///
/// The source of cell `i` is the current intensity plus the deposits
/// accumulated this step. Each next cell gets the source blended toward its
/// 3x3 neighborhood mean by `diffuse_rate`, scaled by `1 - decay_rate`,
/// flushed to zero below `cutoff` and clamped non-negative.
pub fn diffuse_and_decay(pass: DiffusionPass<'_>, params: &SimParams) {
    let DiffusionPass {
        current,
        deposits,
        next,
    } = pass;

    let width = current.width();
    let height = current.height();
    let boundary = params.boundary;
    let retain = 1.0 - params.decay_rate;

    let source = |i_x: usize, i_y: usize| {
        let idx = i_y * width + i_x;
        current.cells()[idx] + deposits.get(idx)
    };

    next.cells_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(i_y, row)| {
            for (i_x, out) in row.iter_mut().enumerate() {
                let mut sum = 0.0;
                for d_y in -1..=1 {
                    let n_y = boundary.index(i_y as i64 + d_y, height);
                    for d_x in -1..=1 {
                        let n_x = boundary.index(i_x as i64 + d_x, width);
                        sum += source(n_x, n_y);
                    }
                }
                let center = source(i_x, i_y);
                let blurred = center + params.diffuse_rate * (sum / 9.0 - center);

                let val = blurred * retain;
                *out = if val < params.cutoff { 0.0 } else { val.max(0.0) };
            }
        });
}
