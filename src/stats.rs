//! Streaming and time-series statistics for frame observables.

use serde::{Deserialize, Serialize};

/// Running mean, variance and range (Welford's algorithm).
#[derive(Debug, Default)]
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    diff_2_sum: f64,
    min: f64,
    max: f64,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub n_vals: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl Accumulator {
    pub fn add(&mut self, val: f64) {
        if self.n_vals == 0 {
            self.min = val;
            self.max = val;
        } else {
            self.min = self.min.min(val);
            self.max = self.max.max(val);
        }
        self.n_vals += 1;

        let diff_a = val - self.mean;
        self.mean += diff_a / self.n_vals as f64;
        let diff_b = val - self.mean;
        self.diff_2_sum += diff_a * diff_b;
    }

    pub fn report(&self) -> AccumulatorReport {
        let (mean, min, max) = match self.n_vals {
            0 => (f64::NAN, f64::NAN, f64::NAN),
            _ => (self.mean, self.min, self.max),
        };
        AccumulatorReport {
            n_vals: self.n_vals,
            mean,
            std_dev: if self.n_vals > 1 {
                (self.diff_2_sum / (self.n_vals - 1) as f64).sqrt()
            } else {
                f64::NAN
            },
            min,
            max,
        }
    }
}

/// Full series of one observable, reported after discarding the transient.
#[derive(Debug, Default)]
pub struct TimeSeries {
    vals: Vec<f64>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesReport {
    /// Index of the first value kept after the transient.
    pub i_equil: usize,
    pub mean: f64,
    pub std_dev: f64,
    /// Standard error of the mean, corrected for autocorrelation.
    pub sem: f64,
}

impl TimeSeries {
    pub fn push(&mut self, val: f64) {
        self.vals.push(val);
    }

    pub fn report(&self) -> TimeSeriesReport {
        let i_equil = equilibration_index(&self.vals);
        let tail = &self.vals[i_equil..];
        TimeSeriesReport {
            i_equil,
            mean: mean(tail),
            std_dev: variance(tail).sqrt(),
            sem: blocked_sem(tail),
        }
    }
}

fn mean(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return f64::NAN;
    }
    vals.iter().sum::<f64>() / vals.len() as f64
}

fn variance(vals: &[f64]) -> f64 {
    if vals.len() < 2 {
        return f64::NAN;
    }
    let mean = mean(vals);
    let sq_sum: f64 = vals.iter().map(|&val| (val - mean).powi(2)).sum();
    sq_sum / (vals.len() - 1) as f64
}

/// Standard error of the mean by repeated pairwise blocking
/// (Flyvbjerg-Petersen): the first block level whose estimate clears every
/// later level's lower error bound is taken as converged.
fn blocked_sem(vals: &[f64]) -> f64 {
    let mut levels: Vec<(f64, f64)> = Vec::new();
    let mut blocks = vals.to_vec();
    while blocks.len() >= 2 {
        let n = blocks.len() as f64;
        let sem_2 = variance(&blocks) / n;
        levels.push((sem_2, sem_2 * (2.0 / (n - 1.0)).sqrt()));
        blocks = blocks
            .chunks_exact(2)
            .map(|pair| 0.5 * (pair[0] + pair[1]))
            .collect();
    }

    for (i_level, &(sem_2, _)) in levels.iter().enumerate() {
        let floor = levels[i_level..]
            .iter()
            .map(|&(est, err)| est - err)
            .fold(f64::NEG_INFINITY, f64::max);
        if sem_2 > floor {
            return sem_2.sqrt();
        }
    }
    levels.last().map_or(f64::NAN, |&(sem_2, _)| sem_2.sqrt())
}

/// Start of the equilibrated tail, chosen among `n / 2^k` cut points by the
/// marginal standard error rule.
fn equilibration_index(vals: &[f64]) -> usize {
    let n_vals = vals.len();
    if n_vals < 4 {
        return 0;
    }
    let mut best = (f64::INFINITY, 0);
    let mut cut = n_vals / 2;
    loop {
        let tail = &vals[cut..];
        let n_tail = tail.len() as f64;
        let mse = variance(tail) * (n_tail - 1.0) / (n_tail * n_tail);
        if mse < best.0 {
            best = (mse, cut);
        }
        if cut == 0 {
            break;
        }
        cut /= 2;
    }
    best.1
}
