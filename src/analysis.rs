//! Observables computed from saved trajectory frames.

use crate::config::Config;
use crate::model::Frame;
use crate::stats::{Accumulator, AccumulatorReport, TimeSeries, TimeSeriesReport};
use anyhow::{Context, Result, bail};
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Summary of one observable over a run.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub enum Report {
    TrailMass(TimeSeriesReport),
    OccupiedFraction(TimeSeriesReport),
    LiveCount(AccumulatorReport),
    SpeciesShare(Vec<AccumulatorReport>),
}

/// Quantity measured on every saved frame.
pub trait Obs {
    fn update(&mut self, frame: &Frame);
    fn report(&self) -> Report;
}

#[derive(Default)]
pub struct TrailMass {
    time_series: TimeSeries,
}

impl Obs for TrailMass {
    fn update(&mut self, frame: &Frame) {
        self.time_series.push(frame.trail_mass);
    }

    fn report(&self) -> Report {
        Report::TrailMass(self.time_series.report())
    }
}

#[derive(Default)]
pub struct OccupiedFraction {
    time_series: TimeSeries,
}

impl Obs for OccupiedFraction {
    fn update(&mut self, frame: &Frame) {
        self.time_series.push(frame.occupied_fraction);
    }

    fn report(&self) -> Report {
        Report::OccupiedFraction(self.time_series.report())
    }
}

#[derive(Default)]
pub struct LiveCount {
    acc: Accumulator,
}

impl Obs for LiveCount {
    fn update(&mut self, frame: &Frame) {
        self.acc.add(frame.live_count as f64);
    }

    fn report(&self) -> Report {
        Report::LiveCount(self.acc.report())
    }
}

pub struct SpeciesShare {
    acc_vec: Vec<Accumulator>,
}

impl SpeciesShare {
    pub fn new(cfg: &Config) -> Self {
        let mut acc_vec = Vec::new();
        acc_vec.resize_with(cfg.agents.n_species as usize, Accumulator::default);
        Self { acc_vec }
    }
}

impl Obs for SpeciesShare {
    fn update(&mut self, frame: &Frame) {
        if frame.live_count == 0 {
            return;
        }
        for (acc, &count) in self.acc_vec.iter_mut().zip(&frame.species_counts) {
            acc.add(count as f64 / frame.live_count as f64);
        }
    }

    fn report(&self) -> Report {
        Report::SpeciesShare(self.acc_vec.iter().map(|acc| acc.report()).collect())
    }
}

pub struct Analyzer {
    saves_per_file: usize,
    last_step: Option<u64>,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new(cfg: &Config) -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(TrailMass::default()),
            Box::new(OccupiedFraction::default()),
            Box::new(LiveCount::default()),
            Box::new(SpeciesShare::new(cfg)),
        ];
        Self {
            saves_per_file: cfg.output.saves_per_file,
            last_step: None,
            obs_ptr_vec,
        }
    }

    /// Fold a frame into every observable.
    ///
    /// # Errors
    /// Returns an error if frames arrive out of step order.
    pub fn add_frame(&mut self, frame: &Frame) -> Result<()> {
        if let Some(last_step) = self.last_step {
            if frame.step <= last_step {
                bail!("frame at step {} follows step {last_step}", frame.step);
            }
        }
        self.last_step = Some(frame.step);

        for obs in &mut self.obs_ptr_vec {
            obs.update(frame);
        }
        Ok(())
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);

        for i_save in 0..self.saves_per_file {
            let frame: Frame = decode::from_read(&mut reader)
                .with_context(|| format!("failed to read frame {i_save}"))?;
            self.add_frame(&frame)?;
        }
        Ok(())
    }

    pub fn reports(&self) -> Vec<Report> {
        self.obs_ptr_vec.iter().map(|obs| obs.report()).collect()
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        encode::write(&mut writer, &self.reports()).context("failed to serialize results")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EXAMPLE_TOML;

    fn frame(step: u64, live_count: usize, species_counts: Vec<usize>) -> Frame {
        Frame {
            step,
            live_count,
            trail_mass: 10.0,
            occupied_fraction: 0.25,
            species_counts,
            agents: None,
            trail: None,
        }
    }

    #[test]
    fn reports_cover_every_observable() {
        let cfg = Config::from_toml(EXAMPLE_TOML).unwrap();
        let mut analyzer = Analyzer::new(&cfg);
        for step in 0..16 {
            analyzer.add_frame(&frame(step, 4, vec![1, 3])).unwrap();
        }
        // Empty populations do not skew the species shares.
        analyzer.add_frame(&frame(16, 0, vec![0, 0])).unwrap();
        assert!(analyzer.add_frame(&frame(16, 4, vec![2, 2])).is_err());

        let reports = analyzer.reports();
        assert_eq!(reports.len(), 4);
        match &reports[2] {
            Report::LiveCount(report) => assert_eq!(report.n_vals, 17),
            other => panic!("unexpected report {other:?}"),
        }
        match &reports[3] {
            Report::SpeciesShare(shares) => {
                assert_eq!(shares.len(), 2);
                assert_eq!(shares[0].mean, 0.25);
                assert_eq!(shares[1].mean, 0.75);
            }
            other => panic!("unexpected report {other:?}"),
        }
    }
}
