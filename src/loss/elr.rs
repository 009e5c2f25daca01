//! Expected loss rate from a delay-correlated probability table.
//!
//! For every observed one-way delay `Y`, the table keeps a window of
//! `2τ+1` cells counting how often the packet at relative offset `j`
//! (`-τ..=τ`) was lost. The local estimate for a round is
//!
//! ```text
//! ELR = 100 / (n · (2τ+1)) · Σᵢ Σⱼ lost(Yᵢ, j) / total(Yᵢ, j)
//! ```
//!
//! over the `n` delays received in that round, where cells with no
//! losses or no samples contribute nothing (right-rectangle quadrature).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::snapshot::ElrSnapshot;
use crate::error::{Error, Result};
use crate::types::{DelayBucket, MeasurementBundle, ProbeResult};

/// Default correlation half-window, in packets.
pub const DEFAULT_TAU: usize = 5;

/// Largest accepted correlation half-window, in packets.
pub const MAX_TAU: usize = 1024;

/// Default lost-packet count before the local estimate is reported.
pub const DEFAULT_CONSISTENCY_THRESHOLD: u64 = 500;

/// Loss counter for one table cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PacketCount {
    pub lost: u64,
    pub total: u64,
}

impl PacketCount {
    /// Empirical loss probability, `None` when the cell is empty or lossless.
    fn probability(self) -> Option<f64> {
        if self.total == 0 || self.lost == 0 {
            None
        } else {
            Some(self.lost as f64 / self.total as f64)
        }
    }
}

/// Delay-correlated loss estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct ElrLoss {
    tau: usize,
    consistency_threshold: u64,
    lost: u64,
    samples: u64,
    table: BTreeMap<DelayBucket, Vec<PacketCount>>,
    /// Delays of the packets received in the most recent round.
    round_delays: Vec<DelayBucket>,
}

impl ElrLoss {
    pub fn new(tau: usize, consistency_threshold: u64) -> Self {
        Self {
            tau,
            consistency_threshold,
            lost: 0,
            samples: 0,
            table: BTreeMap::new(),
            round_delays: Vec::new(),
        }
    }

    pub fn tau(&self) -> usize {
        self.tau
    }

    /// Cells per table entry.
    pub fn window_len(&self) -> usize {
        2 * self.tau + 1
    }

    pub fn consistency_threshold(&self) -> u64 {
        self.consistency_threshold
    }

    pub fn lost(&self) -> u64 {
        self.lost
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Delays observed in the most recent round.
    pub fn round_delays(&self) -> &[DelayBucket] {
        &self.round_delays
    }

    /// Offset window for `delay`, indexed from offset `-τ`.
    pub fn window(&self, delay: DelayBucket) -> Option<&[PacketCount]> {
        self.table.get(&delay).map(Vec::as_slice)
    }

    /// Cell for `delay` at signed `offset` in `-τ..=τ`.
    pub fn cell(&self, delay: DelayBucket, offset: isize) -> Option<PacketCount> {
        let index = usize::try_from(offset + self.tau as isize).ok()?;
        self.window(delay)?.get(index).copied()
    }

    /// Iterate over the whole table in delay order.
    pub fn probability_table(&self) -> impl Iterator<Item = (DelayBucket, &[PacketCount])> {
        self.table.iter().map(|(delay, cells)| (*delay, cells.as_slice()))
    }

    pub fn process_probe(&mut self, result: &ProbeResult) {
        self.samples += 1;
        if result.is_lost() {
            self.lost += 1;
        }
    }

    /// Fold one round's bundles into the table, replacing the round's delay list.
    pub fn process_bundles(&mut self, bundles: &[MeasurementBundle]) {
        self.round_delays.clear();
        for bundle in bundles {
            self.samples += u64::from(bundle.remote_samples());
            self.lost += u64::from(bundle.remote_lost());
            self.count_window(bundle);
        }
        debug!(
            "ELR round: {} delays, {} table entries, {} lost of {}",
            self.round_delays.len(),
            self.table.len(),
            self.lost,
            self.samples
        );
    }

    fn count_window(&mut self, bundle: &MeasurementBundle) {
        let delays = bundle.delays();
        let tau = self.tau as isize;
        let window_len = self.window_len();

        for (index, delay) in delays.iter().enumerate() {
            let Some(delay) = delay else {
                continue;
            };
            let bucket = DelayBucket::from_delay(*delay);
            self.round_delays.push(bucket);

            let cells = self
                .table
                .entry(bucket)
                .or_insert_with(|| vec![PacketCount::default(); window_len]);

            for offset in -tau..=tau {
                let Some(neighbour) = delays.get(index.wrapping_add_signed(offset)) else {
                    continue;
                };
                let cell = &mut cells[(offset + tau) as usize];
                cell.total += 1;
                if neighbour.is_none() {
                    cell.lost += 1;
                }
            }
        }
    }

    pub fn total_loss_percent(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            100.0 * self.lost as f64 / self.samples as f64
        }
    }

    /// Expected loss rate for the most recent round, in percent.
    ///
    /// `None` until at least `consistency_threshold` packets were lost.
    pub fn local_loss_percent(&self) -> Option<f64> {
        if self.lost < self.consistency_threshold {
            return None;
        }
        if self.round_delays.is_empty() {
            return Some(0.0);
        }

        let sum: f64 = self.round_delays.iter().map(|d| self.integral(*d)).sum();
        let norm = (self.round_delays.len() * self.window_len()) as f64;
        Some(100.0 * sum / norm)
    }

    fn integral(&self, delay: DelayBucket) -> f64 {
        match self.table.get(&delay) {
            Some(cells) => cells.iter().filter_map(|c| c.probability()).sum(),
            None => {
                error!("Delay {} missing from ELR table while integrating", delay);
                0.0
            }
        }
    }

    /// Capture the persistent state.
    pub fn snapshot(&self) -> ElrSnapshot {
        ElrSnapshot {
            lost_count: self.lost,
            sample_count: self.samples,
            window_halfwidth: self.tau as i64,
            probability_table: self
                .table
                .iter()
                .map(|(delay, cells)| (delay.as_millis(), cells.clone()))
                .collect(),
        }
    }

    /// Rebuild an estimator from saved state.
    ///
    /// The consistency threshold is not part of the saved state and is taken
    /// from the caller.
    pub fn restore(snapshot: ElrSnapshot, consistency_threshold: u64) -> Result<Self> {
        let tau = usize::try_from(snapshot.window_halfwidth).map_err(|_| {
            Error::Deserialization(format!(
                "window_halfwidth must be non-negative, got {}",
                snapshot.window_halfwidth
            ))
        })?;
        if tau > MAX_TAU {
            return Err(Error::Deserialization(format!(
                "window_halfwidth {tau} exceeds the maximum of {MAX_TAU}"
            )));
        }
        let window_len = 2 * tau + 1;

        if snapshot.lost_count > snapshot.sample_count {
            return Err(Error::Deserialization(format!(
                "lost_count {} exceeds sample_count {}",
                snapshot.lost_count, snapshot.sample_count
            )));
        }

        let mut table = BTreeMap::new();
        for (delay, cells) in snapshot.probability_table {
            if cells.len() != window_len {
                return Err(Error::Deserialization(format!(
                    "delay {delay}ms has {} cells, expected {window_len}",
                    cells.len()
                )));
            }
            if let Some(bad) = cells.iter().find(|c| c.lost > c.total) {
                return Err(Error::Deserialization(format!(
                    "delay {delay}ms has a cell with lost {} > total {}",
                    bad.lost, bad.total
                )));
            }
            table.insert(DelayBucket(delay), cells);
        }

        Ok(Self {
            tau,
            consistency_threshold,
            lost: snapshot.lost_count,
            samples: snapshot.sample_count,
            table,
            round_delays: Vec::new(),
        })
    }
}

impl Default for ElrLoss {
    fn default() -> Self {
        Self::new(DEFAULT_TAU, DEFAULT_CONSISTENCY_THRESHOLD)
    }
}
