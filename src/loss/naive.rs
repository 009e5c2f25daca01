//! Plain lost/sent ratio.

use crate::types::{MeasurementBundle, ProbeResult};

/// Counts every probe and every remotely reported packet; no local model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NaiveLoss {
    lost: u64,
    samples: u64,
}

impl NaiveLoss {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_probe(&mut self, result: &ProbeResult) {
        self.samples += 1;
        if result.is_lost() {
            self.lost += 1;
        }
    }

    pub fn process_bundles(&mut self, bundles: &[MeasurementBundle]) {
        for bundle in bundles {
            self.samples += u64::from(bundle.remote_samples());
            self.lost += u64::from(bundle.remote_lost());
        }
    }

    pub fn total_loss_percent(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            100.0 * self.lost as f64 / self.samples as f64
        }
    }

    pub fn lost(&self) -> u64 {
        self.lost
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}
