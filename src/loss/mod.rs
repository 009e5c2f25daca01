//! Packet-loss estimation.
//!
//! Two interchangeable models are selected at session start:
//! - [`NaiveLoss`]: lost over sent, across probes and remote bulk counts
//! - [`ElrLoss`]: adds a local expected-loss-rate estimate from a
//!   delay-keyed, offset-windowed loss table, which can be saved and restored

mod elr;
mod naive;
mod snapshot;

pub use elr::{ElrLoss, PacketCount, DEFAULT_CONSISTENCY_THRESHOLD, DEFAULT_TAU, MAX_TAU};
pub use naive::NaiveLoss;
pub use snapshot::{ElrSnapshot, SnapshotFormat};

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{MeasurementBundle, ProbeResult};

/// Which loss model to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LossModel {
    Naive,
    #[default]
    Elr,
}

impl fmt::Display for LossModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Naive => write!(f, "naive"),
            Self::Elr => write!(f, "elr"),
        }
    }
}

/// Loss estimation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossConfig {
    /// Model to run.
    #[serde(default)]
    pub model: LossModel,

    /// Correlation half-window in packets (ELR only).
    #[serde(default = "default_tau")]
    pub tau: usize,

    /// Lost packets required before a local estimate is reported (ELR only).
    #[serde(default = "default_consistency_threshold")]
    pub consistency_threshold: u64,
}

fn default_tau() -> usize {
    DEFAULT_TAU
}
fn default_consistency_threshold() -> u64 {
    DEFAULT_CONSISTENCY_THRESHOLD
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            model: LossModel::default(),
            tau: default_tau(),
            consistency_threshold: default_consistency_threshold(),
        }
    }
}

/// A loss model chosen at session start.
///
/// `Clone` yields an independent deep copy.
#[derive(Debug, Clone)]
pub enum LossEstimator {
    Naive(NaiveLoss),
    Elr(ElrLoss),
}

impl LossEstimator {
    /// Build a fresh estimator from configuration.
    pub fn from_config(config: &LossConfig) -> Self {
        match config.model {
            LossModel::Naive => Self::Naive(NaiveLoss::new()),
            LossModel::Elr => Self::Elr(ElrLoss::new(config.tau, config.consistency_threshold)),
        }
    }

    /// Build an ELR estimator from a saved state file.
    pub fn load_elr<P: AsRef<Path>>(path: P, consistency_threshold: u64) -> Result<Self> {
        let snapshot = ElrSnapshot::load(path)?;
        Ok(Self::Elr(ElrLoss::restore(snapshot, consistency_threshold)?))
    }

    pub fn model(&self) -> LossModel {
        match self {
            Self::Naive(_) => LossModel::Naive,
            Self::Elr(_) => LossModel::Elr,
        }
    }

    /// Account for one ICMP probe.
    pub fn process_probe(&mut self, result: &ProbeResult) {
        match self {
            Self::Naive(loss) => loss.process_probe(result),
            Self::Elr(loss) => loss.process_probe(result),
        }
    }

    /// Account for one bulk round's bundles, in emission order.
    pub fn process_bundles(&mut self, bundles: &[MeasurementBundle]) {
        match self {
            Self::Naive(loss) => loss.process_bundles(bundles),
            Self::Elr(loss) => loss.process_bundles(bundles),
        }
    }

    pub fn total_loss_percent(&self) -> f64 {
        match self {
            Self::Naive(loss) => loss.total_loss_percent(),
            Self::Elr(loss) => loss.total_loss_percent(),
        }
    }

    /// Local loss estimate, `None` when the model has none or lacks data.
    pub fn local_loss_percent(&self) -> Option<f64> {
        match self {
            Self::Naive(_) => None,
            Self::Elr(loss) => loss.local_loss_percent(),
        }
    }

    /// Total (lost, samples) accounted so far.
    pub fn counts(&self) -> (u64, u64) {
        match self {
            Self::Naive(loss) => (loss.lost(), loss.samples()),
            Self::Elr(loss) => (loss.lost(), loss.samples()),
        }
    }

    pub fn as_elr(&self) -> Option<&ElrLoss> {
        match self {
            Self::Elr(loss) => Some(loss),
            Self::Naive(_) => None,
        }
    }

    /// Persistable state; only the ELR model has any.
    pub fn snapshot(&self) -> Option<ElrSnapshot> {
        self.as_elr().map(ElrLoss::snapshot)
    }

    /// Save the ELR state to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let snapshot = self.snapshot().ok_or_else(|| {
            Error::Config(format!("the {} loss model has no state to save", self.model()))
        })?;
        snapshot.save(path)
    }
}

impl Default for LossEstimator {
    fn default() -> Self {
        Self::from_config(&LossConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_from_config() {
        let naive = LossEstimator::from_config(&LossConfig {
            model: LossModel::Naive,
            ..Default::default()
        });
        assert_eq!(naive.model(), LossModel::Naive);
        assert!(naive.snapshot().is_none());

        let elr = LossEstimator::default();
        assert_eq!(elr.model(), LossModel::Elr);
        assert_eq!(elr.as_elr().unwrap().tau(), DEFAULT_TAU);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut original = LossEstimator::from_config(&LossConfig {
            tau: 1,
            ..Default::default()
        });
        let copy = original.clone();

        original.process_bundles(&[MeasurementBundle::from_delays(vec![
            Some(Duration::from_millis(4)),
            None,
        ])]);

        assert_eq!(copy.counts(), (0, 0));
        assert!(copy.as_elr().unwrap().probability_table().next().is_none());
        assert_eq!(original.counts(), (1, 2));
    }

    #[test]
    fn test_naive_has_no_local_estimate() {
        let mut naive = LossEstimator::Naive(NaiveLoss::new());
        naive.process_probe(&ProbeResult::lost());
        assert_eq!(naive.local_loss_percent(), None);
        assert_eq!(naive.total_loss_percent(), 100.0);
    }

    #[test]
    fn test_save_naive_is_an_error() {
        let naive = LossEstimator::Naive(NaiveLoss::new());
        assert!(naive.save("/nonexistent/state.json").is_err());
    }

    #[test]
    fn test_loss_config_from_toml() {
        let config: LossConfig = toml::from_str("model = \"naive\"\ntau = 3").unwrap();
        assert_eq!(config.model, LossModel::Naive);
        assert_eq!(config.tau, 3);
        assert_eq!(config.consistency_threshold, DEFAULT_CONSISTENCY_THRESHOLD);
    }
}
