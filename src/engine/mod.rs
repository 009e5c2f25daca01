//! Bulk bandwidth-probing engine interface.
//!
//! The packet-train protocol itself lives outside this crate; sessions only
//! drive it through [`BulkProbeSender`] and [`BulkProbeReceiver`].

mod icmp_only;

pub use icmp_only::IcmpOnlyEngine;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::types::{Bandwidth, MeasurementBundle};

/// Sender side of a bulk-probe engine.
#[async_trait]
pub trait BulkProbeSender: Send {
    /// Self-check (reachability, permissions).
    async fn validate(&mut self) -> bool;

    /// Prepare a run: open the control channel and negotiate parameters.
    async fn setup_run(&mut self) -> Result<(), EngineError>;

    /// Forget per-round state before a new round.
    async fn reset_round(&mut self);

    /// Perform one measurement step, appending its bundles to `out`.
    ///
    /// Returns `false` on a transient failure; the caller retries.
    async fn do_one_measurement_round(&mut self, out: &mut Vec<MeasurementBundle>) -> bool;

    /// Digest the bundles of the last step and judge whether the round is done.
    ///
    /// May drain or transform `step`.
    async fn process_one_round_result(&mut self, step: &mut Vec<MeasurementBundle>) -> bool;

    /// Latest available-bandwidth estimate.
    fn current_estimation(&self) -> Bandwidth;

    /// Probing overhead, for engines that track it.
    fn current_overhead(&self) -> Option<Bandwidth> {
        None
    }

    /// Release the control channel.
    async fn cleanup(&mut self);
}

/// Receiver side of a bulk-probe engine.
#[async_trait]
pub trait BulkProbeReceiver: Send + 'static {
    async fn validate(&mut self) -> bool;

    /// Serve the sender's probing steps until `shutdown` fires.
    async fn run(&mut self, shutdown: CancellationToken) -> Result<(), EngineError>;

    async fn cleanup(&mut self);
}

#[async_trait]
impl<E: BulkProbeSender + ?Sized> BulkProbeSender for Box<E> {
    async fn validate(&mut self) -> bool {
        (**self).validate().await
    }

    async fn setup_run(&mut self) -> Result<(), EngineError> {
        (**self).setup_run().await
    }

    async fn reset_round(&mut self) {
        (**self).reset_round().await;
    }

    async fn do_one_measurement_round(&mut self, out: &mut Vec<MeasurementBundle>) -> bool {
        (**self).do_one_measurement_round(out).await
    }

    async fn process_one_round_result(&mut self, step: &mut Vec<MeasurementBundle>) -> bool {
        (**self).process_one_round_result(step).await
    }

    fn current_estimation(&self) -> Bandwidth {
        (**self).current_estimation()
    }

    fn current_overhead(&self) -> Option<Bandwidth> {
        (**self).current_overhead()
    }

    async fn cleanup(&mut self) {
        (**self).cleanup().await;
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Control channel port on the receiver.
    #[serde(default = "default_ctrl_port")]
    pub ctrl_port: u16,

    /// Probe stream port on the receiver.
    #[serde(default = "default_probe_port")]
    pub probe_port: u16,

    /// Round length of the built-in ICMP-only engine.
    #[serde(default = "default_round_length", with = "humantime_serde")]
    pub round_length: Duration,
}

fn default_ctrl_port() -> u16 {
    8365
}
fn default_probe_port() -> u16 {
    8366
}
fn default_round_length() -> Duration {
    Duration::from_secs(1)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ctrl_port: default_ctrl_port(),
            probe_port: default_probe_port(),
            round_length: default_round_length(),
        }
    }
}
