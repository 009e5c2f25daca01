//! Engine that runs no bulk probing at all.
//!
//! Each round is a fixed wait that yields no bundles, so a sender session
//! degrades to pure ICMP measurement while keeping its cycle structure.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{BulkProbeReceiver, BulkProbeSender, EngineConfig};
use crate::error::EngineError;
use crate::types::{Bandwidth, MeasurementBundle};

#[derive(Debug, Clone)]
pub struct IcmpOnlyEngine {
    round_length: Duration,
    rounds: u64,
}

impl IcmpOnlyEngine {
    pub fn new(round_length: Duration) -> Self {
        Self {
            round_length,
            rounds: 0,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.round_length)
    }

    /// Rounds completed so far.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }
}

#[async_trait]
impl BulkProbeSender for IcmpOnlyEngine {
    async fn validate(&mut self) -> bool {
        true
    }

    async fn setup_run(&mut self) -> Result<(), EngineError> {
        info!("No bulk-probe engine configured, measuring with ICMP only");
        Ok(())
    }

    async fn reset_round(&mut self) {}

    async fn do_one_measurement_round(&mut self, _out: &mut Vec<MeasurementBundle>) -> bool {
        tokio::time::sleep(self.round_length).await;
        true
    }

    async fn process_one_round_result(&mut self, step: &mut Vec<MeasurementBundle>) -> bool {
        step.clear();
        self.rounds += 1;
        true
    }

    fn current_estimation(&self) -> Bandwidth {
        Bandwidth::ZERO
    }

    async fn cleanup(&mut self) {
        debug!("ICMP-only engine finished after {} rounds", self.rounds);
    }
}

#[async_trait]
impl BulkProbeReceiver for IcmpOnlyEngine {
    async fn validate(&mut self) -> bool {
        true
    }

    async fn run(&mut self, shutdown: CancellationToken) -> Result<(), EngineError> {
        info!("Receiver idle: no bulk-probe engine configured");
        shutdown.cancelled().await;
        Ok(())
    }

    async fn cleanup(&mut self) {}
}
