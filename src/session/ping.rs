//! Continuous ping.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::pacing::{self, Pacer};
use crate::error::{Error, Result};
use crate::metrics::{ProbeSummary, RttJitterFilter, SampleOutcome};
use crate::probe::{EchoProbe, ProbeConfig};

/// Probes one destination at the pacing gap until shutdown or a probe
/// count is reached, then reports a summary.
pub struct PingSession<P> {
    pacer: Option<Pacer<P>>,
    filter: RttJitterFilter,
    count: Option<u64>,
    shutdown: CancellationToken,
}

impl<P: EchoProbe> PingSession<P> {
    pub fn new(prober: P, probe: &ProbeConfig, shutdown: CancellationToken) -> Self {
        Self {
            pacer: Some(Pacer::new(prober, probe.identifier(), probe.ping_gap)),
            filter: RttJitterFilter::new(),
            count: None,
            shutdown,
        }
    }

    /// Stop after `count` probes.
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn filter(&self) -> &RttJitterFilter {
        &self.filter
    }

    /// Probe until stopped and return the summary.
    pub async fn run(&mut self) -> Result<ProbeSummary> {
        let pacer = self
            .pacer
            .take()
            .ok_or_else(|| Error::Internal("ping session already ran".into()))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let stop = self.shutdown.child_token();
        let pacing = pacer.spawn(tx, stop.clone());

        while let Some(sample) = rx.recv().await {
            match self.filter.process(&sample.result) {
                SampleOutcome::Accepted => {
                    if let Some(rtt) = sample.result.rtt {
                        info!(
                            "icmp_seq={} time={:.3} ms",
                            sample.sequence,
                            rtt.as_secs_f64() * 1000.0
                        );
                    }
                }
                SampleOutcome::Lost => info!("icmp_seq={} lost", sample.sequence),
                SampleOutcome::BadChecksum => {
                    warn!("icmp_seq={} reply with bad checksum", sample.sequence);
                }
            }

            if self.count.is_some_and(|count| self.filter.total() >= count) {
                stop.cancel();
                break;
            }
        }

        self.pacer = Some(pacing::join(pacing).await?);
        Ok(self.filter.summary())
    }
}
