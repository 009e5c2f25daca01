//! Continuous ICMP pacing activity.
//!
//! A [`Pacer`] owns the prober. While running it lives inside its own task,
//! issues one probe at a time on the blocking pool and sends every result
//! back over a channel; it never touches measurement state itself. The task
//! hands the pacer back when it ends so the next cycle can reuse the socket
//! and continue the sequence numbers.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::probe::EchoProbe;
use crate::types::ProbeResult;

/// One probe outcome with its sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSample {
    pub sequence: u16,
    pub result: ProbeResult,
}

/// Probe issuer for one destination.
#[derive(Debug)]
pub struct Pacer<P> {
    prober: P,
    identifier: u16,
    next_sequence: u16,
    gap: Duration,
}

impl<P: EchoProbe> Pacer<P> {
    pub fn new(prober: P, identifier: u16, gap: Duration) -> Self {
        Self {
            prober,
            identifier,
            next_sequence: 0,
            gap,
        }
    }

    pub fn gap(&self) -> Duration {
        self.gap
    }

    pub fn next_sequence(&self) -> u16 {
        self.next_sequence
    }

    pub fn into_prober(self) -> P {
        self.prober
    }

    /// Start probing in a background task until `stop` fires.
    ///
    /// At least one probe is issued. The task returns the pacer, or the
    /// first fatal probe error.
    pub fn spawn(
        self,
        results: mpsc::UnboundedSender<ProbeSample>,
        stop: CancellationToken,
    ) -> JoinHandle<Result<Self>> {
        tokio::spawn(self.run(results, stop))
    }

    async fn run(
        self,
        results: mpsc::UnboundedSender<ProbeSample>,
        stop: CancellationToken,
    ) -> Result<Self> {
        let Self {
            mut prober,
            identifier,
            mut next_sequence,
            gap,
        } = self;

        loop {
            let sequence = next_sequence;
            next_sequence = next_sequence.wrapping_add(1);

            let (returned, result) = probe_blocking(prober, sequence, identifier).await?;
            prober = returned;
            debug!("icmp_seq={} {}", sequence, result);

            if results.send(ProbeSample { sequence, result }).is_err() {
                trace!("Probe results receiver gone, pacing stops");
                break;
            }
            if stop.is_cancelled() {
                break;
            }

            if let Some(rtt) = result.rtt {
                if rtt < gap {
                    tokio::select! {
                        () = stop.cancelled() => break,
                        () = tokio::time::sleep(gap - rtt) => {}
                    }
                }
            }
        }

        Ok(Self {
            prober,
            identifier,
            next_sequence,
            gap,
        })
    }
}

/// Run one blocking probe off the async workers, taking the prober along.
async fn probe_blocking<P: EchoProbe>(
    mut prober: P,
    sequence: u16,
    identifier: u16,
) -> Result<(P, ProbeResult)> {
    let (prober, result) = tokio::task::spawn_blocking(move || {
        let result = prober.probe(sequence, identifier);
        (prober, result)
    })
    .await
    .map_err(|e| Error::Internal(format!("probe task failed: {e}")))?;

    Ok((prober, result?))
}

/// Wait for a pacing task and take its pacer back.
pub(crate) async fn join<P>(handle: JoinHandle<Result<Pacer<P>>>) -> Result<Pacer<P>> {
    handle
        .await
        .map_err(|e| Error::Internal(format!("pacing task failed: {e}")))?
}
