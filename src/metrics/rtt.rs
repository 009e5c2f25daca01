//! Smoothed RTT and RFC 1889 interarrival jitter.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::ProbeResult;

/// Weight of the previous sRTT in the moving average.
pub const SRTT_ALPHA: f64 = 0.9;

/// Jitter gain (RFC 1889 appendix A.8).
pub const JITTER_GAIN: f64 = 1.0 / 16.0;

/// How a sample was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    Accepted,
    Lost,
    BadChecksum,
}

/// RTT/jitter filter over a stream of probe results.
///
/// Values are kept in floating-point microseconds. Lost and corrupted
/// samples only move the loss counters.
#[derive(Debug, Clone)]
pub struct RttJitterFilter {
    smoothed_rtt: Option<f64>,
    jitter: f64,
    previous_rtt: Option<f64>,
    current_rtt: Option<f64>,
    lost: u64,
    total: u64,
}

impl RttJitterFilter {
    pub fn new() -> Self {
        Self {
            smoothed_rtt: None,
            jitter: 0.0,
            previous_rtt: None,
            current_rtt: None,
            lost: 0,
            total: 0,
        }
    }

    /// Apply one probe result.
    pub fn process(&mut self, result: &ProbeResult) -> SampleOutcome {
        self.total += 1;

        let rtt = match result.rtt {
            None => {
                self.lost += 1;
                return SampleOutcome::Lost;
            }
            Some(_) if result.bad_checksum => {
                self.lost += 1;
                return SampleOutcome::BadChecksum;
            }
            Some(rtt) => rtt.as_secs_f64() * 1_000_000.0,
        };

        self.previous_rtt = self.current_rtt;
        self.current_rtt = Some(rtt);

        // Jitter needs two consecutive valid samples.
        if let Some(previous) = self.previous_rtt {
            let diff = (rtt - previous).abs();
            self.jitter += (diff - self.jitter) * JITTER_GAIN;
        }

        self.smoothed_rtt = Some(match self.smoothed_rtt {
            None => rtt,
            Some(srtt) => SRTT_ALPHA * srtt + (1.0 - SRTT_ALPHA) * rtt,
        });

        SampleOutcome::Accepted
    }

    /// Most recent valid RTT.
    pub fn last_rtt(&self) -> Option<Duration> {
        self.current_rtt.map(micros_to_duration)
    }

    /// Smoothed RTT, `None` before the first valid sample.
    pub fn smoothed_rtt(&self) -> Option<Duration> {
        self.smoothed_rtt.map(micros_to_duration)
    }

    /// Smoothed RTT in microseconds (0 before the first valid sample).
    pub fn smoothed_rtt_micros(&self) -> f64 {
        self.smoothed_rtt.unwrap_or(0.0)
    }

    pub fn jitter(&self) -> Duration {
        micros_to_duration(self.jitter)
    }

    pub fn jitter_micros(&self) -> f64 {
        self.jitter
    }

    pub fn lost(&self) -> u64 {
        self.lost
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Lost or corrupted share of all samples, in percent.
    pub fn loss_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * self.lost as f64 / self.total as f64
        }
    }

    /// Snapshot of the filter for end-of-run reporting.
    pub fn summary(&self) -> ProbeSummary {
        ProbeSummary {
            total: self.total,
            lost: self.lost,
            loss_percent: self.loss_percent(),
            smoothed_rtt_ms: self.smoothed_rtt_micros() / 1000.0,
            jitter_ms: self.jitter / 1000.0,
        }
    }
}

impl Default for RttJitterFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn micros_to_duration(micros: f64) -> Duration {
    Duration::from_secs_f64(micros.max(0.0) / 1_000_000.0)
}

/// Totals printed when a probing run ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeSummary {
    pub total: u64,
    pub lost: u64,
    pub loss_percent: f64,
    pub smoothed_rtt_ms: f64,
    pub jitter_ms: f64,
}

impl fmt::Display for ProbeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Total packets: {}, lost packets: {}, loss percentage: {:.3} %",
            self.total, self.lost, self.loss_percent
        )?;
        write!(
            f,
            "sRTT: {:.3} ms, jitter: {:.3} ms",
            self.smoothed_rtt_ms, self.jitter_ms
        )
    }
}
