//! Core types used throughout pathgauge.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Outcome of one ICMP echo exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeResult {
    /// Round-trip time, `None` when no matching reply arrived in time.
    pub rtt: Option<Duration>,
    /// The reply's checksum did not verify.
    pub bad_checksum: bool,
}

impl ProbeResult {
    /// A probe that timed out.
    pub const fn lost() -> Self {
        Self {
            rtt: None,
            bad_checksum: false,
        }
    }

    /// A probe that got a matching reply.
    pub const fn received(rtt: Duration, bad_checksum: bool) -> Self {
        Self {
            rtt: Some(rtt),
            bad_checksum,
        }
    }

    /// Whether the probe timed out.
    pub fn is_lost(&self) -> bool {
        self.rtt.is_none()
    }

    /// Whether the sample may feed the RTT smoother.
    pub fn is_valid(&self) -> bool {
        self.rtt.is_some() && !self.bad_checksum
    }

    /// RTT in microseconds, `-1` when lost.
    pub fn rtt_micros(&self) -> i64 {
        self.rtt.map_or(-1, |rtt| rtt.as_micros() as i64)
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rtt {
            None => write!(f, "lost"),
            Some(rtt) if self.bad_checksum => {
                write!(f, "rtt={:.3}ms (bad checksum)", rtt.as_secs_f64() * 1000.0)
            }
            Some(rtt) => write!(f, "rtt={:.3}ms", rtt.as_secs_f64() * 1000.0),
        }
    }
}

/// Result of one atomic step of a bulk-probe round.
///
/// `delays` keeps the emission order of the step's packets; `None` marks a
/// packet the remote side never received.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MeasurementBundle {
    remote_lost: u32,
    remote_samples: u32,
    delays: Vec<Option<Duration>>,
}

impl MeasurementBundle {
    /// Build a bundle, rejecting counts where more packets were lost than sent.
    pub fn new(remote_lost: u32, remote_samples: u32, delays: Vec<Option<Duration>>) -> Result<Self> {
        if remote_lost > remote_samples {
            return Err(Error::InvalidBundle {
                lost: remote_lost,
                samples: remote_samples,
            });
        }
        Ok(Self {
            remote_lost,
            remote_samples,
            delays,
        })
    }

    /// Bundle whose counts are derived from its own delay sequence.
    pub fn from_delays(delays: Vec<Option<Duration>>) -> Self {
        let remote_samples = delays.len() as u32;
        let remote_lost = delays.iter().filter(|d| d.is_none()).count() as u32;
        Self {
            remote_lost,
            remote_samples,
            delays,
        }
    }

    /// Packets the remote peer reported lost.
    pub fn remote_lost(&self) -> u32 {
        self.remote_lost
    }

    /// Packets the remote peer accounted for.
    pub fn remote_samples(&self) -> u32 {
        self.remote_samples
    }

    /// Per-packet one-way delays in emission order.
    pub fn delays(&self) -> &[Option<Duration>] {
        &self.delays
    }
}

/// Millisecond-quantized one-way delay used as a loss-table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DelayBucket(pub u64);

impl DelayBucket {
    /// Quantize a delay to whole milliseconds (truncating).
    pub fn from_delay(delay: Duration) -> Self {
        Self(delay.as_millis() as u64)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DelayBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Bandwidth measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Bandwidth {
    /// Bytes per second
    pub bytes_per_sec: f64,
}

impl Bandwidth {
    pub const ZERO: Self = Self { bytes_per_sec: 0.0 };

    pub fn from_bytes_per_sec(bytes_per_sec: f64) -> Self {
        Self { bytes_per_sec }
    }

    pub fn bits_per_sec(self) -> f64 {
        self.bytes_per_sec * 8.0
    }

    pub fn as_human_readable(self) -> String {
        let bps = self.bits_per_sec();
        if bps >= 1_000_000_000.0 {
            format!("{:.2} Gbps", bps / 1_000_000_000.0)
        } else if bps >= 1_000_000.0 {
            format!("{:.2} Mbps", bps / 1_000_000.0)
        } else if bps >= 1_000.0 {
            format!("{:.2} Kbps", bps / 1_000.0)
        } else {
            format!("{bps:.0} bps")
        }
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_human_readable())
    }
}

/// Lifecycle of a measurement session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    /// Engine self-check in progress.
    Validating,
    /// Engine preparing a run.
    Setup,
    /// Measurement cycles in progress; holds the current cycle number.
    Running(u64),
    /// Terminal.
    Stopped,
}

impl SessionState {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Validating => write!(f, "validating"),
            Self::Setup => write!(f, "setup"),
            Self::Running(cycle) => write!(f, "running (cycle {cycle})"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
