//! ICMP echo probing.
//!
//! This module provides:
//! - Echo request construction and reply parsing with RFC 1071 checksums
//! - A raw-socket prober with a per-probe timeout enforced by polling
//! - The [`EchoProbe`] seam the measurement sessions drive

pub mod icmp;
mod pinger;

pub use pinger::{IcmpSocket, Pinger, RawChannel};

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::ProbeResult;

/// One echo round trip at a time.
///
/// Implementations own their socket; a prober is driven by exactly one
/// activity at a time, so `probe` takes `&mut self`.
pub trait EchoProbe: Send + 'static {
    fn probe(&mut self, sequence: u16, identifier: u16) -> Result<ProbeResult>;
}

impl<P: EchoProbe + ?Sized> EchoProbe for Box<P> {
    fn probe(&mut self, sequence: u16, identifier: u16) -> Result<ProbeResult> {
        (**self).probe(sequence, identifier)
    }
}

/// Identifier stamped on echo requests from this process.
pub fn default_identifier() -> u16 {
    (std::process::id() & 0xffff) as u16
}

/// Probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Target spacing between consecutive probes.
    #[serde(default = "default_ping_gap", with = "humantime_serde")]
    pub ping_gap: Duration,

    /// A probe without a reply after this long counts as lost.
    #[serde(default = "default_ping_timeout", with = "humantime_serde")]
    pub ping_timeout: Duration,

    /// Pause between empty receive polls.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Echo identifier override (defaults to the process id).
    #[serde(default)]
    pub identifier: Option<u16>,
}

fn default_ping_gap() -> Duration {
    Duration::from_secs(1)
}
fn default_ping_timeout() -> Duration {
    Duration::from_secs(1)
}
fn default_poll_interval() -> Duration {
    Duration::from_micros(50)
}

impl ProbeConfig {
    /// Identifier to use for this process.
    pub fn identifier(&self) -> u16 {
        self.identifier.unwrap_or_else(default_identifier)
    }

    /// Open a pinger to `host` using this configuration.
    pub fn open(&self, host: &str) -> Result<Pinger> {
        Ok(Pinger::open(host, self.ping_timeout)?.with_poll_interval(self.poll_interval))
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ping_gap: default_ping_gap(),
            ping_timeout: default_ping_timeout(),
            poll_interval: default_poll_interval(),
            identifier: None,
        }
    }
}
