//! Measurement sessions.
//!
//! This module provides:
//! - [`SenderSession`]: ICMP pacing alongside bulk-probe rounds, one
//!   statistics record per cycle
//! - [`ReceiverSession`]: validates and serves the receiving engine
//! - [`PingSession`]: plain continuous ping with an exit summary

mod pacing;
mod ping;
mod receiver;
mod round;
mod sender;

pub use pacing::{Pacer, ProbeSample};
pub use ping::PingSession;
pub use receiver::ReceiverSession;
pub use round::run_round;
pub use sender::SenderSession;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What a bulk round does when measurement steps keep failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RoundRetryPolicy {
    /// Retry failed steps immediately, without bound.
    #[default]
    Forever,
    /// Abort the session after this many consecutive failed steps.
    AbortAfter { attempts: u32 },
}

impl fmt::Display for RoundRetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forever => write!(f, "retry forever"),
            Self::AbortAfter { attempts } => write!(f, "abort after {attempts} failed steps"),
        }
    }
}

/// Sender cycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Minimum length of one cycle, measured from its start.
    #[serde(default = "default_cycle_gap", with = "humantime_serde")]
    pub cycle_gap: Duration,

    /// Stop after this many cycles.
    #[serde(default)]
    pub max_cycles: Option<u64>,

    #[serde(default)]
    pub retry_policy: RoundRetryPolicy,
}

fn default_cycle_gap() -> Duration {
    Duration::from_millis(100)
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_cycles == Some(0) {
            return Err(Error::InvalidConfig("max_cycles must be at least 1".into()));
        }
        if self.retry_policy == (RoundRetryPolicy::AbortAfter { attempts: 0 }) {
            return Err(Error::InvalidConfig(
                "retry policy must allow at least one attempt".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cycle_gap: default_cycle_gap(),
            max_cycles: None,
            retry_policy: RoundRetryPolicy::default(),
        }
    }
}
