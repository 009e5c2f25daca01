//! Path-quality metrics derived from the probe stream.
//!
//! This module provides:
//! - Exponentially smoothed RTT (α = 0.9 on the previous value)
//! - RFC 1889 interarrival jitter over consecutive RTTs
//! - Probe loss accounting

mod rtt;

pub use rtt::{ProbeSummary, RttJitterFilter, SampleOutcome, JITTER_GAIN, SRTT_ALPHA};
