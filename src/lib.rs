//! # pathgauge
//!
//! Active network-path measurement.
//!
//! A sender runs two probe streams against one destination at the same time:
//! ICMP echo probes at a fixed pacing gap, and rounds of a bulk
//! bandwidth-probing engine. Each cycle yields one statistics record with the
//! bandwidth estimate, RTT, smoothed RTT, jitter and packet loss.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Sender / Receiver / Ping Session               │
//! ├───────────────────────────────┬─────────────────────────────────┤
//! │        Pacing Activity        │        Bulk-Probe Round         │
//! │   (ICMP echo, one at a time)  │  (engine trait, retry policy)   │
//! ├───────────────────────────────┴─────────────────────────────────┤
//! │   RTT/Jitter Filter   │   Loss Estimator (naive | ELR + state)  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                 Reporter (text block | YAML list)               │
//! └─────────────────────────────────────────────────────────────────┘

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::cast_possible_truncation)]  // Identifier and sequence fields are u16
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]       // Acceptable for stats
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::suboptimal_flops)]
#![allow(clippy::future_not_send)]           // Async internals
#![allow(clippy::return_self_not_must_use)]  // Builder methods don't need must_use

pub mod config;
pub mod engine;
pub mod error;
pub mod loss;
pub mod metrics;
pub mod probe;
pub mod report;
pub mod session;
pub mod shutdown;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::engine::{BulkProbeReceiver, BulkProbeSender, IcmpOnlyEngine};
    pub use crate::error::{Error, Result};
    pub use crate::loss::{ElrLoss, LossEstimator, NaiveLoss};
    pub use crate::metrics::RttJitterFilter;
    pub use crate::probe::{EchoProbe, Pinger};
    pub use crate::report::{Reporter, StatsRecord};
    pub use crate::session::{PingSession, ReceiverSession, SenderSession};
    pub use crate::types::*;
}
