//! Error types for pathgauge.

use std::io;

use thiserror::Error;

/// Result type alias for pathgauge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pathgauge.
#[derive(Error, Debug)]
pub enum Error {
    // Probe primitive errors
    #[error("failed to resolve {host}: {reason}")]
    Resolution { host: String, reason: String },

    #[error("socket error: {0}")]
    Socket(String),

    #[error("failed to configure socket: {0}")]
    SocketConfig(String),

    #[error("transport error: {0}")]
    Transport(#[from] ProbeError),

    // Bulk-probe engine errors
    #[error("bulk-probe engine validation failed: {0}")]
    Validation(String),

    #[error("bulk-probe engine setup failed: {0}")]
    Setup(#[source] EngineError),

    #[error("bulk-probe round failed after {attempts} consecutive attempts")]
    Measurement { attempts: u32 },

    #[error("bulk-probe engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("invalid measurement bundle: {lost} lost of {samples} samples")]
    InvalidBundle { lost: u32, samples: u32 },

    // Persistence errors
    #[error("malformed loss-model state: {0}")]
    Deserialization(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Failures of an established probe socket.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    #[error("short send: wrote {written} of {expected} bytes")]
    ShortSend { written: usize, expected: usize },
}

/// Errors raised by a bulk-probe engine collaborator.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("control channel: {0}")]
    ControlChannel(String),

    #[error("parameter negotiation failed: {0}")]
    Negotiation(String),

    #[error("engine IO error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Check if the error must end the session.
    ///
    /// Every variant that reaches the session boundary is fatal; transient
    /// bulk-step failures are absorbed before they become an `Error`.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::Interrupted)
    }

    /// Check if the error came from the raw probe socket.
    pub fn is_probe_failure(&self) -> bool {
        matches!(
            self,
            Error::Resolution { .. }
                | Error::Socket(_)
                | Error::SocketConfig(_)
                | Error::Transport(_)
        )
    }

    /// Check if the error came from the bulk-probe engine.
    pub fn is_engine_failure(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::Setup(_) | Error::Measurement { .. } | Error::Engine(_)
        )
    }
}
