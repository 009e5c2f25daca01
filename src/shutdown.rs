//! Interrupt delivery for graceful shutdown.
//!
//! SIGINT and SIGTERM cancel a [`CancellationToken`]. Sessions observe the
//! token at their own safe points; a second signal is only logged.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Signal type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Terminate signal (SIGTERM).
    Terminate,
    /// Interrupt signal (SIGINT).
    Interrupt,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Terminate => write!(f, "SIGTERM"),
            Signal::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Cancels a token when the process is asked to stop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandler {
    token: CancellationToken,
}

impl ShutdownHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled on the first shutdown signal.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Handle a signal.
    fn handle_signal(&self, signal: Signal) {
        if self.token.is_cancelled() {
            warn!("Received {} while already shutting down", signal);
            return;
        }
        info!(
            "Received {}, finishing the current cycle before stopping",
            signal
        );
        self.token.cancel();
    }

    /// Listen for signals until the process ends (Unix).
    #[cfg(unix)]
    pub async fn listen(&self) {
        use futures::StreamExt;
        use signal_hook::consts::signal::{SIGINT, SIGTERM};
        use signal_hook_tokio::Signals;

        let signals = match Signals::new([SIGTERM, SIGINT]) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to register signal handlers: {}", e);
                return;
            }
        };

        let mut signals = signals.fuse();

        while let Some(signal) = signals.next().await {
            let sig = match signal {
                SIGTERM => Signal::Terminate,
                SIGINT => Signal::Interrupt,
                _ => continue,
            };
            self.handle_signal(sig);
        }
    }

    /// Listen for Ctrl+C (non-Unix fallback).
    #[cfg(not(unix))]
    pub async fn listen(&self) {
        loop {
            match tokio::signal::ctrl_c().await {
                Ok(()) => self.handle_signal(Signal::Interrupt),
                Err(e) => {
                    error!("Failed to listen for Ctrl+C: {}", e);
                    return;
                }
            }
        }
    }
}

/// Install signal handling in the background and return the shutdown token.
pub fn install() -> (CancellationToken, JoinHandle<()>) {
    let handler = ShutdownHandler::new();
    let token = handler.token();
    let task = tokio::spawn(async move {
        handler.listen().await;
    });
    (token, task)
}
