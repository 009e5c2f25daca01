//! Receiver-side session.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::engine::BulkProbeReceiver;
use crate::error::{EngineError, Error, Result};
use crate::types::SessionState;

type ServeTask<E> = JoinHandle<(E, std::result::Result<(), EngineError>)>;

/// Validates the receiving engine and serves it in the background.
///
/// No statistics are computed on this side.
pub struct ReceiverSession<E> {
    engine: Option<E>,
    task: Option<ServeTask<E>>,
    stop: CancellationToken,
    state: SessionState,
}

impl<E: BulkProbeReceiver> ReceiverSession<E> {
    /// The serving loop ends when `shutdown` fires or [`stop`](Self::stop)
    /// is called.
    pub fn new(engine: E, shutdown: &CancellationToken) -> Self {
        Self {
            engine: Some(engine),
            task: None,
            stop: shutdown.child_token(),
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Validate the engine and launch its serving loop.
    pub async fn start(&mut self) -> Result<()> {
        let mut engine = self
            .engine
            .take()
            .ok_or_else(|| Error::Internal("receiver session already started".into()))?;

        self.state = SessionState::Validating;
        if !engine.validate().await {
            self.engine = Some(engine);
            self.state = SessionState::Stopped;
            return Err(Error::Validation(
                "bulk-probe receiver self-check failed".into(),
            ));
        }

        let stop = self.stop.clone();
        self.task = Some(tokio::spawn(async move {
            let outcome = engine.run(stop).await;
            (engine, outcome)
        }));
        self.state = SessionState::Running(0);
        info!("Receiver serving");
        Ok(())
    }

    /// Wait until the serving loop ends on its own or through shutdown,
    /// then clean up.
    pub async fn wait(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };

        let (mut engine, outcome) = task
            .await
            .map_err(|e| Error::Internal(format!("receiver task failed: {e}")))?;
        engine.cleanup().await;
        self.engine = Some(engine);
        self.state = SessionState::Stopped;
        info!("Receiver stopped");

        outcome.map_err(|e| {
            error!("Bulk-probe receiver failed: {}", e);
            Error::Engine(e)
        })
    }

    /// Stop serving and clean up the engine.
    pub async fn stop(&mut self) -> Result<()> {
        self.stop.cancel();
        self.wait().await
    }

    /// Start, then serve until shutdown.
    pub async fn serve(&mut self) -> Result<()> {
        self.start().await?;
        self.wait().await
    }
}
