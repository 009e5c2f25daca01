//! Sender-side measurement session.

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::pacing::{self, Pacer, ProbeSample};
use super::round::run_round;
use super::SessionConfig;
use crate::engine::BulkProbeSender;
use crate::error::{Error, Result};
use crate::loss::LossEstimator;
use crate::metrics::{RttJitterFilter, SampleOutcome};
use crate::probe::{EchoProbe, ProbeConfig};
use crate::report::{Reporter, StatsRecord, TextReporter};
use crate::types::{MeasurementBundle, SessionState};

/// Orchestrates measurement cycles on the sending side.
///
/// Every cycle runs ICMP pacing concurrently with one bulk-probe round,
/// then folds the round into the loss model and reports one
/// [`StatsRecord`]. Probe results are applied here, never inside the
/// pacing task.
///
/// The shutdown token is only looked at between cycles: a cycle that has
/// started always finishes.
pub struct SenderSession<E, P> {
    engine: E,
    pacer: Option<Pacer<P>>,
    filter: RttJitterFilter,
    loss: LossEstimator,
    reporter: Box<dyn Reporter>,
    config: SessionConfig,
    shutdown: CancellationToken,
    state: SessionState,
    cycles: u64,
}

impl<E, P> SenderSession<E, P>
where
    E: BulkProbeSender,
    P: EchoProbe,
{
    /// Create a session that owns `engine`, `prober` and `loss`.
    ///
    /// Probing uses the default [`ProbeConfig`] and records go to standard
    /// output as text until overridden.
    pub fn new(engine: E, prober: P, loss: LossEstimator, shutdown: CancellationToken) -> Self {
        let probe = ProbeConfig::default();
        Self {
            engine,
            pacer: Some(Pacer::new(prober, probe.identifier(), probe.ping_gap)),
            filter: RttJitterFilter::new(),
            loss,
            reporter: Box::new(TextReporter::new(std::io::stdout())),
            config: SessionConfig::default(),
            shutdown,
            state: SessionState::Idle,
            cycles: 0,
        }
    }

    pub fn with_probe_config(mut self, probe: &ProbeConfig) -> Self {
        self.pacer = self
            .pacer
            .take()
            .map(|pacer| Pacer::new(pacer.into_prober(), probe.identifier(), probe.ping_gap));
        self
    }

    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Completed cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn filter(&self) -> &RttJitterFilter {
        &self.filter
    }

    /// Loss model state, for persistence once the session has stopped.
    pub fn loss_estimator(&self) -> &LossEstimator {
        &self.loss
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn transition(&mut self, next: SessionState) {
        if next.is_running() {
            debug!("Sender session {} -> {}", self.state, next);
        } else {
            info!("Sender session {} -> {}", self.state, next);
        }
        self.state = next;
    }

    /// Validate, set up and run cycles until shutdown or a fatal error.
    ///
    /// The engine is cleaned up on every exit after setup was attempted.
    pub async fn run(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(Error::Internal(format!(
                "sender session cannot start from state {}",
                self.state
            )));
        }

        self.transition(SessionState::Validating);
        if !self.engine.validate().await {
            self.transition(SessionState::Stopped);
            return Err(Error::Validation(
                "bulk-probe engine self-check failed".into(),
            ));
        }

        self.transition(SessionState::Setup);
        if let Err(e) = self.engine.setup_run().await {
            error!("Bulk-probe engine setup failed: {}", e);
            self.engine.cleanup().await;
            self.transition(SessionState::Stopped);
            return Err(Error::Setup(e));
        }

        let outcome = self.run_cycles().await;

        self.engine.cleanup().await;
        if let Err(e) = self.reporter.finish() {
            warn!("Failed to flush statistics output: {}", e);
        }

        let (lost, samples) = self.loss.counts();
        info!(
            "Sender stopped after {} cycles: {} lost of {} samples ({:.3} %)",
            self.cycles,
            lost,
            samples,
            self.loss.total_loss_percent()
        );
        self.transition(SessionState::Stopped);
        outcome
    }

    async fn run_cycles(&mut self) -> Result<()> {
        let started = Instant::now();

        loop {
            if self.shutdown.is_cancelled() {
                info!("Shutdown requested, stopping after cycle {}", self.cycles);
                return Ok(());
            }
            if self.config.max_cycles.is_some_and(|max| self.cycles >= max) {
                info!("Reached {} cycles, stopping", self.cycles);
                return Ok(());
            }

            let cycle = self.cycles + 1;
            self.transition(SessionState::Running(cycle));
            let cycle_start = Instant::now();

            let bundles = self.measure().await?;
            self.loss.process_bundles(&bundles);
            self.cycles = cycle;

            let record = StatsRecord::capture(
                cycle,
                started.elapsed(),
                self.engine.current_estimation(),
                self.engine.current_overhead(),
                &self.filter,
                &self.loss,
                bundles.len(),
            );
            debug!("Cycle {} accumulated {} bundles", cycle, bundles.len());
            self.reporter.report(&record)?;

            let remaining = self.config.cycle_gap.saturating_sub(cycle_start.elapsed());
            if !remaining.is_zero() {
                tokio::time::sleep(remaining).await;
            }
        }
    }

    /// Run pacing and one bulk round side by side; return the round's bundles.
    async fn measure(&mut self) -> Result<Vec<MeasurementBundle>> {
        let pacer = self
            .pacer
            .take()
            .ok_or_else(|| Error::Internal("prober lost by an earlier cycle".into()))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        let pacing = pacer.spawn(tx, stop.clone());

        let Self {
            engine,
            filter,
            loss,
            config,
            ..
        } = self;

        let round = run_round(engine, config.retry_policy);
        tokio::pin!(round);

        let outcome = loop {
            tokio::select! {
                outcome = &mut round => break Some(outcome),
                sample = rx.recv() => match sample {
                    Some(sample) => apply_sample(filter, loss, &sample),
                    // Pacing only ends early on a probe failure.
                    None => break None,
                },
            }
        };

        stop.cancel();
        let joined = pacing::join(pacing).await;
        while let Ok(sample) = rx.try_recv() {
            apply_sample(filter, loss, &sample);
        }
        self.pacer = Some(joined?);

        match outcome {
            Some(outcome) => outcome,
            None => Err(Error::Internal("pacing stopped before the round ended".into())),
        }
    }
}

fn apply_sample(filter: &mut RttJitterFilter, loss: &mut LossEstimator, sample: &ProbeSample) {
    match filter.process(&sample.result) {
        SampleOutcome::Accepted => {}
        SampleOutcome::Lost => debug!("icmp_seq={} lost", sample.sequence),
        SampleOutcome::BadChecksum => warn!("icmp_seq={} reply with bad checksum", sample.sequence),
    }
    loss.process_probe(&sample.result);
}
