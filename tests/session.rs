//! Sender and receiver orchestration against scripted engines and probers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use pathgauge::engine::{BulkProbeReceiver, BulkProbeSender};
use pathgauge::error::{EngineError, Error, ProbeError, Result};
use pathgauge::loss::{ElrLoss, LossEstimator, NaiveLoss};
use pathgauge::probe::{EchoProbe, ProbeConfig};
use pathgauge::report::CollectingReporter;
use pathgauge::session::{run_round, RoundRetryPolicy, ReceiverSession, SenderSession, SessionConfig};
use pathgauge::types::{Bandwidth, MeasurementBundle, ProbeResult, SessionState};

#[derive(Debug, Default)]
struct EngineLog {
    validations: u32,
    setups: u32,
    resets: u32,
    failed_steps: u32,
    cleanups: u32,
}

/// Bulk-probe engine following a fixed script.
///
/// Every round fails `failures_per_round` steps, then succeeds
/// `steps_per_round` steps. Each successful step emits one bundle
/// `[delay, lost]` whose delay in milliseconds is the step's running index.
struct ScriptedEngine {
    valid: bool,
    fail_setup: bool,
    failures_per_round: u32,
    steps_per_round: u32,
    estimation: Bandwidth,
    cancel_on_first_step: Option<CancellationToken>,
    step_delay: Duration,
    log: Arc<Mutex<EngineLog>>,
    failed_in_round: u32,
    done_in_round: u32,
    total_steps: u64,
}

impl ScriptedEngine {
    fn new(log: Arc<Mutex<EngineLog>>) -> Self {
        Self {
            valid: true,
            fail_setup: false,
            failures_per_round: 0,
            steps_per_round: 2,
            estimation: Bandwidth::from_bytes_per_sec(1_250_000.0),
            cancel_on_first_step: None,
            step_delay: Duration::ZERO,
            log,
            failed_in_round: 0,
            done_in_round: 0,
            total_steps: 0,
        }
    }
}

#[async_trait]
impl BulkProbeSender for ScriptedEngine {
    async fn validate(&mut self) -> bool {
        self.log.lock().validations += 1;
        self.valid
    }

    async fn setup_run(&mut self) -> std::result::Result<(), EngineError> {
        self.log.lock().setups += 1;
        if self.fail_setup {
            Err(EngineError::ControlChannel("connection refused".into()))
        } else {
            Ok(())
        }
    }

    async fn reset_round(&mut self) {
        self.log.lock().resets += 1;
        self.failed_in_round = 0;
        self.done_in_round = 0;
    }

    async fn do_one_measurement_round(&mut self, out: &mut Vec<MeasurementBundle>) -> bool {
        if let Some(token) = self.cancel_on_first_step.take() {
            token.cancel();
        }
        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
        if self.failed_in_round < self.failures_per_round {
            self.failed_in_round += 1;
            self.log.lock().failed_steps += 1;
            // Partial output of a failed step must be discarded by the caller.
            out.push(MeasurementBundle::from_delays(vec![None; 4]));
            return false;
        }

        out.push(MeasurementBundle::from_delays(vec![
            Some(Duration::from_millis(self.total_steps)),
            None,
        ]));
        self.total_steps += 1;
        self.done_in_round += 1;
        true
    }

    async fn process_one_round_result(&mut self, step: &mut Vec<MeasurementBundle>) -> bool {
        step.clear();
        self.done_in_round >= self.steps_per_round
    }

    fn current_estimation(&self) -> Bandwidth {
        self.estimation
    }

    async fn cleanup(&mut self) {
        self.log.lock().cleanups += 1;
    }
}

#[derive(Debug)]
struct FixedProbe {
    rtt: Duration,
}

impl EchoProbe for FixedProbe {
    fn probe(&mut self, _sequence: u16, _identifier: u16) -> Result<ProbeResult> {
        Ok(ProbeResult::received(self.rtt, false))
    }
}

#[derive(Debug)]
struct UnreachableProbe;

impl EchoProbe for UnreachableProbe {
    fn probe(&mut self, _sequence: u16, _identifier: u16) -> Result<ProbeResult> {
        Err(ProbeError::SendFailed("network is unreachable".into()).into())
    }
}

fn fast_probing() -> ProbeConfig {
    ProbeConfig {
        ping_gap: Duration::from_millis(1),
        ..Default::default()
    }
}

fn sender<P: EchoProbe>(
    engine: ScriptedEngine,
    prober: P,
    loss: LossEstimator,
    max_cycles: u64,
    policy: RoundRetryPolicy,
    token: CancellationToken,
    reporter: &CollectingReporter,
) -> SenderSession<ScriptedEngine, P> {
    SenderSession::new(engine, prober, loss, token)
        .with_probe_config(&fast_probing())
        .with_session_config(SessionConfig {
            cycle_gap: Duration::from_millis(1),
            max_cycles: Some(max_cycles),
            retry_policy: policy,
        })
        .with_reporter(reporter.clone())
}

fn probe() -> FixedProbe {
    FixedProbe {
        rtt: Duration::from_micros(200),
    }
}

#[tokio::test]
async fn test_cycles_report_once_each() {
    let log = Arc::new(Mutex::new(EngineLog::default()));
    let reporter = CollectingReporter::new();
    let loss = LossEstimator::Elr(ElrLoss::new(1, 1));

    let mut session = sender(
        ScriptedEngine::new(Arc::clone(&log)),
        probe(),
        loss,
        3,
        RoundRetryPolicy::Forever,
        CancellationToken::new(),
        &reporter,
    );
    session.run().await.unwrap();

    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.cycles(), 3);

    let records = reporter.records();
    let cycles: Vec<u64> = records.iter().map(|r| r.cycle).collect();
    assert_eq!(cycles, vec![1, 2, 3]);
    for record in &records {
        assert_eq!(record.bundles, 2);
        assert_eq!(record.bandwidth_bits_per_sec, 10_000_000.0);
        assert!(record.local_loss_percent.is_some());
        assert!(record.last_rtt_ms > 0.0);
    }
    assert!(records.windows(2).all(|w| w[0].elapsed_secs <= w[1].elapsed_secs));

    // Every cycle issues at least one probe, none of them lost.
    assert!(session.filter().total() >= 3);
    assert_eq!(session.filter().lost(), 0);

    // 6 bundles of one lost packet out of two.
    let (lost, samples) = session.loss_estimator().counts();
    assert_eq!(lost, 6);
    assert_eq!(samples, 12 + session.filter().total());

    let log = log.lock();
    assert_eq!(log.validations, 1);
    assert_eq!(log.setups, 1);
    assert_eq!(log.resets, 3);
    assert_eq!(log.cleanups, 1);
}

#[tokio::test]
async fn test_cancelled_before_start_runs_no_cycle() {
    let log = Arc::new(Mutex::new(EngineLog::default()));
    let reporter = CollectingReporter::new();
    let token = CancellationToken::new();
    token.cancel();

    let mut session = sender(
        ScriptedEngine::new(Arc::clone(&log)),
        probe(),
        LossEstimator::default(),
        10,
        RoundRetryPolicy::Forever,
        token,
        &reporter,
    );
    session.run().await.unwrap();

    assert_eq!(session.cycles(), 0);
    assert!(reporter.is_empty());
    assert_eq!(session.filter().total(), 0);
    assert_eq!(log.lock().cleanups, 1);
}

#[tokio::test]
async fn test_cancellation_lets_current_cycle_finish() {
    let log = Arc::new(Mutex::new(EngineLog::default()));
    let reporter = CollectingReporter::new();
    let token = CancellationToken::new();

    let mut engine = ScriptedEngine::new(Arc::clone(&log));
    engine.cancel_on_first_step = Some(token.clone());

    let mut session = sender(
        engine,
        probe(),
        LossEstimator::default(),
        10,
        RoundRetryPolicy::Forever,
        token,
        &reporter,
    );
    session.run().await.unwrap();

    // Cancelled during the first round: that round completes and is reported.
    assert_eq!(session.cycles(), 1);
    let records = reporter.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].bundles, 2);
    assert_eq!(log.lock().cleanups, 1);
}

#[tokio::test]
async fn test_validation_failure_is_fatal() {
    let log = Arc::new(Mutex::new(EngineLog::default()));
    let reporter = CollectingReporter::new();
    let mut engine = ScriptedEngine::new(Arc::clone(&log));
    engine.valid = false;

    let mut session = sender(
        engine,
        probe(),
        LossEstimator::default(),
        1,
        RoundRetryPolicy::Forever,
        CancellationToken::new(),
        &reporter,
    );
    let err = session.run().await.unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(session.state(), SessionState::Stopped);
    let log = log.lock();
    assert_eq!(log.setups, 0);
    assert_eq!(log.cleanups, 0);
}

#[tokio::test]
async fn test_setup_failure_cleans_up() {
    let log = Arc::new(Mutex::new(EngineLog::default()));
    let reporter = CollectingReporter::new();
    let mut engine = ScriptedEngine::new(Arc::clone(&log));
    engine.fail_setup = true;

    let mut session = sender(
        engine,
        probe(),
        LossEstimator::default(),
        1,
        RoundRetryPolicy::Forever,
        CancellationToken::new(),
        &reporter,
    );
    let err = session.run().await.unwrap_err();

    assert!(matches!(err, Error::Setup(EngineError::ControlChannel(_))));
    assert!(err.is_engine_failure());
    assert_eq!(session.cycles(), 0);
    assert!(reporter.is_empty());
    assert_eq!(log.lock().cleanups, 1);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let log = Arc::new(Mutex::new(EngineLog::default()));
    let reporter = CollectingReporter::new();
    let mut engine = ScriptedEngine::new(Arc::clone(&log));
    engine.failures_per_round = 3;

    let mut session = sender(
        engine,
        probe(),
        LossEstimator::Naive(NaiveLoss::new()),
        2,
        RoundRetryPolicy::Forever,
        CancellationToken::new(),
        &reporter,
    );
    session.run().await.unwrap();

    assert_eq!(reporter.len(), 2);
    // Bundles from failed steps never reach the loss model.
    assert!(reporter.records().iter().all(|r| r.bundles == 2));
    let (lost, _) = session.loss_estimator().counts();
    assert_eq!(lost, 4);
    assert_eq!(log.lock().failed_steps, 6);
}

#[tokio::test]
async fn test_abort_policy_ends_session() {
    let log = Arc::new(Mutex::new(EngineLog::default()));
    let reporter = CollectingReporter::new();
    let mut engine = ScriptedEngine::new(Arc::clone(&log));
    engine.failures_per_round = u32::MAX;

    let mut session = sender(
        engine,
        probe(),
        LossEstimator::default(),
        5,
        RoundRetryPolicy::AbortAfter { attempts: 4 },
        CancellationToken::new(),
        &reporter,
    );
    let err = session.run().await.unwrap_err();

    assert!(matches!(err, Error::Measurement { attempts: 4 }));
    assert!(reporter.is_empty());
    let log = log.lock();
    assert_eq!(log.failed_steps, 4);
    assert_eq!(log.cleanups, 1);
}

#[tokio::test]
async fn test_probe_failure_is_fatal() {
    let log = Arc::new(Mutex::new(EngineLog::default()));
    let reporter = CollectingReporter::new();

    let mut session = sender(
        ScriptedEngine::new(Arc::clone(&log)),
        UnreachableProbe,
        LossEstimator::default(),
        5,
        RoundRetryPolicy::Forever,
        CancellationToken::new(),
        &reporter,
    );
    let err = session.run().await.unwrap_err();

    assert!(err.is_probe_failure());
    assert!(reporter.is_empty());
    assert_eq!(log.lock().cleanups, 1);
}

#[tokio::test]
async fn test_session_runs_once() {
    let log = Arc::new(Mutex::new(EngineLog::default()));
    let reporter = CollectingReporter::new();

    let mut session = sender(
        ScriptedEngine::new(Arc::clone(&log)),
        probe(),
        LossEstimator::default(),
        1,
        RoundRetryPolicy::Forever,
        CancellationToken::new(),
        &reporter,
    );
    session.run().await.unwrap();
    assert!(matches!(session.run().await, Err(Error::Internal(_))));
}

#[tokio::test]
async fn test_round_keeps_emission_order() {
    let log = Arc::new(Mutex::new(EngineLog::default()));
    let mut engine = ScriptedEngine::new(log);
    engine.steps_per_round = 4;
    engine.failures_per_round = 1;

    let bundles = run_round(&mut engine, RoundRetryPolicy::Forever).await.unwrap();

    let delays: Vec<Option<Duration>> = bundles.iter().map(|b| b.delays()[0]).collect();
    let expected: Vec<Option<Duration>> =
        (0..4).map(|ms| Some(Duration::from_millis(ms))).collect();
    assert_eq!(delays, expected);
}

#[derive(Debug)]
struct ScriptedReceiver {
    valid: bool,
    fail: bool,
    log: Arc<Mutex<EngineLog>>,
}

#[async_trait]
impl BulkProbeReceiver for ScriptedReceiver {
    async fn validate(&mut self) -> bool {
        self.log.lock().validations += 1;
        self.valid
    }

    async fn run(&mut self, shutdown: CancellationToken) -> std::result::Result<(), EngineError> {
        if self.fail {
            return Err(EngineError::Negotiation("unexpected probe size".into()));
        }
        shutdown.cancelled().await;
        Ok(())
    }

    async fn cleanup(&mut self) {
        self.log.lock().cleanups += 1;
    }
}

fn receiver(valid: bool, fail: bool, log: &Arc<Mutex<EngineLog>>) -> ScriptedReceiver {
    ScriptedReceiver {
        valid,
        fail,
        log: Arc::clone(log),
    }
}

#[tokio::test]
async fn test_receiver_serves_until_stopped() {
    let log = Arc::new(Mutex::new(EngineLog::default()));
    let shutdown = CancellationToken::new();
    let mut session = ReceiverSession::new(receiver(true, false, &log), &shutdown);

    session.start().await.unwrap();
    assert!(session.state().is_running());
    assert_eq!(log.lock().cleanups, 0);

    session.stop().await.unwrap();
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(log.lock().cleanups, 1);
    // Stopping one session leaves the process token alone.
    assert!(!shutdown.is_cancelled());
}

#[tokio::test]
async fn test_receiver_stops_on_shutdown() {
    let log = Arc::new(Mutex::new(EngineLog::default()));
    let shutdown = CancellationToken::new();
    let mut session = ReceiverSession::new(receiver(true, false, &log), &shutdown);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), session.serve())
        .await
        .expect("receiver should stop on shutdown")
        .unwrap();
    assert_eq!(log.lock().cleanups, 1);
}

#[tokio::test]
async fn test_receiver_validation_failure() {
    let log = Arc::new(Mutex::new(EngineLog::default()));
    let mut session = ReceiverSession::new(receiver(false, false, &log), &CancellationToken::new());

    assert!(matches!(session.start().await, Err(Error::Validation(_))));
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_receiver_engine_error_surfaces() {
    let log = Arc::new(Mutex::new(EngineLog::default()));
    let mut session = ReceiverSession::new(receiver(true, true, &log), &CancellationToken::new());

    let err = session.serve().await.unwrap_err();
    assert!(matches!(err, Error::Engine(EngineError::Negotiation(_))));
    assert_eq!(log.lock().cleanups, 1);
}

/// Seconds between consecutive records of a run with the given round length.
async fn record_spacing(step_delay: Duration) -> Vec<f64> {
    let log = Arc::new(Mutex::new(EngineLog::default()));
    let reporter = CollectingReporter::new();
    let mut engine = ScriptedEngine::new(log);
    engine.step_delay = step_delay;

    let mut session = SenderSession::new(
        engine,
        probe(),
        LossEstimator::Naive(NaiveLoss::new()),
        CancellationToken::new(),
    )
    .with_probe_config(&ProbeConfig {
        ping_gap: Duration::from_secs(1),
        ..Default::default()
    })
    .with_session_config(SessionConfig {
        cycle_gap: Duration::from_millis(100),
        max_cycles: Some(3),
        retry_policy: RoundRetryPolicy::Forever,
    })
    .with_reporter(reporter.clone());
    session.run().await.unwrap();

    reporter
        .records()
        .windows(2)
        .map(|w| w[1].elapsed_secs - w[0].elapsed_secs)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_short_round_sleeps_rest_of_cycle_gap() {
    // Two steps of 15 ms: a 30 ms round inside a 100 ms cycle.
    let spacing = record_spacing(Duration::from_millis(15)).await;

    assert_eq!(spacing.len(), 2);
    for gap in spacing {
        assert!((0.099..0.105).contains(&gap), "records {gap} s apart");
    }
}

#[tokio::test(start_paused = true)]
async fn test_overrunning_round_adds_no_sleep() {
    // Two steps of 75 ms: a 150 ms round overruns the 100 ms cycle.
    let spacing = record_spacing(Duration::from_millis(75)).await;

    assert_eq!(spacing.len(), 2);
    for gap in spacing {
        assert!((0.149..0.155).contains(&gap), "records {gap} s apart");
    }
}
