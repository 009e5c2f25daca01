//! pathgauge CLI - active network path measurement.

use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use tracing::{error, info, warn};

use pathgauge::cli::*;
use pathgauge::config::{init_logging, Config};
use pathgauge::engine::IcmpOnlyEngine;
use pathgauge::error::Result;
use pathgauge::loss::LossEstimator;
use pathgauge::session::{PingSession, ReceiverSession, SenderSession};
use pathgauge::shutdown;
use pathgauge::VERSION;

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", failure_line(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::discover(cli.config.as_deref())?;
    if cli.no_color {
        config.logging.color = false;
        colored::control::set_override(false);
    }
    init_logging(&config.logging, cli.verbose)?;

    // Dispatch command
    match cli.command {
        Commands::Send(args) => run_send(args, config).await,
        Commands::Receive(args) => run_receive(args, config).await,
        Commands::Ping(args) => run_ping(args, config).await,
        Commands::Config(args) => run_config(&args, &config),
    }
}

/// Run the measuring side
async fn run_send(args: SendArgs, mut config: Config) -> Result<()> {
    args.apply(&mut config);
    config.validate()?;
    warn_if_unprivileged();

    let loss = match args.load_elr {
        Some(ref path) => LossEstimator::load_elr(path, config.loss.consistency_threshold)?,
        None => LossEstimator::from_config(&config.loss),
    };

    let prober = config.probe.open(&args.host)?;
    info!(
        "pathgauge {} measuring {} ({}) with the {} loss model",
        VERSION,
        args.host,
        prober.destination(),
        loss.model()
    );

    let reporter = config.report.build()?;
    let (token, _signals) = shutdown::install();

    let mut session = SenderSession::new(
        IcmpOnlyEngine::from_config(&config.engine),
        prober,
        loss,
        token,
    )
    .with_probe_config(&config.probe)
    .with_session_config(config.session.clone())
    .with_reporter(reporter);

    let outcome = session.run().await;

    // Runs however the session ended; save errors are only logged.
    finish_loss_model(session.loss_estimator(), &args);

    outcome
}

fn finish_loss_model(loss: &LossEstimator, args: &SendArgs) {
    if args.dump_table {
        match loss.as_elr() {
            Some(elr) => {
                for (delay, cells) in elr.probability_table() {
                    let row: Vec<String> = cells
                        .iter()
                        .map(|c| format!("{}/{}", c.lost, c.total))
                        .collect();
                    info!("ELR {:>6}: {}", delay.to_string(), row.join(" "));
                }
            }
            None => warn!("--dump-table needs the ELR loss model"),
        }
    }

    if let Some(ref path) = args.save_elr {
        if let Err(e) = loss.save(path) {
            error!("Failed to save ELR state to {}: {}", path.display(), e);
        }
    }
}

/// Run the receiving side
async fn run_receive(args: ReceiveArgs, mut config: Config) -> Result<()> {
    args.ports.apply(&mut config);
    config.validate()?;

    let (token, _signals) = shutdown::install();
    println!(
        "{} receiver on control port {}, probe port {}",
        "pathgauge".bright_cyan().bold(),
        config.engine.ctrl_port,
        config.engine.probe_port
    );

    let mut session = ReceiverSession::new(IcmpOnlyEngine::from_config(&config.engine), &token);
    session.serve().await
}

/// Ping until interrupted
async fn run_ping(args: PingArgs, mut config: Config) -> Result<()> {
    args.apply(&mut config);
    config.validate()?;
    warn_if_unprivileged();

    let prober = config.probe.open(&args.host)?;
    println!("PING {} ({})", args.host.bold(), prober.destination());

    let (token, _signals) = shutdown::install();
    let mut session = PingSession::new(prober, &config.probe, token);
    if let Some(count) = args.count {
        session = session.with_count(count);
    }

    let summary = session.run().await?;
    println!();
    println!("--- {} ping statistics ---", args.host);
    println!("{summary}");
    Ok(())
}

/// Show the default configuration
fn run_config(args: &ConfigArgs, config: &Config) -> Result<()> {
    if let Some(ref path) = args.output {
        config.save(path)?;
        println!(
            "{} Configuration written to {}",
            "✓".green(),
            path.display()
        );
    } else {
        println!("{}", config.to_toml()?);
    }
    Ok(())
}

fn warn_if_unprivileged() {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail.
        let euid = unsafe { libc::geteuid() };
        if euid != 0 {
            warn!("Not running as root: raw ICMP sockets need root or CAP_NET_RAW");
        }
    }
}
