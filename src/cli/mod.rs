//! Command-line interface for pathgauge.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;

use crate::config::Config;
use crate::error::Error;
use crate::loss::LossModel;
use crate::report::ReportFormat;

/// pathgauge - active network path measurement
#[derive(Parser, Debug)]
#[command(
    name = "pathgauge",
    author,
    version,
    about = "Measure RTT, jitter, loss and available bandwidth of a network path",
    long_about = r#"
pathgauge measures a network path with two concurrent probe streams:

  - ICMP echo probes at a fixed pacing gap (RTT, smoothed RTT, jitter, loss)
  - Bulk bandwidth-probing rounds through a pluggable engine

Loss is estimated either naively (lost over sent) or with the ELR model,
which correlates loss with the one-way delay of nearby packets.

QUICK START:
  Receiver:  pathgauge receive
  Sender:    sudo pathgauge send <host> --format yaml -o stats.yaml
  Ping:      sudo pathgauge ping <host>
"#
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the measuring side against a receiver
    Send(SendArgs),

    /// Run the receiving side
    Receive(ReceiveArgs),

    /// Ping a host continuously and print a summary on exit
    Ping(PingArgs),

    /// Show the default configuration
    Config(ConfigArgs),
}

/// Engine port overrides shared by both roles
#[derive(Args, Debug, Clone, Default)]
pub struct PortArgs {
    /// Engine control port
    #[arg(short = 'p', long)]
    pub ctrl_port: Option<u16>,

    /// Engine probe port
    #[arg(short = 'P', long)]
    pub probe_port: Option<u16>,
}

/// Send command arguments
#[derive(Args, Debug)]
pub struct SendArgs {
    /// Receiver host name or address
    pub host: String,

    #[command(flatten)]
    pub ports: PortArgs,

    /// Gap between ICMP probes
    #[arg(short = 'g', long, value_parser = humantime::parse_duration)]
    pub ping_gap: Option<Duration>,

    /// Minimum length of a measurement cycle
    #[arg(long, value_parser = humantime::parse_duration)]
    pub cycle_gap: Option<Duration>,

    /// Stop after this many cycles
    #[arg(short = 'n', long)]
    pub max_cycles: Option<u64>,

    /// Statistics output format
    #[arg(short = 'f', long)]
    pub format: Option<FormatArg>,

    /// Statistics output file (standard output by default)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Loss model
    #[arg(long)]
    pub loss_model: Option<LossModelArg>,

    /// Preload ELR state from this file (JSON, or YAML for .yaml/.yml)
    #[arg(short = 'e', long)]
    pub load_elr: Option<PathBuf>,

    /// Save ELR state to this file on exit
    #[arg(short = 'y', long)]
    pub save_elr: Option<PathBuf>,

    /// Log the ELR probability table on exit
    #[arg(long)]
    pub dump_table: bool,
}

/// Receive command arguments
#[derive(Args, Debug)]
pub struct ReceiveArgs {
    #[command(flatten)]
    pub ports: PortArgs,
}

/// Ping command arguments
#[derive(Args, Debug)]
pub struct PingArgs {
    /// Host name or address
    pub host: String,

    /// Gap between probes
    #[arg(short = 'g', long, value_parser = humantime::parse_duration)]
    pub ping_gap: Option<Duration>,

    /// Reply timeout per probe
    #[arg(short = 'W', long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Stop after this many probes
    #[arg(short = 'n', long)]
    pub count: Option<u64>,
}

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Output path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Statistics output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Text,
    Yaml,
}

impl From<FormatArg> for ReportFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Text => Self::Text,
            FormatArg::Yaml => Self::Yaml,
        }
    }
}

/// Loss model
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LossModelArg {
    /// Lost over sent
    Naive,
    /// Delay-correlated expected loss rate
    Elr,
}

impl From<LossModelArg> for LossModel {
    fn from(m: LossModelArg) -> Self {
        match m {
            LossModelArg::Naive => Self::Naive,
            LossModelArg::Elr => Self::Elr,
        }
    }
}

impl PortArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(port) = self.ctrl_port {
            config.engine.ctrl_port = port;
        }
        if let Some(port) = self.probe_port {
            config.engine.probe_port = port;
        }
    }
}

impl SendArgs {
    /// Overlay command-line values on the file configuration.
    pub fn apply(&self, config: &mut Config) {
        self.ports.apply(config);
        if let Some(gap) = self.ping_gap {
            config.probe.ping_gap = gap;
        }
        if let Some(gap) = self.cycle_gap {
            config.session.cycle_gap = gap;
        }
        if let Some(max) = self.max_cycles {
            config.session.max_cycles = Some(max);
        }
        if let Some(format) = self.format {
            config.report.format = format.into();
        }
        if let Some(ref output) = self.output {
            config.report.output = Some(output.clone());
        }
        if let Some(model) = self.loss_model {
            config.loss.model = model.into();
        }
        if self.load_elr.is_some() || self.save_elr.is_some() {
            config.loss.model = LossModel::Elr;
        }
    }
}

impl PingArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(gap) = self.ping_gap {
            config.probe.ping_gap = gap;
        }
        if let Some(timeout) = self.timeout {
            config.probe.ping_timeout = timeout;
        }
    }
}

/// The single line printed when a command fails.
pub fn failure_line(err: &Error) -> String {
    format!("{} {}", "✗".red(), err)
}
