//! Per-cycle statistics records and their sinks.
//!
//! A sender session hands one [`StatsRecord`] per cycle to a [`Reporter`].
//! Two encodings ship with the crate:
//! - [`TextReporter`]: a human-readable block per cycle
//! - [`YamlReporter`]: a YAML sequence of mappings, one item per cycle

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::loss::LossEstimator;
use crate::metrics::RttJitterFilter;
use crate::types::Bandwidth;

/// Statistics for one measurement cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsRecord {
    pub cycle: u64,
    /// Seconds since the session started running.
    pub elapsed_secs: f64,
    pub bandwidth_bits_per_sec: f64,
    pub last_rtt_ms: f64,
    pub smoothed_rtt_ms: f64,
    pub jitter_ms: f64,
    pub total_loss_percent: f64,
    /// `null` while the loss model has no local estimate.
    pub local_loss_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overhead_bits_per_sec: Option<f64>,
    /// Bundles the bulk round accumulated.
    #[serde(default)]
    pub bundles: usize,
}

impl StatsRecord {
    /// Capture the current measurement state at the end of a cycle.
    pub fn capture(
        cycle: u64,
        elapsed: Duration,
        bandwidth: Bandwidth,
        overhead: Option<Bandwidth>,
        filter: &RttJitterFilter,
        loss: &LossEstimator,
        bundles: usize,
    ) -> Self {
        Self {
            cycle,
            elapsed_secs: elapsed.as_secs_f64(),
            bandwidth_bits_per_sec: bandwidth.bits_per_sec(),
            last_rtt_ms: filter
                .last_rtt()
                .map_or(0.0, |rtt| rtt.as_secs_f64() * 1000.0),
            smoothed_rtt_ms: filter.smoothed_rtt_micros() / 1000.0,
            jitter_ms: filter.jitter_micros() / 1000.0,
            total_loss_percent: loss.total_loss_percent(),
            local_loss_percent: loss.local_loss_percent(),
            overhead_bits_per_sec: overhead.map(Bandwidth::bits_per_sec),
            bundles,
        }
    }
}

impl fmt::Display for StatsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cycle {} ({:.2} s)", self.cycle, self.elapsed_secs)?;
        writeln!(
            f,
            "  bandwidth:  {}",
            Bandwidth::from_bytes_per_sec(self.bandwidth_bits_per_sec / 8.0).as_human_readable()
        )?;
        if let Some(overhead) = self.overhead_bits_per_sec {
            writeln!(
                f,
                "  overhead:   {}",
                Bandwidth::from_bytes_per_sec(overhead / 8.0).as_human_readable()
            )?;
        }
        writeln!(
            f,
            "  rtt:        last {:.3} ms, smoothed {:.3} ms, jitter {:.3} ms",
            self.last_rtt_ms, self.smoothed_rtt_ms, self.jitter_ms
        )?;
        match self.local_loss_percent {
            Some(local) => writeln!(
                f,
                "  loss:       total {:.3} %, local {:.3} %",
                self.total_loss_percent, local
            )?,
            None => writeln!(
                f,
                "  loss:       total {:.3} %, local n/a",
                self.total_loss_percent
            )?,
        }
        write!(f, "  bundles:    {}", self.bundles)
    }
}

/// Consumer of per-cycle statistics.
pub trait Reporter: Send {
    fn report(&mut self, record: &StatsRecord) -> Result<()>;

    /// Flush anything buffered. Called once when the session stops.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<R: Reporter + ?Sized> Reporter for Box<R> {
    fn report(&mut self, record: &StatsRecord) -> Result<()> {
        (**self).report(record)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// Human-readable block per cycle.
pub struct TextReporter<W> {
    out: W,
}

impl<W: Write + Send> TextReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Reporter for TextReporter<W> {
    fn report(&mut self, record: &StatsRecord) -> Result<()> {
        writeln!(self.out, "{record}\n")?;
        self.out.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(self.out.flush()?)
    }
}

/// YAML sequence of records.
///
/// Every record is written as a one-item sequence, so the concatenated
/// output parses as a single list.
pub struct YamlReporter<W> {
    out: W,
}

impl<W: Write + Send> YamlReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Reporter for YamlReporter<W> {
    fn report(&mut self, record: &StatsRecord) -> Result<()> {
        let item = serde_yaml::to_string(std::slice::from_ref(record))
            .map_err(|e| Error::Internal(format!("failed to encode record: {e}")))?;
        self.out.write_all(item.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(self.out.flush()?)
    }
}

/// Keeps records in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct CollectingReporter {
    records: Arc<Mutex<Vec<StatsRecord>>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<StatsRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl Reporter for CollectingReporter {
    fn report(&mut self, record: &StatsRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Yaml,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Yaml => write!(f, "yaml"),
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "human" => Ok(Self::Text),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(Error::InvalidConfig(format!("unknown report format: {other}"))),
        }
    }
}

/// Report configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub format: ReportFormat,

    /// Output file; standard output when unset.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl ReportConfig {
    /// Build the configured reporter.
    pub fn build(&self) -> Result<Box<dyn Reporter>> {
        let sink = open_sink(self.output.as_deref())?;
        Ok(match self.format {
            ReportFormat::Text => Box::new(TextReporter::new(sink)),
            ReportFormat::Yaml => Box::new(YamlReporter::new(sink)),
        })
    }
}

fn open_sink(path: Option<&Path>) -> Result<Box<dyn Write + Send>> {
    match path {
        Some(path) => {
            let file = File::create(path).map_err(|e| {
                Error::Config(format!("cannot open report output {}: {e}", path.display()))
            })?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(io::stdout())),
    }
}
