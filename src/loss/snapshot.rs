//! Saved state of the delay-correlated estimator.
//!
//! Files ending in `.yaml`/`.yml` are YAML; anything else is JSON.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::elr::PacketCount;
use crate::error::{Error, Result};

/// On-disk shape of an [`ElrLoss`](super::ElrLoss).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElrSnapshot {
    pub lost_count: u64,
    pub sample_count: u64,
    /// τ
    pub window_halfwidth: i64,
    /// Delay in milliseconds to its `2τ+1` offset cells.
    pub probability_table: BTreeMap<u64, Vec<PacketCount>>,
}

/// Encoding used for a snapshot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Json,
    Yaml,
}

impl SnapshotFormat {
    /// Pick the encoding from a file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Self::Yaml,
            _ => Self::Json,
        }
    }
}

impl ElrSnapshot {
    pub fn encode(&self, format: SnapshotFormat) -> Result<String> {
        match format {
            SnapshotFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| Error::Internal(format!("failed to encode ELR state: {e}"))),
            SnapshotFormat::Yaml => serde_yaml::to_string(self)
                .map_err(|e| Error::Internal(format!("failed to encode ELR state: {e}"))),
        }
    }

    pub fn decode(content: &str, format: SnapshotFormat) -> Result<Self> {
        match format {
            SnapshotFormat::Json => {
                serde_json::from_str(content).map_err(|e| Error::Deserialization(e.to_string()))
            }
            SnapshotFormat::Yaml => {
                serde_yaml::from_str(content).map_err(|e| Error::Deserialization(e.to_string()))
            }
        }
    }

    /// Write the snapshot to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = self.encode(SnapshotFormat::from_path(path))?;
        std::fs::write(path, content)?;
        info!(
            "Saved ELR state ({} delays) to {}",
            self.probability_table.len(),
            path.display()
        );
        Ok(())
    }

    /// Read a snapshot from `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let snapshot = Self::decode(&content, SnapshotFormat::from_path(path))?;
        info!(
            "Loaded ELR state ({} delays) from {}",
            snapshot.probability_table.len(),
            path.display()
        );
        Ok(snapshot)
    }
}
