//! Consent gate
//!
//! The pipeline captures the user's screen; it does not start until the
//! user has accepted the terms once and chosen how models may run. The
//! record lives next to the executable and is checked before every run.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How the user allowed models to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelMode {
    /// Everything on this machine
    Local,
    /// Hosted engines allowed
    Online,
    /// Local first, hosted as fallback
    Hybrid,
}

impl std::str::FromStr for ModelMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(ModelMode::Local),
            "online" => Ok(ModelMode::Online),
            "hybrid" => Ok(ModelMode::Hybrid),
            other => bail!("unknown model mode '{other}' (expected local, online or hybrid)"),
        }
    }
}

impl std::fmt::Display for ModelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelMode::Local => "local",
            ModelMode::Online => "online",
            ModelMode::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

/// The on-disk consent record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRecord {
    /// Whether the terms were accepted
    pub accepted: bool,

    /// ISO date of acceptance
    pub date: String,

    /// Chosen model mode
    pub model_mode: ModelMode,
}

impl ConsentRecord {
    /// Load the record if one exists
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let record: ConsentRecord = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(record))
    }

    /// Write an acceptance record dated now
    pub fn accept(path: &Path, model_mode: ModelMode) -> Result<Self> {
        let record = ConsentRecord {
            accepted: true,
            date: Utc::now().format("%Y-%m-%d").to_string(),
            model_mode,
        };
        let content = toml::to_string_pretty(&record).context("Failed to encode consent")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Consent recorded ({} mode)", model_mode);
        Ok(record)
    }

    /// Gate used before the first run: error unless consent is on file
    pub fn require(path: &Path) -> Result<Self> {
        match Self::load(path)? {
            Some(record) if record.accepted => Ok(record),
            _ => bail!(
                "Consent has not been given. Run `screenlate consent accept --model-mode local` \
                 (or online/hybrid) after reading the terms."
            ),
        }
    }
}
