//! TOML configuration for threatpatterns.
//!
//! Layered model: an explicit `--config` path, then the `THREATPATTERNS_CONFIG`
//! environment variable, then `/etc/threatpatterns/threatpatterns.toml`, and
//! finally compiled-in defaults. Every section is optional.

use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming an alternate config file.
pub const CONFIG_ENV_VAR: &str = "THREATPATTERNS_CONFIG";

const SYSTEM_CONFIG_PATH: &str = "/etc/threatpatterns/threatpatterns.toml";

/// Longest span any day- or hour-based threshold may cover (about a century).
pub const MAX_SPAN_DAYS: u32 = 36_500;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for a detection run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreatPatternsConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl ThreatPatternsConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.validate()?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration from an explicit path, the environment, the
    /// system location, or defaults. An explicit path that fails to load is
    /// an error; the implicit locations only warn.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "{CONFIG_ENV_VAR} set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Reject values that would make a detector or the writer meaningless.
    pub fn validate(&self) -> Result<()> {
        self.detection.validate()?;
        ensure!(
            self.persistence.insert_batch_size > 0,
            "persistence.insert_batch_size must be at least 1"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding incidents and persisted patterns.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/threatpatterns.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Thresholds handed to every detector through its context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Default analysis window in days when the CLI does not override it.
    pub window_days: u32,
    /// Minimum group size before a grouping becomes a candidate.
    pub min_occurrences: usize,
    /// A gap of at least this many days between two incidents of the same
    /// actor closes the current campaign.
    pub campaign_gap_days: i64,
    /// Width of the sliding window used for temporal clusters.
    pub temporal_window_hours: i64,
    /// Upper bound on the trailing baseline used for daily anomalies.
    pub anomaly_baseline_days: u32,
    /// Absolute z-score a day must exceed to be flagged.
    pub anomaly_z_threshold: f64,
    /// Cap on listed techniques / actors / sectors in campaign and anomaly payloads.
    pub max_listed_values: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            window_days: 90,
            min_occurrences: 3,
            campaign_gap_days: 7,
            temporal_window_hours: 24,
            anomaly_baseline_days: 30,
            anomaly_z_threshold: 2.0,
            max_listed_values: 5,
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<()> {
        let max_days = i64::from(MAX_SPAN_DAYS);
        ensure!(self.min_occurrences > 0, "detection.min_occurrences must be at least 1");
        ensure!(
            self.window_days <= MAX_SPAN_DAYS,
            "detection.window_days must be at most {MAX_SPAN_DAYS}"
        );
        ensure!(
            (1..=max_days).contains(&self.campaign_gap_days),
            "detection.campaign_gap_days must be between 1 and {max_days}"
        );
        ensure!(
            (1..=max_days * 24).contains(&self.temporal_window_hours),
            "detection.temporal_window_hours must be between 1 and {}",
            max_days * 24
        );
        ensure!(
            self.anomaly_baseline_days <= MAX_SPAN_DAYS,
            "detection.anomaly_baseline_days must be at most {MAX_SPAN_DAYS}"
        );
        ensure!(
            self.anomaly_z_threshold.is_finite() && self.anomaly_z_threshold >= 0.0,
            "detection.anomaly_z_threshold must be a non-negative number"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// New patterns are written in transactions of at most this many rows.
    pub insert_batch_size: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            insert_batch_size: 50,
        }
    }
}
