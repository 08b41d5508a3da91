use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Feature extraction strategy for the bundled similarity scorer.
///
/// A closed set: an unrecognized name in a config file is a
/// deserialization error, not a silent fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractorKind {
    #[serde(rename = "SIFT")]
    Sift,
    #[serde(rename = "ORB")]
    Orb,
    #[serde(rename = "KAZE")]
    Kaze,
}

/// Descriptor matching strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatcherKind {
    /// Exhaustive nearest-neighbour search
    #[serde(rename = "BF")]
    BruteForce,
    /// Locality-pruned approximate search
    #[serde(rename = "FLANN")]
    Flann,
}

/// Log level for the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration for the grouping pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feature extraction strategy for the bundled scorer
    pub feature_extractor: ExtractorKind,

    /// Descriptor matching strategy for the bundled scorer
    pub matcher: MatcherKind,

    /// Scores strictly above this classify a candidate as a duplicate of
    /// the current anchor
    pub duplicate_threshold: f64,

    /// Scores at or above this classify a candidate as matching a template
    pub match_threshold: f64,

    /// Path to the ledger database file
    pub db_path: PathBuf,

    /// Operator identity recorded on every finalized image; falls back to
    /// the USER/USERNAME environment variables
    pub user: Option<String>,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feature_extractor: ExtractorKind::Sift,
            matcher: MatcherKind::BruteForce,
            duplicate_threshold: 0.7,
            match_threshold: 0.7,
            db_path: PathBuf::from("processed_images.db"),
            user: None,
            log_level: LogLevel::Info,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file; missing keys take defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|_| Error::FileNotFound(path.to_path_buf()))?;
        let config: Config = serde_json::from_reader(file)
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration to a JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| Error::Configuration(format!("failed to write config: {}", e)))?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !(self.duplicate_threshold > 0.0 && self.duplicate_threshold < 1.0) {
            return Err(Error::Configuration(format!(
                "duplicate_threshold must be in (0, 1), got {}",
                self.duplicate_threshold
            )));
        }
        if !(self.match_threshold > 0.0 && self.match_threshold < 1.0) {
            return Err(Error::Configuration(format!(
                "match_threshold must be in (0, 1), got {}",
                self.match_threshold
            )));
        }
        Ok(())
    }

    /// Operator identity to record in the ledger
    pub fn resolve_user(&self) -> String {
        self.user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

// -- Tests --
