//! Catalog configuration, loaded from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use iocat_core::hlc::DEFAULT_MAX_DRIFT_MS;

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Name recorded for this writer in the catalog's `writers` table
    #[serde(default = "default_writer_name")]
    pub writer_name: String,

    /// Where this writer's signing key lives. `None` means a fresh key per session.
    #[serde(default)]
    pub identity_path: Option<PathBuf>,

    /// Maximum number of undoable steps kept per session
    #[serde(default = "default_undo_depth")]
    pub undo_depth: usize,

    /// How far ahead of local wall time a merged timestamp may be
    #[serde(default = "default_max_clock_drift")]
    pub max_clock_drift_ms: u64,

    #[serde(default)]
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Minimum confidence for a suggested tag to be applied
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// Maximum number of tags applied per image
    #[serde(default = "default_max_tags")]
    pub max_tags: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            writer_name: default_writer_name(),
            identity_path: None,
            undo_depth: default_undo_depth(),
            max_clock_drift_ms: default_max_clock_drift(),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            max_tags: default_max_tags(),
        }
    }
}

fn default_writer_name() -> String {
    "unnamed".to_string()
}

fn default_undo_depth() -> usize {
    100
}

fn default_max_clock_drift() -> u64 {
    DEFAULT_MAX_DRIFT_MS
}

fn default_threshold() -> f32 {
    0.5
}

fn default_max_tags() -> usize {
    10
}

impl CatalogConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, EngineError> {
        let config: Self =
            toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, EngineError> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.writer_name.trim().is_empty() {
            return Err(EngineError::Config("writer_name must not be empty".into()));
        }
        if self.undo_depth == 0 {
            return Err(EngineError::Config("undo_depth must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.classifier.threshold) {
            return Err(EngineError::Config(format!(
                "classifier.threshold must be within 0..=1, got {}",
                self.classifier.threshold
            )));
        }
        if self.classifier.max_tags == 0 {
            return Err(EngineError::Config("classifier.max_tags must be at least 1".into()));
        }
        Ok(())
    }
}
