//! Recording destinations and composition-wide configuration.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::audio::{AnalyzerConfig, EngineConfig, LayerDefaults};
use crate::error::Result;

/// Recording mode configuration
#[derive(Debug, Clone)]
pub struct RecordingConfig {
    /// Output directory for mixdowns and voice captures
    pub output_dir: PathBuf,

    /// File name prefix for mixdowns
    pub file_prefix: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            file_prefix: "composition".to_string(),
        }
    }
}

impl RecordingConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    /// Mixdown file path for a recording started at `unix_secs`
    pub fn composition_path(&self, unix_secs: u64) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.wav", self.file_prefix, unix_secs))
    }

    /// Voice capture file path
    pub fn voice_path(&self, id: Uuid) -> PathBuf {
        self.output_dir.join(format!("voice_{}.wav", id))
    }
}

/// Everything a composition needs at construction
#[derive(Debug, Clone)]
pub struct CompositionConfig {
    pub analyzer: AnalyzerConfig,
    pub engine: EngineConfig,
    pub recording: RecordingConfig,
    pub layer_defaults: LayerDefaults,

    /// Directory holding the bundled instrument samples
    pub samples_dir: PathBuf,
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerConfig::default(),
            engine: EngineConfig::default(),
            recording: RecordingConfig::default(),
            layer_defaults: LayerDefaults::default(),
            samples_dir: PathBuf::from("samples"),
        }
    }
}

impl CompositionConfig {
    pub fn with_samples_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.samples_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.analyzer.validate()?;
        self.engine.validate()?;
        self.layer_defaults.validate()?;
        Ok(())
    }
}
