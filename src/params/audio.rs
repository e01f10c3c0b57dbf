//! Audio engine and spectrum analysis configuration.

use std::time::Duration;

use crate::error::{CompositionError, Result};

/// Spectrum analysis configuration
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Samples per analysis block (zero-padded if the tap delivers fewer)
    pub block_size: usize,

    /// Number of magnitude bins published per frame
    pub bar_count: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            block_size: audio_constants::ANALYSIS_BLOCK_SIZE,
            bar_count: audio_constants::MAX_BAR_COUNT,
        }
    }
}

impl AnalyzerConfig {
    /// Bar count that fits a visualizer of the given width in pixels
    ///
    /// 16px margin on both sides, 4px per bar, capped at 40 bars.
    pub fn bar_count_for_width(width_px: f32) -> usize {
        let fitting = ((width_px - 32.0) / 4.0).floor().max(0.0) as usize;
        fitting.min(audio_constants::MAX_BAR_COUNT)
    }

    /// Number of meaningful bins for a real-input transform of `block_size`
    pub fn usable_bins(&self) -> usize {
        self.block_size / 2 + 1
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(CompositionError::InvalidConfig {
                reason: "analysis block size must be > 0".to_string(),
            });
        }
        if self.bar_count == 0 || self.bar_count > self.usable_bins() {
            return Err(CompositionError::InvalidConfig {
                reason: format!(
                    "bar count must be in 1..={}, got {}",
                    self.usable_bins(),
                    self.bar_count
                ),
            });
        }
        Ok(())
    }
}

/// Sample rate and channel layout of the mixer output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Frames per second (Hz)
    pub sample_rate: u32,

    /// Interleaved channel count
    pub channels: u16,
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
        }
    }
}

impl StreamFormat {
    /// Wall-clock duration of `frames` frames
    pub fn frames_to_duration(&self, frames: u64) -> Duration {
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }

    /// Frames covering `duration`, rounded to the nearest frame
    pub fn duration_to_frames(&self, duration: Duration) -> u64 {
        (duration.as_secs_f64() * self.sample_rate as f64).round() as u64
    }
}

/// Where rendered audio goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// Default output device; scheduling runs on the wall clock
    Device,

    /// No device; the caller drives rendering and virtual time via `advance`
    Offline(StreamFormat),
}

/// Mix graph configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mode: EngineMode,

    /// Lower bound applied to instrumental retrigger intervals (seconds)
    pub min_retrigger_interval_secs: f64,

    /// Frames rendered per step when driving the graph offline
    pub offline_block_frames: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: EngineMode::Device,
            min_retrigger_interval_secs: audio_constants::MIN_RETRIGGER_INTERVAL_SECS,
            offline_block_frames: audio_constants::OFFLINE_BLOCK_FRAMES,
        }
    }
}

impl EngineConfig {
    /// Headless configuration at the given format
    pub fn offline(format: StreamFormat) -> Self {
        Self {
            mode: EngineMode::Offline(format),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let EngineMode::Offline(format) = self.mode {
            if format.sample_rate == 0 || format.channels == 0 {
                return Err(CompositionError::InvalidConfig {
                    reason: format!("offline format must be non-empty, got {:?}", format),
                });
            }
        }
        if self.offline_block_frames == 0 {
            return Err(CompositionError::InvalidConfig {
                reason: "offline block must be > 0 frames".to_string(),
            });
        }
        if !(self.min_retrigger_interval_secs > 0.0
            && self.min_retrigger_interval_secs <= audio_constants::MAX_RETRIGGER_INTERVAL_SECS)
        {
            return Err(CompositionError::InvalidConfig {
                reason: format!(
                    "minimum retrigger interval must be in (0, {}] seconds",
                    audio_constants::MAX_RETRIGGER_INTERVAL_SECS
                ),
            });
        }
        Ok(())
    }

    /// Retrigger period for an interval in seconds
    ///
    /// Clamped to `[min_retrigger_interval_secs, MAX_RETRIGGER_INTERVAL_SECS]`;
    /// NaN falls back to the default interval.
    pub fn retrigger_interval(&self, interval_secs: f64) -> Duration {
        let max = audio_constants::MAX_RETRIGGER_INTERVAL_SECS;
        let min = self.min_retrigger_interval_secs.min(max);
        let secs = if interval_secs.is_nan() {
            audio_constants::DEFAULT_RETRIGGER_INTERVAL_SECS
        } else {
            interval_secs
        };
        Duration::try_from_secs_f64(secs.clamp(min, max)).unwrap_or(Duration::from_secs(3600))
    }
}

/// Per-layer defaults applied when a layer is created
#[derive(Debug, Clone)]
pub struct LayerDefaults {
    /// Seconds between instrumental retriggers (0.5s = 120 BPM)
    pub retrigger_interval_secs: f64,

    /// Instrumental node volume in [0, 1]
    pub volume: f32,
}

impl Default for LayerDefaults {
    fn default() -> Self {
        Self {
            retrigger_interval_secs: audio_constants::DEFAULT_RETRIGGER_INTERVAL_SECS,
            volume: 0.5,
        }
    }
}

impl LayerDefaults {
    pub fn validate(&self) -> Result<()> {
        let interval = self.retrigger_interval_secs;
        if !(interval > 0.0 && interval <= audio_constants::MAX_RETRIGGER_INTERVAL_SECS) {
            return Err(CompositionError::InvalidConfig {
                reason: format!(
                    "default retrigger interval must be in (0, {}] seconds, got {}",
                    audio_constants::MAX_RETRIGGER_INTERVAL_SECS,
                    interval
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(CompositionError::InvalidConfig {
                reason: format!("default volume must be in [0, 1], got {}", self.volume),
            });
        }
        Ok(())
    }
}

/// Audio constants
pub mod audio_constants {
    /// Samples per analysis block
    pub const ANALYSIS_BLOCK_SIZE: usize = 1024;

    /// Upper bound on visualizer bars
    pub const MAX_BAR_COUNT: usize = 40;

    /// Offline render step (= 5.8ms @ 44.1kHz)
    pub const OFFLINE_BLOCK_FRAMES: usize = 256;

    /// Instrumental retrigger interval for new layers (0.5s = 120 BPM)
    pub const DEFAULT_RETRIGGER_INTERVAL_SECS: f64 = 0.5;

    /// Fastest retrigger the graph will schedule (seconds)
    pub const MIN_RETRIGGER_INTERVAL_SECS: f64 = 0.01;

    /// Slowest retrigger the graph will schedule (one hour)
    pub const MAX_RETRIGGER_INTERVAL_SECS: f64 = 3600.0;

    /// Preview tempo range mapped from a [0, 1] slider
    pub const PREVIEW_MIN_BPM: f64 = 60.0;
    pub const PREVIEW_MAX_BPM: f64 = 180.0;
}
