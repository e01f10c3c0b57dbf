//! Parameter definitions with physical units and documented semantics.
//!
//! All magic numbers are extracted here with:
//! - Physical units (seconds, Hz, frames)
//! - Documented ranges and meanings
//! - A `validate()` per section

mod audio;
mod recording;

// Re-export all types
pub use audio::{
    audio_constants, AnalyzerConfig, EngineConfig, EngineMode, LayerDefaults, StreamFormat,
};
pub use recording::{CompositionConfig, RecordingConfig};
