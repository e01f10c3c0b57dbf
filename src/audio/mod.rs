//! Real-time mixing, scheduling, spectrum analysis and capture.
//!
//! Layers become playback nodes in a `MixGraph`; each node is driven by a
//! self-rescheduling loop on the `Scheduler` context, and a tap on the
//! mixer output feeds FFT analysis and (optionally) a WAV sink.

mod capture;
mod fft;
mod graph;
mod node;
mod output;
mod scheduler;
mod source;

// Re-export public types
pub use capture::{CaptureSink, RecordedFile, VoiceRecorder};
pub use fft::{normalize, SpectralAnalyzer, SpectrumSlot};
pub use graph::MixGraph;
pub use node::{NodeMode, NodeStatus};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use source::{load_wav, AudioBuffer};
