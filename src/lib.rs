//! Layerloop library - multi-layer real-time audio composition
//!
//! Instrumental layers retrigger samples on fixed intervals, voice layers
//! play recordings at natural length, and the summed mix feeds a live
//! spectrum and an optional WAV recording. A separate preview player
//! auditions one sample at a time outside the mix.

pub mod audio;
pub mod cli;
pub mod composition;
pub mod error;
pub mod layer;
pub mod params;
pub mod preview;
pub mod replay;

pub use composition::{Composition, CompositionEvent, TransportState};
pub use error::{CompositionError, Result};
pub use layer::{Instrument, Layer, LayerId, LayerKind, Sample};
pub use preview::{PreviewEvent, PreviewPlayer};
pub use replay::{ReplayEvent, ReplayPlayer};
