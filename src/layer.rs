//! Layer model and the bundled instrument catalogue.
//!
//! A layer is one addressable audio source in the composition. Mutations
//! here are plain in-place edits; notifying observers is the composition's
//! job.

use std::fmt;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::params::audio_constants::{
    DEFAULT_RETRIGGER_INTERVAL_SECS, MAX_RETRIGGER_INTERVAL_SECS,
};

/// Finite positive intervals, capped at the slowest schedulable retrigger
fn accept_interval(interval_secs: f64) -> Option<f64> {
    (interval_secs.is_finite() && interval_secs > 0.0)
        .then(|| interval_secs.min(MAX_RETRIGGER_INTERVAL_SECS))
}

/// Stable layer identity, assigned at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Instruments with bundled samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instrument {
    Drums,
    Guitar,
    Piano,
    Trumpet,
}

impl Instrument {
    pub const ALL: [Instrument; 4] = [
        Instrument::Drums,
        Instrument::Guitar,
        Instrument::Piano,
        Instrument::Trumpet,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Instrument::Drums => "Drums",
            Instrument::Guitar => "Guitar",
            Instrument::Piano => "Piano",
            Instrument::Trumpet => "Trumpet",
        }
    }

    /// Bundled samples as (display name, file name) pairs
    fn catalogue(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Instrument::Drums => &[
                ("Kick", "Kick.wav"),
                ("Hit", "Hit.wav"),
                ("Clap", "Clap.wav"),
                ("Snare", "Snare.wav"),
            ],
            Instrument::Guitar => &[
                ("#E", "G_E.wav"),
                ("#A", "G_A.wav"),
                ("#B", "G_B.wav"),
                ("#G", "G_G.wav"),
            ],
            Instrument::Piano => &[
                ("C", "P_C.wav"),
                ("A", "P_A.wav"),
                ("B", "P_B.wav"),
                ("D", "P_D.wav"),
            ],
            Instrument::Trumpet => &[
                ("Db/C#", "T_C.wav"),
                ("F", "T_F.wav"),
                ("G", "T_G.wav"),
                ("Ab/G#", "T_A.wav"),
            ],
        }
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.catalogue()
            .iter()
            .map(|(name, file)| Sample::new(*name, *self, Some(PathBuf::from(file))))
            .collect()
    }

    /// Look up a bundled sample by display name (case-insensitive)
    pub fn sample(&self, name: &str) -> Option<Sample> {
        self.samples()
            .into_iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Parse an instrument from its display name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|i| i.name().eq_ignore_ascii_case(name))
    }
}

/// A playable sample belonging to an instrument
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub instrument: Instrument,

    /// File name relative to the samples directory (absolute paths are used as-is)
    pub file: Option<PathBuf>,
}

impl Sample {
    pub fn new(name: impl Into<String>, instrument: Instrument, file: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            instrument,
            file,
        }
    }

    /// Resolve the sample file against the samples directory
    pub fn resolve(&self, samples_dir: &Path) -> Option<PathBuf> {
        self.file.as_ref().map(|f| samples_dir.join(f))
    }
}

impl Default for Sample {
    /// First drum sample (Kick)
    fn default() -> Self {
        Instrument::Drums
            .samples()
            .into_iter()
            .next()
            .unwrap_or_else(|| Sample::new("", Instrument::Drums, None))
    }
}

/// What a layer plays
#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    /// Sample retriggered at a fixed interval
    Instrumental {
        sample: Sample,
        /// Seconds between retriggers
        interval_secs: f64,
        /// Node volume in [0, 1]
        volume: f32,
    },

    /// Voice recording, played once or looped
    Voice { recording: Option<PathBuf> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    id: LayerId,
    number: u32,
    kind: LayerKind,
    muted: bool,
    looping: bool,
}

impl Layer {
    pub fn new(number: u32, kind: LayerKind) -> Self {
        Self {
            id: LayerId::new(),
            number,
            kind,
            muted: false,
            looping: false,
        }
    }

    /// Unusable intervals fall back to the default; volume is clamped to [0, 1]
    pub fn instrumental(number: u32, sample: Sample, interval_secs: f64, volume: f32) -> Self {
        Self::new(
            number,
            LayerKind::Instrumental {
                sample,
                interval_secs: accept_interval(interval_secs)
                    .unwrap_or(DEFAULT_RETRIGGER_INTERVAL_SECS),
                volume: if volume.is_finite() {
                    volume.clamp(0.0, 1.0)
                } else {
                    0.0
                },
            },
        )
    }

    pub fn voice(number: u32, recording: Option<PathBuf>) -> Self {
        Self::new(number, LayerKind::Voice { recording })
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn is_voice(&self) -> bool {
        matches!(self.kind, LayerKind::Voice { .. })
    }

    /// Node volume before muting: the instrumental volume, full scale for voice
    pub fn volume(&self) -> f32 {
        match &self.kind {
            LayerKind::Instrumental { volume, .. } => *volume,
            LayerKind::Voice { .. } => 1.0,
        }
    }

    /// Gain the playback node should apply right now
    pub fn effective_gain(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume()
        }
    }

    /// Retrigger rate for instrumental layers
    pub fn bpm(&self) -> Option<f64> {
        match &self.kind {
            LayerKind::Instrumental { interval_secs, .. } if *interval_secs > 0.0 => {
                Some(60.0 / interval_secs)
            }
            _ => None,
        }
    }

    pub fn display_name(&self) -> String {
        match &self.kind {
            LayerKind::Instrumental { sample, .. } => {
                format!("{} – {}", sample.instrument.name(), sample.name)
            }
            LayerKind::Voice { .. } => "Recording".to_string(),
        }
    }

    /// Replace any of sample, interval, volume; returns false for voice layers
    pub fn update_sample(
        &mut self,
        new_sample: Option<Sample>,
        new_interval: Option<f64>,
        new_volume: Option<f32>,
    ) -> bool {
        let LayerKind::Instrumental {
            sample,
            interval_secs,
            volume,
        } = &mut self.kind
        else {
            return false;
        };

        if let Some(s) = new_sample {
            *sample = s;
        }
        if let Some(i) = new_interval.and_then(accept_interval) {
            *interval_secs = i;
        }
        if let Some(v) = new_volume.filter(|v| v.is_finite()) {
            *volume = v.clamp(0.0, 1.0);
        }
        true
    }

    /// Point a voice layer at a new recording; returns false for instrumental layers
    pub fn update_recording(&mut self, path: PathBuf) -> bool {
        match &mut self.kind {
            LayerKind::Voice { recording } => {
                *recording = Some(path);
                true
            }
            LayerKind::Instrumental { .. } => false,
        }
    }

    pub fn toggle_mute(&mut self) {
        self.muted = !self.muted;
    }

    pub fn toggle_loop(&mut self) {
        self.looping = !self.looping;
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} • {}", self.number, self.display_name())
    }
}
