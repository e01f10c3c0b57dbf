//! Command-line argument parsing.

use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::layer::{Instrument, Sample};
use crate::params::{CompositionConfig, EngineConfig, RecordingConfig, StreamFormat};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "layerloop")]
#[command(about = "Layered loop composer with a live spectrum", long_about = None)]
pub struct Args {
    /// Directory holding the bundled instrument samples
    #[arg(long, value_name = "DIR", default_value = "samples")]
    pub samples_dir: PathBuf,

    /// Instrumental layer, e.g. `drums:kick:0.5:0.8` (repeatable; the first
    /// replaces the default layer)
    #[arg(long = "layer", value_name = "INSTR:SAMPLE[:INTERVAL[:VOLUME]]")]
    pub layers: Vec<LayerArg>,

    /// Voice layer playing a recording, `:loop` to repeat it (repeatable)
    #[arg(long = "voice", value_name = "FILE[:loop]")]
    pub voices: Vec<VoiceArg>,

    /// How long to play (seconds)
    #[arg(long, value_name = "SECONDS", default_value = "8")]
    pub seconds: f32,

    /// Record the mix to a WAV file in the output directory
    #[arg(long)]
    pub record: bool,

    /// Where recordings are written
    #[arg(long, value_name = "DIR", default_value = "recordings")]
    pub output_dir: PathBuf,

    /// Audition the active layer's sample instead of playing the mix
    #[arg(long, conflicts_with = "record")]
    pub preview: bool,

    /// Render in virtual time without an audio device
    #[arg(long)]
    pub offline: bool,

    /// Play back a finished recording instead of composing
    #[arg(long, value_name = "FILE")]
    pub replay: Option<PathBuf>,
}

impl Args {
    /// Build the composition configuration from the flags
    pub fn composition_config(&self) -> CompositionConfig {
        CompositionConfig {
            engine: self.engine_config(),
            recording: RecordingConfig::new(&self.output_dir),
            ..CompositionConfig::default()
        }
        .with_samples_dir(&self.samples_dir)
    }

    pub fn engine_config(&self) -> EngineConfig {
        if self.offline {
            EngineConfig::offline(StreamFormat::default())
        } else {
            EngineConfig::default()
        }
    }

    /// Run length; negative or non-finite values mean zero
    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f32(self.seconds).unwrap_or(Duration::ZERO)
    }
}

/// `--layer` value: a catalogue sample plus optional interval and volume
#[derive(Debug, Clone, PartialEq)]
pub struct LayerArg {
    pub sample: Sample,
    pub interval_secs: Option<f64>,
    pub volume: Option<f32>,
}

impl FromStr for LayerArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let instrument_name = parts.next().unwrap_or_default();
        let instrument = Instrument::from_name(instrument_name)
            .ok_or_else(|| format!("unknown instrument '{}'", instrument_name))?;

        let sample_name = parts
            .next()
            .ok_or_else(|| format!("missing sample for {}", instrument.name()))?;
        let sample = instrument.sample(sample_name).ok_or_else(|| {
            let known: Vec<String> = instrument.samples().into_iter().map(|s| s.name).collect();
            format!(
                "unknown {} sample '{}' (one of: {})",
                instrument.name(),
                sample_name,
                known.join(", ")
            )
        })?;

        let interval_secs = parts
            .next()
            .map(|v| {
                v.parse::<f64>()
                    .ok()
                    .filter(|i| i.is_finite() && *i > 0.0)
                    .ok_or_else(|| format!("invalid interval '{}'", v))
            })
            .transpose()?;
        let volume = parts
            .next()
            .map(|v| {
                v.parse::<f32>()
                    .ok()
                    .filter(|x| (0.0..=1.0).contains(x))
                    .ok_or_else(|| format!("invalid volume '{}'", v))
            })
            .transpose()?;

        if parts.next().is_some() {
            return Err(format!("too many fields in '{}'", s));
        }

        Ok(Self {
            sample,
            interval_secs,
            volume,
        })
    }
}

/// `--voice` value: a recording path, optionally looping
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceArg {
    pub path: PathBuf,
    pub looping: bool,
}

impl FromStr for VoiceArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, looping) = match s.strip_suffix(":loop") {
            Some(path) => (path, true),
            None => (s, false),
        };
        if path.is_empty() {
            return Err("missing recording path".to_string());
        }
        Ok(Self {
            path: PathBuf::from(path),
            looping,
        })
    }
}
