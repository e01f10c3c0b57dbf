//! Audition of a single sample while its layer is being configured.
//!
//! The preview runs its own mix graph holding one retriggering layer, so it
//! can sound while the composition is stopped and never touches the mix.

use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::audio::MixGraph;
use crate::error::Result;
use crate::layer::{Layer, LayerKind, Sample};
use crate::params::audio_constants::{PREVIEW_MAX_BPM, PREVIEW_MIN_BPM};
use crate::params::{AnalyzerConfig, EngineConfig, LayerDefaults};

#[derive(Debug, Clone, PartialEq)]
pub enum PreviewEvent {
    /// The sample was (re)started; carries the interval in effect
    Played { interval_secs: f64 },
}

/// Retrigger interval for a position on the tempo control
///
/// `0.0` is 60 BPM and `1.0` is 180 BPM; out-of-range input is clamped and
/// NaN is rejected.
pub fn interval_for_bpm_fraction(fraction: f64) -> Option<f64> {
    if fraction.is_nan() {
        return None;
    }
    let bpm = PREVIEW_MIN_BPM + (PREVIEW_MAX_BPM - PREVIEW_MIN_BPM) * fraction.clamp(0.0, 1.0);
    Some(60.0 / bpm)
}

/// Volume for a position on the level control (linear, clamped to [0, 1])
pub fn volume_for_fraction(fraction: f64) -> Option<f32> {
    (!fraction.is_nan()).then(|| fraction.clamp(0.0, 1.0) as f32)
}

/// Plays one sample on a repeating interval, reporting every retrigger
pub struct PreviewPlayer {
    graph: MixGraph,
    engine: EngineConfig,
    layer: Layer,
    playing: bool,
    triggers_seen: u64,
    pending: Vec<PreviewEvent>,
}

impl PreviewPlayer {
    pub fn new(engine: EngineConfig, samples_dir: PathBuf, defaults: &LayerDefaults) -> Result<Self> {
        engine.validate()?;
        let graph = MixGraph::new(engine.clone(), AnalyzerConfig::default(), samples_dir)?;
        let layer = Layer::instrumental(
            1,
            Sample::default(),
            defaults.retrigger_interval_secs,
            defaults.volume,
        );
        Ok(Self {
            graph,
            engine,
            layer,
            playing: false,
            triggers_seen: 0,
            pending: Vec::new(),
        })
    }

    pub fn layer(&self) -> &Layer {
        &self.layer
    }

    pub fn interval_secs(&self) -> f64 {
        match self.layer.kind() {
            LayerKind::Instrumental { interval_secs, .. } => *interval_secs,
            LayerKind::Voice { .. } => 60.0 / PREVIEW_MIN_BPM,
        }
    }

    pub fn volume(&self) -> f32 {
        self.layer.volume()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Swap the sample; while playing, the new one takes the next tick
    pub fn set_sample(&mut self, sample: Sample) {
        self.collect();
        self.layer.update_sample(Some(sample), None, None);
        if !self.playing {
            return;
        }

        let delay = self.until_next_tick(self.retrigger_interval());
        self.graph.attach_layer_after(&self.layer, delay);
        self.triggers_seen = 0;
        debug!(sample = %self.layer.display_name(), ?delay, "Preview sample swapped");
    }

    /// Set the interval directly; while playing, the next retrigger follows
    /// the new interval from the last one
    pub fn set_interval(&mut self, interval_secs: f64) {
        if !self.change_interval(interval_secs) || !self.playing {
            return;
        }
        let interval = self.retrigger_interval();
        self.graph
            .retime_layer(self.layer.id(), interval_secs, self.until_next_tick(interval));
    }

    /// Map the tempo control onto 60-180 BPM
    ///
    /// While playing, the loop restarts on the new interval without an extra
    /// trigger, unless the new interval has already elapsed since the last
    /// one, in which case it fires straight away.
    pub fn set_bpm_fraction(&mut self, fraction: f64) {
        let Some(interval_secs) = interval_for_bpm_fraction(fraction) else {
            return;
        };
        if !self.change_interval(interval_secs) || !self.playing {
            return;
        }

        let interval = self.retrigger_interval();
        let overdue = self.until_next_tick(interval).is_zero();
        let first_after = if overdue { Duration::ZERO } else { interval };
        self.graph
            .retime_layer(self.layer.id(), self.interval_secs(), first_after);
    }

    pub fn set_volume_fraction(&mut self, fraction: f64) {
        if let Some(volume) = volume_for_fraction(fraction) {
            self.set_volume(volume);
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.layer.update_sample(None, None, Some(volume));
        self.graph.set_volume(self.layer.id(), self.layer.volume());
    }

    /// Start (or restart) the loop, sounding immediately
    pub fn play(&mut self) -> Result<()> {
        self.collect();
        self.graph.start(std::slice::from_ref(&self.layer), false)?;
        self.triggers_seen = 0;
        self.playing = true;
        info!(sample = %self.layer.display_name(), interval = self.interval_secs(), "Preview started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.playing {
            return;
        }
        self.collect();
        self.graph.stop();
        self.playing = false;
        info!("Preview stopped");
    }

    /// Retriggers since the last poll
    pub fn poll(&mut self) -> Vec<PreviewEvent> {
        self.collect();
        std::mem::take(&mut self.pending)
    }

    /// Offline mode: run `delta` of virtual time, then poll
    pub fn advance(&mut self, delta: Duration) -> Vec<PreviewEvent> {
        self.graph.advance(delta);
        self.poll()
    }

    fn change_interval(&mut self, interval_secs: f64) -> bool {
        if interval_secs == self.interval_secs() {
            return false;
        }
        self.collect();
        self.layer.update_sample(None, Some(interval_secs), None)
    }

    fn retrigger_interval(&self) -> Duration {
        self.engine.retrigger_interval(self.interval_secs())
    }

    /// Time left until `interval` has passed since the last trigger
    fn until_next_tick(&self, interval: Duration) -> Duration {
        self.graph
            .node_status(self.layer.id())
            .and_then(|s| s.last_trigger)
            .map_or(Duration::ZERO, |last| {
                (last + interval).saturating_sub(self.graph.now())
            })
    }

    fn collect(&mut self) {
        let triggers = self
            .graph
            .node_status(self.layer.id())
            .map_or(0, |s| s.triggers);
        let interval_secs = self.interval_secs();
        for _ in self.triggers_seen..triggers {
            self.pending.push(PreviewEvent::Played { interval_secs });
        }
        self.triggers_seen = triggers;
    }
}
