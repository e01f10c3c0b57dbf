//! Composition controller: the layer list, the active layer, transport
//! state, and event fan-out to observers.

use crossbeam_channel::{Receiver, Sender};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::{MixGraph, NodeStatus, RecordedFile, SpectrumSlot, VoiceRecorder};
use crate::error::{CompositionError, Result};
use crate::layer::{Layer, LayerId, LayerKind, Sample};
use crate::params::{CompositionConfig, StreamFormat};
use crate::preview::{self, PreviewEvent, PreviewPlayer};

/// Notifications delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum CompositionEvent {
    /// The active layer switched or its parameters changed
    ActiveLayerChanged(Option<LayerId>),

    /// Layers were added, removed, or their list state (mute/loop) changed
    LayersChanged,

    PlaybackStarted,

    /// A fresh spectrum frame is available (or the frame was cleared)
    SpectrumUpdated,

    /// A mix recording was closed and is ready at this path
    RecordFinished(PathBuf),

    /// The previewed sample was retriggered
    PreviewTriggered { interval_secs: f64 },
}

/// Whole-composition transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Idle,
    Playing,
    Recording,
}

pub struct Composition {
    config: CompositionConfig,
    layers: Vec<Layer>,
    active: Option<LayerId>,
    next_number: u32,
    graph: MixGraph,
    state: TransportState,
    recording_path: Option<PathBuf>,
    voice: Option<VoiceRecorder>,
    preview: Option<PreviewPlayer>,
    previewing: Option<LayerId>,
    spectrum: Arc<SpectrumSlot>,
    spectrum_seen: u64,
    observers: Vec<Sender<CompositionEvent>>,
}

impl Composition {
    /// Build a composition holding one default instrumental layer
    pub fn new(config: CompositionConfig) -> Result<Self> {
        config.validate()?;

        let graph = MixGraph::new(
            config.engine.clone(),
            config.analyzer.clone(),
            config.samples_dir.clone(),
        )?;
        let spectrum = graph.spectrum();

        let mut composition = Self {
            config,
            layers: Vec::new(),
            active: None,
            next_number: 1,
            graph,
            state: TransportState::Idle,
            recording_path: None,
            voice: None,
            preview: None,
            previewing: None,
            spectrum_seen: spectrum.sequence(),
            spectrum,
            observers: Vec::new(),
        };
        composition.add_instrumental_layer(None);
        Ok(composition)
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&mut self) -> Receiver<CompositionEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.observers.push(tx);
        rx
    }

    fn emit(&mut self, event: CompositionEvent) {
        debug!(?event, "Composition event");
        self.observers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ========================================================================
    // Read-only state
    // ========================================================================

    /// Layers in insertion (display and playback) order
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id() == id)
    }

    pub fn active_layer_id(&self) -> Option<LayerId> {
        self.active
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.active.and_then(|id| self.layer(id))
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.graph.is_running()
    }

    pub fn is_recording(&self) -> bool {
        self.state == TransportState::Recording
    }

    pub fn is_capturing_voice(&self) -> bool {
        self.voice.is_some()
    }

    /// Layer whose sample is being auditioned, if any
    pub fn previewing(&self) -> Option<LayerId> {
        self.previewing
    }

    /// True while the layer is being previewed or its recording is sounding
    /// in the mix
    pub fn is_layer_playing(&self, id: LayerId) -> bool {
        self.previewing == Some(id) || self.graph.node_status(id).is_some_and(|s| s.sounding)
    }

    pub fn layer_status(&self, id: LayerId) -> Option<NodeStatus> {
        self.graph.node_status(id)
    }

    /// Current spectrum frame (`bar_count` values)
    pub fn spectrum(&self) -> Vec<f32> {
        self.spectrum.latest()
    }

    pub fn format(&self) -> StreamFormat {
        self.graph.format()
    }

    pub fn config(&self) -> &CompositionConfig {
        &self.config
    }

    /// Frames captured so far by the open mix recording
    pub fn recorded_frames(&self) -> Option<u64> {
        self.graph.recorded_frames()
    }

    // ========================================================================
    // Layer commands
    // ========================================================================

    /// Add an instrumental layer (default: first drum sample) and make it active
    pub fn add_instrumental_layer(&mut self, sample: Option<Sample>) -> LayerId {
        let defaults = &self.config.layer_defaults;
        let layer = Layer::instrumental(
            self.next_number,
            sample.unwrap_or_default(),
            defaults.retrigger_interval_secs,
            defaults.volume,
        );
        self.push_layer(layer)
    }

    /// Add an empty voice layer and make it active
    pub fn add_vocal_layer(&mut self) -> LayerId {
        let layer = Layer::voice(self.next_number, None);
        self.push_layer(layer)
    }

    fn push_layer(&mut self, layer: Layer) -> LayerId {
        let id = layer.id();
        info!(layer = %id, number = layer.number(), name = %layer.display_name(), "Layer added");

        self.next_number += 1;
        self.graph.attach_layer(&layer);
        self.layers.push(layer);
        self.active = Some(id);

        self.emit(CompositionEvent::ActiveLayerChanged(Some(id)));
        self.emit(CompositionEvent::LayersChanged);
        id
    }

    pub fn set_active_layer(&mut self, id: LayerId) {
        if self.layer(id).is_none() {
            return;
        }
        if self.previewing != Some(id) {
            self.stop_preview();
        }
        self.active = Some(id);
        self.emit(CompositionEvent::ActiveLayerChanged(Some(id)));
        self.emit(CompositionEvent::LayersChanged);
    }

    /// Change the active instrumental layer; no-op on voice layers
    pub fn update_active_sample(
        &mut self,
        sample: Option<Sample>,
        interval_secs: Option<f64>,
        volume: Option<f32>,
    ) {
        let Some(index) = self.active_index() else {
            return;
        };
        if !self.layers[index].update_sample(sample.clone(), interval_secs, volume) {
            return;
        }
        self.graph.update_layer(&self.layers[index]);

        let settings = match self.layers[index].kind() {
            LayerKind::Instrumental {
                interval_secs,
                volume,
                ..
            } => Some((*interval_secs, *volume)),
            LayerKind::Voice { .. } => None,
        };
        if let (Some(player), Some((interval_secs, volume))) = (self.active_preview(), settings) {
            if let Some(sample) = sample {
                player.set_sample(sample);
            }
            player.set_interval(interval_secs);
            player.set_volume(volume);
        }
        self.emit(CompositionEvent::ActiveLayerChanged(self.active));
    }

    /// Set the active layer's tempo from a 60-180 BPM control position
    pub fn set_active_bpm_fraction(&mut self, fraction: f64) {
        let Some(interval_secs) = preview::interval_for_bpm_fraction(fraction) else {
            return;
        };
        // Lets a running preview decide whether the new tempo fires at once
        if let Some(player) = self.active_preview() {
            player.set_bpm_fraction(fraction);
        }
        self.update_active_sample(None, Some(interval_secs), None);
    }

    pub fn set_active_volume_fraction(&mut self, fraction: f64) {
        if let Some(volume) = preview::volume_for_fraction(fraction) {
            self.update_active_sample(None, None, Some(volume));
        }
    }

    /// Point the active voice layer at a recording; no-op on instrumental layers
    pub fn update_active_recording(&mut self, path: PathBuf) {
        let Some(index) = self.active_index() else {
            return;
        };
        if !self.layers[index].update_recording(path) {
            return;
        }
        self.graph.update_layer(&self.layers[index]);
        self.emit(CompositionEvent::ActiveLayerChanged(self.active));
    }

    /// Remove a layer; removing the last one recreates a default layer
    pub fn delete_layer(&mut self, id: LayerId) {
        let Some(index) = self.index_of(id) else {
            return;
        };

        if self.previewing == Some(id) {
            self.stop_preview();
        }
        self.graph.detach_layer(id);
        self.layers.remove(index);
        info!(layer = %id, "Layer deleted");

        if self.layers.is_empty() {
            self.next_number = 1;
            self.active = None;
            // Emits the active/list change for the fresh layer
            self.add_instrumental_layer(None);
            return;
        }

        if self.active == Some(id) {
            self.active = self.layers.first().map(|l| l.id());
            self.emit(CompositionEvent::ActiveLayerChanged(self.active));
        }
        self.emit(CompositionEvent::LayersChanged);
    }

    pub fn toggle_mute(&mut self, id: LayerId) {
        let Some(index) = self.index_of(id) else {
            return;
        };
        self.layers[index].toggle_mute();
        self.graph.set_mute(id, self.layers[index].is_muted());
        self.emit_layer_state_changed(id);
    }

    pub fn toggle_loop(&mut self, id: LayerId) {
        let Some(index) = self.index_of(id) else {
            return;
        };
        self.layers[index].toggle_loop();
        self.graph.set_looping(id, self.layers[index].is_looping());
        self.emit_layer_state_changed(id);
    }

    fn emit_layer_state_changed(&mut self, id: LayerId) {
        if self.active == Some(id) {
            self.emit(CompositionEvent::ActiveLayerChanged(Some(id)));
        }
        self.emit(CompositionEvent::LayersChanged);
    }

    fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id() == id)
    }

    fn active_index(&self) -> Option<usize> {
        self.active.and_then(|id| self.index_of(id))
    }

    fn active_preview(&mut self) -> Option<&mut PreviewPlayer> {
        if self.previewing.is_none() || self.previewing != self.active {
            return None;
        }
        self.preview.as_mut()
    }

    // ========================================================================
    // Sample preview
    // ========================================================================

    /// Audition the active instrumental layer's sample on its own interval
    ///
    /// Runs independently of the mix transport. No-op for voice layers.
    pub fn start_preview(&mut self) -> Result<()> {
        let Some(layer) = self.active_layer().filter(|l| !l.is_voice()).cloned() else {
            return Ok(());
        };
        let LayerKind::Instrumental {
            sample,
            interval_secs,
            volume,
        } = layer.kind().clone()
        else {
            return Ok(());
        };

        let player = match self.preview.take() {
            Some(player) => player,
            None => PreviewPlayer::new(
                self.config.engine.clone(),
                self.config.samples_dir.clone(),
                &self.config.layer_defaults,
            )?,
        };
        let player = self.preview.insert(player);
        player.set_sample(sample);
        player.set_interval(interval_secs);
        player.set_volume(volume);
        player.play()?;

        self.previewing = Some(layer.id());
        self.emit(CompositionEvent::LayersChanged);
        Ok(())
    }

    pub fn stop_preview(&mut self) {
        if self.previewing.take().is_none() {
            return;
        }
        if let Some(player) = self.preview.as_mut() {
            player.stop();
        }
        let events = self.preview.as_mut().map(PreviewPlayer::poll);
        self.emit_preview_events(events.unwrap_or_default());
        self.emit(CompositionEvent::LayersChanged);
    }

    fn emit_preview_events(&mut self, events: Vec<PreviewEvent>) {
        for PreviewEvent::Played { interval_secs } in events {
            self.emit(CompositionEvent::PreviewTriggered { interval_secs });
        }
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Start the mix with live analysis; no-op if already running
    pub fn play(&mut self) -> Result<()> {
        if self.state != TransportState::Idle {
            return Ok(());
        }
        self.graph.start(&self.layers, true)?;
        self.state = TransportState::Playing;
        self.emit(CompositionEvent::PlaybackStarted);
        Ok(())
    }

    /// Stop playback (and any open recording)
    pub fn stop(&mut self) {
        match self.state {
            TransportState::Idle => {}
            TransportState::Recording => {
                self.stop_record();
            }
            TransportState::Playing => {
                self.graph.stop();
                self.state = TransportState::Idle;
                self.clear_spectrum();
            }
        }
    }

    /// Restart the mix while recording it to a new WAV file
    pub fn record(&mut self) -> Result<PathBuf> {
        if self.state == TransportState::Recording {
            self.stop_record();
        }

        let dir = self.config.recording.output_dir.clone();
        std::fs::create_dir_all(&dir)
            .map_err(|source| CompositionError::NoWritableDestination { path: dir, source })?;

        let unix_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let path = self.config.recording.composition_path(unix_secs);

        if let Err(e) = self.graph.start_recording(&self.layers, &path) {
            self.state = TransportState::Idle;
            return Err(e);
        }

        info!(path = %path.display(), "Recording composition");
        self.state = TransportState::Recording;
        self.recording_path = Some(path.clone());
        self.emit(CompositionEvent::PlaybackStarted);
        Ok(path)
    }

    /// Stop playback and close the recording; returns its location
    pub fn stop_record(&mut self) -> Option<PathBuf> {
        if self.state != TransportState::Recording {
            return None;
        }

        let recorded: Option<RecordedFile> = self.graph.stop();
        self.state = TransportState::Idle;
        self.clear_spectrum();

        let path = self.recording_path.take()?;
        if let Some(recorded) = recorded {
            info!(
                path = %recorded.path.display(),
                seconds = recorded.duration().as_secs_f64(),
                "Recording finished"
            );
        }
        self.emit(CompositionEvent::RecordFinished(path.clone()));
        Some(path)
    }

    fn clear_spectrum(&mut self) {
        self.spectrum.clear();
        self.spectrum_seen = self.spectrum.sequence();
        self.emit(CompositionEvent::SpectrumUpdated);
    }

    // ========================================================================
    // Voice capture
    // ========================================================================

    /// Start capturing the microphone for the active voice layer
    pub fn start_voice_capture(&mut self) -> Result<PathBuf> {
        if let Some(recorder) = self.voice.take() {
            warn!("Voice capture restarted, previous take discarded");
            let _ = recorder.finish();
        }

        let dir = self.config.recording.output_dir.clone();
        std::fs::create_dir_all(&dir)
            .map_err(|source| CompositionError::NoWritableDestination { path: dir, source })?;

        let path = self.config.recording.voice_path(Uuid::new_v4());
        self.voice = Some(VoiceRecorder::start(&path)?);
        Ok(path)
    }

    /// Finish the capture and attach it to the active voice layer
    pub fn finish_voice_capture(&mut self) -> Result<Option<PathBuf>> {
        let Some(recorder) = self.voice.take() else {
            return Ok(None);
        };
        let recorded = recorder.finish()?;
        self.update_active_recording(recorded.path.clone());
        Ok(Some(recorded.path))
    }

    // ========================================================================
    // Main-context pumping
    // ========================================================================

    /// Publish preview retriggers, and a `SpectrumUpdated` event if the tap
    /// produced a new frame; returns whether the spectrum changed
    pub fn pump(&mut self) -> bool {
        let events = self.preview.as_mut().map(PreviewPlayer::poll);
        self.emit_preview_events(events.unwrap_or_default());
        let sequence = self.spectrum.sequence();
        if sequence == self.spectrum_seen {
            return false;
        }
        self.spectrum_seen = sequence;
        self.emit(CompositionEvent::SpectrumUpdated);
        true
    }

    /// Offline mode: render and schedule `delta` of virtual time, then pump
    pub fn advance(&mut self, delta: Duration) -> u64 {
        let frames = self.graph.advance(delta);
        let events = self.preview.as_mut().map(|p| p.advance(delta));
        self.emit_preview_events(events.unwrap_or_default());
        self.pump();
        frames
    }
}

impl Drop for Composition {
    fn drop(&mut self) {
        if let Some(recorder) = self.voice.take() {
            let _ = recorder.finish();
        }
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::Instrument;
    use crate::params::EngineConfig;

    fn offline() -> Composition {
        let config = CompositionConfig {
            engine: EngineConfig::offline(StreamFormat {
                sample_rate: 8000,
                channels: 1,
            }),
            ..CompositionConfig::default()
        };
        Composition::new(config).unwrap()
    }

    fn drain(rx: &Receiver<CompositionEvent>) -> Vec<CompositionEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn test_starts_with_default_layer() {
        let composition = offline();
        assert_eq!(composition.layers().len(), 1);

        let layer = &composition.layers()[0];
        assert_eq!(layer.number(), 1);
        assert_eq!(layer.display_name(), "Drums – Kick");
        assert_eq!(composition.active_layer_id(), Some(layer.id()));
        assert_eq!(composition.state(), TransportState::Idle);
    }

    #[test]
    fn test_add_layer_becomes_active_and_notifies() {
        let mut composition = offline();
        let rx = composition.subscribe();

        let id = composition.add_vocal_layer();
        assert_eq!(composition.active_layer_id(), Some(id));
        assert_eq!(composition.layer(id).unwrap().number(), 2);
        assert_eq!(
            drain(&rx),
            vec![
                CompositionEvent::ActiveLayerChanged(Some(id)),
                CompositionEvent::LayersChanged
            ]
        );
    }

    #[test]
    fn test_delete_last_layer_recreates_default() {
        let mut composition = offline();
        composition.add_vocal_layer();
        let ids: Vec<_> = composition.layers().iter().map(|l| l.id()).collect();

        for id in ids {
            composition.delete_layer(id);
            assert!(!composition.layers().is_empty());
        }

        assert_eq!(composition.layers().len(), 1);
        let fresh = &composition.layers()[0];
        assert_eq!(fresh.number(), 1);
        assert_eq!(composition.active_layer_id(), Some(fresh.id()));
    }

    #[test]
    fn test_delete_active_reassigns_to_first() {
        let mut composition = offline();
        let first = composition.layers()[0].id();
        let second = composition.add_vocal_layer();

        composition.delete_layer(second);
        assert_eq!(composition.active_layer_id(), Some(first));

        // Numbers are not reused while layers remain
        let third = composition.add_vocal_layer();
        assert_eq!(composition.layer(third).unwrap().number(), 3);
    }

    #[test]
    fn test_unknown_ids_are_noops() {
        let mut composition = offline();
        let rx = composition.subscribe();
        let ghost = LayerId::new();

        composition.set_active_layer(ghost);
        composition.delete_layer(ghost);
        composition.toggle_mute(ghost);
        composition.toggle_loop(ghost);

        assert!(drain(&rx).is_empty());
        assert_eq!(composition.layers().len(), 1);
    }

    #[test]
    fn test_update_kind_mismatch_is_noop() {
        let mut composition = offline();
        composition.add_vocal_layer();
        let rx = composition.subscribe();

        composition.update_active_sample(Instrument::Piano.sample("C"), Some(1.0), None);
        assert!(drain(&rx).is_empty());
        assert!(matches!(
            composition.active_layer().unwrap().kind(),
            LayerKind::Voice { recording: None }
        ));
    }

    #[test]
    fn test_toggle_mute_restores_gain() {
        let mut composition = offline();
        let id = composition.layers()[0].id();
        composition.advance(Duration::ZERO);
        let before = composition.layer_status(id).unwrap().gain;

        composition.toggle_mute(id);
        assert_eq!(composition.layer_status(id).unwrap().gain, 0.0);
        assert!(composition.layer(id).unwrap().is_muted());

        composition.toggle_mute(id);
        assert_eq!(composition.layer_status(id).unwrap().gain, before);
        assert!(!composition.layer(id).unwrap().is_muted());
    }

    #[test]
    fn test_play_and_stop_are_idempotent() {
        let mut composition = offline();
        let rx = composition.subscribe();

        composition.play().unwrap();
        composition.play().unwrap();
        assert!(composition.is_playing());
        assert_eq!(drain(&rx), vec![CompositionEvent::PlaybackStarted]);

        composition.stop();
        composition.stop();
        assert!(!composition.is_playing());
        assert_eq!(drain(&rx), vec![CompositionEvent::SpectrumUpdated]);
        assert!(composition.spectrum().iter().all(|b| *b == 0.0));
    }

    #[test]
    fn test_stop_record_without_recording() {
        let mut composition = offline();
        let rx = composition.subscribe();
        assert_eq!(composition.stop_record(), None);
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_finish_voice_capture_without_capture() {
        let mut composition = offline();
        assert!(!composition.is_capturing_voice());
        assert_eq!(composition.finish_voice_capture().unwrap(), None);
        assert!(!composition.is_capturing_voice());
    }

    #[test]
    fn test_preview_ignores_voice_layers() {
        let mut composition = offline();
        let voice = composition.add_vocal_layer();
        let rx = composition.subscribe();

        composition.start_preview().unwrap();
        assert_eq!(composition.previewing(), None);
        assert!(!composition.is_layer_playing(voice));
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_control_fractions_update_active_layer() {
        let mut composition = offline();
        composition.set_active_bpm_fraction(1.0);
        composition.set_active_volume_fraction(0.75);

        let layer = composition.active_layer().unwrap();
        assert!((layer.bpm().unwrap() - 180.0).abs() < 1e-9);
        assert_eq!(layer.volume(), 0.75);

        composition.set_active_bpm_fraction(f64::NAN);
        assert!((composition.active_layer().unwrap().bpm().unwrap() - 180.0).abs() < 1e-9);
    }
}
