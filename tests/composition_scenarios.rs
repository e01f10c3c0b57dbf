//! End-to-end composition scenarios in offline (virtual-time) mode.

use std::path::{Path, PathBuf};
use std::time::Duration;

use approx::assert_abs_diff_eq;
use crossbeam_channel::Receiver;
use layerloop::params::{CompositionConfig, EngineConfig, RecordingConfig, StreamFormat};
use layerloop::{Composition, CompositionEvent, Instrument, LayerId, TransportState};
use tempfile::TempDir;

const FORMAT: StreamFormat = StreamFormat {
    sample_rate: 8000,
    channels: 1,
};

fn write_tone(path: &Path, seconds: f32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: FORMAT.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (seconds * FORMAT.sample_rate as f32).round() as usize;
    for i in 0..frames {
        let phase = i as f32 * 440.0 / FORMAT.sample_rate as f32;
        let value = (phase * std::f32::consts::TAU).sin() * 0.5;
        writer.write_sample((value * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

struct Studio {
    dir: TempDir,
    composition: Composition,
}

impl Studio {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let samples = dir.path().join("samples");
        std::fs::create_dir_all(&samples).unwrap();
        for sample in Instrument::Drums.samples() {
            write_tone(&samples.join(sample.file.unwrap()), 0.1);
        }

        let config = CompositionConfig {
            engine: EngineConfig::offline(FORMAT),
            recording: RecordingConfig::new(dir.path().join("recordings")),
            ..CompositionConfig::default()
        }
        .with_samples_dir(&samples);

        let composition = Composition::new(config).unwrap();
        Self { dir, composition }
    }

    fn voice_take(&self, name: &str, seconds: f32) -> PathBuf {
        let path = self.dir.path().join(name);
        write_tone(&path, seconds);
        path
    }

    /// Add a voice layer playing a fresh take
    fn add_voice(&mut self, seconds: f32, looping: bool) -> LayerId {
        let take = self.voice_take("take.wav", seconds);
        let id = self.composition.add_vocal_layer();
        self.composition.update_active_recording(take);
        if looping {
            self.composition.toggle_loop(id);
        }
        id
    }

    fn default_layer(&self) -> LayerId {
        self.composition.layers()[0].id()
    }

    fn triggers(&self, id: LayerId) -> u64 {
        self.composition.layer_status(id).unwrap().triggers
    }
}

fn drain(rx: &Receiver<CompositionEvent>) -> Vec<CompositionEvent> {
    rx.try_iter().collect()
}

#[test]
fn test_instrumental_layer_retriggers_on_interval() {
    let mut studio = Studio::new();
    let kick = studio.default_layer();

    studio.composition.play().unwrap();
    studio.composition.advance(Duration::from_millis(1200));

    // Initial trigger at 0.0, then 0.5 and 1.0
    assert_eq!(studio.triggers(kick), 3);
    assert!(studio.composition.layer_status(kick).unwrap().has_source);
}

#[test]
fn test_interval_change_applies_on_rebuild() {
    let mut studio = Studio::new();
    studio.composition.play().unwrap();
    studio.composition.advance(Duration::from_millis(600));

    studio
        .composition
        .update_active_sample(Instrument::Drums.sample("Snare"), Some(0.25), None);
    let id = studio.composition.active_layer_id().unwrap();
    studio.composition.advance(Duration::from_millis(600));

    // Fresh node at 0.6: triggers at 0.6, 0.85, 1.1
    assert_eq!(studio.triggers(id), 3);
    assert_eq!(
        studio.composition.active_layer().unwrap().display_name(),
        "Drums – Snare"
    );
}

#[test]
fn test_looping_voice_repeats_at_natural_length() {
    let mut studio = Studio::new();
    let voice = studio.add_voice(2.0, true);

    studio.composition.play().unwrap();
    studio.composition.advance(Duration::from_secs(5));

    assert_eq!(studio.triggers(voice), 3);
    assert!(studio.composition.is_layer_playing(voice));
}

#[test]
fn test_one_shot_voice_plays_once() {
    let mut studio = Studio::new();
    let voice = studio.add_voice(2.0, false);

    studio.composition.play().unwrap();
    studio.composition.advance(Duration::from_secs(1));
    assert!(studio.composition.is_layer_playing(voice));

    studio.composition.advance(Duration::from_secs(4));
    assert_eq!(studio.triggers(voice), 1);
    assert!(!studio.composition.is_layer_playing(voice));
}

#[test]
fn test_enabling_loop_restarts_finished_voice() {
    let mut studio = Studio::new();
    let voice = studio.add_voice(1.0, false);

    studio.composition.play().unwrap();
    studio.composition.advance(Duration::from_millis(1500));
    assert!(!studio.composition.is_layer_playing(voice));

    studio.composition.toggle_loop(voice);
    studio.composition.advance(Duration::from_millis(100));
    assert!(studio.composition.is_layer_playing(voice));
    assert_eq!(studio.triggers(voice), 2);

    // Disabling lets the current cycle finish without another
    studio.composition.toggle_loop(voice);
    studio.composition.advance(Duration::from_secs(2));
    assert!(!studio.composition.is_layer_playing(voice));
    assert_eq!(studio.triggers(voice), 2);
}

#[test]
fn test_voice_without_recording_is_silent() {
    let mut studio = Studio::new();
    let voice = studio.composition.add_vocal_layer();

    studio.composition.play().unwrap();
    studio.composition.advance(Duration::from_secs(1));

    let status = studio.composition.layer_status(voice).unwrap();
    assert!(status.loaded);
    assert!(!status.has_source);
    assert!(!studio.composition.is_layer_playing(voice));
}

#[test]
fn test_layer_added_during_playback_starts() {
    let mut studio = Studio::new();
    studio.composition.play().unwrap();
    studio.composition.advance(Duration::from_millis(300));

    let id = studio
        .composition
        .add_instrumental_layer(Instrument::Drums.sample("Clap"));
    studio.composition.advance(Duration::from_millis(100));

    assert_eq!(studio.triggers(id), 1);
    assert_eq!(studio.composition.layers().len(), 2);
}

#[test]
fn test_deleted_layer_stops_sounding() {
    let mut studio = Studio::new();
    let voice = studio.add_voice(2.0, true);
    studio.composition.play().unwrap();
    studio.composition.advance(Duration::from_millis(500));

    studio.composition.delete_layer(voice);
    studio.composition.advance(Duration::from_secs(3));

    assert!(studio.composition.layer_status(voice).is_none());
    assert!(!studio.composition.is_layer_playing(voice));
    assert_eq!(studio.composition.layers().len(), 1);
}

#[test]
fn test_record_writes_requested_duration() {
    let mut studio = Studio::new();
    let rx = studio.composition.subscribe();

    let path = studio.composition.record().unwrap();
    assert!(studio.composition.is_recording());
    assert_eq!(studio.composition.state(), TransportState::Recording);

    studio.composition.advance(Duration::from_secs(2));
    assert_eq!(studio.composition.recorded_frames(), Some(16000));

    let saved = studio.composition.stop_record().unwrap();
    assert_eq!(saved, path);
    assert!(!studio.composition.is_playing());
    assert_eq!(studio.composition.stop_record(), None);

    let reader = hound::WavReader::open(&saved).unwrap();
    let seconds = reader.duration() as f64 / reader.spec().sample_rate as f64;
    assert_abs_diff_eq!(seconds, 2.0, epsilon = 256.0 / 8000.0);

    let events = drain(&rx);
    assert!(events.contains(&CompositionEvent::PlaybackStarted));
    assert!(events.contains(&CompositionEvent::RecordFinished(saved)));
}

#[test]
fn test_stop_while_recording_finishes_file() {
    let mut studio = Studio::new();
    let rx = studio.composition.subscribe();

    let path = studio.composition.record().unwrap();
    studio.composition.advance(Duration::from_millis(500));
    studio.composition.stop();

    assert_eq!(studio.composition.state(), TransportState::Idle);
    assert!(drain(&rx).contains(&CompositionEvent::RecordFinished(path.clone())));
    assert!(hound::WavReader::open(&path).is_ok());
}

#[test]
fn test_muted_layer_is_silent_in_mixdown() {
    let mut studio = Studio::new();
    let kick = studio.default_layer();
    studio.composition.toggle_mute(kick);

    let path = studio.composition.record().unwrap();
    studio.composition.advance(Duration::from_secs(1));
    studio.composition.stop_record();

    let peak = hound::WavReader::open(&path)
        .unwrap()
        .into_samples::<f32>()
        .map(|s| s.unwrap().abs())
        .fold(0.0f32, f32::max);
    assert_eq!(peak, 0.0);
    // Still scheduled while silent: 0.0, 0.5 and the tick landing on 1.0
    assert_eq!(studio.triggers(kick), 3);
}

#[test]
fn test_unmuted_mixdown_carries_signal() {
    let mut studio = Studio::new();
    let path = studio.composition.record().unwrap();
    studio.composition.advance(Duration::from_secs(1));
    studio.composition.stop_record();

    let peak = hound::WavReader::open(&path)
        .unwrap()
        .into_samples::<f32>()
        .map(|s| s.unwrap().abs())
        .fold(0.0f32, f32::max);
    // 0.5 amplitude tone at the default 0.5 volume
    assert_abs_diff_eq!(peak, 0.25, epsilon = 0.01);
}

#[test]
fn test_record_without_writable_destination() {
    let mut studio = Studio::new();
    let blocker = studio.dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let mut config = studio.composition.config().clone();
    config.recording = RecordingConfig::new(blocker.join("recordings"));
    studio.composition = Composition::new(config).unwrap();

    let err = studio.composition.record().unwrap_err();
    assert_eq!(err.error_code(), "NO_WRITABLE_DESTINATION");
    assert_eq!(studio.composition.state(), TransportState::Idle);
}

#[test]
fn test_spectrum_updates_while_playing() {
    let mut studio = Studio::new();
    let rx = studio.composition.subscribe();
    studio.composition.play().unwrap();
    drain(&rx);

    studio.composition.advance(Duration::from_millis(500));
    assert!(drain(&rx).contains(&CompositionEvent::SpectrumUpdated));

    let bars = studio.composition.spectrum();
    assert_eq!(bars.len(), 40);
    assert!(bars.iter().all(|b| b.is_finite()));

    studio.composition.stop();
    assert!(studio.composition.spectrum().iter().all(|b| *b == 0.0));
}

#[test]
fn test_play_after_stop_restarts_layers() {
    let mut studio = Studio::new();
    let kick = studio.default_layer();

    studio.composition.play().unwrap();
    studio.composition.advance(Duration::from_millis(1200));
    studio.composition.stop();
    studio.composition.advance(Duration::from_secs(1));
    assert!(!studio.composition.is_playing());

    studio.composition.play().unwrap();
    studio.composition.advance(Duration::from_millis(100));
    assert_eq!(studio.triggers(kick), 1);
}

#[test]
fn test_toggling_loop_repeatedly_queues_one_restart() {
    let run = |toggles: usize| {
        let mut studio = Studio::new();
        let voice = studio.add_voice(1.0, false);
        studio.composition.play().unwrap();
        studio.composition.advance(Duration::from_millis(1500));

        for _ in 0..toggles {
            studio.composition.toggle_loop(voice);
        }
        studio.composition.advance(Duration::from_secs(3));
        studio.triggers(voice)
    };

    // 0.0, then restarted cycles at 1.5, 2.5, 3.5 and 4.5
    assert_eq!(run(1), 5);
    assert_eq!(run(3), run(1));
}

#[test]
fn test_update_leaves_other_layers_alone() {
    let mut studio = Studio::new();
    let kick = studio.default_layer();
    let clap = studio
        .composition
        .add_instrumental_layer(Instrument::Drums.sample("Clap"));

    studio.composition.play().unwrap();
    studio.composition.advance(Duration::from_millis(600));
    let before = studio.composition.layer_status(kick).unwrap();
    let clap_before = studio.composition.layer_status(clap).unwrap();
    assert_eq!(before.triggers, 2);

    studio
        .composition
        .update_active_sample(Instrument::Drums.sample("Snare"), Some(0.25), Some(0.9));
    studio.composition.advance(Duration::from_millis(600));

    let after = studio.composition.layer_status(kick).unwrap();
    assert_eq!(after.generation, before.generation);
    assert_eq!(after.triggers, 3);
    // The updated layer got a fresh node: 0.6, 0.85, 1.1
    let clap_after = studio.composition.layer_status(clap).unwrap();
    assert_ne!(clap_after.generation, clap_before.generation);
    assert_eq!(clap_after.triggers, 3);
}

#[test]
fn test_looping_voice_stops_with_transport() {
    let mut studio = Studio::new();
    let voice = studio.add_voice(1.0, true);

    studio.composition.play().unwrap();
    studio.composition.advance(Duration::from_millis(2500));
    assert_eq!(studio.triggers(voice), 3);

    studio.composition.stop();
    studio.composition.advance(Duration::from_secs(3));
    assert_eq!(studio.triggers(voice), 3);
    assert!(!studio.composition.is_layer_playing(voice));
}

#[test]
fn test_huge_interval_is_capped_not_collapsed() {
    let mut studio = Studio::new();
    let kick = studio.default_layer();
    studio.composition.play().unwrap();

    studio.composition.update_active_sample(None, Some(1e30), None);
    studio.composition.advance(Duration::from_secs(2));

    // One trigger on rebuild, the next an hour away
    assert_eq!(studio.triggers(kick), 1);
    let bpm = studio.composition.layer(kick).unwrap().bpm().unwrap();
    assert_abs_diff_eq!(bpm, 60.0 / 3600.0);
}

#[test]
fn test_preview_runs_outside_the_mix() {
    let mut studio = Studio::new();
    let kick = studio.default_layer();
    let rx = studio.composition.subscribe();

    studio.composition.start_preview().unwrap();
    assert_eq!(studio.composition.previewing(), Some(kick));
    assert!(studio.composition.is_layer_playing(kick));
    assert!(!studio.composition.is_playing());

    studio.composition.advance(Duration::from_millis(1200));
    let played: Vec<_> = drain(&rx)
        .into_iter()
        .filter(|e| matches!(e, CompositionEvent::PreviewTriggered { .. }))
        .collect();
    assert_eq!(
        played,
        vec![CompositionEvent::PreviewTriggered { interval_secs: 0.5 }; 3]
    );
    // The mix node was never started
    assert_eq!(studio.triggers(kick), 0);

    // Next tick a full second after the change, at 2.2
    studio.composition.set_active_bpm_fraction(0.0);
    studio.composition.advance(Duration::from_millis(1100));
    assert!(drain(&rx).contains(&CompositionEvent::PreviewTriggered { interval_secs: 1.0 }));

    studio.composition.stop_preview();
    assert!(!studio.composition.is_layer_playing(kick));
    studio.composition.advance(Duration::from_secs(2));
    assert!(!drain(&rx)
        .iter()
        .any(|e| matches!(e, CompositionEvent::PreviewTriggered { .. })));
}

#[test]
fn test_switching_layers_ends_preview() {
    let mut studio = Studio::new();
    let kick = studio.default_layer();
    let clap = studio
        .composition
        .add_instrumental_layer(Instrument::Drums.sample("Clap"));

    studio.composition.start_preview().unwrap();
    assert_eq!(studio.composition.previewing(), Some(clap));

    studio.composition.set_active_layer(kick);
    assert_eq!(studio.composition.previewing(), None);
    assert!(!studio.composition.is_layer_playing(clap));

    studio.composition.start_preview().unwrap();
    studio.composition.delete_layer(kick);
    assert_eq!(studio.composition.previewing(), None);
}
