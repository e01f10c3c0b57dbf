//! Playback of a finished recording with live spectrum analysis.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::audio::{MixGraph, SpectrumSlot};
use crate::error::{CompositionError, Result};
use crate::layer::{Layer, LayerId};
use crate::params::{AnalyzerConfig, EngineConfig};

#[derive(Debug, Clone, PartialEq)]
pub enum ReplayEvent {
    SpectrumUpdated,
    PlaybackComplete,
}

struct ReplaySession {
    graph: MixGraph,
    layer: LayerId,
    path: PathBuf,
    started_at: Duration,
    finished_at: Option<Duration>,
    spectrum_seen: u64,
}

impl ReplaySession {
    fn is_complete(&self) -> bool {
        self.graph.node_status(self.layer).map_or(true, |s| {
            s.loaded && !s.sounding && (s.triggers > 0 || !s.has_source)
        })
    }
}

/// Plays one recording at a time through its own mix graph
pub struct ReplayPlayer {
    engine: EngineConfig,
    analyzer: AnalyzerConfig,
    spectrum: Arc<SpectrumSlot>,
    session: Option<ReplaySession>,
}

impl ReplayPlayer {
    pub fn new(engine: EngineConfig, analyzer: AnalyzerConfig) -> Result<Self> {
        engine.validate()?;
        analyzer.validate()?;
        let spectrum = Arc::new(SpectrumSlot::new(analyzer.bar_count));
        Ok(Self {
            engine,
            analyzer,
            spectrum,
            session: None,
        })
    }

    /// Start playing `path` from the beginning, replacing any current replay
    pub fn play(&mut self, path: &Path) -> Result<()> {
        self.stop();
        if !path.is_file() {
            return Err(CompositionError::unavailable(path, "recording not found"));
        }

        let mut graph = MixGraph::new(
            self.engine.clone(),
            self.analyzer.clone(),
            PathBuf::new(),
        )?;
        let layer = Layer::voice(1, Some(path.to_path_buf()));
        graph.start(std::slice::from_ref(&layer), true)?;

        info!(path = %path.display(), "Replay started");
        self.spectrum = graph.spectrum();
        self.session = Some(ReplaySession {
            started_at: graph.now(),
            spectrum_seen: self.spectrum.sequence(),
            graph,
            layer: layer.id(),
            path: path.to_path_buf(),
            finished_at: None,
        });
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.graph.stop();
            self.spectrum.clear();
            info!(path = %session.path.display(), "Replay stopped");
        }
    }

    pub fn is_playing(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.finished_at.is_none() && s.graph.is_running())
    }

    /// Elapsed playback time of the current replay
    pub fn current_time(&self) -> Duration {
        let Some(session) = self.session.as_ref() else {
            return Duration::ZERO;
        };
        session
            .finished_at
            .unwrap_or_else(|| session.graph.now())
            .saturating_sub(session.started_at)
    }

    pub fn spectrum(&self) -> Vec<f32> {
        self.spectrum.latest()
    }

    /// Collect spectrum and completion notifications since the last poll
    ///
    /// Completion is reported once; the graph is stopped at that point but
    /// the session stays so `current_time` keeps the final position.
    pub fn poll(&mut self) -> Vec<ReplayEvent> {
        let mut events = Vec::new();
        let Some(session) = self.session.as_mut() else {
            return events;
        };

        let sequence = self.spectrum.sequence();
        if sequence != session.spectrum_seen {
            session.spectrum_seen = sequence;
            events.push(ReplayEvent::SpectrumUpdated);
        }

        if session.finished_at.is_none() && session.is_complete() {
            session.finished_at = Some(session.graph.now());
            session.graph.stop();
            self.spectrum.clear();
            session.spectrum_seen = self.spectrum.sequence();
            info!(path = %session.path.display(), "Replay complete");
            events.push(ReplayEvent::PlaybackComplete);
        }
        events
    }

    /// Offline mode: render `delta` of virtual time, then poll
    pub fn advance(&mut self, delta: Duration) -> Vec<ReplayEvent> {
        if let Some(session) = self.session.as_mut() {
            session.graph.advance(delta);
        }
        self.poll()
    }
}

impl Drop for ReplayPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::StreamFormat;

    const FORMAT: StreamFormat = StreamFormat {
        sample_rate: 8000,
        channels: 1,
    };

    fn player() -> ReplayPlayer {
        ReplayPlayer::new(EngineConfig::offline(FORMAT), AnalyzerConfig::default()).unwrap()
    }

    fn write_tone(path: &Path, frames: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: FORMAT.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            writer.write_sample(if i % 2 == 0 { 0.5f32 } else { -0.5 }).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let mut player = player();
        let err = player.play(Path::new("/nonexistent/take.wav")).unwrap_err();
        assert_eq!(err.error_code(), "RESOURCE_UNAVAILABLE");
        assert!(!player.is_playing());
    }

    #[test]
    fn test_replay_runs_to_completion_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        write_tone(&path, 8000);

        let mut player = player();
        player.play(&path).unwrap();
        assert!(player.is_playing());

        let events = player.advance(Duration::from_millis(500));
        assert!(events.contains(&ReplayEvent::SpectrumUpdated));
        assert!(!events.contains(&ReplayEvent::PlaybackComplete));
        assert_eq!(player.current_time(), Duration::from_millis(500));

        let events = player.advance(Duration::from_millis(600));
        assert!(events.contains(&ReplayEvent::PlaybackComplete));
        assert!(!player.is_playing());
        assert_eq!(player.current_time(), Duration::from_millis(1100));

        let events = player.advance(Duration::from_secs(1));
        assert!(events.is_empty());
    }

    #[test]
    fn test_stop_resets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        write_tone(&path, 8000);

        let mut player = player();
        player.play(&path).unwrap();
        player.advance(Duration::from_millis(200));
        player.stop();

        assert!(!player.is_playing());
        assert_eq!(player.current_time(), Duration::ZERO);
        assert!(player.spectrum().iter().all(|b| *b == 0.0));
        assert!(player.poll().is_empty());
    }
}
