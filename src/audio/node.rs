//! Per-layer playback node feeding the mixer.

use std::sync::Arc;
use std::time::Duration;

use super::source::AudioBuffer;

/// How a node's loop reschedules itself
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeMode {
    /// Restart the buffer every interval, regardless of its length
    Retrigger(Duration),

    /// Play the buffer to its end, then loop only if the layer is looping
    Natural,
}

/// Observable state of a node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeStatus {
    /// Source load attempt finished (successfully or not)
    pub loaded: bool,

    /// A playable buffer is attached
    pub has_source: bool,

    /// A natural-length cycle is currently sounding
    pub sounding: bool,

    /// Times the buffer has been scheduled
    pub triggers: u64,

    /// Playback position within the current buffer
    pub position: Duration,

    /// Scheduler time of the most recent trigger
    pub last_trigger: Option<Duration>,

    /// Binding generation; changes whenever the node is rebuilt or retimed
    pub generation: u64,

    pub gain: f32,
}

/// One voice in the mixer
///
/// Plays only the most recently scheduled buffer: scheduling again restarts
/// from the first frame and cuts off whatever was still sounding.
#[derive(Debug)]
pub struct PlaybackNode {
    generation: u64,
    mode: NodeMode,
    buffer: Option<Arc<AudioBuffer>>,
    loaded: bool,
    cursor: Option<usize>,
    playing: bool,
    sounding: bool,
    start_pending: bool,
    volume: f32,
    muted: bool,
    looping: bool,
    triggers: u64,
    last_trigger: Option<Duration>,
}

impl PlaybackNode {
    pub fn new(generation: u64, mode: NodeMode, volume: f32, muted: bool, looping: bool) -> Self {
        Self {
            generation,
            mode,
            buffer: None,
            loaded: false,
            cursor: None,
            playing: false,
            sounding: false,
            start_pending: false,
            volume,
            muted,
            looping,
            triggers: 0,
            last_trigger: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Move the binding to a new generation; loops holding the old one end
    pub fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    pub fn mode(&self) -> NodeMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: NodeMode) {
        self.mode = mode;
    }

    pub fn set_buffer(&mut self, buffer: Option<Arc<AudioBuffer>>) {
        self.buffer = buffer;
        self.loaded = true;
        self.cursor = None;
    }

    pub fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    /// Natural length of the attached buffer
    pub fn buffer_duration(&self) -> Option<Duration> {
        self.buffer.as_ref().map(|b| b.duration())
    }

    pub fn gain(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn is_sounding(&self) -> bool {
        self.sounding
    }

    pub fn set_sounding(&mut self, sounding: bool) {
        self.sounding = sounding;
    }

    /// A cycle has been queued but has not started yet
    pub fn is_start_pending(&self) -> bool {
        self.start_pending
    }

    pub fn set_start_pending(&mut self, pending: bool) {
        self.start_pending = pending;
    }

    /// Queue the buffer from its start at scheduler time `at`, replacing
    /// anything scheduled before
    pub fn schedule(&mut self, at: Duration) {
        if self.buffer.is_some() {
            self.cursor = Some(0);
            self.triggers += 1;
            self.last_trigger = Some(at);
        }
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    pub fn stop(&mut self) {
        self.playing = false;
        self.cursor = None;
    }

    pub fn status(&self) -> NodeStatus {
        let position = match (&self.buffer, self.cursor) {
            (Some(buffer), Some(cursor)) => buffer.format().frames_to_duration(cursor as u64),
            _ => Duration::ZERO,
        };
        NodeStatus {
            loaded: self.loaded,
            has_source: self.buffer.is_some(),
            sounding: self.sounding,
            triggers: self.triggers,
            position,
            last_trigger: self.last_trigger,
            generation: self.generation,
            gain: self.gain(),
        }
    }

    /// Add this node's next frames into `out` (interleaved, `channels` wide)
    pub fn mix_into(&mut self, out: &mut [f32], channels: usize) {
        if !self.playing {
            return;
        }
        let (Some(buffer), Some(mut cursor)) = (self.buffer.as_ref(), self.cursor) else {
            return;
        };

        let gain = self.gain();
        let source = buffer.samples();
        let source_channels = buffer.format().channels.max(1) as usize;
        let frames = buffer.frames();

        for frame in out.chunks_exact_mut(channels) {
            if cursor >= frames {
                break;
            }
            let base = cursor * source_channels;
            for (c, sample) in frame.iter_mut().enumerate() {
                *sample += source[base + c.min(source_channels - 1)] * gain;
            }
            cursor += 1;
        }

        self.cursor = (cursor < frames).then_some(cursor);
    }
}
