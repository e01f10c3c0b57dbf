//! Decoded PCM buffers and WAV loading.

use std::path::Path;
use std::time::Duration;

use crate::error::{CompositionError, Result};
use crate::params::StreamFormat;

/// Interleaved f32 audio in a known format
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    format: StreamFormat,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, format: StreamFormat) -> Self {
        Self { samples, format }
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }

    /// Natural playback length (frame count / sample rate)
    pub fn duration(&self) -> Duration {
        self.format.frames_to_duration(self.frames() as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }
}

/// Load a WAV file and convert it to `target`
pub fn load_wav(path: &Path, target: StreamFormat) -> Result<AudioBuffer> {
    let reader =
        hound::WavReader::open(path).map_err(|e| CompositionError::unavailable(path, e))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| CompositionError::unavailable(path, e))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| CompositionError::unavailable(path, e))?
        }
    };

    let source = StreamFormat {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    };
    let buffer = AudioBuffer::new(convert(&samples, source, target), target);
    if buffer.is_empty() {
        return Err(CompositionError::unavailable(path, "file contains no samples"));
    }
    Ok(buffer)
}

/// Channel-map then resample interleaved samples into `target`
pub fn convert(samples: &[f32], source: StreamFormat, target: StreamFormat) -> Vec<f32> {
    let mapped = remap_channels(samples, source.channels, target.channels);
    resample_linear(
        &mapped,
        target.channels,
        source.sample_rate,
        target.sample_rate,
    )
}

/// Mono is duplicated, downmix to mono averages, otherwise channels are copied
/// (extra target channels repeat the last source channel).
fn remap_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    let (from, to) = (from.max(1) as usize, to.max(1) as usize);
    if from == to {
        return samples.to_vec();
    }

    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            out.extend((0..to).map(|c| frame[c.min(from - 1)]));
        }
    }
    out
}

fn resample_linear(samples: &[f32], channels: u16, from_rate: u32, to_rate: u32) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let frames = samples.len() / channels;
    if frames == 0 {
        return Vec::new();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_frames = ((frames as f64) / ratio).ceil() as usize;
    let mut out = Vec::with_capacity(out_frames * channels);

    for i in 0..out_frames {
        let position = i as f64 * ratio;
        let i0 = (position.floor() as usize).min(frames - 1);
        let i1 = (i0 + 1).min(frames - 1);
        let frac = (position - i0 as f64) as f32;
        for c in 0..channels {
            let a = samples[i0 * channels + c];
            let b = samples[i1 * channels + c];
            out.push(a + (b - a) * frac);
        }
    }
    out
}
