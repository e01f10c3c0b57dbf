//! WAV capture: the mix recording sink and microphone voice capture.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{CompositionError, Result};
use crate::params::StreamFormat;

/// A finished capture on disk
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedFile {
    pub path: PathBuf,
    pub frames: u64,
    pub format: StreamFormat,
}

impl RecordedFile {
    pub fn duration(&self) -> Duration {
        self.format.frames_to_duration(self.frames)
    }
}

/// Best-effort 32-bit float WAV writer
///
/// A failed write is logged once and disables further writes; what was
/// written before the failure is kept.
pub struct CaptureSink {
    path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    format: StreamFormat,
    frames_written: u64,
    failed: bool,
}

impl CaptureSink {
    pub fn create(path: &Path, format: StreamFormat) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let writer = hound::WavWriter::create(path, spec)
            .map_err(|e| CompositionError::write_failure(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            format,
            frames_written: 0,
            failed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Append interleaved samples already in the sink's channel layout
    pub fn write_interleaved(&mut self, samples: &[f32]) {
        if self.failed {
            return;
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };

        for sample in samples {
            if let Err(e) = writer.write_sample(*sample) {
                warn!(path = %self.path.display(), "Capture write failed, recording truncated: {}", e);
                self.failed = true;
                return;
            }
        }
        self.frames_written += (samples.len() / self.format.channels.max(1) as usize) as u64;
    }

    /// Append interleaved `source_channels` audio to a mono sink
    pub fn write_downmixed(&mut self, samples: &[f32], source_channels: u16) {
        let source_channels = source_channels.max(1) as usize;
        if source_channels == 1 {
            self.write_interleaved(samples);
            return;
        }
        if self.failed {
            return;
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };

        for frame in samples.chunks_exact(source_channels) {
            let mono = frame.iter().sum::<f32>() / source_channels as f32;
            if let Err(e) = writer.write_sample(mono) {
                warn!(path = %self.path.display(), "Capture write failed, recording truncated: {}", e);
                self.failed = true;
                return;
            }
            self.frames_written += 1;
        }
    }

    /// Flush and close the file
    pub fn finalize(mut self) -> Result<RecordedFile> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| CompositionError::write_failure(&self.path, e))?;
        }
        info!(
            path = %self.path.display(),
            frames = self.frames_written,
            "Capture finalized"
        );
        Ok(RecordedFile {
            path: self.path.clone(),
            frames: self.frames_written,
            format: self.format,
        })
    }
}

/// Microphone capture into a mono WAV file
pub struct VoiceRecorder {
    stream: cpal::Stream,
    sink: Arc<Mutex<Option<CaptureSink>>>,
}

impl VoiceRecorder {
    /// Open the default input device and start writing to `path`
    pub fn start(path: &Path) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| CompositionError::PermissionDenied {
                reason: "no input device available".to_string(),
            })?;

        let config = device
            .default_input_config()
            .map_err(|e| CompositionError::PermissionDenied {
                reason: format!("input device refused configuration: {}", e),
            })?;

        let input_channels = config.channels();
        let format = StreamFormat {
            sample_rate: config.sample_rate().0,
            channels: 1,
        };

        info!(
            "Voice capture: {} @ {}Hz -> {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            format.sample_rate,
            path.display()
        );

        let sink = Arc::new(Mutex::new(Some(CaptureSink::create(path, format)?)));
        let sink_callback = Arc::clone(&sink);

        let stream = device
            .build_input_stream(
                &config.into(),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Contended only while finishing; dropping a block then is fine
                    if let Some(mut guard) = sink_callback.try_lock() {
                        if let Some(sink) = guard.as_mut() {
                            sink.write_downmixed(data, input_channels);
                        }
                    }
                },
                |err| warn!("Input stream error: {}", err),
                None,
            )
            .map_err(|e| match e {
                cpal::BuildStreamError::DeviceNotAvailable => CompositionError::PermissionDenied {
                    reason: "input device not available".to_string(),
                },
                other => CompositionError::PermissionDenied {
                    reason: format!("failed to open input stream: {}", other),
                },
            })?;

        stream
            .play()
            .map_err(|e| CompositionError::PermissionDenied {
                reason: format!("failed to start input stream: {}", e),
            })?;

        Ok(Self { stream, sink })
    }

    /// Stop capturing and finalize the file
    pub fn finish(self) -> Result<RecordedFile> {
        let Self { stream, sink } = self;
        drop(stream);

        let sink = sink.lock().take();
        match sink {
            Some(sink) => sink.finalize(),
            None => Err(CompositionError::WriteFailure {
                path: PathBuf::new(),
                reason: "voice capture already finished".to_string(),
            }),
        }
    }
}
