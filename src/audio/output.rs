//! Output route for the mixer: a cpal device stream or an offline sink.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info};

use crate::error::{CompositionError, Result};
use crate::params::{EngineMode, StreamFormat};

/// Output resolved but not yet running; the format is known at this point
pub enum PreparedOutput {
    Device {
        device: cpal::Device,
        config: cpal::StreamConfig,
    },
    Offline(StreamFormat),
}

/// Running output (kept alive for the stream's lifetime)
pub enum OutputStream {
    Device(cpal::Stream),
    Offline,
}

impl PreparedOutput {
    /// Resolve the output device and its default format
    pub fn prepare(mode: EngineMode) -> Result<Self> {
        match mode {
            EngineMode::Offline(format) => Ok(PreparedOutput::Offline(format)),
            EngineMode::Device => {
                let host = cpal::default_host();
                let device = host.default_output_device().ok_or_else(|| {
                    CompositionError::GraphStartFailure {
                        reason: "no audio output device found".to_string(),
                    }
                })?;

                let config = device.default_output_config().map_err(|e| {
                    CompositionError::GraphStartFailure {
                        reason: format!("failed to get audio config: {}", e),
                    }
                })?;

                info!(
                    "Audio: {} @ {}Hz, {} channels",
                    device.name().unwrap_or_else(|_| "Unknown".to_string()),
                    config.sample_rate().0,
                    config.channels()
                );

                Ok(PreparedOutput::Device {
                    device,
                    config: config.into(),
                })
            }
        }
    }

    pub fn format(&self) -> StreamFormat {
        match self {
            PreparedOutput::Device { config, .. } => StreamFormat {
                sample_rate: config.sample_rate.0,
                channels: config.channels,
            },
            PreparedOutput::Offline(format) => *format,
        }
    }

    /// Start pulling interleaved f32 blocks from `render`
    ///
    /// Offline outputs never call `render`; the owner drives rendering.
    pub fn start<F>(self, mut render: F) -> Result<OutputStream>
    where
        F: FnMut(&mut [f32]) + Send + 'static,
    {
        match self {
            PreparedOutput::Offline(_) => Ok(OutputStream::Offline),
            PreparedOutput::Device { device, config } => {
                let stream = device
                    .build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| render(data),
                        |err| error!("Audio stream error: {}", err),
                        None,
                    )
                    .map_err(|e| CompositionError::GraphStartFailure {
                        reason: format!("failed to build audio stream: {}", e),
                    })?;

                stream
                    .play()
                    .map_err(|e| CompositionError::GraphStartFailure {
                        reason: format!("failed to start audio stream: {}", e),
                    })?;

                Ok(OutputStream::Device(stream))
            }
        }
    }
}
