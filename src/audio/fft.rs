//! Spectrum analysis of the live mix and the latest-frame handoff.

use parking_lot::Mutex;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::params::AnalyzerConfig;

/// Fixed-size forward FFT producing normalized magnitude bars
///
/// All buffers are allocated up front; `analyze` does not allocate.
pub struct SpectralAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    bars: Vec<f32>,
}

impl SpectralAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> Result<Self> {
        config.validate()?;

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(config.block_size);
        let scratch_len = fft.get_inplace_scratch_len();

        Ok(Self {
            fft,
            buffer: vec![Complex::new(0.0, 0.0); config.block_size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            magnitudes: vec![0.0; config.bar_count],
            bars: vec![0.0; config.bar_count],
        })
    }

    pub fn block_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }

    /// Analyze one mono block, zero-padding or truncating to the block size
    pub fn analyze(&mut self, block: &[f32]) -> &[f32] {
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            *slot = Complex::new(block.get(i).copied().unwrap_or(0.0), 0.0);
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        for (magnitude, bin) in self.magnitudes.iter_mut().zip(&self.buffer) {
            *magnitude = bin.norm();
        }

        normalize(&self.magnitudes, &mut self.bars);
        &self.bars
    }
}

/// Zero-mean, unit-deviation normalization
///
/// A flat (or non-finite) input has no deviation to scale by and yields zeros.
pub fn normalize(input: &[f32], output: &mut [f32]) {
    let n = input.len().min(output.len());
    if n == 0 {
        return;
    }

    let mean = input[..n].iter().sum::<f32>() / n as f32;
    let variance = input[..n].iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n as f32;
    let deviation = variance.sqrt();

    if !deviation.is_finite() || deviation <= f32::EPSILON {
        output[..n].fill(0.0);
        return;
    }

    for (out, x) in output[..n].iter_mut().zip(&input[..n]) {
        *out = (x - mean) / deviation;
    }
}

/// Single-slot, latest-value-wins spectrum handoff
///
/// The audio thread publishes with `try_lock`, dropping the frame instead of
/// waiting when a reader holds the slot. Readers compare `sequence()` to
/// detect fresh frames.
pub struct SpectrumSlot {
    frame: Mutex<Vec<f32>>,
    sequence: AtomicU64,
}

impl SpectrumSlot {
    pub fn new(bar_count: usize) -> Self {
        Self {
            frame: Mutex::new(vec![0.0; bar_count]),
            sequence: AtomicU64::new(0),
        }
    }

    /// Publish a frame; returns false if the slot was busy
    pub fn publish(&self, bars: &[f32]) -> bool {
        let Some(mut frame) = self.frame.try_lock() else {
            return false;
        };
        if frame.len() == bars.len() {
            frame.copy_from_slice(bars);
        } else {
            frame.clear();
            frame.extend_from_slice(bars);
        }
        self.sequence.fetch_add(1, Ordering::Release);
        true
    }

    /// Overwrite the current frame with zeros
    pub fn clear(&self) {
        self.frame.lock().fill(0.0);
        self.sequence.fetch_add(1, Ordering::Release);
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Copy of the current frame
    pub fn latest(&self) -> Vec<f32> {
        self.frame.lock().clone()
    }
}
