//! Normalised magnitude of a single FFT bin for one audio block.

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::debug;

/// Extracts the target-bin magnitude of each block.
///
/// The FFT plan and its buffers are allocated once so that `extract` can run
/// on the audio thread without allocating.
pub struct MagnitudeExtractor {
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex32>,
    scratch: Vec<Complex32>,
    transform_size: usize,
    bin_index: usize,
    gain: f32,
}

impl MagnitudeExtractor {
    pub fn new(transform_size: usize, bin_index: usize, gain: f32) -> Self {
        debug!(
            "Planning FFT of size {} for bin {} (gain {})",
            transform_size, bin_index, gain
        );

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(transform_size);
        let scratch = vec![Complex32::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Self {
            fft,
            buffer: vec![Complex32::new(0.0, 0.0); transform_size],
            scratch,
            transform_size,
            bin_index,
            gain,
        }
    }

    /// Magnitude at the target bin, scaled by `gain / transform_size` and
    /// clipped to [0, 1].
    ///
    /// The block is truncated or zero-padded to exactly `transform_size`
    /// samples, independent of the block size.
    pub fn extract(&mut self, block: &[f32]) -> f32 {
        let used = block.len().min(self.transform_size);

        for (slot, &sample) in self.buffer.iter_mut().zip(&block[..used]) {
            *slot = Complex32::new(sample, 0.0);
        }
        for slot in &mut self.buffer[used..] {
            *slot = Complex32::new(0.0, 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let raw = self
            .buffer
            .get(self.bin_index)
            .map_or(0.0, |bin| bin.norm());

        (raw * self.gain / self.transform_size as f32).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    const SAMPLE_RATE: f64 = 44100.0;
    const TRANSFORM_SIZE: usize = 510;
    const BIN: usize = 12;

    /// Sine sitting exactly on `BIN` for a 510-point transform at 44.1 kHz
    fn bin_centred_tone(len: usize, amplitude: f64) -> Vec<f32> {
        let frequency = BIN as f64 * SAMPLE_RATE / TRANSFORM_SIZE as f64;
        (0..len)
            .map(|i| {
                let t = i as f64 / SAMPLE_RATE;
                (amplitude * (2.0 * PI * frequency * t).sin()) as f32
            })
            .collect()
    }

    #[test]
    fn test_constant_signal_has_no_tone() {
        let mut extractor = MagnitudeExtractor::new(TRANSFORM_SIZE, BIN, 200.0);
        let block = vec![1000.0 / 32768.0; 2205];

        assert_relative_eq!(extractor.extract(&block), 0.0, epsilon = 0.001);
    }

    #[test]
    fn test_bin_centred_tone() {
        // |X[k]| = A * N / 2, scaled by gain / N
        let mut extractor = MagnitudeExtractor::new(TRANSFORM_SIZE, BIN, 2.0);
        let block = bin_centred_tone(2205, 0.5);

        assert_relative_eq!(extractor.extract(&block), 0.5, epsilon = 0.01);
    }

    #[test]
    fn test_clipped_to_unit_range() {
        let mut extractor = MagnitudeExtractor::new(TRANSFORM_SIZE, BIN, 50.0);
        let block = bin_centred_tone(2205, 0.5);

        assert_relative_eq!(extractor.extract(&block), 1.0);
    }

    #[test]
    fn test_zero_gain_disables_detection() {
        let mut extractor = MagnitudeExtractor::new(TRANSFORM_SIZE, BIN, 0.0);
        let block = bin_centred_tone(2205, 0.9);

        assert_eq!(extractor.extract(&block), 0.0);
    }

    #[test]
    fn test_short_block_is_zero_padded() {
        let mut extractor = MagnitudeExtractor::new(TRANSFORM_SIZE, BIN, 2.0);

        // Half the transform holds the tone, the rest is padding
        let block = bin_centred_tone(TRANSFORM_SIZE / 2, 0.5);
        let magnitude = extractor.extract(&block);

        assert_relative_eq!(magnitude, 0.25, epsilon = 0.01);
    }

    #[test]
    fn test_buffers_reset_between_blocks() {
        let mut extractor = MagnitudeExtractor::new(TRANSFORM_SIZE, BIN, 2.0);

        let loud = bin_centred_tone(2205, 0.5);
        let quiet = bin_centred_tone(2205, 0.05);

        extractor.extract(&loud);
        assert_relative_eq!(extractor.extract(&quiet), 0.05, epsilon = 0.005);
    }
}
