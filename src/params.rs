//! Analysis parameters derived once from the detector configuration and the
//! native sample rate of the input device.

use crate::config::DetectorConfig;
use crate::detector::DetectorError;
use tracing::{debug, info};

/// Largest FFT length accepted (about 95 s of audio at 44.1 kHz)
pub const MAX_TRANSFORM_SIZE: usize = 1 << 22;

/// Largest block accepted, in samples
pub const MAX_BLOCK_SIZE: usize = 1 << 22;

/// Largest peak window accepted, in blocks
pub const MAX_WINDOW_CAPACITY: usize = 1 << 20;

/// Transform size and target bin for one frequency of interest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrequencyBin {
    /// Number of samples fed to the FFT
    pub transform_size: usize,

    /// Index of the bin nearest the target frequency
    pub bin_index: usize,
}

/// Map a target frequency onto an FFT bin.
///
/// The spectrum between 0 Hz and Nyquist is divided into `num_freq_bins`
/// bins; the transform size follows from the resulting bin width.
pub fn map_frequency_bin(
    sample_rate: f64,
    num_freq_bins: usize,
    target_frequency: f64,
) -> Result<FrequencyBin, DetectorError> {
    if !(sample_rate > 0.0) || !sample_rate.is_finite() {
        return Err(DetectorError::Configuration(format!(
            "Sample rate must be positive, got {}",
            sample_rate
        )));
    }

    if num_freq_bins < 2 {
        return Err(DetectorError::Configuration(format!(
            "Number of frequency bins must be at least 2, got {}",
            num_freq_bins
        )));
    }

    let max_freq = sample_rate / 2.0;
    if !(0.0..=max_freq).contains(&target_frequency) {
        return Err(DetectorError::Configuration(format!(
            "Target frequency {} Hz is outside the analysable range 0-{} Hz",
            target_frequency, max_freq
        )));
    }

    let delta_f = max_freq / (num_freq_bins - 1) as f64;

    let transform_size = (sample_rate / delta_f).ceil();
    if !(transform_size <= MAX_TRANSFORM_SIZE as f64) {
        return Err(DetectorError::Configuration(format!(
            "{} frequency bins need a transform of {} samples (at most {})",
            num_freq_bins, transform_size, MAX_TRANSFORM_SIZE
        )));
    }

    Ok(FrequencyBin {
        transform_size: transform_size as usize,
        bin_index: (target_frequency / delta_f).ceil() as usize,
    })
}

/// Parameters computed at detector construction and frozen afterwards
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedParameters {
    /// Native sample rate of the input (Hz)
    pub sample_rate: u32,

    /// Samples per analysed block
    pub block_size: usize,

    /// FFT length (the block is truncated or zero-padded to this size)
    pub transform_size: usize,

    /// FFT bin holding the target frequency
    pub bin_index: usize,

    /// Number of blocks kept in the sliding peak window
    pub window_capacity: usize,

    /// Minimum number of matching blocks for a sustained detection
    pub acceptable_matches: f64,
}

impl DerivedParameters {
    pub fn derive(config: &DetectorConfig, sample_rate: u32) -> Result<Self, DetectorError> {
        let block_size =
            (u64::from(sample_rate) * u64::from(config.block_duration_ms) / 1000) as usize;
        if block_size == 0 {
            return Err(DetectorError::Configuration(format!(
                "Block duration of {} ms at {} Hz yields an empty block",
                config.block_duration_ms, sample_rate
            )));
        }
        if block_size > MAX_BLOCK_SIZE {
            return Err(DetectorError::Configuration(format!(
                "Block duration of {} ms at {} Hz yields {} samples (at most {})",
                config.block_duration_ms, sample_rate, block_size, MAX_BLOCK_SIZE
            )));
        }

        let bin = map_frequency_bin(
            f64::from(sample_rate),
            config.num_freq_bins,
            config.frequency,
        )?;

        let blocks = (config.peak_duration * f64::from(sample_rate) / block_size as f64).round();
        if !(blocks <= MAX_WINDOW_CAPACITY as f64) {
            return Err(DetectorError::Configuration(format!(
                "Peak duration of {} s spans {} blocks (at most {})",
                config.peak_duration, blocks, MAX_WINDOW_CAPACITY
            )));
        }

        // Floor of one block: an empty window would report every block as detected
        let window_capacity = (blocks as usize).max(1);

        let acceptable_matches = window_capacity as f64 * config.acceptance_ratio / 100.0;

        let params = Self {
            sample_rate,
            block_size,
            transform_size: bin.transform_size,
            bin_index: bin.bin_index,
            window_capacity,
            acceptable_matches,
        };

        info!(
            "Analysis parameters: {} Hz, block {} samples, FFT {} (bin {}), window {} blocks",
            sample_rate, block_size, params.transform_size, params.bin_index, window_capacity
        );
        debug!("Derived parameters: {:?}", params);

        Ok(params)
    }
}
