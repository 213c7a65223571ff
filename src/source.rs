//! Audio source abstraction
//!
//! A source reports its native sample rate once and then delivers blocks of
//! exactly `block_size` mono samples, each tagged with the instant it was
//! observed, to a callback. Blocks are delivered one at a time and in order.

use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No default input device available")]
    NoDefaultDevice,

    #[error("Input device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to enumerate devices: {0}")]
    Devices(String),

    #[error("Failed to read device sample rate: {0}")]
    SampleRate(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to build input stream: {0}")]
    BuildStream(String),

    #[error("Failed to start input stream: {0}")]
    Play(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

/// Capability consumed by the detection pipeline
pub trait AudioSource {
    /// Value returned by `start`; for live sources this keeps the stream open
    type Handle;

    /// Native sample rate of the source (Hz)
    fn sample_rate(&self) -> u32;

    /// Start delivering blocks of `block_size` samples to `on_block`
    fn start<F>(self, block_size: usize, on_block: F) -> Result<Self::Handle, CaptureError>
    where
        F: FnMut(&[f32], Instant) + Send + 'static;
}

/// Re-chunks interleaved buffers of arbitrary length into exact blocks of
/// channel 0.
///
/// Storage is allocated once; pushing never allocates.
pub struct BlockAssembler {
    block: Vec<f32>,
    block_size: usize,
    channels: usize,
}

impl BlockAssembler {
    pub fn new(block_size: usize, channels: usize) -> Self {
        Self {
            block: Vec::with_capacity(block_size),
            block_size: block_size.max(1),
            channels: channels.max(1),
        }
    }

    /// Append interleaved frames, calling `on_block` for every completed block
    pub fn push_interleaved<T, C, F>(&mut self, data: &[T], convert: C, mut on_block: F)
    where
        T: Copy,
        C: Fn(T) -> f32,
        F: FnMut(&[f32]),
    {
        for frame in data.chunks_exact(self.channels) {
            self.block.push(convert(frame[0]));

            if self.block.len() == self.block_size {
                on_block(&self.block);
                self.block.clear();
            }
        }
    }

    /// Samples waiting for the current block to complete
    pub fn pending(&self) -> usize {
        self.block.len()
    }
}
