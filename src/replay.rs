//! WAV file replay
//!
//! Feeds a recorded file through the same pipeline as live capture. Block
//! timestamps are synthetic (`start + n * block duration`) so the cooldown
//! behaves exactly as it would on the live input.

use crate::source::{AudioSource, BlockAssembler, CaptureError};
use hound::{SampleFormat, WavReader};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Samples decoded per read
const READ_CHUNK: usize = 4096;

/// Summary returned once the whole file has been delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Complete blocks delivered
    pub blocks: u64,

    /// Trailing samples that did not fill a block
    pub discarded_samples: usize,
}

/// WAV file opened for replay
pub struct WavSource {
    reader: WavReader<BufReader<File>>,
}

impl WavSource {
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let reader = WavReader::open(path)?;
        let spec = reader.spec();

        info!(
            "Replaying {}: {} Hz, {} channel(s), {} bit {:?}",
            path.display(),
            spec.sample_rate,
            spec.channels,
            spec.bits_per_sample,
            spec.sample_format
        );

        Ok(Self { reader })
    }
}

impl AudioSource for WavSource {
    type Handle = ReplaySummary;

    fn sample_rate(&self) -> u32 {
        self.reader.spec().sample_rate
    }

    /// Deliver every block of the file synchronously
    fn start<F>(mut self, block_size: usize, mut on_block: F) -> Result<Self::Handle, CaptureError>
    where
        F: FnMut(&[f32], Instant) + Send + 'static,
    {
        let spec = self.reader.spec();
        let block_period = Duration::from_secs_f64(block_size as f64 / f64::from(spec.sample_rate));
        let origin = Instant::now();

        let channels = usize::from(spec.channels).max(1);
        let mut assembler = BlockAssembler::new(block_size, channels);

        // Whole frames only, so no frame straddles two chunks
        let chunk_len = (READ_CHUNK / channels).max(1) * channels;
        let mut chunk: Vec<f32> = Vec::with_capacity(chunk_len);
        let mut blocks: u64 = 0;

        let mut deliver = |chunk: &[f32], assembler: &mut BlockAssembler, blocks: &mut u64| {
            assembler.push_interleaved(chunk, |s| s, |block| {
                let now = origin + block_period.mul_f64(*blocks as f64);
                on_block(block, now);
                *blocks += 1;
            });
        };

        match spec.sample_format {
            SampleFormat::Float => {
                for sample in self.reader.samples::<f32>() {
                    chunk.push(sample?);
                    if chunk.len() == chunk_len {
                        deliver(&chunk, &mut assembler, &mut blocks);
                        chunk.clear();
                    }
                }
            }
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                for sample in self.reader.samples::<i32>() {
                    chunk.push(sample? as f32 / scale);
                    if chunk.len() == chunk_len {
                        deliver(&chunk, &mut assembler, &mut blocks);
                        chunk.clear();
                    }
                }
            }
        }
        deliver(&chunk, &mut assembler, &mut blocks);

        let summary = ReplaySummary {
            blocks,
            discarded_samples: assembler.pending(),
        };
        debug!("Replay finished: {:?}", summary);

        Ok(summary)
    }
}
