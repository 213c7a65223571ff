//! Live capture from an input device through cpal.

use crate::source::{AudioSource, BlockAssembler, CaptureError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use std::time::Instant;
use tracing::{info, warn};

/// Input device opened for capture
pub struct DeviceSource {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
    latency: Option<f64>,
}

impl DeviceSource {
    /// Open the input selected by `selector`.
    ///
    /// `None` picks the host default; a number picks by enumeration index;
    /// anything else picks the first device whose name contains it.
    pub fn open(selector: Option<&str>, latency: Option<f64>) -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = select_device(&host, selector)?;

        let config = device
            .default_input_config()
            .map_err(|e| CaptureError::SampleRate(e.to_string()))?;

        info!(
            "Using audio device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );
        info!("Audio config: {:?}", config);

        Ok(Self {
            device,
            config,
            latency,
        })
    }

    fn build<T, F>(
        &self,
        config: &cpal::StreamConfig,
        block_size: usize,
        mut on_block: F,
    ) -> Result<cpal::Stream, CaptureError>
    where
        T: SizedSample,
        f32: FromSample<T>,
        F: FnMut(&[f32], Instant) + Send + 'static,
    {
        let mut assembler = BlockAssembler::new(block_size, usize::from(config.channels));

        self.device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    assembler.push_interleaved(
                        data,
                        |sample: T| sample.to_sample::<f32>(),
                        |block| on_block(block, Instant::now()),
                    );
                },
                |err| warn!("Audio stream status: {}", err),
                None,
            )
            .map_err(|e| CaptureError::BuildStream(e.to_string()))
    }
}

impl AudioSource for DeviceSource {
    /// Dropping the stream releases the device
    type Handle = cpal::Stream;

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }

    fn start<F>(self, block_size: usize, on_block: F) -> Result<Self::Handle, CaptureError>
    where
        F: FnMut(&[f32], Instant) + Send + 'static,
    {
        let mut stream_config = self.config.config();
        if let Some(latency) = self.latency {
            let frames = (latency * f64::from(self.sample_rate())).round().max(1.0) as u32;
            stream_config.buffer_size = cpal::BufferSize::Fixed(frames);
        }

        let stream = match self.config.sample_format() {
            cpal::SampleFormat::F32 => self.build::<f32, F>(&stream_config, block_size, on_block),
            cpal::SampleFormat::I16 => self.build::<i16, F>(&stream_config, block_size, on_block),
            cpal::SampleFormat::U16 => self.build::<u16, F>(&stream_config, block_size, on_block),
            other => Err(CaptureError::UnsupportedFormat(format!("{:?}", other))),
        }?;

        stream.play().map_err(|e| CaptureError::Play(e.to_string()))?;
        info!(
            "Capture started: {} Hz, {} channel(s), blocks of {} samples",
            stream_config.sample_rate.0, stream_config.channels, block_size
        );

        Ok(stream)
    }
}

fn select_device(host: &cpal::Host, selector: Option<&str>) -> Result<cpal::Device, CaptureError> {
    let Some(selector) = selector else {
        return host.default_input_device().ok_or(CaptureError::NoDefaultDevice);
    };

    let mut devices = host
        .input_devices()
        .map_err(|e| CaptureError::Devices(e.to_string()))?;

    let found = match selector.parse::<usize>() {
        Ok(index) => devices.nth(index),
        Err(_) => devices.find(|device| {
            device
                .name()
                .map(|name| name.contains(selector))
                .unwrap_or(false)
        }),
    };

    found.ok_or_else(|| CaptureError::DeviceNotFound(selector.to_string()))
}

/// Names of the available input devices, in enumeration order
pub fn list_input_devices() -> Result<Vec<String>, CaptureError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::Devices(e.to_string()))?;

    Ok(devices
        .map(|device| device.name().unwrap_or_else(|_| "Unknown".to_string()))
        .collect())
}
