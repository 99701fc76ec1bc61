// Capture stream - default input device into the sample ring
//
// Opens the default cpal input device at the configured sample rate and
// writes mono F32 samples into the ring producer from the audio callback.
// Multi-channel devices are de-interleaved by taking the first channel.
// The callback never blocks: ring overflow drops samples and the counter
// on the ring records how many.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio::ring::RingProducer;
use crate::error::AudioError;

pub struct CaptureStream {
    stream: cpal::Stream,
    device_name: String,
}

impl CaptureStream {
    /// Open and start the default input device, feeding `producer`.
    pub fn start(sample_rate: u32, mut producer: RingProducer) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AudioError::StreamOpenFailed {
                reason: "No default input device found".to_string(),
            })?;
        let device_name = device.name().unwrap_or_else(|_| "<unknown>".to_string());

        let default_config =
            device
                .default_input_config()
                .map_err(|e| AudioError::StreamOpenFailed {
                    reason: format!("Failed to get default input config: {:?}", e),
                })?;

        if default_config.sample_format() != cpal::SampleFormat::F32 {
            return Err(AudioError::StreamOpenFailed {
                reason: "Only F32 sample format is currently supported for input".to_string(),
            });
        }

        let mut stream_config: cpal::StreamConfig = default_config.into();
        stream_config.sample_rate = cpal::SampleRate(sample_rate);
        let channels = stream_config.channels as usize;

        let err_fn = |err| log::error!("input stream error: {}", err);

        // Scratch for de-interleaving, reused across callbacks.
        let mut mono = Vec::new();

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if channels == 1 {
                        producer.push(data);
                    } else {
                        mono.clear();
                        mono.extend(data.chunks(channels).map(|frame| frame[0]));
                        producer.push(&mono);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamOpenFailed {
                reason: format!("{:?}", e),
            })?;

        stream.play().map_err(|e| AudioError::HardwareError {
            details: format!("Input start failed: {}", e),
        })?;

        log::info!(
            "capturing from {:?} at {} Hz ({} ch)",
            device_name,
            sample_rate,
            channels
        );

        Ok(Self {
            stream,
            device_name,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Stop capturing. Dropping the stream closes the device.
    pub fn stop(self) {
        drop(self.stream);
    }
}

/// Names of available input devices, for the CLI listing.
pub fn input_device_names() -> Vec<String> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices
            .filter_map(|d| d.name().ok())
            .collect(),
        Err(err) => {
            log::warn!("could not enumerate input devices: {}", err);
            Vec::new()
        }
    }
}
