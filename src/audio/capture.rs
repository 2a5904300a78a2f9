//! Microphone capture through cpal

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, FromSample, Host, Sample, SampleRate, SizedSample, Stream, StreamConfig};
use tokio::sync::mpsc;

use crate::audio::device::{DeviceConfig, InputDeviceInfo};
use crate::audio::stream::{AudioBackend, InputStream, StreamFault};
use crate::{Error, Result};

/// Callback blocks buffered before the stream reports an overflow
const MAX_BUFFERED_BLOCKS: usize = 256;

/// How long a read waits for the next callback block
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Audio backend on the platform's default cpal host
pub struct CpalBackend {
    host: Host,
    read_timeout: Duration,
}

impl CpalBackend {
    /// Create a backend on the default host
    #[must_use]
    pub fn new() -> Self {
        let host = cpal::default_host();
        tracing::debug!(host = ?host.id(), "audio host initialized");
        Self {
            host,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Override how long a read waits before reporting a stall
    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn find_device(&self, config: &DeviceConfig) -> Result<Device> {
        let devices: Vec<Device> = self
            .host
            .devices()
            .map_err(|e| Error::Device(e.to_string()))?
            .collect();

        let name_matches = |d: &Device| d.name().is_ok_and(|n| n == config.device_name);

        // Enumeration order can shift between opens; fall back to matching by name
        if let Some(device) = devices.get(config.device_index).filter(|d| name_matches(*d)) {
            return Ok(device.clone());
        }
        devices
            .into_iter()
            .find(|d| name_matches(d))
            .ok_or_else(|| Error::Device(format!("input device not found: {}", config.device_name)))
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    type Stream = CpalInputStream;

    fn input_devices(&self) -> Result<Vec<InputDeviceInfo>> {
        let devices = self
            .host
            .devices()
            .map_err(|e| Error::Device(e.to_string()))?;

        let list = devices
            .enumerate()
            .map(|(index, device)| {
                let name = device.name().unwrap_or_else(|_| format!("device {index}"));
                let (max_input_channels, default_sample_rate) = device
                    .default_input_config()
                    .map_or((0, 0), |c| (c.channels(), c.sample_rate().0));
                let supported_rates = device
                    .supported_input_configs()
                    .map(|configs| {
                        configs
                            .map(|c| c.min_sample_rate().0..=c.max_sample_rate().0)
                            .collect()
                    })
                    .unwrap_or_default();

                InputDeviceInfo {
                    index,
                    name,
                    max_input_channels,
                    default_sample_rate,
                    supported_rates,
                }
            })
            .collect();

        Ok(list)
    }

    fn open_input(&self, config: &DeviceConfig) -> Result<CpalInputStream> {
        let device = self.find_device(config)?;
        let default = device
            .default_input_config()
            .map_err(|e| Error::Audio(e.to_string()))?;

        let stream_config = StreamConfig {
            channels: default.channels(),
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: BufferSize::Default,
        };

        let (tx, rx) = mpsc::channel(MAX_BUFFERED_BLOCKS);
        let shared = Shared::default();

        let stream = match default.sample_format() {
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, tx, &shared)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, tx, &shared)?,
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, tx, &shared)?,
            other => {
                return Err(Error::Audio(format!("unsupported sample format: {other:?}")));
            }
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = %config.device_name,
            sample_rate = config.sample_rate,
            channels = stream_config.channels,
            format = ?default.sample_format(),
            "audio capture started"
        );

        Ok(CpalInputStream {
            _stream: stream,
            rx,
            pending: VecDeque::new(),
            shared,
            read_timeout: self.read_timeout,
        })
    }
}

/// Fault flags set from the cpal callback threads
#[derive(Clone, Default)]
struct Shared {
    overflow: Arc<AtomicBool>,
    error: Arc<Mutex<Option<String>>>,
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    tx: mpsc::Sender<Vec<i16>>,
    shared: &Shared,
) -> Result<Stream>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    let overflow = Arc::clone(&shared.overflow);
    let error = Arc::clone(&shared.error);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // First channel only
                let mono: Vec<i16> = data
                    .chunks(channels)
                    .filter_map(|frame| frame.first().map(|&s| i16::from_sample(s)))
                    .collect();
                if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(mono) {
                    overflow.store(true, Ordering::Relaxed);
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio capture error");
                if let Ok(mut slot) = error.lock() {
                    *slot = Some(err.to_string());
                }
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}

/// A running cpal input stream
pub struct CpalInputStream {
    _stream: Stream,
    rx: mpsc::Receiver<Vec<i16>>,
    pending: VecDeque<i16>,
    shared: Shared,
    read_timeout: Duration,
}

impl CpalInputStream {
    fn check_faults(&self) -> std::result::Result<(), StreamFault> {
        if let Some(reason) = self.shared.error.lock().ok().and_then(|mut e| e.take()) {
            return Err(StreamFault::Device(reason));
        }
        if self.shared.overflow.swap(false, Ordering::Relaxed) {
            return Err(StreamFault::Overflow);
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl InputStream for CpalInputStream {
    async fn read(&mut self, frame_length: usize) -> std::result::Result<Vec<i16>, StreamFault> {
        self.check_faults()?;

        while self.pending.len() < frame_length {
            match tokio::time::timeout(self.read_timeout, self.rx.recv()).await {
                Ok(Some(block)) => self.pending.extend(block),
                Ok(None) => return Err(StreamFault::Closed),
                Err(_) => return Err(StreamFault::Stalled(self.read_timeout)),
            }
            self.check_faults()?;
        }

        Ok(self.pending.drain(..frame_length).collect())
    }
}
