//! Microphone stream lifecycle
//!
//! A [`StreamHandle`] owns at most one live input stream and tracks whether it is
//! `Closed`, `Open` or `Faulted`. Reads never fail past the caller: faults come back as
//! [`StreamFault`] values and the owner decides whether to reopen.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::Result;
use crate::audio::device::{DeviceConfig, InputDeviceInfo};
use crate::audio::frame::AudioFrame;

/// Why a stream stopped delivering audio
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamFault {
    /// Samples were dropped because the reader fell behind
    #[error("input overflow")]
    Overflow,

    /// No audio arrived within the read timeout
    #[error("no audio received for {0:?}")]
    Stalled(Duration),

    /// The OS audio layer reported an error
    #[error("device error: {0}")]
    Device(String),

    /// The stream is not open
    #[error("stream closed")]
    Closed,
}

/// A live audio input stream
#[async_trait(?Send)]
pub trait InputStream {
    /// Wait for exactly `frame_length` mono samples
    async fn read(&mut self, frame_length: usize) -> std::result::Result<Vec<i16>, StreamFault>;
}

/// Host audio API
pub trait AudioBackend {
    /// Stream type produced by this backend
    type Stream: InputStream;

    /// Enumerate devices in host order
    ///
    /// # Errors
    ///
    /// Returns error if the host cannot enumerate devices
    fn input_devices(&self) -> Result<Vec<InputDeviceInfo>>;

    /// Open a mono input stream on `device` at its configured rate
    ///
    /// # Errors
    ///
    /// Returns error if the device is missing, busy, or rejects the configuration
    fn open_input(&self, device: &DeviceConfig) -> Result<Self::Stream>;
}

/// Observable state of a [`StreamHandle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No OS resource held
    Closed,
    /// Delivering audio
    Open,
    /// Open failed or a read faulted; the OS resource has been released
    Faulted,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Owner of one microphone stream
pub struct StreamHandle<S> {
    stream: Option<S>,
    state: StreamState,
    fault: Option<String>,
    sample_rate: u32,
}

impl<S: InputStream> StreamHandle<S> {
    /// A handle holding nothing
    #[must_use]
    pub const fn closed() -> Self {
        Self {
            stream: None,
            state: StreamState::Closed,
            fault: None,
            sample_rate: 0,
        }
    }

    /// Open a stream on `device`
    ///
    /// Never fails: if the device cannot be opened the handle is returned in the
    /// `Faulted` state carrying the reason.
    pub fn open<B>(backend: &B, device: &DeviceConfig) -> Self
    where
        B: AudioBackend<Stream = S>,
    {
        let mut handle = Self::closed();
        handle.sample_rate = device.sample_rate;
        match backend.open_input(device) {
            Ok(stream) => {
                tracing::debug!(
                    device = %device.device_name,
                    sample_rate = device.sample_rate,
                    "input stream opened"
                );
                handle.stream = Some(stream);
                handle.state = StreamState::Open;
            }
            Err(e) => {
                tracing::warn!(device = %device.device_name, error = %e, "failed to open input stream");
                handle.fault = Some(e.to_string());
                handle.state = StreamState::Faulted;
            }
        }
        handle
    }

    /// Release the current stream and try to open a fresh one
    ///
    /// Returns true when the handle is `Open` afterwards. On failure the handle is left
    /// `Closed` with the reason kept in [`Self::fault_reason`].
    pub fn reopen<B>(&mut self, backend: &B, device: &DeviceConfig) -> bool
    where
        B: AudioBackend<Stream = S>,
    {
        self.close();
        let reopened = Self::open(backend, device);
        let ok = reopened.is_open();
        *self = reopened;
        if !ok {
            self.state = StreamState::Closed;
        }
        ok
    }

    /// Read exactly `frame_length` samples
    ///
    /// # Errors
    ///
    /// Returns the fault when the stream is not open or the read fails; the handle is
    /// then `Faulted` and its OS resource released
    pub async fn read(&mut self, frame_length: usize) -> std::result::Result<AudioFrame, StreamFault> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(StreamFault::Closed);
        };

        match stream.read(frame_length).await {
            Ok(samples) => Ok(AudioFrame::new(samples, self.sample_rate)),
            Err(fault) => {
                tracing::debug!(%fault, "input stream faulted");
                self.stream = None;
                self.state = StreamState::Faulted;
                self.fault = Some(fault.to_string());
                Err(fault)
            }
        }
    }

    /// Release the OS stream; safe to call in any state
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("input stream closed");
        }
        if self.state == StreamState::Open {
            self.state = StreamState::Closed;
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    /// Whether the handle is delivering audio
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, StreamState::Open)
    }

    /// Reason for the last open or read failure
    #[must_use]
    pub fn fault_reason(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    /// Sample rate of the stream
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
