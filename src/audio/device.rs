//! Input device selection
//!
//! The selector is a pure policy over a device list so it can be exercised without
//! audio hardware. The live list comes from [`crate::audio::AudioBackend::input_devices`].

use std::fmt;
use std::ops::RangeInclusive;

use crate::wake::DetectorConfig;
use crate::{Error, Result};

/// Description of one input-capable (or not) device as reported by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDeviceInfo {
    /// Position in the host's enumeration order
    pub index: usize,

    /// Human-readable device name
    pub name: String,

    /// Maximum input channels (0 = output only)
    pub max_input_channels: u16,

    /// Sample rate of the device's default input configuration
    pub default_sample_rate: u32,

    /// Sample-rate ranges the device accepts
    pub supported_rates: Vec<RangeInclusive<u32>>,
}

impl InputDeviceInfo {
    /// Whether the device can capture audio at all
    #[must_use]
    pub const fn is_input_capable(&self) -> bool {
        self.max_input_channels > 0
    }

    /// Whether the device accepts `rate` natively
    #[must_use]
    pub fn supports_rate(&self, rate: u32) -> bool {
        self.supported_rates.iter().any(|r| r.contains(&rate))
    }
}

impl fmt::Display for InputDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({} ch, {} Hz)",
            self.index, self.name, self.max_input_channels, self.default_sample_rate
        )
    }
}

/// Which device the user asked for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DevicePreference {
    /// First input-capable device in enumeration order
    #[default]
    FirstInput,
    /// Device at a fixed enumeration index
    Index(usize),
    /// First input-capable device whose name contains this text (case-insensitive)
    Name(String),
}

impl DevicePreference {
    /// Parse a user-supplied device string: a number selects by index, anything else by name
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("default") {
            return Self::FirstInput;
        }
        value
            .parse::<usize>()
            .map_or_else(|_| Self::Name(value.to_string()), Self::Index)
    }
}

/// Picks the capture device and its native rate
#[derive(Debug, Clone, Default)]
pub struct DeviceSelector {
    preference: DevicePreference,
    prefer_detector_rate: bool,
}

impl DeviceSelector {
    /// Create a selector
    ///
    /// With `prefer_detector_rate`, a device that natively supports the detector's rate is
    /// opened at that rate so no resampling is needed.
    #[must_use]
    pub const fn new(preference: DevicePreference, prefer_detector_rate: bool) -> Self {
        Self {
            preference,
            prefer_detector_rate,
        }
    }

    /// Choose a device from `devices`
    ///
    /// # Errors
    ///
    /// Returns error if no device matches the preference or none can capture audio
    pub fn select<'a>(&self, devices: &'a [InputDeviceInfo]) -> Result<&'a InputDeviceInfo> {
        match &self.preference {
            DevicePreference::FirstInput => devices
                .iter()
                .find(|d| d.is_input_capable())
                .ok_or_else(|| Error::Device("no input device found".to_string())),
            DevicePreference::Index(index) => {
                let device = devices
                    .iter()
                    .find(|d| d.index == *index)
                    .ok_or_else(|| Error::Device(format!("no device at index {index}")))?;
                if device.is_input_capable() {
                    Ok(device)
                } else {
                    Err(Error::Device(format!(
                        "device {index} ({}) has no input channels",
                        device.name
                    )))
                }
            }
            DevicePreference::Name(name) => {
                let needle = name.to_lowercase();
                devices
                    .iter()
                    .filter(|d| d.is_input_capable())
                    .find(|d| d.name.to_lowercase().contains(&needle))
                    .ok_or_else(|| Error::Device(format!("no input device matching \"{name}\"")))
            }
        }
    }

    /// Choose a device and derive its capture configuration for `detector`
    ///
    /// # Errors
    ///
    /// Returns error if no suitable device is found
    pub fn configure(
        &self,
        devices: &[InputDeviceInfo],
        detector: &DetectorConfig,
    ) -> Result<DeviceConfig> {
        let device = self.select(devices)?;
        let rate = if self.prefer_detector_rate && device.supports_rate(detector.sample_rate) {
            detector.sample_rate
        } else {
            device.default_sample_rate
        };

        let config = DeviceConfig::new(device, rate, detector);
        tracing::info!(
            device = %device.name,
            index = device.index,
            sample_rate = config.sample_rate,
            frame_length = config.frame_length,
            "selected input device"
        );
        Ok(config)
    }
}

/// Capture configuration for the selected device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Enumeration index of the device
    pub device_index: usize,

    /// Device name (used to find the device again on reopen)
    pub device_name: String,

    /// Native capture rate (`R_s`)
    pub sample_rate: u32,

    /// Samples per scanning read (`N_s = ceil(N_d * R_s / R_d)`)
    pub frame_length: usize,
}

impl DeviceConfig {
    /// Derive the capture configuration for `device` at `sample_rate`
    #[must_use]
    pub fn new(device: &InputDeviceInfo, sample_rate: u32, detector: &DetectorConfig) -> Self {
        Self {
            device_index: device.index,
            device_name: device.name.clone(),
            sample_rate,
            frame_length: native_frame_length(
                detector.frame_length,
                sample_rate,
                detector.sample_rate,
            ),
        }
    }
}

/// `ceil(detector_len * native_rate / detector_rate)`
#[must_use]
pub fn native_frame_length(detector_len: usize, native_rate: u32, detector_rate: u32) -> usize {
    if detector_rate == 0 {
        return detector_len;
    }
    let num = detector_len as u128 * u128::from(native_rate);
    let den = u128::from(detector_rate);
    usize::try_from(num.div_ceil(den)).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(index: usize, name: &str, channels: u16, rate: u32) -> InputDeviceInfo {
        InputDeviceInfo {
            index,
            name: name.to_string(),
            max_input_channels: channels,
            default_sample_rate: rate,
            supported_rates: vec![8000..=rate],
        }
    }

    fn devices() -> Vec<InputDeviceInfo> {
        vec![
            device(0, "HDMI Output", 0, 48000),
            device(1, "Built-in Microphone", 1, 44100),
            device(2, "USB Headset Mic", 2, 48000),
        ]
    }

    fn detector() -> DetectorConfig {
        DetectorConfig::new(16000, 512, vec!["jarvis".to_string()])
    }

    #[test]
    fn test_first_input_skips_output_only() {
        let list = devices();
        let selected = DeviceSelector::default().select(&list).unwrap();
        assert_eq!(selected.index, 1);
    }

    #[test]
    fn test_select_by_index() {
        let list = devices();
        let selector = DeviceSelector::new(DevicePreference::Index(2), false);
        assert_eq!(selector.select(&list).unwrap().name, "USB Headset Mic");

        let selector = DeviceSelector::new(DevicePreference::Index(0), false);
        assert!(selector.select(&list).is_err());

        let selector = DeviceSelector::new(DevicePreference::Index(9), false);
        assert!(selector.select(&list).is_err());
    }

    #[test]
    fn test_select_by_name() {
        let list = devices();
        let selector = DeviceSelector::new(DevicePreference::Name("usb".to_string()), false);
        assert_eq!(selector.select(&list).unwrap().index, 2);
    }

    #[test]
    fn test_empty_list_fails() {
        assert!(DeviceSelector::default().select(&[]).is_err());
    }

    #[test]
    fn test_parse_preference() {
        assert_eq!(DevicePreference::parse("2"), DevicePreference::Index(2));
        assert_eq!(
            DevicePreference::parse("Headset"),
            DevicePreference::Name("Headset".to_string())
        );
        assert_eq!(DevicePreference::parse("  "), DevicePreference::FirstInput);
    }

    #[test]
    fn test_native_frame_length() {
        assert_eq!(native_frame_length(512, 48000, 16000), 1536);
        assert_eq!(native_frame_length(512, 44100, 16000), 1412);
        assert_eq!(native_frame_length(512, 16000, 16000), 512);
    }

    #[test]
    fn test_configure_prefers_detector_rate() {
        let list = devices();
        let selector = DeviceSelector::new(DevicePreference::Index(2), true);
        let config = selector.configure(&list, &detector()).unwrap();
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.frame_length, 512);

        let selector = DeviceSelector::new(DevicePreference::Index(2), false);
        let config = selector.configure(&list, &detector()).unwrap();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.frame_length, 1536);
    }
}
