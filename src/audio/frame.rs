//! PCM frames and sample helpers

use crate::Result;

/// A block of mono 16-bit samples tagged with its sample rate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl AudioFrame {
    /// Wrap samples captured at `sample_rate`
    #[must_use]
    pub const fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Samples in capture order
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count (always mono)
    #[must_use]
    pub const fn channels(&self) -> u16 {
        1
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frame duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// RMS energy of the frame in the [0, 1] range
    #[must_use]
    pub fn energy(&self) -> f32 {
        rms_energy(&self.samples)
    }

    /// Take the samples out of the frame
    #[must_use]
    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

/// Convert an i16 sample to f32 in [-1.0, 1.0)
#[must_use]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Convert an f32 sample in [-1.0, 1.0] to i16, clamping out-of-range values
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).round().clamp(-32768.0, 32767.0) as i16
}

/// Calculate RMS energy of i16 samples, normalized to [0, 1]
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let v = i16_to_f32(s);
            v * v
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Encode mono i16 samples as WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}
