//! Sample-rate conversion
//!
//! [`FrameResampler`] turns one native-rate block from the microphone into exactly the
//! number of samples the keyword detector consumes per call. Every call starts from a
//! reset filter state, so the same input always produces the same output.

use rubato::{FftFixedIn, Resampler};

use crate::audio::frame::f32_to_i16;
use crate::{Error, Result};

/// FFT sub-chunks per input chunk
const SUB_CHUNKS: usize = 2;

/// Chunk size used when resampling whole buffers (playback)
const BUFFER_CHUNK_SIZE: usize = 1024;

/// Converts native-rate blocks into fixed-length detector frames
pub struct FrameResampler {
    source_rate: u32,
    target_rate: u32,
    target_len: usize,
    chunk_size: usize,
    inner: Option<FftFixedIn<f64>>,
}

impl FrameResampler {
    /// Create a resampler from `source_rate` blocks of `source_len` samples to frames of
    /// exactly `target_len` samples at `target_rate`
    ///
    /// # Errors
    ///
    /// Returns error if a rate is zero or the FFT resampler cannot be built
    pub fn new(
        source_rate: u32,
        source_len: usize,
        target_rate: u32,
        target_len: usize,
    ) -> Result<Self> {
        if source_rate == 0 || target_rate == 0 {
            return Err(Error::Config(format!(
                "invalid resampling rates: {source_rate} Hz -> {target_rate} Hz"
            )));
        }

        let chunk_size = source_len.max(1);
        let inner = if source_rate == target_rate {
            None
        } else {
            let resampler = FftFixedIn::<f64>::new(
                source_rate as usize,
                target_rate as usize,
                chunk_size,
                SUB_CHUNKS,
                1,
            )
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;
            Some(resampler)
        };

        tracing::debug!(
            source_rate,
            target_rate,
            source_len,
            target_len,
            passthrough = inner.is_none(),
            "frame resampler initialized"
        );

        Ok(Self {
            source_rate,
            target_rate,
            target_len,
            chunk_size,
            inner,
        })
    }

    /// Resample `input` and return exactly the target frame length
    ///
    /// Output longer than the target is truncated, shorter output is zero-padded on the
    /// right. Empty input yields a frame of zeros.
    pub fn resample(&mut self, input: &[i16]) -> Vec<i16> {
        let mut output = match self.inner.as_mut() {
            None => input.to_vec(),
            Some(resampler) => {
                let expected = expected_len(input.len(), self.source_rate, self.target_rate);
                band_limited(resampler, self.chunk_size, input, expected)
            }
        };

        output.resize(self.target_len, 0);
        output
    }

    /// Whether input passes through without rate conversion
    #[must_use]
    pub const fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Exact output length of every call
    #[must_use]
    pub const fn target_len(&self) -> usize {
        self.target_len
    }
}

/// `round(len * to / from)` computed in integers
#[must_use]
pub fn expected_len(len: usize, from_rate: u32, to_rate: u32) -> usize {
    if from_rate == 0 {
        return 0;
    }
    let num = len as u128 * u128::from(to_rate);
    let den = u128::from(from_rate);
    usize::try_from((num + den / 2) / den).unwrap_or(usize::MAX)
}

fn band_limited(
    resampler: &mut FftFixedIn<f64>,
    chunk_size: usize,
    input: &[i16],
    expected: usize,
) -> Vec<i16> {
    if expected == 0 {
        return Vec::new();
    }

    resampler.reset();
    let delay = resampler.output_delay();
    let needed = delay + expected;

    let samples: Vec<f64> = input.iter().map(|&s| f64::from(s) / 32768.0).collect();
    let mut output: Vec<f64> = Vec::with_capacity(needed + resampler.output_frames_max());

    for block in samples.chunks(chunk_size) {
        let result = if block.len() == chunk_size {
            resampler.process(&[block], None)
        } else {
            resampler.process_partial(Some(&[block]), None)
        };
        match result {
            Ok(channels) => output.extend(channels.into_iter().next().unwrap_or_default()),
            Err(e) => {
                tracing::warn!(error = %e, "resample failed, padding frame");
                break;
            }
        }
    }

    // Drain the filter delay with silence
    while output.len() < needed {
        match resampler.process_partial(None::<&[&[f64]]>, None) {
            Ok(channels) => {
                let block = channels.into_iter().next().unwrap_or_default();
                if block.is_empty() {
                    break;
                }
                output.extend(block);
            }
            Err(e) => {
                tracing::warn!(error = %e, "resampler flush failed");
                break;
            }
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    output
        .into_iter()
        .skip(delay)
        .take(expected)
        .map(|v| f32_to_i16(v as f32))
        .collect()
}

/// Resample a whole f32 buffer (e.g. decoded speech) from one rate to another
///
/// # Errors
///
/// Returns error if the resampler cannot be built or fails
#[allow(clippy::cast_possible_truncation)]
pub fn resample_buffer(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedIn::<f64>::new(
        from_rate as usize,
        to_rate as usize,
        BUFFER_CHUNK_SIZE,
        SUB_CHUNKS,
        1,
    )
    .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let expected = expected_len(samples.len(), from_rate, to_rate);
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay);

    for chunk in input.chunks(BUFFER_CHUNK_SIZE) {
        let result = if chunk.len() == BUFFER_CHUNK_SIZE {
            resampler.process(&[chunk], None)
        } else {
            resampler.process_partial(Some(&[chunk]), None)
        }
        .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend(result.into_iter().next().unwrap_or_default());
    }

    while output.len() < expected + delay {
        let result = resampler
            .process_partial(None::<&[&[f64]]>, None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        let block = result.into_iter().next().unwrap_or_default();
        if block.is_empty() {
            break;
        }
        output.extend(block);
    }

    Ok(output
        .into_iter()
        .skip(delay)
        .take(expected)
        .map(|s| s as f32)
        .collect())
}
