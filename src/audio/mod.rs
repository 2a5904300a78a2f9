//! Audio input and output
//!
//! Microphone streams, device selection, frame resampling, and playback.

mod capture;
mod device;
mod frame;
mod playback;
mod resample;
mod stream;
mod tone;

pub use capture::{CpalBackend, CpalInputStream};
pub use device::{
    DeviceConfig, DevicePreference, DeviceSelector, InputDeviceInfo, native_frame_length,
};
pub use frame::{AudioFrame, f32_to_i16, i16_to_f32, rms_energy, samples_to_wav};
pub use playback::{
    CommandPlayback, CpalPlayback, PlaybackKind, PlaybackPort, decode_speech, select_playback,
};
pub use resample::{FrameResampler, expected_len, resample_buffer};
pub use stream::{AudioBackend, InputStream, StreamFault, StreamHandle, StreamState};
pub use tone::NotificationTone;
