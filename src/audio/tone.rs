//! Notification tone played when the wake word fires

/// Parameters of the notification beep
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NotificationTone {
    /// Tone frequency in Hz (A5)
    pub frequency: f32,
    /// Tone length in seconds
    pub duration_secs: f32,
    /// Output sample rate
    pub sample_rate: u32,
    /// Linear fade in/out length in seconds
    pub fade_secs: f32,
}

impl Default for NotificationTone {
    fn default() -> Self {
        Self {
            frequency: 880.0,
            duration_secs: 0.1,
            sample_rate: 48000,
            fade_secs: 0.005,
        }
    }
}

impl NotificationTone {
    /// Render the tone as f32 samples, peak-normalized to full scale
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn render(&self) -> Vec<f32> {
        let rate = self.sample_rate as f32;
        let len = (self.duration_secs * rate) as usize;
        let fade_len = ((self.fade_secs * rate) as usize).min(len / 2);

        let mut samples: Vec<f32> = (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * self.frequency * i as f32 / rate).sin())
            .collect();

        if fade_len > 1 {
            let step = 1.0 / (fade_len - 1) as f32;
            for i in 0..fade_len {
                let gain = i as f32 * step;
                samples[i] *= gain;
                samples[len - 1 - i] *= gain;
            }
        }

        let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        if peak > 0.0 {
            for s in &mut samples {
                *s /= peak;
            }
        }

        samples
    }
}
