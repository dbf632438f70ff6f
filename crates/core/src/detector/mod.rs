use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{config::DetectorConfig, BellRigError, Result};

/// Half-width of the band-pass around the target frequency, in Hz.
const BAND_HALFWIDTH_HZ: f32 = 100.0;
/// Below this, a mean spectrum is treated as silence.
const SPECTRUM_EPSILON: f32 = 1e-6;
/// Finite ceiling for the in-band/out-of-band ratio when the out-of-band
/// energy vanishes.
const RATIO_SATURATION: f32 = 1e6;

/// Spectral onset detector for a short tonal transient ("bell").
///
/// Each block is band-limited around the target frequency; the ratio of the
/// in-band spectrum mean to the out-of-band remainder measures how bell-like
/// the block sounds. A trigger needs a sudden relative jump of that ratio
/// over the previous block, an absolute floor, and an elapsed cooldown.
///
/// The previous ratio is updated on every call, so the relative threshold
/// adapts to whatever the room is doing rather than acting as a fixed bar.
pub struct BellDetector {
    sample_rate: u32,
    block_size: usize,
    config: DetectorConfig,
    filter: BiquadBandpass,
    last_amplitude: f32,
    time_since_last_trigger: f32,
    fft: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    raw: Vec<f32>,
    filtered: Vec<f32>,
}

impl BellDetector {
    pub fn new(sample_rate: u32, block_size: usize, config: DetectorConfig) -> Self {
        let fft = RealFftPlanner::new().plan_fft_forward(block_size);
        let input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        let scratch = fft.make_scratch_vec();
        let filter = BiquadBandpass::new(
            config.target_freq_hz,
            BAND_HALFWIDTH_HZ * 2.0,
            sample_rate as f32,
        );
        Self {
            sample_rate,
            block_size,
            config,
            filter,
            // A bell may fire on the very first block; only an accepted
            // trigger starts a cooldown.
            last_amplitude: 0.0,
            time_since_last_trigger: f32::INFINITY,
            fft,
            input,
            spectrum,
            scratch,
            raw: vec![0.0; block_size],
            filtered: vec![0.0; block_size],
        }
    }

    /// Consumes one audio block and reports whether it contains a bell onset.
    pub fn detect(&mut self, block: &[i16]) -> Result<bool> {
        if block.len() != self.block_size {
            return Err(BellRigError::InvalidInput(
                "audio block length must match the configured block size",
            ));
        }

        for (slot, &sample) in self.raw.iter_mut().zip(block) {
            *slot = sample as f32 / 32_768.0;
        }
        self.filter.apply(&self.raw, &mut self.filtered);

        let raw_mean = self.spectrum_mean_raw()?;
        let filtered_mean = self.spectrum_mean_filtered()?;
        let bell_amplitude = bell_ratio(filtered_mean, raw_mean - filtered_mean);

        let sound_conditions = bell_amplitude
            > self.last_amplitude * self.config.growth_threshold
            && bell_amplitude > self.config.absolute_threshold;
        let cooled_down = self.time_since_last_trigger > self.config.cooldown_seconds;
        let fired = sound_conditions && cooled_down;

        if sound_conditions {
            // Either an accepted trigger, or the bell is still ringing during
            // the cooldown; both restart the clock.
            self.time_since_last_trigger = 0.0;
        } else {
            self.time_since_last_trigger += self.block_size as f32 / self.sample_rate as f32;
        }
        self.last_amplitude = bell_amplitude;

        Ok(fired)
    }

    /// Zeroes the adaptive state, as if no audio had been seen.
    pub fn reset(&mut self) {
        self.last_amplitude = 0.0;
        self.time_since_last_trigger = 0.0;
    }

    fn spectrum_mean_raw(&mut self) -> Result<f32> {
        self.input.copy_from_slice(&self.raw);
        self.fft
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)?;
        Ok(mean_magnitude(&self.spectrum))
    }

    fn spectrum_mean_filtered(&mut self) -> Result<f32> {
        self.input.copy_from_slice(&self.filtered);
        self.fft
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)?;
        Ok(mean_magnitude(&self.spectrum))
    }
}

/// In-band to out-of-band energy ratio with a defined policy for the
/// degenerate denominators: silence maps to zero, a purely in-band block
/// saturates to a finite ceiling instead of overflowing to infinity.
fn bell_ratio(filtered_mean: f32, residual_mean: f32) -> f32 {
    if residual_mean <= SPECTRUM_EPSILON {
        if filtered_mean <= SPECTRUM_EPSILON {
            0.0
        } else {
            RATIO_SATURATION
        }
    } else {
        (filtered_mean / residual_mean).min(RATIO_SATURATION)
    }
}

fn mean_magnitude(spectrum: &[Complex32]) -> f32 {
    if spectrum.is_empty() {
        return 0.0;
    }
    let sum: f32 = spectrum.iter().map(|bin| bin.norm()).sum();
    sum / spectrum.len() as f32
}

/// Second-order band-pass section (audio-EQ cookbook, constant peak gain),
/// applied direct-form-1 from a zeroed state so every block is filtered the
/// same way regardless of history.
struct BiquadBandpass {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl BiquadBandpass {
    fn new(center_hz: f32, bandwidth_hz: f32, sample_rate: f32) -> Self {
        let omega = 2.0 * PI * center_hz / sample_rate;
        let q = (center_hz / bandwidth_hz).max(f32::EPSILON);
        let alpha = omega.sin() / (2.0 * q);
        let a0 = 1.0 + alpha;
        Self {
            b0: alpha / a0,
            b1: 0.0,
            b2: -alpha / a0,
            a1: -2.0 * omega.cos() / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    fn apply(&self, input: &[f32], output: &mut [f32]) {
        let (mut x1, mut x2) = (0.0_f32, 0.0_f32);
        let (mut y1, mut y2) = (0.0_f32, 0.0_f32);
        for (slot, &x) in output.iter_mut().zip(input) {
            let y = self.b0 * x + self.b1 * x1 + self.b2 * x2 - self.a1 * y1 - self.a2 * y2;
            x2 = x1;
            x1 = x;
            y2 = y1;
            y1 = y;
            *slot = y;
        }
    }
}

impl fmt::Debug for BellDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BellDetector")
            .field("sample_rate", &self.sample_rate)
            .field("block_size", &self.block_size)
            .field("config", &self.config)
            .field("last_amplitude", &self.last_amplitude)
            .field("time_since_last_trigger", &self.time_since_last_trigger)
            .finish()
    }
}
