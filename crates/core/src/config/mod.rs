use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{scene::Scene, BellRigError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub detector: DetectorConfig,
    pub animation: AnimationConfig,
    pub dmx: DmxConfig,
    /// Scene catalogue played in a non-repeating random order.
    pub scenes: Vec<Scene>,
    /// When true, state snapshots are published only when the idle flag or
    /// the current scene changes instead of once per audio block.
    pub broadcast_on_change: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            detector: DetectorConfig::default(),
            animation: AnimationConfig::default(),
            dmx: DmxConfig::default(),
            scenes: vec![
                Scene::new("lanterns", 45.0),
                Scene::new("ripple", 30.0),
                Scene::new("embers", 60.0),
            ],
            broadcast_on_change: false,
        }
    }
}

impl AppConfig {
    /// Loads a configuration from a JSON file. Missing fields fall back to
    /// their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|err| BellRigError::config(format!("invalid config file: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the runtime relies on. Called before any loop
    /// starts so bad configurations fail fast.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(BellRigError::config("sample_rate must be positive"));
        }
        if self.audio.block_size < 2 {
            return Err(BellRigError::config("block_size must be at least 2"));
        }
        if self.dmx.refresh_rate_hz <= 0.0 {
            return Err(BellRigError::config("dmx refresh_rate_hz must be positive"));
        }
        if self.scenes.is_empty() {
            return Err(BellRigError::config("scene catalogue must not be empty"));
        }
        if let Some(scene) = self.scenes.iter().find(|scene| scene.duration <= 0.0) {
            return Err(BellRigError::config(format!(
                "scene {:?} must have a positive duration",
                scene.id
            )));
        }
        if let Some(channel) = self
            .animation
            .functional_channels
            .iter()
            .find(|&&channel| channel >= crate::dmx::UNIVERSE_SIZE)
        {
            return Err(BellRigError::config(format!(
                "functional channel {channel} is outside the universe"
            )));
        }
        Ok(())
    }
}

/// Configuration specific to the audio capture subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    /// Input device name; `None` selects the host default.
    pub input_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_size: 1024,
            input_device: None,
        }
    }
}

/// Tuning of the spectral bell (onset) detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Centre frequency of the bell fundamental, in Hz.
    pub target_freq_hz: f32,
    /// Relative growth the in-band/out-of-band ratio must show over the
    /// previous block to count as an onset.
    pub growth_threshold: f32,
    /// Floor on the ratio itself, rejecting quiet relative jumps.
    pub absolute_threshold: f32,
    /// Minimum time between two accepted triggers, in seconds.
    pub cooldown_seconds: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            target_freq_hz: 2600.0,
            growth_threshold: 2.0,
            absolute_threshold: 0.15,
            cooldown_seconds: 0.5,
        }
    }
}

/// Tuning of the envelope/flicker animation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Multiplicative decay applied to the excitement envelope each tick.
    pub envelope_decay: f32,
    /// Multiplicative decay applied to the per-channel peak-hold texture.
    pub flicker_decay: f32,
    /// Exponent applied to the per-channel uniform noise; higher values bias
    /// toward mostly-dark channels with sparse bright spikes.
    pub flicker_exponent: f32,
    /// Scale applied to the exponentiated noise.
    pub flicker_scale: f32,
    /// Envelope value a bell trigger resets the engine to.
    pub kick_value: f32,
    /// Channel indices driven by inversion rather than direct envelope
    /// multiplication (fixtures where "off" is the brighter wire state).
    pub functional_channels: Vec<usize>,
    /// Scale applied to inverted functional-channel intensities.
    pub functional_scale: f32,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            envelope_decay: 0.98,
            flicker_decay: 0.95,
            flicker_exponent: 10.0,
            flicker_scale: 0.1,
            kick_value: 80.0,
            functional_channels: vec![1],
            functional_scale: 0.25,
        }
    }
}

/// Configuration of the DMX serial output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DmxConfig {
    /// Serial device path; `None` triggers auto-discovery.
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Wall-clock rate of the transmit loop, in frames per second.
    pub refresh_rate_hz: f32,
}

impl Default for DmxConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 57_600,
            refresh_rate_hz: 30.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_empty_scene_catalogue() {
        let mut config = AppConfig::default();
        config.scenes.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_universe_functional_channel() {
        let mut config = AppConfig::default();
        config.animation.functional_channels.push(512);
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"detector": {"target_freq_hz": 1800.0}}"#).unwrap();
        assert_eq!(config.detector.target_freq_hz, 1800.0);
        assert_eq!(config.audio.block_size, 1024);
        assert!(!config.scenes.is_empty());
    }
}
