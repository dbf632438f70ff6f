use std::fmt;

use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{
    config::AnimationConfig,
    dmx::{LightUniverse, UNIVERSE_SIZE},
};

/// Envelope-driven flicker animator.
///
/// A scalar excitement envelope jumps on each bell trigger and decays
/// exponentially. Every tick, fresh uniform noise raised to a high power
/// seeds a per-channel peak-hold texture, so most channels stay dark while a
/// few spike bright and fade slowly. Channels in the functional set move
/// inversely and are capped lower; they model fixtures whose "off" wire
/// state is the brighter one.
pub struct AnimationEngine {
    config: AnimationConfig,
    value: f32,
    max_hold: [f32; UNIVERSE_SIZE],
    working: [f32; UNIVERSE_SIZE],
    rng: SmallRng,
}

impl AnimationEngine {
    pub fn new(config: AnimationConfig) -> Self {
        Self::with_rng(config, SmallRng::from_entropy())
    }

    /// Creates an engine with an explicit RNG for deterministic output.
    pub fn with_rng(config: AnimationConfig, rng: SmallRng) -> Self {
        Self {
            config,
            value: 0.0,
            max_hold: [0.0; UNIVERSE_SIZE],
            working: [0.0; UNIVERSE_SIZE],
            rng,
        }
    }

    /// Overwrites the excitement envelope. A bell trigger always resets the
    /// envelope to a fixed intensity rather than accumulating.
    pub fn kick(&mut self, amount: f32) {
        self.value = amount.max(0.0);
    }

    /// Returns the current excitement envelope value.
    pub fn envelope(&self) -> f32 {
        self.value
    }

    /// Produces the next 512-channel frame.
    pub fn tick(&mut self) -> LightUniverse {
        self.value *= self.config.envelope_decay;

        for slot in self.max_hold.iter_mut() {
            let draft = self
                .rng
                .gen::<f32>()
                .powf(self.config.flicker_exponent)
                * self.config.flicker_scale;
            *slot = slot.max(draft) * self.config.flicker_decay;
        }

        for (working, &hold) in self.working.iter_mut().zip(self.max_hold.iter()) {
            *working = hold * self.value;
        }
        for &channel in &self.config.functional_channels {
            if let Some(working) = self.working.get_mut(channel) {
                *working = (1.0 - *working) * self.config.functional_scale;
            }
        }

        let mut universe = LightUniverse::new();
        for (channel, &working) in self.working.iter().enumerate() {
            universe.set(channel, quantize(working));
        }
        universe
    }
}

/// Maps a working intensity to an 8-bit channel value, saturating at the
/// ends of the range.
fn quantize(value: f32) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

impl fmt::Debug for AnimationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnimationEngine")
            .field("config", &self.config)
            .field("value", &self.value)
            .finish()
    }
}
