//! Core library for the bell-triggered DMX lighting rig.
//!
//! A live audio feed drives the whole pipeline: the [`detector`] listens for
//! a bell onset in each captured block, the [`animation`] engine turns the
//! resulting excitement envelope into a 512-channel light frame, the
//! [`scene`] state machine picks what the viewers see, and the [`dmx`]
//! transmitter pushes frames over the serial wire on its own clock. The
//! [`orchestrator`] wires these together and owns the handoff between the
//! audio-driven and timer-driven halves.

pub mod animation;
pub mod broadcast;
pub mod config;
pub mod detector;
pub mod dmx;
pub mod error;
pub mod orchestrator;
pub mod scene;

pub use animation::AnimationEngine;
pub use broadcast::{AudioReactiveState, ChannelSink, NullSink, StateSink, StateSnapshot};
pub use config::{AnimationConfig, AppConfig, AudioConfig, DetectorConfig, DmxConfig};
pub use detector::BellDetector;
pub use dmx::{DmxTransmitter, LightUniverse, UNIVERSE_SIZE};
pub use error::{BellRigError, Result};
pub use orchestrator::{Orchestrator, ShutdownFlag};
pub use scene::{Scene, SceneManager, SceneState};
