use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::scene::SceneState;

/// Audio-reactive portion of the published state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioReactiveState {
    /// Current excitement envelope value.
    pub ding_envelope: f32,
    /// Total bell triggers accepted since startup.
    pub ding_count: u64,
}

/// Snapshot pushed to the external broadcaster after an analysis step. The
/// field names are the wire contract the viewer clients consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub audio_reactive: AudioReactiveState,
    pub scenes: SceneState,
}

/// Best-effort consumer of state snapshots. Implementations must never
/// block or fail loudly: the publisher is the real-time analysis step.
pub trait StateSink: Send {
    fn publish(&self, snapshot: StateSnapshot);
}

/// Discards every snapshot. Useful for headless runs and tests.
#[derive(Debug, Default)]
pub struct NullSink;

impl StateSink for NullSink {
    fn publish(&self, _snapshot: StateSnapshot) {}
}

/// Hands snapshots to a bounded channel. When the consumer falls behind the
/// snapshot is dropped with a warning instead of blocking the analysis step.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<StateSnapshot>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, Receiver<StateSnapshot>) {
        let (sender, receiver) = bounded(capacity);
        (Self { sender }, receiver)
    }
}

impl StateSink for ChannelSink {
    fn publish(&self, snapshot: StateSnapshot) {
        if let Err(err) = self.sender.try_send(snapshot) {
            tracing::warn!(%err, "dropping state snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(count: u64) -> StateSnapshot {
        StateSnapshot {
            audio_reactive: AudioReactiveState {
                ding_envelope: 0.5,
                ding_count: count,
            },
            scenes: SceneState {
                current_scene: Some("lanterns".to_string()),
                idle: false,
                remaining_scene_time: 12.0,
                elapsed_scene_time: 3.0,
            },
        }
    }

    #[test]
    fn serializes_to_the_expected_wire_shape() {
        let value = serde_json::to_value(snapshot(3)).unwrap();
        assert_eq!(value["audio_reactive"]["ding_envelope"], 0.5);
        assert_eq!(value["audio_reactive"]["ding_count"], 3);
        assert_eq!(value["scenes"]["current_scene"], "lanterns");
        assert_eq!(value["scenes"]["idle"], false);
        assert_eq!(value["scenes"]["remaining_scene_time"], 12.0);
        assert_eq!(value["scenes"]["elapsed_scene_time"], 3.0);
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (sink, receiver) = ChannelSink::new(1);
        sink.publish(snapshot(1));
        sink.publish(snapshot(2));
        assert_eq!(receiver.recv().unwrap().audio_reactive.ding_count, 1);
        assert!(receiver.try_recv().is_err());
    }
}
