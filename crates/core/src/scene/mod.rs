use std::collections::VecDeque;

use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{BellRigError, Result};

/// Immutable catalogue entry: an identifier the viewers understand plus how
/// long the scene plays once triggered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub duration: f32,
}

impl Scene {
    pub fn new(id: impl Into<String>, duration: f32) -> Self {
        Self {
            id: id.into(),
            duration,
        }
    }
}

/// Snapshot of the scene state machine, shaped for the broadcast wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneState {
    pub current_scene: Option<String>,
    pub idle: bool,
    pub remaining_scene_time: f32,
    pub elapsed_scene_time: f32,
}

/// State machine that turns bell triggers into scene playback.
///
/// The catalogue is fixed at construction. Playback follows a randomized
/// order consumed front to back and refilled with a fresh permutation when
/// exhausted; a scene never plays twice in a row unless the catalogue has a
/// single entry. Re-triggering while a scene is active restarts the countdown
/// with a new scene rather than queueing.
pub struct SceneManager {
    scenes: Vec<Scene>,
    play_order: VecDeque<Scene>,
    current: Option<Scene>,
    idle: bool,
    remaining: f32,
    rng: SmallRng,
}

impl SceneManager {
    /// Creates a manager over the given catalogue, seeded from entropy.
    pub fn new(scenes: Vec<Scene>) -> Result<Self> {
        Self::with_rng(scenes, SmallRng::from_entropy())
    }

    /// Creates a manager with an explicit RNG for deterministic playback.
    pub fn with_rng(scenes: Vec<Scene>, rng: SmallRng) -> Result<Self> {
        if scenes.is_empty() {
            return Err(BellRigError::config("scene catalogue must not be empty"));
        }
        if scenes.iter().any(|scene| scene.duration <= 0.0) {
            return Err(BellRigError::config("scene durations must be positive"));
        }
        Ok(Self {
            scenes,
            play_order: VecDeque::new(),
            current: None,
            idle: true,
            remaining: 0.0,
            rng,
        })
    }

    /// Advances to the next scene in the play order. Accepted in any state:
    /// while active it restarts the countdown with a new scene.
    pub fn bell_trigger(&mut self) {
        if self.play_order.is_empty() {
            self.refill_play_order();
        }
        if let Some(scene) = self.play_order.pop_front() {
            self.remaining = scene.duration;
            self.current = Some(scene);
            self.idle = false;
        }
    }

    /// Counts the active scene down by `dt` seconds, clamping at zero and
    /// flipping to idle once the countdown runs out. A no-op while idle.
    pub fn update(&mut self, dt: f32) {
        if self.idle {
            return;
        }
        self.remaining = (self.remaining - dt).max(0.0);
        if self.remaining <= 0.0 {
            self.idle = true;
        }
    }

    /// Returns an immutable snapshot of the current playback state.
    pub fn state(&self) -> SceneState {
        match &self.current {
            None => SceneState {
                current_scene: None,
                idle: true,
                remaining_scene_time: 0.0,
                elapsed_scene_time: 0.0,
            },
            Some(scene) => SceneState {
                current_scene: Some(scene.id.clone()),
                idle: self.idle,
                remaining_scene_time: self.remaining,
                elapsed_scene_time: if self.idle {
                    0.0
                } else {
                    scene.duration - self.remaining
                },
            },
        }
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    fn refill_play_order(&mut self) {
        let mut order = self.scenes.clone();
        order.shuffle(&mut self.rng);
        // Keep the last played scene away from the head of the fresh
        // permutation so a scene never repeats back to back.
        if order.len() > 1 {
            let repeats = match (&self.current, order.first()) {
                (Some(last), Some(first)) => first.id == last.id,
                _ => false,
            };
            if repeats {
                let head = order.remove(0);
                order.push(head);
            }
        }
        self.play_order = order.into();
    }
}

impl std::fmt::Debug for SceneManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneManager")
            .field("scenes", &self.scenes.len())
            .field("queued", &self.play_order.len())
            .field("current", &self.current)
            .field("idle", &self.idle)
            .field("remaining", &self.remaining)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn catalogue(n: usize) -> Vec<Scene> {
        (0..n)
            .map(|i| Scene::new(format!("scene-{i}"), 10.0))
            .collect()
    }

    fn manager(n: usize, seed: u64) -> SceneManager {
        SceneManager::with_rng(catalogue(n), SmallRng::seed_from_u64(seed)).unwrap()
    }

    #[test]
    fn rejects_empty_catalogue() {
        assert!(SceneManager::new(Vec::new()).is_err());
    }

    #[test]
    fn n_triggers_visit_every_scene_once() {
        let mut manager = manager(5, 7);
        let mut seen = HashSet::new();
        for _ in 0..5 {
            manager.bell_trigger();
            let state = manager.state();
            seen.insert(state.current_scene.unwrap());
        }
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn never_repeats_a_scene_back_to_back() {
        for seed in 0..20 {
            let mut manager = manager(3, seed);
            let mut previous: Option<String> = None;
            for _ in 0..30 {
                manager.bell_trigger();
                let current = manager.state().current_scene.unwrap();
                if let Some(previous) = &previous {
                    assert_ne!(previous, &current, "seed {seed} repeated {current}");
                }
                previous = Some(current);
            }
        }
    }

    #[test]
    fn single_scene_catalogue_repeats() {
        let mut manager = manager(1, 0);
        manager.bell_trigger();
        manager.bell_trigger();
        assert_eq!(manager.state().current_scene.unwrap(), "scene-0");
    }

    #[test]
    fn countdown_reaches_idle_exactly_once_and_never_goes_negative() {
        let mut manager = manager(2, 3);
        manager.bell_trigger();
        assert!(!manager.is_idle());

        let mut transitions = 0;
        let mut was_idle = false;
        for _ in 0..40 {
            manager.update(0.3);
            let state = manager.state();
            assert!(state.remaining_scene_time >= 0.0);
            if state.idle && !was_idle {
                transitions += 1;
            }
            was_idle = state.idle;
        }
        assert_eq!(transitions, 1);
        assert_eq!(manager.state().remaining_scene_time, 0.0);
    }

    #[test]
    fn retrigger_while_active_restarts_with_a_new_scene() {
        let mut manager = manager(4, 11);
        manager.bell_trigger();
        manager.update(2.5);
        let before = manager.state();
        manager.bell_trigger();
        let after = manager.state();
        assert!(!after.idle);
        assert_eq!(after.elapsed_scene_time, 0.0);
        assert_ne!(before.current_scene, after.current_scene);
    }

    #[test]
    fn idle_state_reports_zeroed_times() {
        let manager = manager(2, 0);
        let state = manager.state();
        assert!(state.idle);
        assert_eq!(state.current_scene, None);
        assert_eq!(state.remaining_scene_time, 0.0);
        assert_eq!(state.elapsed_scene_time, 0.0);
    }
}
