use std::{
    fmt,
    io::Write,
    sync::{Arc, Condvar, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use arc_swap::ArcSwap;

use crate::{
    animation::AnimationEngine,
    broadcast::{AudioReactiveState, StateSink, StateSnapshot},
    config::AppConfig,
    detector::BellDetector,
    dmx::{DmxTransmitter, LightUniverse},
    scene::SceneManager,
    Result,
};

/// Cooperative shutdown signal shared by the capture path, the transmit
/// loop, and the main thread. The condvar makes every wait interruptible, so
/// requesting shutdown wakes sleepers immediately instead of leaving them to
/// finish their period.
#[derive(Clone, Default)]
pub struct ShutdownFlag {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown and wakes every waiter.
    pub fn request(&self) {
        let (lock, condvar) = &*self.inner;
        let mut requested = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *requested = true;
        condvar.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        let (lock, _) = &*self.inner;
        match lock.lock() {
            Ok(guard) => *guard,
            // A poisoned flag means a sibling thread panicked; treat that as
            // a shutdown request so the loops wind down.
            Err(_) => true,
        }
    }

    /// Sleeps for at most `timeout`, returning early if shutdown is
    /// requested. Returns whether shutdown has been requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, condvar) = &*self.inner;
        let guard = match lock.lock() {
            Ok(guard) => guard,
            Err(_) => return true,
        };
        match condvar.wait_timeout_while(guard, timeout, |requested| !*requested) {
            Ok((guard, _)) => *guard,
            Err(_) => true,
        }
    }
}

impl fmt::Debug for ShutdownFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownFlag")
            .field("requested", &self.is_requested())
            .finish()
    }
}

/// Wires the detector, scene manager, and animation engine together and owns
/// the handoff between the two independently clocked activities.
///
/// The analysis step ([`Orchestrator::process_block`]) is called once per
/// captured audio block and is the sole writer of the shared frame slot; the
/// transmit loop is its sole reader. Each tick publishes a complete,
/// immutable frame through an atomic swap, so the reader can never observe a
/// torn frame regardless of how the two cadences interleave.
pub struct Orchestrator {
    detector: BellDetector,
    scenes: SceneManager,
    animation: AnimationEngine,
    sink: Box<dyn StateSink>,
    frame: Arc<ArcSwap<LightUniverse>>,
    shutdown: ShutdownFlag,
    ding_count: u64,
    kick_value: f32,
    block_seconds: f32,
    broadcast_on_change: bool,
    last_broadcast: Option<(bool, Option<String>)>,
}

impl Orchestrator {
    pub fn new(config: &AppConfig, sink: Box<dyn StateSink>) -> Result<Self> {
        config.validate()?;
        let detector = BellDetector::new(
            config.audio.sample_rate,
            config.audio.block_size,
            config.detector.clone(),
        );
        let scenes = SceneManager::new(config.scenes.clone())?;
        let animation = AnimationEngine::new(config.animation.clone());
        Ok(Self::from_parts(config, detector, scenes, animation, sink))
    }

    /// Assembles an orchestrator from pre-built components, e.g. with seeded
    /// RNGs for deterministic tests.
    pub fn from_parts(
        config: &AppConfig,
        detector: BellDetector,
        scenes: SceneManager,
        animation: AnimationEngine,
        sink: Box<dyn StateSink>,
    ) -> Self {
        Self {
            detector,
            scenes,
            animation,
            sink,
            frame: Arc::new(ArcSwap::from_pointee(LightUniverse::new())),
            shutdown: ShutdownFlag::new(),
            ding_count: 0,
            kick_value: config.animation.kick_value,
            block_seconds: config.audio.block_size as f32 / config.audio.sample_rate as f32,
            broadcast_on_change: config.broadcast_on_change,
            last_broadcast: None,
        }
    }

    /// Runs one analysis step over a captured audio block: onset detection,
    /// scene/envelope updates, frame publication, and the state snapshot.
    /// Performs no blocking I/O; it is safe to call from the capture
    /// callback.
    pub fn process_block(&mut self, block: &[i16]) -> Result<()> {
        if self.detector.detect(block)? {
            self.ding_count += 1;
            self.animation.kick(self.kick_value);
            self.scenes.bell_trigger();
            tracing::debug!(count = self.ding_count, "bell trigger");
        }

        let universe = self.animation.tick();
        self.frame.store(Arc::new(universe));
        self.scenes.update(self.block_seconds);
        self.publish_state();
        Ok(())
    }

    fn publish_state(&mut self) {
        let scenes = self.scenes.state();
        if self.broadcast_on_change {
            let key = (scenes.idle, scenes.current_scene.clone());
            if self.last_broadcast.as_ref() == Some(&key) {
                return;
            }
            self.last_broadcast = Some(key);
        }
        self.sink.publish(StateSnapshot {
            audio_reactive: AudioReactiveState {
                ding_envelope: self.animation.envelope(),
                ding_count: self.ding_count,
            },
            scenes,
        });
    }

    /// Starts the independently clocked transmit loop. Every period it
    /// checks the shutdown flag first (exiting without a final render),
    /// reads the latest published frame, and writes it out. A failed serial
    /// write is logged and superseded by the next period's frame; there is
    /// no fast retry.
    pub fn spawn_transmit_loop<W: Write + Send + 'static>(
        &self,
        mut transmitter: DmxTransmitter<W>,
        refresh_rate_hz: f32,
    ) -> JoinHandle<()> {
        let frame = Arc::clone(&self.frame);
        let shutdown = self.shutdown.clone();
        let period = Duration::from_secs_f32(1.0 / refresh_rate_hz.max(f32::EPSILON));
        thread::spawn(move || {
            loop {
                if shutdown.wait_timeout(period) {
                    break;
                }
                let universe = frame.load_full();
                if let Err(err) = transmitter.render(&universe) {
                    tracing::warn!(%err, "dmx frame dropped");
                }
            }
            tracing::debug!("transmit loop stopped");
        })
    }

    /// Returns the flag both loops observe. Cloning is cheap; all clones
    /// share the same signal.
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Returns the most recently published frame.
    pub fn latest_frame(&self) -> Arc<LightUniverse> {
        self.frame.load_full()
    }

    pub fn ding_count(&self) -> u64 {
        self.ding_count
    }

    pub fn envelope(&self) -> f32 {
        self.animation.envelope()
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("detector", &self.detector)
            .field("scenes", &self.scenes)
            .field("ding_count", &self.ding_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use rand::{rngs::SmallRng, SeedableRng};

    use super::*;
    use crate::broadcast::{ChannelSink, NullSink};

    const RATE: u32 = 44_100;
    const BLOCK: usize = 1024;

    fn test_config() -> AppConfig {
        AppConfig::default()
    }

    fn orchestrator(sink: Box<dyn StateSink>) -> Orchestrator {
        let config = test_config();
        let detector = BellDetector::new(RATE, BLOCK, config.detector.clone());
        let scenes =
            SceneManager::with_rng(config.scenes.clone(), SmallRng::seed_from_u64(9)).unwrap();
        let animation =
            AnimationEngine::with_rng(config.animation.clone(), SmallRng::seed_from_u64(9));
        Orchestrator::from_parts(&config, detector, scenes, animation, sink)
    }

    fn bell_block() -> Vec<i16> {
        let freq = 60.0 * RATE as f32 / BLOCK as f32;
        (0..BLOCK)
            .map(|n| {
                let phase = 2.0 * PI * freq * n as f32 / RATE as f32;
                (phase.sin() * 12_000.0) as i16
            })
            .collect()
    }

    #[test]
    fn silence_then_one_bell_yields_one_trigger_and_scene_transition() {
        let (sink, receiver) = ChannelSink::new(256);
        let mut orchestrator = orchestrator(Box::new(sink));
        let silence = vec![0_i16; BLOCK];

        // Two seconds of silence: no triggers, rig stays idle.
        let silent_blocks = (2.0 * RATE as f32 / BLOCK as f32) as usize;
        for _ in 0..silent_blocks {
            orchestrator.process_block(&silence).unwrap();
        }
        assert_eq!(orchestrator.ding_count(), 0);

        // One bell burst, then a few identical blocks inside the cooldown.
        let bell = bell_block();
        orchestrator.process_block(&bell).unwrap();
        for _ in 0..5 {
            orchestrator.process_block(&bell).unwrap();
        }
        assert_eq!(orchestrator.ding_count(), 1);

        let snapshots: Vec<StateSnapshot> = receiver.try_iter().collect();
        let idle_before_bell = &snapshots[silent_blocks - 1];
        assert!(idle_before_bell.scenes.idle);
        assert_eq!(idle_before_bell.audio_reactive.ding_count, 0);

        let after_bell = snapshots.last().unwrap();
        assert!(!after_bell.scenes.idle);
        assert_eq!(after_bell.audio_reactive.ding_count, 1);
        assert!(after_bell.scenes.current_scene.is_some());
        assert!(after_bell.audio_reactive.ding_envelope > 0.0);
    }

    #[test]
    fn analysis_step_publishes_a_fresh_frame_each_tick() {
        let mut orchestrator = orchestrator(Box::new(NullSink));
        let silence = vec![0_i16; BLOCK];
        let before = orchestrator.latest_frame();
        orchestrator.process_block(&silence).unwrap();
        let after = orchestrator.latest_frame();
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn broadcast_on_change_only_publishes_transitions() {
        let mut config = test_config();
        config.broadcast_on_change = true;
        let (sink, receiver) = ChannelSink::new(256);
        let detector = BellDetector::new(RATE, BLOCK, config.detector.clone());
        let scenes =
            SceneManager::with_rng(config.scenes.clone(), SmallRng::seed_from_u64(4)).unwrap();
        let animation =
            AnimationEngine::with_rng(config.animation.clone(), SmallRng::seed_from_u64(4));
        let mut orchestrator =
            Orchestrator::from_parts(&config, detector, scenes, animation, Box::new(sink));

        let silence = vec![0_i16; BLOCK];
        for _ in 0..50 {
            orchestrator.process_block(&silence).unwrap();
        }
        // One snapshot for the initial idle state, none for the repeats.
        assert_eq!(receiver.try_iter().count(), 1);

        orchestrator.process_block(&bell_block()).unwrap();
        let snapshots: Vec<StateSnapshot> = receiver.try_iter().collect();
        assert_eq!(snapshots.len(), 1);
        assert!(!snapshots[0].scenes.idle);
    }

    #[test]
    fn transmit_loop_renders_latest_frame_and_stops_on_shutdown() {
        let orchestrator = orchestrator(Box::new(NullSink));
        let writes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let sink = CountingSink {
            writes: Arc::clone(&writes),
        };
        let transmitter = DmxTransmitter::new(sink).unwrap();

        let handle = orchestrator.spawn_transmit_loop(transmitter, 200.0);
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while writes.load(std::sync::atomic::Ordering::SeqCst) < 3 {
            assert!(std::time::Instant::now() < deadline, "no frames rendered");
            thread::sleep(Duration::from_millis(5));
        }

        orchestrator.shutdown_flag().request();
        handle.join().unwrap();
    }

    #[test]
    fn shutdown_wakes_a_waiting_thread_early() {
        let flag = ShutdownFlag::new();
        let waiter = flag.clone();
        let started = std::time::Instant::now();
        let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        flag.request();
        assert!(handle.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn transmit_loop_survives_serial_write_failures() {
        let orchestrator = orchestrator(Box::new(NullSink));
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let sink = FlakySink {
            attempts: Arc::clone(&attempts),
        };
        let transmitter = DmxTransmitter::new(sink).unwrap();

        let handle = orchestrator.spawn_transmit_loop(transmitter, 200.0);
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while attempts.load(std::sync::atomic::Ordering::SeqCst) < 4 {
            assert!(std::time::Instant::now() < deadline, "loop stopped retrying");
            thread::sleep(Duration::from_millis(5));
        }

        orchestrator.shutdown_flag().request();
        handle.join().unwrap();
    }

    /// Write sink that counts completed frames.
    #[derive(Default)]
    struct CountingSink {
        writes: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Write for CountingSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.writes
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Write sink that fails every frame after construction succeeds.
    #[derive(Default)]
    struct FlakySink {
        attempts: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Write for FlakySink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let attempt = self
                .attempts
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            // Let the two init commands through so construction succeeds.
            if attempt < 2 {
                Ok(buf.len())
            } else {
                Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "serial write timed out",
                ))
            }
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
