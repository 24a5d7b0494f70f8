//! Frame loop with statum state machine driving the dispatcher
//!
//! Each tick polls the input source, moves the avatar's hand joints, steps the
//! world, builds the controller snapshot and hands it to the dispatcher.
//! Afterwards the host failure policy disables modules that kept failing.
//!
//! # State Machine
//!
//! ```text
//! Configured ──► Running ──► Stopping ──► Stopped
//! ```

use crate::controller::{ControllerData, Hand, InputSource, SnapshotBuilder};
use crate::dispatcher::{ControllerDispatcher, DispatchError, FrameReport};
use crate::persistence::{ConfigError, DispatcherConfig, DispatcherSettings};
use crate::world::SharedWorld;
use statum::{machine, state};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("World unavailable: {0}")]
    WorldUnavailable(String),

    #[error("Dispatcher error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Frame loop task failed: {0}")]
    TaskFailed(String),
}

/// Counters collected over the lifetime of a frame loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopStats {
    pub frames: u64,
    pub module_failures: u64,
    /// Modules disabled by the failure policy, in order
    pub disabled_modules: Vec<String>,
    /// Frames in which each module's `run` was invoked
    pub run_frames: BTreeMap<String, u64>,
}

impl LoopStats {
    fn record(&mut self, report: &FrameReport) {
        self.frames += 1;
        self.module_failures += report.failures.len() as u64;
        for name in &report.ran {
            *self.run_frames.entry(name.clone()).or_default() += 1;
        }
    }
}

/// Lifecycle states of the frame loop
#[state]
#[derive(Debug, Clone)]
pub enum FrameLoopState {
    Configured, // Dispatcher populated, not ticking yet
    Running,    // Ticking at the configured rate
    Stopping,   // Shutdown requested, modules still enabled
    Stopped,    // All modules disabled
}

#[machine]
pub struct FrameLoop<S: FrameLoopState> {
    dispatcher: ControllerDispatcher,
    world: SharedWorld,
    input: Box<dyn InputSource>,
    builder: SnapshotBuilder,
    settings: DispatcherSettings,
    stats: LoopStats,
}

impl<S: FrameLoopState> FrameLoop<S> {
    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn dispatcher(&self) -> &ControllerDispatcher {
        &self.dispatcher
    }

    pub fn world(&self) -> &SharedWorld {
        &self.world
    }
}

impl FrameLoop<Configured> {
    pub fn create(
        dispatcher: ControllerDispatcher,
        world: SharedWorld,
        input: Box<dyn InputSource>,
        config: &DispatcherConfig,
    ) -> Self {
        info!(
            "Creating frame loop at {}Hz with {} module(s)",
            config.dispatcher.frame_rate_hz,
            dispatcher.module_names().len()
        );

        Self::new(
            dispatcher,
            world,
            input,
            SnapshotBuilder::new(config.input.clone()),
            config.dispatcher.clone(),
            LoopStats::default(),
        )
    }

    pub fn start(self) -> FrameLoop<Running> {
        info!("Starting frame loop");
        self.transition()
    }
}

impl FrameLoop<Running> {
    /// Runs a single frame and applies the failure policy
    pub fn step(&mut self, delta_time: f32) -> Result<FrameReport, HostError> {
        let frame = self.builder.frame() + 1;
        let raw = self.input.poll(frame, delta_time);

        let data: ControllerData = {
            let mut world = self
                .world
                .write()
                .map_err(|e| HostError::WorldUnavailable(e.to_string()))?;
            for hand in Hand::BOTH {
                let pose = raw.hand_poses[hand.index()];
                if pose.valid {
                    world.set_hand_joint(hand, pose);
                }
            }
            world.step(delta_time);
            self.builder.build(&raw, &world)
        };

        let report = self.dispatcher.update(&data, delta_time);
        for failure in &report.failures {
            debug!("Frame {}: {} failed: {}", report.frame, failure.module, failure.error);
        }
        self.stats.record(&report);

        for name in self
            .dispatcher
            .failing_modules(self.settings.max_consecutive_failures)
        {
            warn!(
                "Disabling module {} after {} consecutive failing frames",
                name,
                self.dispatcher.consecutive_failures(&name)
            );
            if self.dispatcher.disable_module(&name) {
                self.stats.disabled_modules.push(name);
            }
        }

        Ok(report)
    }

    fn frame_limit_reached(&self) -> bool {
        self.settings.max_frames > 0 && self.stats.frames >= self.settings.max_frames
    }

    /// Ticks until the shutdown signal arrives or the frame limit is reached
    pub async fn run_until_shutdown(
        mut self,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> Result<FrameLoop<Stopping>, HostError> {
        let frame_interval = self.settings.frame_interval();
        let delta_time = frame_interval.as_secs_f32();
        let mut ticker = tokio::time::interval(frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Frame loop running every {:?}", frame_interval);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Shutdown signal received for frame loop");
                    break;
                }

                _ = ticker.tick() => {
                    self.step(delta_time)?;
                    if self.frame_limit_reached() {
                        info!("Frame limit of {} reached", self.settings.max_frames);
                        break;
                    }
                }
            }
        }

        Ok(self.transition())
    }

    pub fn stop(self) -> FrameLoop<Stopping> {
        self.transition()
    }
}

impl FrameLoop<Stopping> {
    /// Disables every module and logs the final world state
    pub fn shutdown(mut self) -> FrameLoop<Stopped> {
        info!("Shutting down frame loop after {} frame(s)", self.stats.frames);
        self.dispatcher.shutdown();

        match self.world.read() {
            Ok(world) => world.log_summary(),
            Err(e) => warn!("World unavailable for summary: {}", e),
        }
        self.transition()
    }
}

impl FrameLoop<Stopped> {
    pub fn into_stats(self) -> LoopStats {
        self.stats
    }
}

/// Handle for a frame loop running in a tokio task
#[derive(Debug)]
pub struct FrameLoopHandle {
    task_handle: Option<JoinHandle<Result<LoopStats, HostError>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl FrameLoopHandle {
    /// Starts the frame loop in a background task
    pub fn spawn(frame_loop: FrameLoop<Configured>) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let running = frame_loop.start();

        let task_handle = tokio::spawn(async move {
            match running.run_until_shutdown(shutdown_rx).await {
                Ok(stopping) => Ok(stopping.shutdown().into_stats()),
                Err(e) => {
                    error!("Frame loop stopped with error: {}", e);
                    Err(e)
                }
            }
        });

        Self {
            task_handle: Some(task_handle),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Takes the shutdown sender so another task can stop the loop
    pub fn take_shutdown_sender(&mut self) -> Option<oneshot::Sender<()>> {
        self.shutdown_tx.take()
    }

    /// Waits for the loop to finish on its own
    pub async fn wait(&mut self) -> Result<LoopStats, HostError> {
        match self.task_handle.take() {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Frame loop task panicked: {}", e);
                    Err(HostError::TaskFailed(e.to_string()))
                }
            },
            None => {
                debug!("Frame loop already finished");
                Ok(LoopStats::default())
            }
        }
    }

    /// Signals shutdown and waits for the loop to finish
    pub async fn shutdown(&mut self) -> Result<LoopStats, HostError> {
        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(()).is_err() {
                debug!("Frame loop already terminated");
            }
        }
        self.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ControllerData as Data, ScriptedInput};
    use crate::dispatcher::{DispatcherModule, ModuleParameters, RunningState};
    use crate::world::World;

    /// Ready every frame, fails every run
    struct Faulty {
        parameters: ModuleParameters,
    }

    impl DispatcherModule for Faulty {
        fn parameters(&self) -> &ModuleParameters {
            &self.parameters
        }

        fn is_ready(&mut self, _: &Data, _: f32) -> Result<RunningState, DispatchError> {
            Ok(RunningState::running())
        }

        fn run(&mut self, _: &Data, _: f32) -> Result<RunningState, DispatchError> {
            Err(DispatchError::RunFailed("always".to_string()))
        }

        fn stop(&mut self) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    /// Probed at most every 50ms, the probe always fails
    struct SlowBroken {
        parameters: ModuleParameters,
    }

    impl DispatcherModule for SlowBroken {
        fn parameters(&self) -> &ModuleParameters {
            &self.parameters
        }

        fn is_ready(&mut self, _: &Data, _: f32) -> Result<RunningState, DispatchError> {
            Err(DispatchError::ProbeFailed("sensor offline".to_string()))
        }

        fn run(&mut self, _: &Data, _: f32) -> Result<RunningState, DispatchError> {
            Ok(RunningState::stopped())
        }

        fn stop(&mut self) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    fn faulty_loop(max_failures: u32, max_frames: u64) -> FrameLoop<Configured> {
        let faulty = Faulty {
            parameters: ModuleParameters::new(100, ["head"]),
        };
        loop_with("Faulty", Box::new(faulty), max_failures, max_frames)
    }

    fn loop_with(
        name: &str,
        module: Box<dyn DispatcherModule>,
        max_failures: u32,
        max_frames: u64,
    ) -> FrameLoop<Configured> {
        let mut dispatcher = ControllerDispatcher::new();
        dispatcher.enable_module(name, module).expect("enable");

        let mut config = DispatcherConfig::default();
        config.dispatcher.max_consecutive_failures = max_failures;
        config.dispatcher.max_frames = max_frames;
        config.dispatcher.frame_rate_hz = 1000;

        FrameLoop::create(
            dispatcher,
            World::new().into_shared(),
            Box::new(ScriptedInput::new()),
            &config,
        )
    }

    #[test]
    fn failure_policy_disables_after_threshold() {
        let mut running = faulty_loop(3, 0).start();
        for _ in 0..2 {
            running.step(0.01).expect("step");
        }
        assert!(running.dispatcher().is_enabled("Faulty"));

        running.step(0.01).expect("step");
        assert!(!running.dispatcher().is_enabled("Faulty"));
        assert_eq!(running.stats().disabled_modules, vec!["Faulty".to_string()]);
        assert_eq!(running.stats().module_failures, 3);
    }

    #[test]
    fn throttled_module_is_disabled_after_failing_probes() {
        let slow = SlowBroken {
            parameters: ModuleParameters::new(100, ["head"])
                .with_probe_interval(std::time::Duration::from_millis(50)),
        };
        let mut running = loop_with("SlowBroken", Box::new(slow), 3, 0).start();

        let mut frames = 0;
        while running.dispatcher().is_enabled("SlowBroken") && frames < 40 {
            running.step(0.01).expect("step");
            frames += 1;
        }

        assert!(!running.dispatcher().is_enabled("SlowBroken"));
        assert!(frames > 3, "frames between probes do not reset the count");
        assert_eq!(running.stats().module_failures, 3);
        assert_eq!(running.stats().disabled_modules, vec!["SlowBroken".to_string()]);
    }

    #[test]
    fn zero_threshold_never_disables() {
        let mut running = faulty_loop(0, 0).start();
        for _ in 0..50 {
            running.step(0.01).expect("step");
        }
        assert!(running.dispatcher().is_enabled("Faulty"));
        assert_eq!(running.dispatcher().consecutive_failures("Faulty"), 50);
    }

    #[tokio::test]
    async fn stops_at_frame_limit() {
        let mut handle = FrameLoopHandle::spawn(faulty_loop(0, 5));
        let stats = handle.wait().await.expect("loop");
        assert_eq!(stats.frames, 5);
    }

    #[tokio::test]
    async fn shutdown_signal_stops_loop() {
        let mut handle = FrameLoopHandle::spawn(faulty_loop(0, 0));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let stats = handle.shutdown().await.expect("loop");
        assert!(stats.frames > 0);
    }
}
