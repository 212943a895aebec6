/*!
Composition root tying the simulator to the optional visualizer, animator and
keyboard.

A [`Project`] owns one simulator and zero or one of each other subsystem, as
asked by the [`ProjectConfig`]. Calls touching a missing subsystem fail with
`NotAvailable` instead of panicking.

[`Project::terminate`] tears the subsystems down in a fixed order (simulator,
visualizer, animator, keyboard), always tries every one of them, and reports
the first failure with the others chained to it.

```no_run
use condynsate::project::{Project, ProjectBackends};
use condynsate::config::ProjectConfig;
# fn physics() -> Box<dyn condynsate::simulator::SimulationBackend> { unimplemented!() }

let mut project = Project::new(
    ProjectConfig::default(),
    ProjectBackends::new(physics()),
    None,
)
.unwrap();
project.reset().unwrap();
while project.simulator().unwrap().time() < 10. {
    project.step(true, true).unwrap();
}
project.terminate().unwrap();
```
*/

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{
    animator::{Animator, FrameSink, PlotBackend, PlottersBackend},
    config::ProjectConfig,
    constants::SLEEP_INTERVAL,
    errors::{aggregate_results, CondynsateError, CondynsateErrorTypes, CondynsateResult},
    keyboard::{canonical_combo, KeySource, Keyboard},
    logger::{init_log, is_enabled, InternalLog},
    recording::VideoEncoder,
    shutdown::ShutdownRegistry,
    simulator::{BodyDescription, BodyHandle, SimulationBackend, Simulator},
    visualizer::{HeadlessScene, SceneBackend, Visualizer},
};

/// Implementations behind each subsystem.
///
/// Only the simulation backend is mandatory. A configured visualizer without
/// a scene draws in a [`HeadlessScene`], a configured animator without a plot
/// backend uses [`PlottersBackend`].
pub struct ProjectBackends {
    pub simulation: Box<dyn SimulationBackend>,
    pub scene: Option<Box<dyn SceneBackend>>,
    pub plot: Option<Box<dyn PlotBackend>>,
    /// Required when the keyboard is enabled.
    pub key_source: Option<Box<dyn KeySource>>,
    pub frame_sink: Option<Box<dyn FrameSink>>,
    /// Shared by the visualizer and animator recordings.
    pub encoder: Option<Arc<dyn VideoEncoder>>,
}

impl ProjectBackends {
    pub fn new(simulation: Box<dyn SimulationBackend>) -> Self {
        Self {
            simulation,
            scene: None,
            plot: None,
            key_source: None,
            frame_sink: None,
            encoder: None,
        }
    }
}

/// Outcome of a key wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyWait {
    /// Combinations held when the wait ended.
    Pressed(Vec<String>),
    TimedOut,
}

pub struct Project {
    simulator: Option<Simulator>,
    visualizer: Option<Visualizer>,
    animator: Option<Animator>,
    keyboard: Option<Keyboard>,
}

impl Project {
    /// Initializes the logger, validates `config` and builds every configured
    /// subsystem. The threaded ones are registered in `registry` so that a
    /// signal handler can terminate them.
    pub fn new(
        config: ProjectConfig,
        backends: ProjectBackends,
        registry: Option<&Arc<ShutdownRegistry>>,
    ) -> CondynsateResult<Self> {
        init_log(&config.log);
        config.validate()?;
        let ProjectBackends {
            simulation,
            scene,
            plot,
            key_source,
            frame_sink,
            encoder,
        } = backends;

        let keyboard = match (config.keyboard, key_source) {
            (true, Some(source)) => Some(Keyboard::new(source)?),
            (true, None) => {
                let what = "The keyboard is enabled but no key source was given".to_string();
                warn!("{what}");
                return Err(CondynsateError::new(CondynsateErrorTypes::ConfigError, what));
            }
            (false, _) => None,
        };
        let simulator = Simulator::new(config.simulator.clone(), simulation)?;
        let visualizer = match config.visualizer.clone() {
            Some(vis_config) => Some(Visualizer::new(
                vis_config,
                scene.unwrap_or_else(|| Box::new(HeadlessScene::default())),
                encoder.clone(),
            )?),
            None => None,
        };
        let animator = config.animator.clone().map(|ani_config| {
            Animator::new(
                ani_config,
                plot.unwrap_or_else(|| Box::new(PlottersBackend::default())),
                frame_sink,
                encoder,
            )
        });

        if let Some(registry) = registry {
            if let Some(visualizer) = &visualizer {
                registry.register(&visualizer.terminate_handle());
            }
            if let Some(animator) = &animator {
                registry.register(&animator.terminate_handle());
            }
            if let Some(keyboard) = &keyboard {
                registry.register(&keyboard.terminate_handle());
            }
        }
        info!(
            "Project ready (visualizer: {}, animator: {}, keyboard: {})",
            visualizer.is_some(),
            animator.is_some(),
            keyboard.is_some()
        );
        Ok(Self {
            simulator: Some(simulator),
            visualizer,
            animator,
            keyboard,
        })
    }

    pub fn simulator(&mut self) -> CondynsateResult<&mut Simulator> {
        self.simulator
            .as_mut()
            .ok_or_else(|| not_available("simulator"))
    }

    pub fn visualizer(&mut self) -> CondynsateResult<&mut Visualizer> {
        self.visualizer
            .as_mut()
            .ok_or_else(|| not_available("visualizer"))
    }

    pub fn animator(&self) -> CondynsateResult<&Animator> {
        self.animator
            .as_ref()
            .ok_or_else(|| not_available("animator"))
    }

    pub fn keyboard(&self) -> CondynsateResult<&Keyboard> {
        self.keyboard
            .as_ref()
            .ok_or_else(|| not_available("keyboard"))
    }

    /// Loads a body and, with a visualizer, adds its links to the scene.
    pub fn load_body(&mut self, description: &BodyDescription) -> CondynsateResult<BodyHandle> {
        let simulator = self
            .simulator
            .as_mut()
            .ok_or_else(|| not_available("simulator"))?;
        let handle = simulator.load_body(description)?;
        match self.visualizer.as_mut() {
            Some(visualizer) => {
                for data in simulator.visual_data(handle)? {
                    visualizer.update_visual(&data)?;
                }
            }
            None => simulator.clear_visual_buffers(),
        }
        Ok(handle)
    }

    /// Resets the simulation and shows it. The animator is started on the
    /// first call and cleared on the following ones.
    ///
    /// Every subsystem is reset even if an earlier one failed.
    pub fn reset(&mut self) -> CondynsateResult<()> {
        let mut results = vec![self.simulator().and_then(|s| s.reset())];
        if self.visualizer.is_some() {
            results.push(self.refresh_visualizer());
        }
        if let Some(animator) = &self.animator {
            if animator.is_running() {
                results.push(animator.reset_all());
            } else if animator.n_subplots() > 0 {
                results.push(animator.start());
            } else {
                debug!("Animator has no subplot, not started");
            }
        }
        aggregate_results(results)
    }

    /// Takes one physics step and, if it succeeded, pushes the new poses to
    /// the visualizer and refreshes the animator.
    ///
    /// Only a physics failure is returned. A visualizer or animator that
    /// stopped, for instance because its window was closed, is reported with
    /// a warning and the other subsystems keep going.
    pub fn step(&mut self, real_time: bool, stable_step: bool) -> CondynsateResult<()> {
        self.simulator()?.step(real_time, stable_step)?;
        if self.visualizer.is_some() {
            if let Err(e) = self.refresh_visualizer() {
                warn!("Visualizer not refreshed: {}", e.detailed_error());
            }
        } else if let Some(simulator) = self.simulator.as_mut() {
            simulator.clear_visual_buffers();
        }
        if let Some(animator) = self.animator.as_ref().filter(|a| a.is_running()) {
            if let Err(e) = animator.refresh() {
                warn!("Animator not refreshed: {}", e.detailed_error());
            }
        }
        Ok(())
    }

    /// Sends the visual data of every body to the visualizer.
    pub fn refresh_visualizer(&mut self) -> CondynsateResult<()> {
        let visualizer = self
            .visualizer
            .as_mut()
            .ok_or_else(|| not_available("visualizer"))?;
        let simulator = self
            .simulator
            .as_mut()
            .ok_or_else(|| not_available("simulator"))?;
        let results: Vec<CondynsateResult<()>> = simulator
            .all_visual_data()?
            .iter()
            .map(|data| visualizer.update_visual(data))
            .collect();
        aggregate_results(results)
    }

    pub fn refresh_animator(&self) -> CondynsateResult<()> {
        self.animator()?.refresh()
    }

    /// Blocks until `combo`, such as `"shift+space"`, is pressed, while the
    /// visualizer and animator keep refreshing.
    ///
    /// ## Arguments
    /// * `timeout` - `None` waits forever.
    pub fn await_keypress(&mut self, combo: &str, timeout: Option<Duration>) -> CondynsateResult<KeyWait> {
        let keyboard = self.keyboard()?;
        let Some(combo) = canonical_combo(combo) else {
            let what = format!("\"{combo}\" is not a valid key combination");
            warn!("{what}");
            return Err(CondynsateError::new(CondynsateErrorTypes::InvalidArgument, what));
        };
        if !keyboard.is_running() {
            return Err(keyboard_stopped());
        }
        info!("Press {combo} to continue");
        self.wait_keys(timeout, |pressed| pressed.contains(&combo))
    }

    /// Blocks until any key is pressed, while the visualizer and animator keep
    /// refreshing.
    pub fn await_anykeys(&mut self, timeout: Option<Duration>) -> CondynsateResult<KeyWait> {
        if !self.keyboard()?.is_running() {
            return Err(keyboard_stopped());
        }
        info!("Press any key to continue");
        self.wait_keys(timeout, |pressed| !pressed.is_empty())
    }

    fn wait_keys(
        &mut self,
        timeout: Option<Duration>,
        done: impl Fn(&[String]) -> bool,
    ) -> CondynsateResult<KeyWait> {
        let start = Instant::now();
        loop {
            let keyboard = self.keyboard()?;
            let pressed = keyboard.get_pressed();
            if done(&pressed) {
                return Ok(KeyWait::Pressed(pressed));
            }
            if !keyboard.is_running() {
                return Err(keyboard_stopped());
            }
            self.pump();
            if timeout.is_some_and(|t| start.elapsed() >= t) {
                return Ok(KeyWait::TimedOut);
            }
            thread::sleep(SLEEP_INTERVAL);
        }
    }

    fn pump(&mut self) {
        if self.visualizer.is_some() {
            if let Err(e) = self.refresh_visualizer() {
                debug!("Visualizer refresh while waiting: {}", e.detailed_error());
            }
        }
        if let Some(animator) = self.animator.as_ref().filter(|a| a.is_running()) {
            if let Err(e) = animator.refresh() {
                debug!("Animator refresh while waiting: {}", e.detailed_error());
            }
        }
    }

    /// Terminates every subsystem. Calling it again is a no-op.
    pub fn terminate(&mut self) -> CondynsateResult<()> {
        let mut results = Vec::new();
        if let Some(mut simulator) = self.simulator.take() {
            results.push(simulator.terminate());
        }
        if let Some(visualizer) = self.visualizer.take() {
            results.push(visualizer.terminate());
        }
        if let Some(animator) = self.animator.take() {
            results.push(animator.terminate());
        }
        if let Some(keyboard) = self.keyboard.take() {
            results.push(keyboard.terminate());
        }
        if results.is_empty() {
            return Ok(());
        }
        if is_enabled(InternalLog::Lifecycle) {
            debug!("Terminated {} subsystem(s)", results.len());
        }
        let result = aggregate_results(results);
        match &result {
            Ok(()) => info!("Project terminated"),
            Err(e) => warn!("Project terminated with errors: {}", e.detailed_error()),
        }
        result
    }
}

impl Drop for Project {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!("Project termination on drop: {}", e.detailed_error());
        }
    }
}

fn not_available(subsystem: &str) -> CondynsateError {
    let what = format!("No {subsystem} in this project");
    warn!("{what}");
    CondynsateError::new(CondynsateErrorTypes::NotAvailable, what)
}

fn keyboard_stopped() -> CondynsateError {
    let what = "The keyboard listener stopped".to_string();
    warn!("{what}");
    CondynsateError::new(CondynsateErrorTypes::NotRunning, what)
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::atomic::Ordering};

    use super::*;
    use crate::{
        animator::{LineplotConfig, MemorySink},
        config::{AnimatorConfig, VisualizerConfig},
        keyboard::{ChannelKeySource, Key},
        simulator::tests::MockBackend,
    };

    fn bare_config() -> ProjectConfig {
        ProjectConfig::default()
    }

    fn full_config() -> ProjectConfig {
        ProjectConfig {
            visualizer: Some(VisualizerConfig {
                frame_rate: None,
                threaded: false,
                ..Default::default()
            }),
            animator: Some(AnimatorConfig {
                frame_rate: None,
                threaded: false,
                ..Default::default()
            }),
            keyboard: true,
            ..Default::default()
        }
    }

    fn cart() -> BodyDescription {
        BodyDescription::new("cart", PathBuf::from("cart.urdf"))
    }

    #[test]
    pub fn missing_subsystems_are_not_available() {
        let mut project =
            Project::new(bare_config(), ProjectBackends::new(Box::new(MockBackend::default())), None)
                .unwrap();
        let err = project.await_keypress("a", None).unwrap_err();
        assert_eq!(err.error_type(), CondynsateErrorTypes::NotAvailable);
        assert!(project.await_anykeys(Some(Duration::ZERO)).is_err());
        assert!(project.refresh_visualizer().is_err());
        assert!(project.refresh_animator().is_err());
        project.load_body(&cart()).unwrap();
        project.reset().unwrap();
        project.step(false, true).unwrap();
        assert_eq!(project.simulator().unwrap().bodies()[0].staged_arrows(), 0);
    }

    #[test]
    pub fn keypress_without_keyboard_leaves_the_visualizer_running() {
        let config = ProjectConfig {
            visualizer: full_config().visualizer,
            animator: None,
            keyboard: false,
            ..Default::default()
        };
        let mut project =
            Project::new(config, ProjectBackends::new(Box::new(MockBackend::default())), None).unwrap();
        project.load_body(&cart()).unwrap();
        let err = project.await_keypress("q", Some(Duration::ZERO)).unwrap_err();
        assert_eq!(err.error_type(), CondynsateErrorTypes::NotAvailable);
        assert!(project.visualizer().unwrap().is_running());
        project.step(false, true).unwrap();
    }

    #[test]
    pub fn closed_scene_does_not_stop_the_animator() {
        let scene = HeadlessScene::default();
        let scene_state = scene.state();
        let sink = MemorySink::new();
        let sink_state = sink.state();
        let mut backends = ProjectBackends::new(Box::new(MockBackend::default()));
        backends.scene = Some(Box::new(scene));
        backends.frame_sink = Some(Box::new(sink));
        backends.plot = Some(Box::new(PlottersBackend::without_text()));
        let config = ProjectConfig {
            visualizer: Some(VisualizerConfig {
                frame_rate: None,
                ..Default::default()
            }),
            animator: Some(AnimatorConfig {
                frame_rate: None,
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut project = Project::new(config, backends, None).unwrap();
        project.load_body(&cart()).unwrap();
        let ids = project
            .animator()
            .unwrap()
            .add_lineplot(1, &LineplotConfig::default())
            .unwrap();
        project.reset().unwrap();

        scene_state.lock().closed = true;
        let deadline = Instant::now() + Duration::from_secs(5);
        while project.visualizer().unwrap().is_running() {
            assert!(Instant::now() < deadline, "visualizer never saw the closed scene");
            thread::sleep(Duration::from_millis(5));
        }

        let shown = sink_state.lock().shown;
        let mut x = 0.;
        while sink_state.lock().shown == shown {
            assert!(Instant::now() < deadline, "animator stopped refreshing");
            x += 1.;
            project.animator().unwrap().lineplot_append_point(ids[0], x, x).unwrap();
            project.step(false, true).unwrap();
            thread::sleep(Duration::from_millis(5));
        }
        assert!(project.terminate().is_err());
    }

    #[test]
    pub fn keyboard_without_source_is_a_config_error() {
        let config = ProjectConfig {
            keyboard: true,
            ..Default::default()
        };
        let err = Project::new(config, ProjectBackends::new(Box::new(MockBackend::default())), None)
            .err()
            .unwrap();
        assert_eq!(err.error_type(), CondynsateErrorTypes::ConfigError);
    }

    #[test]
    pub fn failed_step_skips_visualizer_refresh() {
        let backend = MockBackend::default();
        let visual_reads = backend.visual_reads.clone();
        let fail_steps = backend.fail_steps.clone();
        let config = ProjectConfig {
            visualizer: full_config().visualizer,
            ..Default::default()
        };
        let mut project = Project::new(config, ProjectBackends::new(Box::new(backend)), None).unwrap();
        project.load_body(&cart()).unwrap();

        let reads = visual_reads.load(Ordering::SeqCst);
        project.step(false, true).unwrap();
        assert_eq!(visual_reads.load(Ordering::SeqCst), reads + 1);

        fail_steps.store(true, Ordering::SeqCst);
        assert!(project.step(false, true).is_err());
        assert_eq!(visual_reads.load(Ordering::SeqCst), reads + 1);
    }

    #[test]
    pub fn reset_starts_then_clears_the_animator() {
        let (_sender, source) = ChannelKeySource::new();
        let sink = MemorySink::new();
        let state = sink.state();
        let mut backends = ProjectBackends::new(Box::new(MockBackend::default()));
        backends.key_source = Some(Box::new(source));
        backends.frame_sink = Some(Box::new(sink));
        backends.plot = Some(Box::new(PlottersBackend::without_text()));
        let mut project = Project::new(full_config(), backends, None).unwrap();
        let ids = project
            .animator()
            .unwrap()
            .add_lineplot(1, &LineplotConfig::default())
            .unwrap();

        project.reset().unwrap();
        let animator = project.animator().unwrap();
        assert!(animator.is_running());
        animator.lineplot_append_point(ids[0], 1., 1.).unwrap();
        let shown = state.lock().shown;
        project.reset().unwrap();
        assert!(project.animator().unwrap().is_running());
        assert_eq!(state.lock().shown, shown + 1);
    }

    #[test]
    pub fn await_keypress_returns_on_press_or_timeout() {
        let (sender, source) = ChannelKeySource::new();
        let mut backends = ProjectBackends::new(Box::new(MockBackend::default()));
        backends.key_source = Some(Box::new(source));
        let config = ProjectConfig {
            keyboard: true,
            ..Default::default()
        };
        let mut project = Project::new(config, backends, None).unwrap();

        assert_eq!(
            project.await_anykeys(Some(Duration::from_millis(50))).unwrap(),
            KeyWait::TimedOut
        );
        assert!(project.await_keypress("ctrl+", None).is_err());

        let presser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            sender.press(Key::Char(' ')).unwrap();
            sender
        });
        let wait = project
            .await_keypress("space", Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(wait, KeyWait::Pressed(vec!["space".to_string()]));
        drop(presser.join().unwrap());
    }

    #[test]
    pub fn terminate_cascades_once() {
        let backend = MockBackend::default();
        let disconnects = backend.disconnects.clone();
        let (_sender, source) = ChannelKeySource::new();
        let mut backends = ProjectBackends::new(Box::new(backend));
        backends.key_source = Some(Box::new(source));
        let registry = ShutdownRegistry::new();
        let mut project = Project::new(full_config(), backends, Some(&registry)).unwrap();
        assert_eq!(registry.live_count(), 3);

        project.terminate().unwrap();
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(registry.live_count(), 0);
        for err in [
            project.simulator().err().map(|e| e.error_type()),
            project.visualizer().err().map(|e| e.error_type()),
            project.animator().err().map(|e| e.error_type()),
            project.keyboard().err().map(|e| e.error_type()),
        ] {
            assert_eq!(err, Some(CondynsateErrorTypes::NotAvailable));
        }
        assert!(project.step(false, true).is_err());
        project.terminate().unwrap();
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }
}
