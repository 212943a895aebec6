use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use nalgebra::{UnitQuaternion, Vector3};
use parking_lot::Mutex;

use condynsate::{
    animator::{BarchartConfig, LineplotConfig, MemorySink, PlottersBackend},
    config::{AnimatorConfig, ProjectConfig, VisualizerConfig},
    errors::{CondynsateError, CondynsateErrorTypes, CondynsateResult},
    keyboard::{ChannelKeySource, Key},
    project::{KeyWait, Project, ProjectBackends},
    recording::{Frame, VideoEncoder},
    shutdown::ShutdownRegistry,
    simulator::{BodyDescription, BodyId, BodyState, JointState, LinkVisual, SimulationBackend},
    visualizer::HeadlessScene,
};

/// Boxes falling freely along z.
#[derive(Default)]
struct FallingBoxes {
    heights: Vec<f64>,
    speeds: Vec<f64>,
    steps: Arc<AtomicUsize>,
}

impl FallingBoxes {
    fn body(&self, body: BodyId) -> CondynsateResult<usize> {
        if body < self.heights.len() {
            Ok(body)
        } else {
            Err(CondynsateError::new(
                CondynsateErrorTypes::InvalidArgument,
                format!("Unknown body {body}"),
            ))
        }
    }
}

impl SimulationBackend for FallingBoxes {
    fn set_gravity(&mut self, _gravity: Vector3<f64>) -> CondynsateResult<()> {
        Ok(())
    }

    fn load_body(&mut self, description: &BodyDescription) -> CondynsateResult<BodyId> {
        self.heights.push(description.position.z);
        self.speeds.push(0.);
        Ok(self.heights.len() - 1)
    }

    fn step(&mut self, dt: f64) -> CondynsateResult<()> {
        for (height, speed) in self.heights.iter_mut().zip(self.speeds.iter_mut()) {
            *speed -= 9.81 * dt;
            *height += *speed * dt;
        }
        self.steps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reset(&mut self) -> CondynsateResult<()> {
        self.speeds.iter_mut().for_each(|s| *s = 0.);
        Ok(())
    }

    fn body_state(&self, body: BodyId) -> CondynsateResult<BodyState> {
        let i = self.body(body)?;
        Ok(BodyState {
            position: Vector3::new(0., 0., self.heights[i]),
            ..Default::default()
        })
    }

    fn set_body_state(&mut self, body: BodyId, state: &BodyState) -> CondynsateResult<()> {
        let i = self.body(body)?;
        self.heights[i] = state.position.z;
        Ok(())
    }

    fn joint_state(&self, body: BodyId, _joint: &str) -> CondynsateResult<JointState> {
        self.body(body)?;
        Ok(JointState::default())
    }

    fn set_joint_state(&mut self, body: BodyId, _joint: &str, _state: &JointState) -> CondynsateResult<()> {
        self.body(body).map(|_| ())
    }

    fn apply_force(
        &mut self,
        body: BodyId,
        _link: Option<&str>,
        _force: &Vector3<f64>,
        _position: &Vector3<f64>,
    ) -> CondynsateResult<()> {
        self.body(body).map(|_| ())
    }

    fn apply_torque(&mut self, body: BodyId, _link: Option<&str>, _torque: &Vector3<f64>) -> CondynsateResult<()> {
        self.body(body).map(|_| ())
    }

    fn apply_joint_torque(&mut self, body: BodyId, _joint: &str, _torque: f64) -> CondynsateResult<()> {
        self.body(body).map(|_| ())
    }

    fn joint_axis(&self, body: BodyId, _joint: &str) -> CondynsateResult<(Vector3<f64>, Vector3<f64>)> {
        self.body(body)?;
        Ok((Vector3::zeros(), Vector3::z()))
    }

    fn link_visuals(&self, body: BodyId) -> CondynsateResult<Vec<LinkVisual>> {
        let i = self.body(body)?;
        Ok(vec![LinkVisual {
            link: "box".to_string(),
            mesh: PathBuf::from("box.stl"),
            position: Vector3::new(i as f64, 0., self.heights[i]),
            orientation: UnitQuaternion::identity(),
            scale: Vector3::repeat(1.),
            color: [0.5, 0.5, 0.5],
            opacity: 1.,
        }])
    }

    fn disconnect(&mut self) -> CondynsateResult<()> {
        Ok(())
    }
}

#[derive(Default, Clone)]
struct CountingEncoder {
    videos: Arc<Mutex<Vec<(PathBuf, usize)>>>,
}

impl VideoEncoder for CountingEncoder {
    fn encode(
        &self,
        path: &Path,
        _fps: f64,
        _width: u32,
        _height: u32,
        frames: &mut dyn Iterator<Item = CondynsateResult<Frame>>,
    ) -> CondynsateResult<()> {
        let n = frames.collect::<CondynsateResult<Vec<Frame>>>()?.len();
        self.videos.lock().push((path.to_path_buf(), n));
        Ok(())
    }
}

fn threaded_config(dir: &Path, record: bool) -> ProjectConfig {
    ProjectConfig {
        visualizer: Some(VisualizerConfig {
            frame_rate: Some(100.),
            record,
            output_dir: dir.to_path_buf(),
            ..Default::default()
        }),
        animator: Some(AnimatorConfig {
            frame_rate: Some(50.),
            record,
            output_dir: dir.to_path_buf(),
            ..Default::default()
        }),
        keyboard: true,
        ..Default::default()
    }
}

fn boxes(name: &str, height: f64) -> BodyDescription {
    let mut description = BodyDescription::new(name, PathBuf::from("box.urdf"));
    description.position = Vector3::new(0., 0., height);
    description
}

#[test]
fn threaded_project_runs_and_records() {
    let dir = tempfile::tempdir().unwrap();
    let encoder = CountingEncoder::default();
    let scene = HeadlessScene::default();
    let scene_state = scene.state();
    let sink = MemorySink::new();
    let sink_state = sink.state();
    let (_keys, source) = ChannelKeySource::new();

    let mut backends = ProjectBackends::new(Box::new(FallingBoxes::default()));
    backends.scene = Some(Box::new(scene));
    backends.plot = Some(Box::new(PlottersBackend::without_text()));
    backends.frame_sink = Some(Box::new(sink));
    backends.key_source = Some(Box::new(source));
    backends.encoder = Some(Arc::new(encoder.clone()));
    let mut project = Project::new(threaded_config(dir.path(), true), backends, None).unwrap();

    let crate_box = project.load_body(&boxes("crate", 10.)).unwrap();
    let heights = project
        .animator()
        .unwrap()
        .add_lineplot(1, &LineplotConfig::default())
        .unwrap();
    let speeds = project
        .animator()
        .unwrap()
        .add_barchart(1, &BarchartConfig::default())
        .unwrap();
    project.reset().unwrap();

    for _ in 0..50 {
        project.step(true, true).unwrap();
        let simulator = project.simulator().unwrap();
        let time = simulator.time();
        let state = simulator.body_state(crate_box).unwrap();
        let animator = project.animator().unwrap();
        animator
            .lineplot_append_point(heights[0], time, state.position.z)
            .unwrap();
        animator.barchart_set_value(speeds[0], -time * 9.81).unwrap();
    }

    project.terminate().unwrap();
    assert!(sink_state.lock().closed);
    assert!(sink_state.lock().shown > 1);
    let scene_state = scene_state.lock();
    assert!(scene_state.closed);
    let z = scene_state.objects["crate/box"].transform.position.z;
    assert!(z < 10.);

    let videos = encoder.videos.lock();
    assert_eq!(videos.len(), 2);
    assert!(videos.iter().all(|(_, n)| *n > 1));
    assert!(videos
        .iter()
        .any(|(path, _)| path.file_name().unwrap() == "visualization.mp4"));
    assert!(videos
        .iter()
        .any(|(path, _)| path.file_name().unwrap() == "animation.mp4"));
}

#[test]
fn signal_registry_terminates_before_project() {
    let dir = tempfile::tempdir().unwrap();
    let (_keys, source) = ChannelKeySource::new();
    let mut backends = ProjectBackends::new(Box::new(FallingBoxes::default()));
    backends.key_source = Some(Box::new(source));
    backends.plot = Some(Box::new(PlottersBackend::without_text()));
    let registry = ShutdownRegistry::new();
    let mut project = Project::new(threaded_config(dir.path(), false), backends, Some(&registry)).unwrap();
    project.load_body(&boxes("crate", 1.)).unwrap();
    project.animator().unwrap().add_barchart(2, &BarchartConfig::default()).unwrap();
    project.reset().unwrap();
    assert_eq!(registry.live_count(), 3);

    registry.terminate_all().unwrap();
    assert!(!project.visualizer().unwrap().worker_alive());
    assert!(!project.animator().unwrap().is_running());
    assert!(!project.keyboard().unwrap().is_running());
    assert!(project.visualizer().unwrap().set_grid(false).is_err());

    project.terminate().unwrap();
    project.terminate().unwrap();
    assert_eq!(registry.live_count(), 0);
}

#[test]
fn waiting_keeps_the_scene_alive() {
    let dir = tempfile::tempdir().unwrap();
    let scene = HeadlessScene::default();
    let scene_state = scene.state();
    let (keys, source) = ChannelKeySource::new();
    let mut backends = ProjectBackends::new(Box::new(FallingBoxes::default()));
    backends.scene = Some(Box::new(scene));
    backends.key_source = Some(Box::new(source));
    let config = ProjectConfig {
        animator: None,
        ..threaded_config(dir.path(), false)
    };
    let mut project = Project::new(config, backends, None).unwrap();
    project.load_body(&boxes("crate", 1.)).unwrap();
    project.reset().unwrap();

    let start = Instant::now();
    let wait = project
        .await_anykeys(Some(Duration::from_millis(80)))
        .unwrap();
    assert_eq!(wait, KeyWait::TimedOut);
    assert!(start.elapsed() >= Duration::from_millis(80));
    assert!(scene_state.lock().applied > 0);

    let presser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        keys.press(Key::Char('q')).unwrap();
        keys
    });
    let wait = project.await_keypress("q", None).unwrap();
    assert_eq!(wait, KeyWait::Pressed(vec!["q".to_string()]));
    project.terminate().unwrap();
    drop(presser.join().unwrap());
}
