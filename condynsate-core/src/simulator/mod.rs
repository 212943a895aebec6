/*!
Module serving the [`Simulator`], a thin main-thread wrapper around a physics
engine seen through the [`SimulationBackend`] trait.

The simulator keeps the simulation time, paces steps to real time when asked
to, and owns the per-body bookkeeping ([`Body`]) such as the force and torque
arrows staged for the next visualizer refresh.

```no_run
use condynsate::simulator::{Simulator, BodyDescription};
# fn backend() -> Box<dyn condynsate::simulator::SimulationBackend> { unimplemented!() }

let mut simulator = Simulator::new(Default::default(), backend()).unwrap();
let cart = simulator
    .load_body(&BodyDescription::new("cart", "cart.urdf".into()))
    .unwrap();
for _ in 0..100 {
    simulator.step(true, true).unwrap();
}
simulator.terminate().unwrap();
```
*/

mod body;

pub use body::{
    ArrowKind, Body, BodyDescription, BodyHandle, BodyId, BodyState, JointState, LinkVisual,
    VisualData,
};

use std::{
    thread,
    time::{Duration, Instant},
};

use log::{debug, warn};
use nalgebra::Vector3;

use crate::{
    config::SimulatorConfig,
    constants::REAL_TIME_FACTOR,
    errors::{CondynsateError, CondynsateErrorTypes, CondynsateResult},
    logger::{is_enabled, InternalLog},
    utils,
};

/// Physics engine consumed by the [`Simulator`].
///
/// All calls happen on the thread that owns the simulator, between steps.
pub trait SimulationBackend: Send {
    fn set_gravity(&mut self, gravity: Vector3<f64>) -> CondynsateResult<()>;
    fn load_body(&mut self, description: &BodyDescription) -> CondynsateResult<BodyId>;
    /// Advances the physics by `dt` seconds. An error means the state is no
    /// longer trustworthy.
    fn step(&mut self, dt: f64) -> CondynsateResult<()>;
    /// Puts every body back in its initial state.
    fn reset(&mut self) -> CondynsateResult<()>;
    fn body_state(&self, body: BodyId) -> CondynsateResult<BodyState>;
    fn set_body_state(&mut self, body: BodyId, state: &BodyState) -> CondynsateResult<()>;
    fn joint_state(&self, body: BodyId, joint: &str) -> CondynsateResult<JointState>;
    fn set_joint_state(&mut self, body: BodyId, joint: &str, state: &JointState) -> CondynsateResult<()>;
    /// Applies a world frame force at a world frame position. `link: None`
    /// is the base link.
    fn apply_force(
        &mut self,
        body: BodyId,
        link: Option<&str>,
        force: &Vector3<f64>,
        position: &Vector3<f64>,
    ) -> CondynsateResult<()>;
    fn apply_torque(&mut self, body: BodyId, link: Option<&str>, torque: &Vector3<f64>) -> CondynsateResult<()>;
    fn apply_joint_torque(&mut self, body: BodyId, joint: &str, torque: f64) -> CondynsateResult<()>;
    /// World pose of the axis of `joint`, used to draw joint torque arrows.
    fn joint_axis(&self, body: BodyId, joint: &str) -> CondynsateResult<(Vector3<f64>, Vector3<f64>)>;
    fn link_visuals(&self, body: BodyId) -> CondynsateResult<Vec<LinkVisual>>;
    fn disconnect(&mut self) -> CondynsateResult<()>;
}

/// Options of [`Simulator::apply_force`].
#[derive(Debug, Clone, PartialEq)]
pub struct ForceOptions {
    /// Link receiving the force, the base link when `None`.
    pub link: Option<String>,
    /// World application point, the link origin when `None`.
    pub position: Option<Vector3<f64>>,
    pub draw_arrow: bool,
    pub arrow_scale: f64,
}

impl Default for ForceOptions {
    fn default() -> Self {
        Self {
            link: None,
            position: None,
            draw_arrow: false,
            arrow_scale: 1.,
        }
    }
}

/// Options of [`Simulator::apply_torque`].
#[derive(Debug, Clone, PartialEq)]
pub struct TorqueOptions {
    pub link: Option<String>,
    pub draw_arrow: bool,
    pub arrow_scale: f64,
}

impl Default for TorqueOptions {
    fn default() -> Self {
        Self {
            link: None,
            draw_arrow: false,
            arrow_scale: 1.,
        }
    }
}

pub struct Simulator {
    backend: Box<dyn SimulationBackend>,
    config: SimulatorConfig,
    bodies: Vec<Body>,
    time: f64,
    prev_step: Option<Instant>,
    terminated: bool,
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("config", &self.config)
            .field("bodies", &self.bodies)
            .field("time", &self.time)
            .field("terminated", &self.terminated)
            .finish()
    }
}

impl Simulator {
    pub fn new(config: SimulatorConfig, mut backend: Box<dyn SimulationBackend>) -> CondynsateResult<Self> {
        backend.set_gravity(Vector3::from(config.gravity))?;
        Ok(Self {
            backend,
            config,
            bodies: Vec::new(),
            time: 0.,
            prev_step: None,
            terminated: false,
        })
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn dt(&self) -> f64 {
        self.config.dt
    }

    pub fn is_running(&self) -> bool {
        !self.terminated
    }

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    fn check_running(&self) -> CondynsateResult<()> {
        if self.terminated {
            warn!("Simulator already terminated");
            return Err(CondynsateError::new(
                CondynsateErrorTypes::NotRunning,
                "Simulator already terminated".to_string(),
            ));
        }
        Ok(())
    }

    fn body(&self, handle: BodyHandle) -> CondynsateResult<&Body> {
        self.bodies.get(handle.0).ok_or_else(|| {
            CondynsateError::new(
                CondynsateErrorTypes::InvalidArgument,
                format!("Unknown body handle {}", handle.0),
            )
        })
    }

    fn body_mut(&mut self, handle: BodyHandle) -> CondynsateResult<&mut Body> {
        self.bodies.get_mut(handle.0).ok_or_else(|| {
            CondynsateError::new(
                CondynsateErrorTypes::InvalidArgument,
                format!("Unknown body handle {}", handle.0),
            )
        })
    }

    pub fn set_gravity(&mut self, gravity: Vector3<f64>) -> CondynsateResult<()> {
        self.check_running()?;
        if !utils::is_vector(gravity.as_slice()) {
            warn!("Gravity must be finite");
            return Err(invalid("Gravity must be finite"));
        }
        self.backend.set_gravity(gravity)?;
        self.config.gravity = gravity.into();
        Ok(())
    }

    pub fn load_body(&mut self, description: &BodyDescription) -> CondynsateResult<BodyHandle> {
        self.check_running()?;
        if description.name.is_empty() || self.bodies.iter().any(|b| b.name() == description.name) {
            warn!("Body name \"{}\" is empty or already used", description.name);
            return Err(invalid("Body names must be unique and not empty"));
        }
        let id = self.backend.load_body(description)?;
        self.bodies.push(Body::new(id, &description.name));
        Ok(BodyHandle(self.bodies.len() - 1))
    }

    /// Takes one physics step.
    ///
    /// ## Arguments
    /// * `real_time` - Sleeps until `0.95 dt` elapsed since the previous step.
    /// * `stable_step` - Always steps by `dt`. When false and `real_time` is
    ///   set, steps by the measured wall clock time instead, clamped to
    ///   `[dt, max_catch_up * dt]`, so the simulation keeps up with the clock.
    ///
    /// ## Errors
    /// Any backend failure. The simulation time is not advanced.
    pub fn step(&mut self, real_time: bool, stable_step: bool) -> CondynsateResult<()> {
        self.check_running()?;
        let dt = self.config.dt;
        let mut step_dt = dt;
        if real_time {
            if let Some(prev) = self.prev_step {
                let target = Duration::from_secs_f64(REAL_TIME_FACTOR * dt);
                let elapsed = prev.elapsed();
                if elapsed < target {
                    thread::sleep(target - elapsed);
                }
                if !stable_step {
                    step_dt = prev
                        .elapsed()
                        .as_secs_f64()
                        .clamp(dt, self.config.max_catch_up * dt);
                }
            }
        }

        self.backend.step(step_dt).map_err(|e| {
            warn!("Physics step failed at t = {:.4}", self.time);
            e.chain(format!("Physics step failed at t = {:.4}", self.time))
        })?;
        self.prev_step = Some(Instant::now());
        self.time += step_dt;
        Ok(())
    }

    pub fn reset(&mut self) -> CondynsateResult<()> {
        self.check_running()?;
        self.backend.reset()?;
        self.time = 0.;
        self.prev_step = None;
        self.clear_visual_buffers();
        if is_enabled(InternalLog::Lifecycle) {
            debug!("Simulator reset");
        }
        Ok(())
    }

    pub fn body_state(&self, body: BodyHandle) -> CondynsateResult<BodyState> {
        self.check_running()?;
        self.backend.body_state(self.body(body)?.id())
    }

    pub fn set_body_state(&mut self, body: BodyHandle, state: &BodyState) -> CondynsateResult<()> {
        self.check_running()?;
        let finite = utils::is_vector(state.position.as_slice())
            && utils::is_vector(state.velocity.as_slice())
            && utils::is_vector(state.omega.as_slice())
            && utils::is_vector(state.orientation.coords.as_slice());
        if !finite {
            warn!("Body state must be finite");
            return Err(invalid("Body state must be finite"));
        }
        let id = self.body(body)?.id();
        self.backend.set_body_state(id, state)
    }

    pub fn joint_state(&self, body: BodyHandle, joint: &str) -> CondynsateResult<JointState> {
        self.check_running()?;
        self.backend.joint_state(self.body(body)?.id(), joint)
    }

    pub fn set_joint_state(&mut self, body: BodyHandle, joint: &str, state: &JointState) -> CondynsateResult<()> {
        self.check_running()?;
        if !(state.angle.is_finite() && state.omega.is_finite()) {
            warn!("Joint state of {joint} must be finite");
            return Err(invalid("Joint state must be finite"));
        }
        let id = self.body(body)?.id();
        self.backend.set_joint_state(id, joint, state)
    }

    pub fn apply_force(&mut self, body: BodyHandle, force: Vector3<f64>, options: &ForceOptions) -> CondynsateResult<()> {
        self.check_running()?;
        if !utils::is_vector(force.as_slice()) || !options.arrow_scale.is_finite() {
            warn!("Force must be finite");
            return Err(invalid("Force must be finite"));
        }
        let id = self.body(body)?.id();
        let position = match options.position {
            Some(position) => position,
            None => self.link_origin(id, options.link.as_deref())?,
        };
        self.backend
            .apply_force(id, options.link.as_deref(), &force, &position)?;
        if options.draw_arrow {
            let target = options.link.clone().unwrap_or_else(|| "base".to_string());
            self.body_mut(body)?
                .stage_arrow(&target, ArrowKind::Force, position, force, options.arrow_scale);
        }
        Ok(())
    }

    pub fn apply_torque(&mut self, body: BodyHandle, torque: Vector3<f64>, options: &TorqueOptions) -> CondynsateResult<()> {
        self.check_running()?;
        if !utils::is_vector(torque.as_slice()) || !options.arrow_scale.is_finite() {
            warn!("Torque must be finite");
            return Err(invalid("Torque must be finite"));
        }
        let id = self.body(body)?.id();
        self.backend.apply_torque(id, options.link.as_deref(), &torque)?;
        if options.draw_arrow {
            let position = self.link_origin(id, options.link.as_deref())?;
            let target = options.link.clone().unwrap_or_else(|| "base".to_string());
            self.body_mut(body)?
                .stage_arrow(&target, ArrowKind::Torque, position, torque, options.arrow_scale);
        }
        Ok(())
    }

    pub fn apply_joint_torque(
        &mut self,
        body: BodyHandle,
        joint: &str,
        torque: f64,
        draw_arrow: bool,
    ) -> CondynsateResult<()> {
        self.check_running()?;
        if !torque.is_finite() {
            warn!("Torque on joint {joint} must be finite");
            return Err(invalid("Joint torque must be finite"));
        }
        let id = self.body(body)?.id();
        self.backend.apply_joint_torque(id, joint, torque)?;
        if draw_arrow {
            let (origin, axis) = self.backend.joint_axis(id, joint)?;
            self.body_mut(body)?
                .stage_arrow(joint, ArrowKind::Torque, origin, axis * torque, 1.);
        }
        Ok(())
    }

    fn link_origin(&self, id: BodyId, link: Option<&str>) -> CondynsateResult<Vector3<f64>> {
        match link {
            None => Ok(self.backend.body_state(id)?.position),
            Some(link) => self
                .backend
                .link_visuals(id)?
                .into_iter()
                .find(|l| l.link == link)
                .map(|l| l.position)
                .ok_or_else(|| invalid(&format!("Unknown link {link}"))),
        }
    }

    /// Visual data of one body, draining its staged arrows.
    pub fn visual_data(&mut self, body: BodyHandle) -> CondynsateResult<Vec<VisualData>> {
        self.check_running()?;
        let id = self.body(body)?.id();
        let links = self.backend.link_visuals(id)?;
        Ok(self.body_mut(body)?.visual_data(links))
    }

    /// Visual data of every body, draining every staged arrow.
    pub fn all_visual_data(&mut self) -> CondynsateResult<Vec<VisualData>> {
        let mut data = Vec::new();
        for i in 0..self.bodies.len() {
            data.extend(self.visual_data(BodyHandle(i))?);
        }
        Ok(data)
    }

    pub fn clear_visual_buffers(&mut self) {
        for body in self.bodies.iter_mut() {
            body.clear_visual_buffer();
        }
    }

    /// Disconnects the backend. Idempotent.
    pub fn terminate(&mut self) -> CondynsateResult<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        self.clear_visual_buffers();
        self.backend.disconnect()
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!("{}", e.detailed_error());
        }
    }
}

fn invalid(what: &str) -> CondynsateError {
    CondynsateError::new(CondynsateErrorTypes::InvalidArgument, what.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        path::PathBuf,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc,
        },
    };

    use nalgebra::UnitQuaternion;

    use super::*;

    /// Backend with one link per body whose height follows the time.
    #[derive(Default, Clone)]
    pub struct MockBackend {
        pub steps: Arc<AtomicUsize>,
        pub visual_reads: Arc<AtomicUsize>,
        pub fail_steps: Arc<AtomicBool>,
        pub disconnects: Arc<AtomicUsize>,
        pub last_dt: Arc<parking_lot::Mutex<f64>>,
        pub bodies: usize,
        pub height: f64,
    }

    impl SimulationBackend for MockBackend {
        fn set_gravity(&mut self, _gravity: Vector3<f64>) -> CondynsateResult<()> {
            Ok(())
        }

        fn load_body(&mut self, _description: &BodyDescription) -> CondynsateResult<BodyId> {
            self.bodies += 1;
            Ok(self.bodies - 1)
        }

        fn step(&mut self, dt: f64) -> CondynsateResult<()> {
            if self.fail_steps.load(Ordering::SeqCst) {
                return Err(CondynsateError::new(
                    CondynsateErrorTypes::BackendError,
                    "diverged".to_string(),
                ));
            }
            self.steps.fetch_add(1, Ordering::SeqCst);
            *self.last_dt.lock() = dt;
            self.height += dt;
            Ok(())
        }

        fn reset(&mut self) -> CondynsateResult<()> {
            self.height = 0.;
            Ok(())
        }

        fn body_state(&self, _body: BodyId) -> CondynsateResult<BodyState> {
            Ok(BodyState {
                position: Vector3::new(0., 0., self.height),
                ..Default::default()
            })
        }

        fn set_body_state(&mut self, _body: BodyId, state: &BodyState) -> CondynsateResult<()> {
            self.height = state.position.z;
            Ok(())
        }

        fn joint_state(&self, _body: BodyId, _joint: &str) -> CondynsateResult<JointState> {
            Ok(JointState::default())
        }

        fn set_joint_state(&mut self, _body: BodyId, _joint: &str, _state: &JointState) -> CondynsateResult<()> {
            Ok(())
        }

        fn apply_force(
            &mut self,
            _body: BodyId,
            _link: Option<&str>,
            _force: &Vector3<f64>,
            _position: &Vector3<f64>,
        ) -> CondynsateResult<()> {
            Ok(())
        }

        fn apply_torque(&mut self, _body: BodyId, _link: Option<&str>, _torque: &Vector3<f64>) -> CondynsateResult<()> {
            Ok(())
        }

        fn apply_joint_torque(&mut self, _body: BodyId, _joint: &str, _torque: f64) -> CondynsateResult<()> {
            Ok(())
        }

        fn joint_axis(&self, _body: BodyId, _joint: &str) -> CondynsateResult<(Vector3<f64>, Vector3<f64>)> {
            Ok((Vector3::zeros(), Vector3::y()))
        }

        fn link_visuals(&self, _body: BodyId) -> CondynsateResult<Vec<LinkVisual>> {
            self.visual_reads.fetch_add(1, Ordering::SeqCst);
            Ok(vec![LinkVisual {
                link: "base".to_string(),
                mesh: PathBuf::from("base.stl"),
                position: Vector3::new(0., 0., self.height),
                orientation: UnitQuaternion::identity(),
                scale: Vector3::repeat(1.),
                color: [0.2, 0.2, 0.2],
                opacity: 1.,
            }])
        }

        fn disconnect(&mut self) -> CondynsateResult<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    pub fn step_advances_time() {
        let backend = MockBackend::default();
        let steps = backend.steps.clone();
        let mut simulator = Simulator::new(SimulatorConfig::default(), Box::new(backend)).unwrap();
        for _ in 0..10 {
            simulator.step(false, true).unwrap();
        }
        assert_eq!(steps.load(Ordering::SeqCst), 10);
        assert!((simulator.time() - 0.1).abs() < 1e-12);
        simulator.reset().unwrap();
        assert_eq!(simulator.time(), 0.);
    }

    #[test]
    pub fn real_time_pacing() {
        let config = SimulatorConfig {
            dt: 0.02,
            ..Default::default()
        };
        let mut simulator = Simulator::new(config, Box::new(MockBackend::default())).unwrap();
        let start = Instant::now();
        for _ in 0..6 {
            simulator.step(true, true).unwrap();
        }
        // The first step does not wait, the five others wait 0.95 dt each.
        assert!(start.elapsed() >= Duration::from_secs_f64(5. * 0.95 * 0.02));
    }

    #[test]
    pub fn unstable_step_catches_up() {
        let backend = MockBackend::default();
        let last_dt = backend.last_dt.clone();
        let config = SimulatorConfig {
            dt: 0.01,
            max_catch_up: 3.,
            ..Default::default()
        };
        let mut simulator = Simulator::new(config, Box::new(backend)).unwrap();
        simulator.step(true, false).unwrap();
        thread::sleep(Duration::from_millis(100));
        simulator.step(true, false).unwrap();
        assert!((*last_dt.lock() - 0.03).abs() < 1e-12);
        thread::sleep(Duration::from_millis(100));
        simulator.step(true, true).unwrap();
        assert!((*last_dt.lock() - 0.01).abs() < 1e-12);
    }

    #[test]
    pub fn failed_step_keeps_time() {
        let backend = MockBackend::default();
        let fail = backend.fail_steps.clone();
        let mut simulator = Simulator::new(SimulatorConfig::default(), Box::new(backend)).unwrap();
        simulator.step(false, true).unwrap();
        fail.store(true, Ordering::SeqCst);
        let err = simulator.step(false, true).unwrap_err();
        assert_eq!(err.error_type(), CondynsateErrorTypes::BackendError);
        assert!((simulator.time() - 0.01).abs() < 1e-12);
    }

    #[test]
    pub fn invalid_arguments_are_rejected() {
        let mut simulator =
            Simulator::new(SimulatorConfig::default(), Box::new(MockBackend::default())).unwrap();
        let body = simulator
            .load_body(&BodyDescription::new("cube", PathBuf::from("cube.urdf")))
            .unwrap();
        assert!(simulator
            .load_body(&BodyDescription::new("cube", PathBuf::from("cube.urdf")))
            .is_err());
        let err = simulator
            .apply_force(body, Vector3::new(f64::NAN, 0., 0.), &ForceOptions::default())
            .unwrap_err();
        assert_eq!(err.error_type(), CondynsateErrorTypes::InvalidArgument);
        assert!(simulator
            .apply_force(BodyHandle(4), Vector3::x(), &ForceOptions::default())
            .is_err());
        assert!(simulator
            .set_joint_state(body, "hinge", &JointState { angle: f64::INFINITY, omega: 0. })
            .is_err());
    }

    #[test]
    pub fn arrows_reach_visual_data() {
        let mut simulator =
            Simulator::new(SimulatorConfig::default(), Box::new(MockBackend::default())).unwrap();
        let body = simulator
            .load_body(&BodyDescription::new("cube", PathBuf::from("cube.urdf")))
            .unwrap();
        let options = ForceOptions {
            draw_arrow: true,
            ..Default::default()
        };
        simulator.apply_force(body, Vector3::z(), &options).unwrap();
        simulator.apply_joint_torque(body, "hinge", 2., true).unwrap();
        let data = simulator.all_visual_data().unwrap();
        let names: Vec<_> = data.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["cube/base", "cube/base/force_1", "cube/hinge/torque_1"]);
        assert_eq!(simulator.bodies()[0].staged_arrows(), 0);
    }

    #[test]
    pub fn terminate_is_idempotent() {
        let backend = MockBackend::default();
        let disconnects = backend.disconnects.clone();
        let mut simulator = Simulator::new(SimulatorConfig::default(), Box::new(backend)).unwrap();
        simulator.terminate().unwrap();
        simulator.terminate().unwrap();
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        let err = simulator.step(false, true).unwrap_err();
        assert_eq!(err.error_type(), CondynsateErrorTypes::NotRunning);
        drop(simulator);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }
}
