use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use log::{info, warn};
use nalgebra::{UnitQuaternion, Vector3};

use condynsate::{
    animator::{BarchartConfig, LineplotConfig, PerArtist},
    config::ProjectConfig,
    errors::{CondynsateError, CondynsateErrorTypes, CondynsateResult},
    project::{Project, ProjectBackends},
    recording::FfmpegEncoder,
    shutdown::ShutdownRegistry,
    simulator::{BodyDescription, BodyHandle, BodyId, BodyState, JointState, LinkVisual, SimulationBackend},
};

#[derive(Parser)]
#[command(version, about = "Damped pendulum demo of the condynsate coordination layer")]
struct Cli {
    /// YAML project configuration. Defaults are used when absent
    config_path: Option<PathBuf>,
    /// Simulated duration, in seconds
    #[arg(long, default_value_t = 10.)]
    duration: f64,
    /// Step as fast as possible instead of following the wall clock
    #[arg(long, default_value_t = false)]
    no_real_time: bool,
    /// Initial angle of the pendulum, in radians
    #[arg(long, default_value_t = 1.)]
    angle: f64,
    /// Path of the ffmpeg executable used to write recordings
    #[arg(long)]
    ffmpeg: Option<PathBuf>,
}

/// Single pendulum swinging around the y axis, integrated with semi implicit
/// Euler.
struct PendulumBackend {
    gravity: f64,
    length: f64,
    damping: f64,
    initial_angle: f64,
    angle: f64,
    velocity: f64,
    torque: f64,
    loaded: bool,
}

impl PendulumBackend {
    fn new(initial_angle: f64) -> Self {
        Self {
            gravity: 9.81,
            length: 1.,
            damping: 0.2,
            initial_angle,
            angle: initial_angle,
            velocity: 0.,
            torque: 0.,
            loaded: false,
        }
    }

    fn check_body(&self, body: BodyId) -> CondynsateResult<()> {
        if !self.loaded || body != 0 {
            return Err(CondynsateError::new(
                CondynsateErrorTypes::InvalidArgument,
                format!("Unknown body {body}"),
            ));
        }
        Ok(())
    }

    fn check_joint(&self, body: BodyId, joint: &str) -> CondynsateResult<()> {
        self.check_body(body)?;
        if joint != "hinge" {
            return Err(CondynsateError::new(
                CondynsateErrorTypes::InvalidArgument,
                format!("Unknown joint {joint}"),
            ));
        }
        Ok(())
    }

    fn bob_position(&self) -> Vector3<f64> {
        Vector3::new(self.length * self.angle.sin(), 0., -self.length * self.angle.cos())
    }

    #[cfg(test)]
    fn energy(&self) -> (f64, f64) {
        let kinetic = 0.5 * (self.length * self.velocity).powi(2);
        let potential = self.gravity * self.length * (1. - self.angle.cos());
        (kinetic, potential)
    }
}

impl SimulationBackend for PendulumBackend {
    fn set_gravity(&mut self, gravity: Vector3<f64>) -> CondynsateResult<()> {
        self.gravity = -gravity.z;
        Ok(())
    }

    fn load_body(&mut self, description: &BodyDescription) -> CondynsateResult<BodyId> {
        if self.loaded {
            return Err(CondynsateError::new(
                CondynsateErrorTypes::InvalidArgument,
                format!("Only one pendulum is simulated, cannot load {}", description.name),
            ));
        }
        self.loaded = true;
        Ok(0)
    }

    fn step(&mut self, dt: f64) -> CondynsateResult<()> {
        let acceleration =
            -self.gravity / self.length * self.angle.sin() - self.damping * self.velocity + self.torque;
        self.velocity += acceleration * dt;
        self.angle += self.velocity * dt;
        self.torque = 0.;
        if !self.angle.is_finite() {
            return Err(CondynsateError::new(
                CondynsateErrorTypes::BackendError,
                "Pendulum diverged".to_string(),
            ));
        }
        Ok(())
    }

    fn reset(&mut self) -> CondynsateResult<()> {
        self.angle = self.initial_angle;
        self.velocity = 0.;
        self.torque = 0.;
        Ok(())
    }

    fn body_state(&self, body: BodyId) -> CondynsateResult<BodyState> {
        self.check_body(body)?;
        Ok(BodyState::default())
    }

    fn set_body_state(&mut self, body: BodyId, _state: &BodyState) -> CondynsateResult<()> {
        self.check_body(body)
    }

    fn joint_state(&self, body: BodyId, joint: &str) -> CondynsateResult<JointState> {
        self.check_joint(body, joint)?;
        Ok(JointState {
            angle: self.angle,
            omega: self.velocity,
        })
    }

    fn set_joint_state(&mut self, body: BodyId, joint: &str, state: &JointState) -> CondynsateResult<()> {
        self.check_joint(body, joint)?;
        self.angle = state.angle;
        self.velocity = state.omega;
        Ok(())
    }

    fn apply_force(
        &mut self,
        body: BodyId,
        _link: Option<&str>,
        force: &Vector3<f64>,
        position: &Vector3<f64>,
    ) -> CondynsateResult<()> {
        self.check_body(body)?;
        self.torque += position.cross(force).y;
        Ok(())
    }

    fn apply_torque(&mut self, body: BodyId, _link: Option<&str>, torque: &Vector3<f64>) -> CondynsateResult<()> {
        self.check_body(body)?;
        self.torque += torque.y;
        Ok(())
    }

    fn apply_joint_torque(&mut self, body: BodyId, joint: &str, torque: f64) -> CondynsateResult<()> {
        self.check_joint(body, joint)?;
        self.torque += torque;
        Ok(())
    }

    fn joint_axis(&self, body: BodyId, joint: &str) -> CondynsateResult<(Vector3<f64>, Vector3<f64>)> {
        self.check_joint(body, joint)?;
        Ok((Vector3::zeros(), Vector3::y()))
    }

    fn link_visuals(&self, body: BodyId) -> CondynsateResult<Vec<LinkVisual>> {
        self.check_body(body)?;
        let orientation = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -self.angle);
        Ok(vec![
            LinkVisual {
                link: "rod".to_string(),
                mesh: PathBuf::from("rod.stl"),
                position: self.bob_position() / 2.,
                orientation,
                scale: Vector3::new(0.02, 0.02, self.length),
                color: [0.3, 0.3, 0.3],
                opacity: 1.,
            },
            LinkVisual {
                link: "bob".to_string(),
                mesh: PathBuf::from("bob.stl"),
                position: self.bob_position(),
                orientation,
                scale: Vector3::repeat(0.1),
                color: [0.8, 0.2, 0.2],
                opacity: 1.,
            },
        ])
    }

    fn disconnect(&mut self) -> CondynsateResult<()> {
        self.loaded = false;
        Ok(())
    }
}

fn run(project: &mut Project, pendulum: BodyHandle, args: &Cli) -> CondynsateResult<()> {
    let animator = project.animator().ok();
    let plot_ids = match animator {
        Some(animator) => {
            let lines = animator.add_lineplot(
                2,
                &LineplotConfig {
                    title: Some("Pendulum".to_string()),
                    x_label: Some("Time [s]".to_string()),
                    label: PerArtist::Each(vec![Some("Angle".to_string()), Some("Velocity".to_string())]),
                    color: PerArtist::Each(vec![[0.1, 0.3, 0.8], [0.8, 0.3, 0.1]]),
                    h_zero_line: true,
                    ..Default::default()
                },
            )?;
            let bars = animator.add_barchart(
                2,
                &BarchartConfig {
                    title: Some("Energy".to_string()),
                    label: PerArtist::Each(vec![Some("Kinetic".to_string()), Some("Potential".to_string())]),
                    x_lim: [Some(0.), None],
                    ..Default::default()
                },
            )?;
            Some((lines, bars))
        }
        None => None,
    };

    project.reset()?;
    let dt = project.simulator()?.dt();
    let steps = (args.duration / dt).ceil() as usize;
    for _ in 0..steps {
        project.step(!args.no_real_time, true)?;
        let simulator = project.simulator()?;
        let time = simulator.time();
        let joint = simulator.joint_state(pendulum, "hinge")?;
        if let Some((lines, bars)) = &plot_ids {
            let animator = project.animator()?;
            animator.lineplot_append_point(lines[0], time, joint.angle)?;
            animator.lineplot_append_point(lines[1], time, joint.omega)?;
            let kinetic = 0.5 * joint.omega.powi(2);
            let potential = 9.81 * (1. - joint.angle.cos());
            animator.barchart_set_value(bars[0], kinetic)?;
            animator.barchart_set_value(bars[1], potential)?;
        }
    }
    info!(
        "Simulated {:.2} s in {steps} steps",
        project.simulator()?.time()
    );
    Ok(())
}

fn doit(args: Cli) -> CondynsateResult<()> {
    let mut config = match &args.config_path {
        Some(path) => ProjectConfig::load_from_path(path)?,
        None => ProjectConfig::default(),
    };
    if config.keyboard {
        warn!("The demo has no key source, the keyboard is disabled");
        config.keyboard = false;
    }

    let mut backends = ProjectBackends::new(Box::new(PendulumBackend::new(args.angle)));
    backends.encoder = Some(Arc::new(match &args.ffmpeg {
        Some(path) => FfmpegEncoder::new(path.clone()),
        None => FfmpegEncoder::default(),
    }));

    let registry = ShutdownRegistry::new();
    let mut project = Project::new(config, backends, Some(&registry))?;
    #[cfg(unix)]
    let _hook = condynsate::shutdown::ShutdownHook::install(registry.clone(), true)?;

    let pendulum = project.load_body(&BodyDescription::new("pendulum", PathBuf::from("pendulum.urdf")))?;
    let result = run(&mut project, pendulum, &args);
    if result.is_ok() {
        std::thread::sleep(Duration::from_millis(100));
    }
    let terminated = project.terminate();
    result.and(terminated)
}

fn main() {
    let args = Cli::parse();

    let res = doit(args);
    if let Err(e) = res {
        println!("{}", e.detailed_error());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn pendulum_loses_energy() {
        let mut pendulum = PendulumBackend::new(1.);
        pendulum.load_body(&BodyDescription::new("p", PathBuf::from("p.urdf"))).unwrap();
        let (_, start) = pendulum.energy();
        for _ in 0..2000 {
            pendulum.step(0.005).unwrap();
        }
        let (kinetic, potential) = pendulum.energy();
        assert!(kinetic + potential < start);
        assert_eq!(pendulum.link_visuals(0).unwrap().len(), 2);
        assert!(pendulum.link_visuals(1).is_err());
    }
}
