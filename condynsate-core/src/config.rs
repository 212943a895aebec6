/*!
Typed configuration of a [`Project`](crate::project::Project).

Every struct accepts partial YAML files: missing fields take the documented
default and unknown fields are rejected. [`ProjectConfig::validate`] is run
once when the project is built, subsystems then trust their configuration.

```yaml
log:
  log_level:
    type: Info
simulator:
  dt: 0.01
visualizer:
  frame_rate: 45.0
  record: true
animator:
  frame_rate: 5.0
keyboard: true
```
*/

use std::path::{Path, PathBuf};

use condynsate_macros::config_derives;
use log::error;

use crate::{
    errors::{CondynsateError, CondynsateErrorTypes, CondynsateResult},
    logger::LoggerConfig,
    utils,
};

#[config_derives]
pub struct SimulatorConfig {
    /// Fixed physics time step, in seconds.
    pub dt: f64,
    pub gravity: [f64; 3],
    /// Upper bound of a non stable real time step, in multiples of `dt`.
    pub max_catch_up: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            dt: 0.01,
            gravity: [0., 0., -9.81],
            max_catch_up: 4.,
        }
    }
}

#[config_derives]
pub struct VisualizerConfig {
    /// Target frame rate. `None` or a value <= 0 is unthrottled.
    pub frame_rate: Option<f64>,
    pub record: bool,
    /// When false, every mutator is applied to the scene before it returns.
    pub threaded: bool,
    pub output_dir: PathBuf,
    pub video_name: String,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            frame_rate: Some(45.),
            record: false,
            threaded: true,
            output_dir: PathBuf::from("."),
            video_name: "visualization".to_string(),
        }
    }
}

#[config_derives]
pub struct AnimatorConfig {
    /// Target frame rate. `None` or a value <= 0 is unthrottled.
    pub frame_rate: Option<f64>,
    pub record: bool,
    /// When false, subplots and the figure redraw inside the mutator call.
    pub threaded: bool,
    pub output_dir: PathBuf,
    pub video_name: String,
}

impl Default for AnimatorConfig {
    fn default() -> Self {
        Self {
            frame_rate: Some(5.),
            record: false,
            threaded: true,
            output_dir: PathBuf::from("."),
            video_name: "animation".to_string(),
        }
    }
}

#[config_derives]
#[derive(Default)]
pub struct ProjectConfig {
    pub log: LoggerConfig,
    pub simulator: SimulatorConfig,
    /// `None` disables the visualizer.
    pub visualizer: Option<VisualizerConfig>,
    /// `None` disables the animator.
    pub animator: Option<AnimatorConfig>,
    pub keyboard: bool,
}

impl ProjectConfig {
    /// Loads a YAML configuration file.
    pub fn load_from_path(path: &Path) -> CondynsateResult<Self> {
        let mut config: serde_yaml::Value = match confy::load_path(path) {
            Ok(config) => config,
            Err(e) => {
                let what = format!(
                    "Error from Confy while loading the config file : {}",
                    utils::confy::detailed_error(&e)
                );
                error!("{what}");
                return Err(CondynsateError::new(CondynsateErrorTypes::ConfigError, what));
            }
        };
        config.apply_merge().map_err(|e| {
            let what = format!("Error from SerdeYAML while merging YAML tags: {e}");
            error!("{what}");
            CondynsateError::new(CondynsateErrorTypes::ConfigError, what)
        })?;
        let config: ProjectConfig = serde_yaml::from_value(config).map_err(|e| {
            let what = format!("Error from SerdeYAML while loading ProjectConfig : {e}");
            error!("{what}");
            CondynsateError::new(CondynsateErrorTypes::ConfigError, what)
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CondynsateResult<()> {
        let config_error = |what: String| CondynsateError::new(CondynsateErrorTypes::ConfigError, what);

        let sim = &self.simulator;
        if !(sim.dt.is_finite() && sim.dt > 0.) {
            return Err(config_error(format!(
                "simulator.dt must be a positive number, got {}",
                sim.dt
            )));
        }
        if !utils::is_vector(&sim.gravity) {
            return Err(config_error("simulator.gravity must be finite".to_string()));
        }
        if !(sim.max_catch_up.is_finite() && sim.max_catch_up >= 1.) {
            return Err(config_error(format!(
                "simulator.max_catch_up must be >= 1, got {}",
                sim.max_catch_up
            )));
        }

        if let Some(vis) = &self.visualizer {
            check_frame_rate("visualizer", vis.frame_rate)?;
            if vis.record {
                check_video_name("visualizer", &vis.video_name)?;
            }
        }
        if let Some(ani) = &self.animator {
            check_frame_rate("animator", ani.frame_rate)?;
            if ani.record {
                check_video_name("animator", &ani.video_name)?;
            }
        }
        Ok(())
    }
}

fn check_frame_rate(section: &str, frame_rate: Option<f64>) -> CondynsateResult<()> {
    match frame_rate {
        Some(rate) if rate.is_nan() || rate.is_infinite() => Err(CondynsateError::new(
            CondynsateErrorTypes::ConfigError,
            format!("{section}.frame_rate must be finite, got {rate}"),
        )),
        _ => Ok(()),
    }
}

fn check_video_name(section: &str, name: &str) -> CondynsateResult<()> {
    if name.is_empty() || name.contains(['<', '>', ':', '|', '?', '*', '.', '"', '\'']) {
        return Err(CondynsateError::new(
            CondynsateErrorTypes::ConfigError,
            format!("{section}.video_name \"{name}\" is not a valid file name"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::logger::LogLevel;

    #[test]
    pub fn defaults() {
        let config = ProjectConfig::default();
        assert!(config.visualizer.is_none());
        assert!(config.animator.is_none());
        assert!(!config.keyboard);
        assert_eq!(config.simulator.dt, 0.01);
        assert_eq!(VisualizerConfig::default().frame_rate, Some(45.));
        assert_eq!(AnimatorConfig::default().frame_rate, Some(5.));
        config.validate().unwrap();
    }

    #[test]
    pub fn load_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "log:\n  log_level:\n    type: Warn\nsimulator:\n  dt: 0.005\nanimator:\n  record: true\nkeyboard: true"
        )
        .unwrap();
        let config = ProjectConfig::load_from_path(&path).unwrap();
        assert_eq!(config.log.log_level, LogLevel::Warn);
        assert_eq!(config.simulator.dt, 0.005);
        assert_eq!(config.simulator.gravity, [0., 0., -9.81]);
        let animator = config.animator.unwrap();
        assert!(animator.record);
        assert_eq!(animator.frame_rate, Some(5.));
        assert!(config.visualizer.is_none());
        assert!(config.keyboard);
    }

    #[test]
    pub fn unknown_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.yaml");
        std::fs::write(&path, "simulator:\n  timestep: 0.1\n").unwrap();
        let err = ProjectConfig::load_from_path(&path).unwrap_err();
        assert_eq!(err.error_type(), CondynsateErrorTypes::ConfigError);
    }

    #[test]
    pub fn invalid_values() {
        let mut config = ProjectConfig::default();
        config.simulator.dt = 0.;
        assert!(config.validate().is_err());

        let mut config = ProjectConfig::default();
        config.animator = Some(AnimatorConfig {
            record: true,
            video_name: "my.video".to_string(),
            ..Default::default()
        });
        assert!(config.validate().is_err());

        let mut config = ProjectConfig::default();
        config.visualizer = Some(VisualizerConfig {
            frame_rate: Some(-1.),
            ..Default::default()
        });
        config.validate().unwrap();
    }
}
