/*!
Real-time coordination layer of a robotics teaching toolkit.

A main thread steps a physics engine while background threads render a 3D
scene and live plots, each at its own frame rate. This crate provides the
pieces that keep these threads coherent:
- [`utils::frame_clock::FrameClock`] decides when a frame is due.
- [`utils::action_queue::GuardedActionQueue`] coalesces scene commands by
  key, so that only the latest value of a property is ever applied.
- [`utils::worker::Worker`] is the lifecycle of every background thread: it
  runs a task until asked to stop, flushes it one last time and is joined.
- [`recording::RecordingBuffer`] keeps compressed frames with their capture
  time and turns them into a constant rate video.

On top of them sit four subsystems, composed by [`project::Project`]:
- the [`simulator`], stepping a physics backend on the main thread,
- the [`visualizer`], drawing a 3D scene,
- the [`animator`], drawing lineplots and barcharts,
- the [`keyboard`] listener.

Every threaded subsystem can be terminated from a signal handler through the
[`shutdown`] registry, so no thread is orphaned and no recording is lost on
Ctrl+C.

```no_run
use std::path::Path;
use condynsate::{config::ProjectConfig, project::{Project, ProjectBackends}};
# fn physics() -> Box<dyn condynsate::simulator::SimulationBackend> { unimplemented!() }

let config = ProjectConfig::load_from_path(Path::new("config.yaml")).unwrap();
let mut project = Project::new(config, ProjectBackends::new(physics()), None).unwrap();
project.reset().unwrap();
for _ in 0..1000 {
    project.step(true, true).unwrap();
}
project.terminate().unwrap();
```
*/

pub mod animator;
pub mod config;
pub mod constants;
pub mod errors;
pub mod keyboard;
pub mod logger;
pub mod project;
pub mod recording;
pub mod shutdown;
pub mod simulator;
pub mod utils;
pub mod visualizer;
