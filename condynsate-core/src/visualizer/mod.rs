/*!
Threaded 3D scene front end.

Mutators validate their arguments on the caller thread and enqueue a
[`SceneAction`] in a [`GuardedActionQueue`], keyed per scene property or per
object. The `condynsate-visualizer` worker drains the queue at the configured
frame rate and applies the actions to the [`SceneBackend`]. Only the latest
value of each key is ever applied.

When recording, the worker captures the scene after every frame that changed
something, and [`Visualizer::terminate`] writes the video.

With `threaded: false` no thread is started: every mutator applies the queue
before it returns.
*/

pub mod actions;
pub mod scene;

use std::{
    collections::HashSet,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use log::{info, warn};
use nalgebra::Vector3;
use parking_lot::{Mutex, RwLock};

pub use actions::{ActionKey, Light, Material, SceneAction, SceneValue, Transform};
pub use scene::{HeadlessScene, SceneBackend, SceneState};

use crate::{
    config::VisualizerConfig,
    errors::{aggregate_results, CondynsateError, CondynsateErrorTypes, CondynsateResult},
    recording::{RecordingBuffer, VideoEncoder},
    shutdown::Terminate,
    simulator::VisualData,
    utils::{
        action_queue::GuardedActionQueue,
        frame_clock::FrameClock,
        is_number, is_vector,
        worker::{TickOutcome, Worker, WorkerTask},
    },
};

use actions::{AXES_PATH, BACKGROUND_PATH, CAMERA_OBJECT_PATH, CAMERA_PATH, GRID_PATH};

/// Partial light update, `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LightSettings {
    pub on: Option<bool>,
    /// Clipped to `[0, 20]`.
    pub intensity: Option<f64>,
    /// Clipped to `[0, 100]`, 0 is unlimited range. Spot and point lights
    /// only.
    pub distance: Option<f64>,
    pub shadow: Option<bool>,
}

/// Partial camera frustum update, `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frustum {
    pub aspect: Option<f64>,
    /// Vertical field of view, in degrees.
    pub fov: Option<f64>,
    pub near: Option<f64>,
    pub far: Option<f64>,
}

type SceneQueue = GuardedActionQueue<ActionKey, SceneAction>;

/// Backend plus recording, only touched by whoever executes the actions.
struct SceneRenderer {
    backend: Box<dyn SceneBackend>,
    recording: Option<RecordingBuffer>,
}

impl SceneRenderer {
    fn execute(&mut self, queue: &SceneQueue) -> TickOutcome {
        if self.backend.is_closed() {
            return TickOutcome::Closed;
        }
        let actions = queue.drain();
        if actions.is_empty() {
            return TickOutcome::Idle;
        }
        for (_, action) in actions {
            if let Err(e) = action.apply(self.backend.as_mut()) {
                if e.error_type() == CondynsateErrorTypes::TransportClosed {
                    return TickOutcome::Closed;
                }
                warn!("Scene action failed: {}", e.detailed_error());
            }
        }
        if let Some(recording) = self.recording.as_mut() {
            match self.backend.capture() {
                Ok(Some(frame)) => {
                    if let Err(e) = recording.capture(&frame, Instant::now()) {
                        warn!("{}", e.detailed_error());
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Unable to capture the scene: {}", e.detailed_error()),
            }
        }
        TickOutcome::Worked
    }
}

struct SceneTask {
    queue: Arc<SceneQueue>,
    renderer: Arc<Mutex<SceneRenderer>>,
}

impl WorkerTask for SceneTask {
    fn tick(&mut self) -> TickOutcome {
        self.renderer.lock().execute(&self.queue)
    }
}

struct VisualizerCore {
    config: VisualizerConfig,
    queue: Arc<SceneQueue>,
    renderer: Arc<Mutex<SceneRenderer>>,
    worker: Option<Worker>,
    encoder: Option<Arc<dyn VideoEncoder>>,
    /// Written once by terminate, read for the whole of an enqueue so that an
    /// accepted action always reaches the final flush.
    terminated: RwLock<bool>,
    /// Inline mode only, set when the backend closed under a mutator.
    inline_closed: AtomicBool,
}

impl VisualizerCore {
    fn is_running(&self) -> bool {
        self.is_alive(*self.terminated.read())
    }

    fn is_alive(&self, terminated: bool) -> bool {
        !terminated
            && !self.inline_closed.load(Ordering::SeqCst)
            && self.worker.as_ref().map_or(true, |w| !w.is_done())
    }

    fn enqueue(&self, action: SceneAction) -> CondynsateResult<()> {
        let terminated = self.terminated.read();
        if !self.is_alive(*terminated) {
            let what = "Visualizer is not running, action ignored".to_string();
            warn!("{what}");
            return Err(CondynsateError::new(CondynsateErrorTypes::NotRunning, what));
        }
        self.queue.enqueue(action.key(), action);
        if self.worker.is_none() {
            self.flush_inline();
        }
        Ok(())
    }

    fn flush_inline(&self) {
        if self.renderer.lock().execute(&self.queue) == TickOutcome::Closed {
            warn!("Visualizer scene closed unexpectedly");
            self.inline_closed.store(true, Ordering::SeqCst);
        }
    }

    fn save_recording(&self) -> CondynsateResult<()> {
        let mut renderer = self.renderer.lock();
        let Some(recording) = renderer.recording.as_mut() else {
            return Ok(());
        };
        let result = match &self.encoder {
            Some(encoder) => recording
                .save(encoder.as_ref(), &self.config.output_dir, &self.config.video_name)
                .map(|path| {
                    if let Some(path) = path {
                        info!("Visualizer recording saved to {}", path.display());
                    }
                }),
            None if recording.len() > 1 => Err(CondynsateError::new(
                CondynsateErrorTypes::RecordingError,
                "No video encoder given, visualizer recording dropped".to_string(),
            )),
            None => Ok(()),
        };
        recording.clear();
        result
    }
}

impl Terminate for VisualizerCore {
    fn name(&self) -> &str {
        "visualizer"
    }

    fn terminate(&self) -> CondynsateResult<()> {
        {
            let mut terminated = self.terminated.write();
            if *terminated {
                return Ok(());
            }
            *terminated = true;
        }
        let mut results = Vec::new();
        let mut closed = self.inline_closed.load(Ordering::SeqCst);
        match &self.worker {
            Some(worker) => {
                results.push(worker.terminate());
                closed |= worker.transport_closed();
            }
            None if !closed => self.flush_inline(),
            None => {}
        }
        closed |= self.renderer.lock().backend.is_closed();

        results.push(self.save_recording());
        if closed {
            results.push(Err(CondynsateError::new(
                CondynsateErrorTypes::TransportClosed,
                "Visualizer scene was closed before termination".to_string(),
            )));
        } else {
            results.push(self.renderer.lock().backend.close());
        }
        info!("Visualizer terminated");
        aggregate_results(results)
    }
}

pub struct Visualizer {
    core: Arc<VisualizerCore>,
    /// Objects already added, so that visual data of new objects is
    /// added rather than moved.
    known_objects: HashSet<String>,
}

impl Visualizer {
    /// Builds the visualizer, starts its worker unless `threaded` is false and
    /// queues the default scene settings.
    ///
    /// ## Arguments
    /// * `encoder` - Needed only when `config.record` is set.
    pub fn new(
        config: VisualizerConfig,
        backend: Box<dyn SceneBackend>,
        encoder: Option<Arc<dyn VideoEncoder>>,
    ) -> CondynsateResult<Self> {
        if config.record && encoder.is_none() {
            warn!("Visualizer records without a video encoder, the video will not be saved");
        }
        let queue = Arc::new(SceneQueue::new());
        let renderer = Arc::new(Mutex::new(SceneRenderer {
            backend,
            recording: config.record.then(RecordingBuffer::new),
        }));
        let worker = if config.threaded {
            Some(Worker::spawn(
                "condynsate-visualizer",
                SceneTask {
                    queue: queue.clone(),
                    renderer: renderer.clone(),
                },
                FrameClock::from_frame_rate(config.frame_rate),
            )?)
        } else {
            None
        };
        let visualizer = Self {
            core: Arc::new(VisualizerCore {
                config,
                queue,
                renderer,
                worker,
                encoder,
                terminated: RwLock::new(false),
                inline_closed: AtomicBool::new(false),
            }),
            known_objects: HashSet::new(),
        };
        visualizer.set_defaults()?;
        Ok(visualizer)
    }

    fn set_defaults(&self) -> CondynsateResult<()> {
        self.set_grid(true)?;
        self.set_axes(true)?;
        self.set_background(Some([0.44, 0.62, 0.82]), Some([0.82, 0.62, 0.44]))?;
        let lights = [
            (Light::Spot, false, 0.8, Some(0.)),
            (Light::PosX, true, 0.4, Some(0.)),
            (Light::NegX, true, 0.4, Some(0.)),
            (Light::Ambient, true, 0.6, None),
            (Light::Fill, true, 0.4, None),
        ];
        for (light, on, intensity, distance) in lights {
            self.set_light(
                light,
                &LightSettings {
                    on: Some(on),
                    intensity: Some(intensity),
                    distance,
                    shadow: Some(true),
                },
            )?;
        }
        self.set_cam_position(Vector3::new(3., 0.5, 2.))?;
        self.set_cam_target(Vector3::zeros())?;
        self.set_cam_zoom(1.)?;
        self.set_cam_frustum(&Frustum {
            near: Some(0.01),
            far: Some(1000.),
            ..Default::default()
        })
    }

    pub fn terminate_handle(&self) -> Arc<dyn Terminate> {
        self.core.clone()
    }

    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    pub fn is_threaded(&self) -> bool {
        self.core.worker.is_some()
    }

    /// `true` while the worker thread has not been joined.
    pub fn worker_alive(&self) -> bool {
        self.core.worker.as_ref().is_some_and(|w| w.is_alive())
    }

    /// Number of actions waiting for the worker.
    pub fn pending_actions(&self) -> usize {
        self.core.queue.len()
    }

    pub fn set_grid(&self, visible: bool) -> CondynsateResult<()> {
        self.core
            .enqueue(SceneAction::property(GRID_PATH, "visible", SceneValue::Bool(visible)))
    }

    pub fn set_axes(&self, visible: bool) -> CondynsateResult<()> {
        self.core
            .enqueue(SceneAction::property(AXES_PATH, "visible", SceneValue::Bool(visible)))
    }

    /// Sets the background gradient. `None` leaves a color unchanged.
    pub fn set_background(&self, top: Option<[f64; 3]>, bottom: Option<[f64; 3]>) -> CondynsateResult<()> {
        let top = top.map(|c| check_color("set_background", c)).transpose()?;
        let bottom = bottom.map(|c| check_color("set_background", c)).transpose()?;
        if let Some(top) = top {
            self.core.enqueue(SceneAction::property(
                BACKGROUND_PATH,
                "top_color",
                SceneValue::Color(top),
            ))?;
        }
        if let Some(bottom) = bottom {
            self.core.enqueue(SceneAction::property(
                BACKGROUND_PATH,
                "bottom_color",
                SceneValue::Color(bottom),
            ))?;
        }
        Ok(())
    }

    pub fn set_light(&self, light: Light, settings: &LightSettings) -> CondynsateResult<()> {
        let context = format!("set_light({light})");
        let intensity = settings
            .intensity
            .map(|v| check_number(&context, "intensity", v).map(|v| v.clamp(0., 20.)))
            .transpose()?;
        let distance = match settings.distance {
            Some(_) if !light.has_distance() => {
                return Err(invalid_argument(format!("{context}: this light has no distance")));
            }
            Some(v) => Some(check_number(&context, "distance", v)?.clamp(0., 100.)),
            None => None,
        };

        let path = light.path();
        let object_path = light.object_path();
        if let Some(on) = settings.on {
            self.core
                .enqueue(SceneAction::property(&path, "visible", SceneValue::Bool(on)))?;
            self.core
                .enqueue(SceneAction::property(&object_path, "visible", SceneValue::Bool(on)))?;
        }
        if let Some(intensity) = intensity {
            self.core.enqueue(SceneAction::property(
                &object_path,
                "intensity",
                SceneValue::Number(intensity),
            ))?;
        }
        if let Some(distance) = distance {
            self.core.enqueue(SceneAction::property(
                &object_path,
                "distance",
                SceneValue::Number(distance),
            ))?;
        }
        if let Some(shadow) = settings.shadow {
            self.core.enqueue(SceneAction::property(
                &object_path,
                "castShadow",
                SceneValue::Bool(shadow),
            ))?;
        }
        Ok(())
    }

    pub fn set_spotlight(&self, settings: &LightSettings) -> CondynsateResult<()> {
        self.set_light(Light::Spot, settings)
    }

    pub fn set_posx_light(&self, settings: &LightSettings) -> CondynsateResult<()> {
        self.set_light(Light::PosX, settings)
    }

    pub fn set_negx_light(&self, settings: &LightSettings) -> CondynsateResult<()> {
        self.set_light(Light::NegX, settings)
    }

    pub fn set_ambient_light(&self, settings: &LightSettings) -> CondynsateResult<()> {
        self.set_light(Light::Ambient, settings)
    }

    pub fn set_fill_light(&self, settings: &LightSettings) -> CondynsateResult<()> {
        self.set_light(Light::Fill, settings)
    }

    pub fn set_cam_position(&self, position: Vector3<f64>) -> CondynsateResult<()> {
        check_vector("set_cam_position", &position)?;
        self.core.enqueue(SceneAction::property(
            CAMERA_PATH,
            "position",
            SceneValue::Vector(position),
        ))
    }

    pub fn set_cam_target(&self, target: Vector3<f64>) -> CondynsateResult<()> {
        check_vector("set_cam_target", &target)?;
        self.core.enqueue(SceneAction::property(
            CAMERA_PATH,
            "target",
            SceneValue::Vector(target),
        ))
    }

    /// Zoom is clipped to `[1e-4, 100]`.
    pub fn set_cam_zoom(&self, zoom: f64) -> CondynsateResult<()> {
        let zoom = check_number("set_cam_zoom", "zoom", zoom)?.clamp(1e-4, 100.);
        self.core.enqueue(SceneAction::property(
            CAMERA_OBJECT_PATH,
            "zoom",
            SceneValue::Number(zoom),
        ))
    }

    pub fn set_cam_frustum(&self, frustum: &Frustum) -> CondynsateResult<()> {
        let params = [
            ("aspect", frustum.aspect),
            ("fov", frustum.fov),
            ("near", frustum.near),
            ("far", frustum.far),
        ];
        for (name, value) in params {
            if let Some(value) = value {
                if check_number("set_cam_frustum", name, value)? <= 0. {
                    return Err(invalid_argument(format!(
                        "set_cam_frustum: {name} must be positive, got {value}"
                    )));
                }
            }
        }
        if let (Some(near), Some(far)) = (frustum.near, frustum.far) {
            if near >= far {
                return Err(invalid_argument(format!(
                    "set_cam_frustum: near ({near}) must be smaller than far ({far})"
                )));
            }
        }
        for (name, value) in params {
            if let Some(value) = value {
                self.core.enqueue(SceneAction::property(
                    CAMERA_OBJECT_PATH,
                    name,
                    SceneValue::Number(value),
                ))?;
            }
        }
        Ok(())
    }

    pub fn add_object(
        &mut self,
        id: &str,
        mesh: &Path,
        transform: &Transform,
        material: &Material,
    ) -> CondynsateResult<()> {
        if id.is_empty() {
            return Err(invalid_argument("add_object: empty object id".to_string()));
        }
        check_transform("add_object", transform)?;
        let material = check_material("add_object", material)?;
        self.core.enqueue(SceneAction::AddObject {
            id: id.to_string(),
            mesh: mesh.to_path_buf(),
            transform: transform.clone(),
            material,
        })?;
        self.known_objects.insert(id.to_string());
        Ok(())
    }

    pub fn set_transform(&self, id: &str, transform: &Transform) -> CondynsateResult<()> {
        self.check_known("set_transform", id)?;
        check_transform("set_transform", transform)?;
        self.core.enqueue(SceneAction::SetTransform {
            id: id.to_string(),
            transform: transform.clone(),
        })
    }

    pub fn set_material(&self, id: &str, material: &Material) -> CondynsateResult<()> {
        self.check_known("set_material", id)?;
        let material = check_material("set_material", material)?;
        self.core.enqueue(SceneAction::SetMaterial {
            id: id.to_string(),
            material,
        })
    }

    /// Adds the object the first time its name is seen, then updates its
    /// transform and material.
    pub fn update_visual(&mut self, data: &VisualData) -> CondynsateResult<()> {
        let transform = Transform {
            position: data.position,
            orientation: data.orientation,
            scale: data.scale,
        };
        let material = Material {
            color: data.color,
            opacity: data.opacity,
        };
        if !self.known_objects.contains(&data.name) {
            return self.add_object(&data.name, &data.mesh, &transform, &material);
        }
        self.set_transform(&data.name, &transform)?;
        self.set_material(&data.name, &material)
    }

    /// Stops the worker after one last flush, saves the recording and closes
    /// the scene. Idempotent.
    ///
    /// Fails with `TransportClosed` if the scene had closed on its own.
    pub fn terminate(&self) -> CondynsateResult<()> {
        self.core.terminate()
    }

    fn check_known(&self, context: &str, id: &str) -> CondynsateResult<()> {
        if !self.known_objects.contains(id) {
            return Err(invalid_argument(format!("{context}: unknown object \"{id}\"")));
        }
        Ok(())
    }
}

impl Drop for Visualizer {
    fn drop(&mut self) {
        if let Err(e) = self.core.terminate() {
            warn!("{}", e.detailed_error());
        }
    }
}

fn invalid_argument(what: String) -> CondynsateError {
    warn!("{what}");
    CondynsateError::new(CondynsateErrorTypes::InvalidArgument, what)
}

fn check_number(context: &str, name: &str, value: f64) -> CondynsateResult<f64> {
    if !is_number(value) {
        return Err(invalid_argument(format!(
            "{context}: {name} must be a finite number, got {value}"
        )));
    }
    Ok(value)
}

fn check_vector(context: &str, value: &Vector3<f64>) -> CondynsateResult<()> {
    if !is_vector(value.as_slice()) {
        return Err(invalid_argument(format!(
            "{context}: vector must be finite, got {value:?}"
        )));
    }
    Ok(())
}

fn check_color(context: &str, color: [f64; 3]) -> CondynsateResult<[f64; 3]> {
    if !is_vector(&color) {
        return Err(invalid_argument(format!(
            "{context}: color must be finite, got {color:?}"
        )));
    }
    Ok(color.map(|c| c.clamp(0., 1.)))
}

fn check_transform(context: &str, transform: &Transform) -> CondynsateResult<()> {
    check_vector(context, &transform.position)?;
    check_vector(context, &transform.scale)?;
    if !is_vector(transform.orientation.coords.as_slice()) {
        return Err(invalid_argument(format!("{context}: orientation must be finite")));
    }
    Ok(())
}

fn check_material(context: &str, material: &Material) -> CondynsateResult<Material> {
    let color = check_color(context, material.color)?;
    let opacity = check_number(context, "opacity", material.opacity)?.clamp(0., 1.);
    Ok(Material { color, opacity })
}
