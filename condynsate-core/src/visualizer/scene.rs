//! Scene backends driven by the visualizer worker.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;

use super::actions::{Material, SceneValue, Transform, BACKGROUND_PATH};
use crate::{
    errors::{CondynsateError, CondynsateErrorTypes, CondynsateResult},
    recording::Frame,
};

/// A 3D scene the visualizer pushes its actions to.
///
/// Every method is called from the visualizer worker thread, or from the
/// caller thread when the visualizer is not threaded, never from both.
pub trait SceneBackend: Send {
    fn set_property(&mut self, path: &str, property: &str, value: &SceneValue) -> CondynsateResult<()>;
    fn add_object(
        &mut self,
        id: &str,
        mesh: &Path,
        transform: &Transform,
        material: &Material,
    ) -> CondynsateResult<()>;
    fn set_transform(&mut self, id: &str, transform: &Transform) -> CondynsateResult<()>;
    fn set_material(&mut self, id: &str, material: &Material) -> CondynsateResult<()>;
    /// `true` once the transport to the scene is gone (window closed by the
    /// user, broken socket).
    fn is_closed(&self) -> bool;
    /// Current image of the scene, if the backend can render one.
    fn capture(&mut self) -> CondynsateResult<Option<Frame>>;
    fn close(&mut self) -> CondynsateResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub mesh: PathBuf,
    pub transform: Transform,
    pub material: Material,
}

#[derive(Debug, Default, Clone)]
pub struct SceneState {
    pub properties: BTreeMap<(String, String), SceneValue>,
    pub objects: BTreeMap<String, SceneObject>,
    /// Number of backend calls executed, captures excluded.
    pub applied: usize,
    pub captures: usize,
    pub closed: bool,
}

impl SceneState {
    pub fn property(&self, path: &str, property: &str) -> Option<&SceneValue> {
        self.properties.get(&(path.to_string(), property.to_string()))
    }
}

/// Scene kept in memory, rendered as a top view.
///
/// The state is shared: [`HeadlessScene::state`] gives a handle that stays
/// readable after the scene is moved into a visualizer, and setting
/// `closed` on it emulates a user closing the window.
#[derive(Debug, Clone)]
pub struct HeadlessScene {
    state: Arc<Mutex<SceneState>>,
    width: u32,
    height: u32,
    /// Meters per pixel of the top view.
    resolution: f64,
}

impl Default for HeadlessScene {
    fn default() -> Self {
        Self::new(160, 120)
    }
}

impl HeadlessScene {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(SceneState::default())),
            width,
            height,
            resolution: 0.05,
        }
    }

    pub fn state(&self) -> Arc<Mutex<SceneState>> {
        self.state.clone()
    }

    fn check_open(state: &SceneState) -> CondynsateResult<()> {
        if state.closed {
            return Err(CondynsateError::new(
                CondynsateErrorTypes::TransportClosed,
                "Headless scene is closed".to_string(),
            ));
        }
        Ok(())
    }

    fn render(&self, state: &SceneState) -> CondynsateResult<Frame> {
        let color_of = |property: &str, default: [f64; 3]| match state
            .property(BACKGROUND_PATH, property)
        {
            Some(SceneValue::Color(c)) => *c,
            _ => default,
        };
        let top = to_rgb(color_of("top_color", [1., 1., 1.]));
        let bottom = to_rgb(color_of("bottom_color", [1., 1., 1.]));

        let mut pixels = Frame::filled(self.width, self.height, top).pixels().to_vec();
        let half = (self.height / 2) as usize * self.width as usize * 3;
        for chunk in pixels[half..].chunks_exact_mut(3) {
            chunk.copy_from_slice(&bottom);
        }

        for object in state.objects.values() {
            if object.material.opacity <= 0. || object.transform.scale.norm() == 0. {
                continue;
            }
            let x = self.width as f64 / 2. + object.transform.position.x / self.resolution;
            let y = self.height as f64 / 2. - object.transform.position.y / self.resolution;
            if x < 0. || y < 0. || x >= self.width as f64 || y >= self.height as f64 {
                continue;
            }
            let offset = (y as usize * self.width as usize + x as usize) * 3;
            pixels[offset..offset + 3].copy_from_slice(&to_rgb(object.material.color));
        }
        Frame::new(self.width, self.height, pixels)
    }
}

fn to_rgb(color: [f64; 3]) -> [u8; 3] {
    color.map(|c| (c.clamp(0., 1.) * 255.).round() as u8)
}

impl SceneBackend for HeadlessScene {
    fn set_property(&mut self, path: &str, property: &str, value: &SceneValue) -> CondynsateResult<()> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        state
            .properties
            .insert((path.to_string(), property.to_string()), value.clone());
        state.applied += 1;
        Ok(())
    }

    fn add_object(
        &mut self,
        id: &str,
        mesh: &Path,
        transform: &Transform,
        material: &Material,
    ) -> CondynsateResult<()> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        state.objects.insert(
            id.to_string(),
            SceneObject {
                mesh: mesh.to_path_buf(),
                transform: transform.clone(),
                material: material.clone(),
            },
        );
        state.applied += 1;
        Ok(())
    }

    fn set_transform(&mut self, id: &str, transform: &Transform) -> CondynsateResult<()> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        let object = state.objects.get_mut(id).ok_or_else(|| unknown_object(id))?;
        object.transform = transform.clone();
        state.applied += 1;
        Ok(())
    }

    fn set_material(&mut self, id: &str, material: &Material) -> CondynsateResult<()> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        let object = state.objects.get_mut(id).ok_or_else(|| unknown_object(id))?;
        object.material = material.clone();
        state.applied += 1;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn capture(&mut self) -> CondynsateResult<Option<Frame>> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        state.captures += 1;
        Ok(Some(self.render(&state)?))
    }

    fn close(&mut self) -> CondynsateResult<()> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        state.closed = true;
        state.objects.clear();
        Ok(())
    }
}

fn unknown_object(id: &str) -> CondynsateError {
    CondynsateError::new(
        CondynsateErrorTypes::BackendError,
        format!("No object \"{id}\" in the scene"),
    )
}
