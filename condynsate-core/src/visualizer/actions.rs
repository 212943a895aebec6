//! Scene actions queued by the [`Visualizer`](super::Visualizer) and executed
//! by its worker.

use std::path::PathBuf;

use condynsate_macros::{EnumToString, ToVec};
use nalgebra::{UnitQuaternion, Vector3};

use super::scene::SceneBackend;
use crate::errors::CondynsateResult;

pub const GRID_PATH: &str = "/Grid";
pub const AXES_PATH: &str = "/Axes";
pub const BACKGROUND_PATH: &str = "/Background";
pub const CAMERA_PATH: &str = "/Cameras/default";
pub const CAMERA_OBJECT_PATH: &str = "/Cameras/default/rotated/<object>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumToString, ToVec)]
pub enum Light {
    Spot,
    PosX,
    NegX,
    Ambient,
    Fill,
}

impl Light {
    /// Name of the light in the scene tree.
    pub fn scene_name(&self) -> &'static str {
        match self {
            Light::Spot => "SpotLight",
            Light::PosX => "PointLightPositiveX",
            Light::NegX => "PointLightNegativeX",
            Light::Ambient => "AmbientLight",
            Light::Fill => "FillLight",
        }
    }

    pub fn has_distance(&self) -> bool {
        matches!(self, Light::Spot | Light::PosX | Light::NegX)
    }

    pub fn path(&self) -> String {
        format!("/Lights/{}", self.scene_name())
    }

    pub fn object_path(&self) -> String {
        format!("/Lights/{}/<object>", self.scene_name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SceneValue {
    Bool(bool),
    Number(f64),
    Color([f64; 3]),
    Vector(Vector3<f64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub scale: Vector3<f64>,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
            scale: Vector3::repeat(1.),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    /// RGB, each channel in `[0, 1]`.
    pub color: [f64; 3],
    pub opacity: f64,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            color: [0.91, 0.84, 0.6],
            opacity: 1.,
        }
    }
}

/// Coalescing key. One key per scene property, so two partial updates of
/// the same light or camera both survive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionKey {
    Property { path: String, property: &'static str },
    AddObject(String),
    Transform(String),
    Material(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SceneAction {
    SetProperty {
        path: String,
        property: &'static str,
        value: SceneValue,
    },
    AddObject {
        id: String,
        mesh: PathBuf,
        transform: Transform,
        material: Material,
    },
    SetTransform {
        id: String,
        transform: Transform,
    },
    SetMaterial {
        id: String,
        material: Material,
    },
}

impl SceneAction {
    pub fn property(path: &str, property: &'static str, value: SceneValue) -> Self {
        SceneAction::SetProperty {
            path: path.to_string(),
            property,
            value,
        }
    }

    pub fn key(&self) -> ActionKey {
        match self {
            SceneAction::SetProperty { path, property, .. } => ActionKey::Property {
                path: path.clone(),
                property,
            },
            SceneAction::AddObject { id, .. } => ActionKey::AddObject(id.clone()),
            SceneAction::SetTransform { id, .. } => ActionKey::Transform(id.clone()),
            SceneAction::SetMaterial { id, .. } => ActionKey::Material(id.clone()),
        }
    }

    pub fn apply(&self, scene: &mut dyn SceneBackend) -> CondynsateResult<()> {
        match self {
            SceneAction::SetProperty {
                path,
                property,
                value,
            } => scene.set_property(path, property, value),
            SceneAction::AddObject {
                id,
                mesh,
                transform,
                material,
            } => scene.add_object(id, mesh, transform, material),
            SceneAction::SetTransform { id, transform } => scene.set_transform(id, transform),
            SceneAction::SetMaterial { id, material } => scene.set_material(id, material),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::enum_tools::ToVec;

    #[test]
    pub fn light_properties_have_distinct_keys() {
        let intensity = SceneAction::property(&Light::Spot.object_path(), "intensity", SceneValue::Number(1.));
        let distance = SceneAction::property(&Light::Spot.object_path(), "distance", SceneValue::Number(1.));
        let other = SceneAction::property(&Light::Fill.object_path(), "intensity", SceneValue::Number(1.));
        assert_ne!(intensity.key(), distance.key());
        assert_ne!(intensity.key(), other.key());
        assert_eq!(
            intensity.key(),
            SceneAction::property(&Light::Spot.object_path(), "intensity", SceneValue::Number(3.)).key()
        );
    }

    #[test]
    pub fn object_actions_are_keyed_by_kind() {
        let add = SceneAction::AddObject {
            id: "cart/base".to_string(),
            mesh: PathBuf::from("cube.stl"),
            transform: Transform::default(),
            material: Material::default(),
        };
        let moved = SceneAction::SetTransform {
            id: "cart/base".to_string(),
            transform: Transform::default(),
        };
        assert_ne!(add.key(), moved.key());
    }

    #[test]
    pub fn every_light_has_a_unique_path() {
        let lights = Light::to_vec();
        assert_eq!(lights.len(), 5);
        let mut paths: Vec<String> = lights.iter().map(|l| l.path()).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 5);
        assert!(!Light::Ambient.has_distance());
    }
}
