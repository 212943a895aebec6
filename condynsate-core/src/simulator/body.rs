use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
};

use nalgebra::{UnitQuaternion, Vector3};

/// Index of a body inside its simulation backend.
pub type BodyId = usize;

/// Handle returned by [`Simulator::load_body`](super::Simulator::load_body).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyHandle(pub(crate) usize);

impl BodyHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// What to load in the simulation backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyDescription {
    /// Unique name, used as prefix of every scene object of the body.
    pub name: String,
    pub urdf_path: PathBuf,
    pub fixed: bool,
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

impl BodyDescription {
    pub fn new(name: &str, urdf_path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            urdf_path,
            fixed: false,
            position: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BodyState {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub velocity: Vector3<f64>,
    pub omega: Vector3<f64>,
}

impl Default for BodyState {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
            velocity: Vector3::zeros(),
            omega: Vector3::zeros(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JointState {
    pub angle: f64,
    pub omega: f64,
}

/// Visual of one link as reported by the simulation backend.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkVisual {
    pub link: String,
    pub mesh: PathBuf,
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub scale: Vector3<f64>,
    pub color: [f64; 3],
    pub opacity: f64,
}

/// Everything a scene needs to draw one object of a body.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualData {
    /// Scene object id, `{body}/{link}` or `{body}/{link}/{arrow}`.
    pub name: String,
    pub mesh: PathBuf,
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub scale: Vector3<f64>,
    pub color: [f64; 3],
    pub opacity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrowKind {
    Force,
    Torque,
}

impl ArrowKind {
    fn mesh(&self) -> PathBuf {
        match self {
            ArrowKind::Force => PathBuf::from("arrow_lin.stl"),
            ArrowKind::Torque => PathBuf::from("arrow_ccw.stl"),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ArrowKind::Force => "force",
            ArrowKind::Torque => "torque",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct StagedArrow {
    target: String,
    kind: ArrowKind,
    position: Vector3<f64>,
    value: Vector3<f64>,
    scale: f64,
}

/// Body bookkeeping on the main thread.
///
/// Force and torque arrows are staged here by the mutators and drained by
/// [`Body::visual_data`]. They only live for one frame: an arrow drawn last
/// frame and not staged again is emitted hidden (zero scale).
#[derive(Debug, Clone)]
pub struct Body {
    id: BodyId,
    name: String,
    staged: Vec<StagedArrow>,
    shown_arrows: BTreeSet<String>,
}

impl Body {
    pub(crate) fn new(id: BodyId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            staged: Vec::new(),
            shown_arrows: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> BodyId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn staged_arrows(&self) -> usize {
        self.staged.len()
    }

    pub(crate) fn stage_arrow(
        &mut self,
        target: &str,
        kind: ArrowKind,
        position: Vector3<f64>,
        value: Vector3<f64>,
        scale: f64,
    ) {
        self.staged.push(StagedArrow {
            target: target.to_string(),
            kind,
            position,
            value,
            scale,
        });
    }

    /// Drops the staged arrows without drawing them.
    pub fn clear_visual_buffer(&mut self) {
        self.staged.clear();
    }

    /// Builds the visual data of every link followed by the staged arrows,
    /// and empties the arrow buffer.
    pub fn visual_data(&mut self, links: Vec<LinkVisual>) -> Vec<VisualData> {
        let mut data: Vec<VisualData> = links
            .into_iter()
            .map(|l| VisualData {
                name: format!("{}/{}", self.name, l.link),
                mesh: l.mesh,
                position: l.position,
                orientation: l.orientation,
                scale: l.scale,
                color: l.color,
                opacity: l.opacity,
            })
            .collect();

        let mut counters: BTreeMap<(String, &'static str), usize> = BTreeMap::new();
        let mut shown = BTreeSet::new();
        for arrow in self.staged.drain(..) {
            let counter = counters
                .entry((arrow.target.clone(), arrow.kind.label()))
                .or_insert(0);
            *counter += 1;
            let name = format!(
                "{}/{}/{}_{}",
                self.name,
                arrow.target,
                arrow.kind.label(),
                counter
            );
            let magnitude = arrow.value.norm();
            if magnitude > 0. && magnitude.is_finite() {
                data.push(VisualData {
                    name: name.clone(),
                    mesh: arrow.kind.mesh(),
                    position: arrow.position,
                    orientation: z_to(&arrow.value),
                    scale: Vector3::repeat(magnitude * arrow.scale),
                    color: [0., 0., 0.],
                    opacity: 1.,
                });
                shown.insert(name);
            }
        }

        for stale in self.shown_arrows.difference(&shown) {
            data.push(hidden_arrow(stale));
        }
        self.shown_arrows = shown;
        data
    }
}

fn hidden_arrow(name: &str) -> VisualData {
    let mesh = if name.contains("torque") {
        ArrowKind::Torque.mesh()
    } else {
        ArrowKind::Force.mesh()
    };
    VisualData {
        name: name.to_string(),
        mesh,
        position: Vector3::zeros(),
        orientation: UnitQuaternion::identity(),
        scale: Vector3::zeros(),
        color: [0., 0., 0.],
        opacity: 0.,
    }
}

/// Rotation bringing the z axis onto `direction`.
fn z_to(direction: &Vector3<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::rotation_between(&Vector3::z(), direction).unwrap_or_else(|| {
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(name: &str) -> LinkVisual {
        LinkVisual {
            link: name.to_string(),
            mesh: PathBuf::from("cube.stl"),
            position: Vector3::new(1., 2., 3.),
            orientation: UnitQuaternion::identity(),
            scale: Vector3::repeat(1.),
            color: [0.5, 0.5, 0.5],
            opacity: 1.,
        }
    }

    #[test]
    pub fn arrows_are_drained_and_hidden_next_frame() {
        let mut body = Body::new(0, "cart");
        body.stage_arrow("base", ArrowKind::Force, Vector3::zeros(), Vector3::new(0., 0., 2.), 0.5);
        body.stage_arrow("base", ArrowKind::Force, Vector3::zeros(), Vector3::new(1., 0., 0.), 1.);
        assert_eq!(body.staged_arrows(), 2);

        let data = body.visual_data(vec![link("base")]);
        assert_eq!(data.len(), 3);
        assert_eq!(data[0].name, "cart/base");
        assert_eq!(data[1].name, "cart/base/force_1");
        assert!((data[1].scale.x - 1.).abs() < 1e-12);
        assert_eq!(data[2].name, "cart/base/force_2");
        let tip = data[2].orientation * Vector3::z();
        assert!((tip - Vector3::x()).norm() < 1e-9);
        assert_eq!(body.staged_arrows(), 0);

        let data = body.visual_data(vec![link("base")]);
        assert_eq!(data.len(), 3);
        assert_eq!(data[1].scale, Vector3::zeros());
        assert_eq!(data[2].opacity, 0.);

        let data = body.visual_data(vec![link("base")]);
        assert_eq!(data.len(), 1);
    }

    #[test]
    pub fn clear_drops_staged_arrows() {
        let mut body = Body::new(0, "wheel");
        for _ in 0..100 {
            body.stage_arrow("axle", ArrowKind::Torque, Vector3::zeros(), Vector3::z(), 1.);
        }
        body.clear_visual_buffer();
        assert_eq!(body.staged_arrows(), 0);
        assert_eq!(body.visual_data(Vec::new()).len(), 0);
    }

    #[test]
    pub fn opposite_direction_arrow() {
        let q = z_to(&Vector3::new(0., 0., -3.));
        assert!((q * Vector3::z() + Vector3::z()).norm() < 1e-9);
    }
}
