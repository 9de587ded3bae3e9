// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scene descriptor values for rayfarm render sessions.
//!
//! A render session hands exactly one [`SceneDescriptor`] to every worker. The
//! descriptor is an immutable, tagged value tree: no worker ever sees an
//! untyped blob, and every value here round-trips through serde unchanged.
//!
//! # Design Principles
//!
//! - **Values, not handles**: the graph, lights and projection are plain data.
//! - **Validated once**: [`SceneDescriptor::validate`] runs on the coordinator
//!   before dispatch and again on each worker before a scene is accepted.
//! - **No shading math**: how a pixel is computed from these values is the
//!   worker's opaque capability.

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod camera;
mod canon;
mod color;
mod light;
mod types;

pub use camera::{Projection, ViewBasis};
pub use canon::{check_finite, check_finite_vec};
pub use color::PixelColor;
pub use light::{Light, LightSet};
pub use types::{Material, SceneGraph, SceneNode, Shape, Transform, Vec3};

/// Version of the scene value schema carried alongside every `init`.
///
/// Bump whenever a serialized field changes shape.
pub const SCHEMA_VERSION: u16 = 1;

/// Error type for scene validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SceneError {
    /// The projection describes an image with no pixels.
    #[error("image must be non-empty, got {width}x{height}")]
    EmptyImage {
        /// Requested width in columns.
        width: u32,
        /// Requested height in rows.
        height: u32,
    },
    /// A float somewhere in the scene is NaN or infinite.
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
    /// Eye and target coincide, or up is parallel to the view direction.
    #[error("degenerate view basis")]
    DegenerateView,
    /// A primitive cannot be rendered as described.
    #[error("invalid shape: {0}")]
    InvalidShape(String),
}

/// Everything a worker needs to compute pixels for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescriptor {
    /// Composite of renderable primitives and transforms.
    pub graph: SceneGraph,
    /// Light sources illuminating the graph.
    pub lights: LightSet,
    /// Camera and image dimensions.
    pub projection: Projection,
}

impl SceneDescriptor {
    /// Bundle a graph, lights and projection into one descriptor.
    pub fn new(graph: SceneGraph, lights: LightSet, projection: Projection) -> Self {
        Self {
            graph,
            lights,
            projection,
        }
    }

    /// Image width in columns.
    pub fn width(&self) -> u32 {
        self.projection.width
    }

    /// Image height in rows.
    pub fn height(&self) -> u32 {
        self.projection.height
    }

    /// Check every invariant a worker relies on.
    ///
    /// An empty [`LightSet`] is not an error; shading simply has nothing to
    /// work with.
    pub fn validate(&self) -> Result<(), SceneError> {
        self.projection.validate()?;
        self.lights.validate()?;
        self.graph.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_scene(width: u32, height: u32) -> SceneDescriptor {
        SceneDescriptor::new(
            SceneGraph::new(SceneNode::primitive(
                Shape::Sphere {
                    center: [0.0, 0.0, -5.0],
                    radius: 1.0,
                },
                Material::default(),
            )),
            LightSet::from(vec![Light::Point {
                position: [5.0, 5.0, 0.0],
                color: [1.0, 1.0, 1.0],
                intensity: 1.0,
            }]),
            Projection::look_at(
                [0.0, 0.0, 0.0],
                [0.0, 0.0, -1.0],
                [0.0, 1.0, 0.0],
                60f32.to_radians(),
                width,
                height,
            )
            .unwrap(),
        )
    }

    #[test]
    fn valid_scene_passes() {
        assert_eq!(unit_scene(4, 2).validate(), Ok(()));
    }

    #[test]
    fn empty_lights_are_accepted() {
        let mut scene = unit_scene(4, 2);
        scene.lights = LightSet::default();
        assert_eq!(scene.validate(), Ok(()));
    }

    #[test]
    fn zero_height_is_rejected() {
        let mut scene = unit_scene(4, 2);
        scene.projection.height = 0;
        assert_eq!(
            scene.validate(),
            Err(SceneError::EmptyImage {
                width: 4,
                height: 0
            })
        );
    }

    #[test]
    fn nan_light_is_rejected() {
        let mut scene = unit_scene(4, 2);
        scene.lights.push(Light::Ambient {
            color: [f32::NAN, 0.0, 0.0],
            intensity: 0.1,
        });
        assert_eq!(scene.validate(), Err(SceneError::NonFinite("light color")));
    }

    #[test]
    fn descriptor_survives_json_round_trip() {
        let scene = unit_scene(8, 8);
        let json = serde_json::to_string(&scene).unwrap();
        let back: SceneDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scene);
    }
}
