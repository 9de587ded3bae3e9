// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scene graph: primitives, materials and transforms.

use crate::canon::{check_finite, check_finite_vec};
use crate::SceneError;
use serde::{Deserialize, Serialize};

/// World-space vector `[x, y, z]`.
pub type Vec3 = [f32; 3];

/// Surface response of a primitive.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Base color, normalized linear RGB.
    pub color: Vec3,
    /// Diffuse coefficient.
    pub diffuse: f32,
    /// Specular coefficient.
    pub specular: f32,
    /// Specular exponent.
    pub shininess: f32,
    /// Fraction of light mirrored, `0.0..=1.0`.
    pub reflectivity: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            color: [0.8, 0.8, 0.8],
            diffuse: 0.9,
            specular: 0.1,
            shininess: 16.0,
            reflectivity: 0.0,
        }
    }
}

impl Material {
    fn validate(&self) -> Result<(), SceneError> {
        check_finite_vec(self.color, "material color")?;
        for c in [self.diffuse, self.specular, self.shininess, self.reflectivity] {
            check_finite(c, "material coefficient")?;
        }
        if !(0.0..=1.0).contains(&self.reflectivity) {
            return Err(SceneError::InvalidShape(format!(
                "reflectivity {} outside 0..=1",
                self.reflectivity
            )));
        }
        Ok(())
    }
}

/// Renderable primitive geometry.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    /// Sphere around a center.
    Sphere {
        /// Center point.
        center: Vec3,
        /// Radius, strictly positive.
        radius: f32,
    },
    /// Infinite plane through a point.
    Plane {
        /// Any point on the plane.
        point: Vec3,
        /// Surface normal, non-zero.
        normal: Vec3,
    },
    /// Single triangle.
    Triangle {
        /// Corners in counter-clockwise order.
        vertices: [Vec3; 3],
    },
    /// Axis-aligned box.
    Cuboid {
        /// Minimum corner.
        min: Vec3,
        /// Maximum corner.
        max: Vec3,
    },
}

impl Shape {
    fn validate(&self) -> Result<(), SceneError> {
        match self {
            Shape::Sphere { center, radius } => {
                check_finite_vec(*center, "sphere center")?;
                check_finite(*radius, "sphere radius")?;
                if *radius <= 0.0 {
                    return Err(SceneError::InvalidShape(format!(
                        "sphere radius {radius} must be positive"
                    )));
                }
            }
            Shape::Plane { point, normal } => {
                check_finite_vec(*point, "plane point")?;
                check_finite_vec(*normal, "plane normal")?;
                if normal.iter().all(|c| *c == 0.0) {
                    return Err(SceneError::InvalidShape("plane normal is zero".into()));
                }
            }
            Shape::Triangle { vertices } => {
                for v in vertices {
                    check_finite_vec(*v, "triangle vertex")?;
                }
            }
            Shape::Cuboid { min, max } => {
                check_finite_vec(*min, "cuboid corner")?;
                check_finite_vec(*max, "cuboid corner")?;
                if min.iter().zip(max).any(|(lo, hi)| lo > hi) {
                    return Err(SceneError::InvalidShape(
                        "cuboid min exceeds max".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Row-major 4×4 affine transform.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Matrix rows.
    pub matrix: [[f32; 4]; 4],
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    /// The identity transform.
    pub const fn identity() -> Self {
        Self {
            matrix: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Translation by `t`.
    pub fn translation(t: Vec3) -> Self {
        let mut m = Self::identity();
        m.matrix[0][3] = t[0];
        m.matrix[1][3] = t[1];
        m.matrix[2][3] = t[2];
        m
    }

    /// Non-uniform scale by `s`.
    pub fn scaling(s: Vec3) -> Self {
        let mut m = Self::identity();
        m.matrix[0][0] = s[0];
        m.matrix[1][1] = s[1];
        m.matrix[2][2] = s[2];
        m
    }

    /// Apply `self` first, then `next`.
    pub fn then(&self, next: &Transform) -> Self {
        let a = &next.matrix;
        let b = &self.matrix;
        let mut out = [[0.0f32; 4]; 4];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..4).map(|k| a[i][k] * b[k][j]).sum();
            }
        }
        Self { matrix: out }
    }

    /// Transform a point (w = 1).
    pub fn apply_point(&self, p: Vec3) -> Vec3 {
        let m = &self.matrix;
        let row = |i: usize| m[i][0] * p[0] + m[i][1] * p[1] + m[i][2] * p[2] + m[i][3];
        [row(0), row(1), row(2)]
    }

    fn validate(&self) -> Result<(), SceneError> {
        self.matrix
            .iter()
            .flatten()
            .try_for_each(|c| check_finite(*c, "transform"))
    }
}

/// Node in the composite scene tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneNode {
    /// Leaf primitive with its material.
    Primitive {
        /// Geometry.
        shape: Shape,
        /// Surface response.
        material: Material,
    },
    /// Unordered collection of children.
    Group {
        /// Child nodes.
        children: Vec<SceneNode>,
    },
    /// Child placed under a transform.
    Transformed {
        /// Transform applied to the child subtree.
        transform: Transform,
        /// Transformed subtree.
        child: Box<SceneNode>,
    },
}

impl SceneNode {
    /// Leaf node shorthand.
    pub fn primitive(shape: Shape, material: Material) -> Self {
        Self::Primitive { shape, material }
    }

    /// Group node shorthand.
    pub fn group(children: impl IntoIterator<Item = SceneNode>) -> Self {
        Self::Group {
            children: children.into_iter().collect(),
        }
    }

    /// Wrap `self` under `transform`.
    pub fn transformed(self, transform: Transform) -> Self {
        Self::Transformed {
            transform,
            child: Box::new(self),
        }
    }

    fn validate(&self) -> Result<(), SceneError> {
        match self {
            SceneNode::Primitive { shape, material } => {
                shape.validate()?;
                material.validate()
            }
            SceneNode::Group { children } => children.iter().try_for_each(SceneNode::validate),
            SceneNode::Transformed { transform, child } => {
                transform.validate()?;
                child.validate()
            }
        }
    }

    fn count_primitives(&self) -> usize {
        match self {
            SceneNode::Primitive { .. } => 1,
            SceneNode::Group { children } => children.iter().map(SceneNode::count_primitives).sum(),
            SceneNode::Transformed { child, .. } => child.count_primitives(),
        }
    }
}

/// Root of the composite shape tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneGraph {
    /// Root node.
    pub root: SceneNode,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new(SceneNode::group([]))
    }
}

impl SceneGraph {
    /// Wrap a root node.
    pub fn new(root: SceneNode) -> Self {
        Self { root }
    }

    /// Number of leaf primitives in the tree.
    pub fn primitive_count(&self) -> usize {
        self.root.count_primitives()
    }

    pub(crate) fn validate(&self) -> Result<(), SceneError> {
        self.root.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transforms_compose_in_application_order() {
        let t = Transform::scaling([2.0, 2.0, 2.0]).then(&Transform::translation([1.0, 0.0, 0.0]));
        assert_eq!(t.apply_point([1.0, 1.0, 1.0]), [3.0, 2.0, 2.0]);
    }

    #[test]
    fn primitive_count_walks_the_tree() {
        let leaf = || SceneNode::primitive(Shape::Sphere { center: [0.0; 3], radius: 1.0 }, Material::default());
        let graph = SceneGraph::new(SceneNode::group([
            leaf(),
            SceneNode::group([leaf(), leaf()]).transformed(Transform::translation([0.0, 1.0, 0.0])),
        ]));
        assert_eq!(graph.primitive_count(), 3);
    }

    #[test]
    fn inverted_cuboid_is_rejected() {
        let graph = SceneGraph::new(SceneNode::primitive(
            Shape::Cuboid { min: [1.0; 3], max: [0.0; 3] },
            Material::default(),
        ));
        assert!(matches!(graph.validate(), Err(SceneError::InvalidShape(_))));
    }

    #[test]
    fn nested_nan_transform_is_found() {
        let mut t = Transform::identity();
        t.matrix[2][1] = f32::NAN;
        let graph = SceneGraph::new(SceneNode::group([SceneNode::group([]).transformed(t)]));
        assert_eq!(graph.validate(), Err(SceneError::NonFinite("transform")));
    }
}
