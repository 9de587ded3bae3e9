// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Light sources.

use crate::canon::{check_finite, check_finite_vec};
use crate::{SceneError, Vec3};
use serde::{Deserialize, Serialize};

/// A single light source. Colors are normalized linear RGB.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Light {
    /// Omnidirectional light at a position.
    Point {
        /// World-space position.
        position: Vec3,
        /// Light color.
        color: Vec3,
        /// Scalar intensity multiplier.
        intensity: f32,
    },
    /// Parallel rays from infinitely far away.
    Directional {
        /// Direction the light travels.
        direction: Vec3,
        /// Light color.
        color: Vec3,
        /// Scalar intensity multiplier.
        intensity: f32,
    },
    /// Uniform ambient term.
    Ambient {
        /// Light color.
        color: Vec3,
        /// Scalar intensity multiplier.
        intensity: f32,
    },
}

impl Light {
    fn validate(&self) -> Result<(), SceneError> {
        let (color, intensity) = match self {
            Light::Point {
                position,
                color,
                intensity,
            } => {
                check_finite_vec(*position, "light position")?;
                (color, intensity)
            }
            Light::Directional {
                direction,
                color,
                intensity,
            } => {
                check_finite_vec(*direction, "light direction")?;
                if direction.iter().all(|c| *c == 0.0) {
                    return Err(SceneError::InvalidShape(
                        "directional light with zero direction".into(),
                    ));
                }
                (color, intensity)
            }
            Light::Ambient { color, intensity } => (color, intensity),
        };
        check_finite_vec(*color, "light color")?;
        check_finite(*intensity, "light intensity")
    }
}

/// Collection of lights. Order carries no meaning.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LightSet(Vec<Light>);

impl LightSet {
    /// Add a light.
    pub fn push(&mut self, light: Light) {
        self.0.push(light);
    }

    /// Number of lights.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` when nothing illuminates the scene.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the lights.
    pub fn iter(&self) -> std::slice::Iter<'_, Light> {
        self.0.iter()
    }

    pub(crate) fn validate(&self) -> Result<(), SceneError> {
        self.0.iter().try_for_each(Light::validate)
    }
}

impl From<Vec<Light>> for LightSet {
    fn from(lights: Vec<Light>) -> Self {
        Self(lights)
    }
}

impl FromIterator<Light> for LightSet {
    fn from_iter<I: IntoIterator<Item = Light>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a LightSet {
    type Item = &'a Light;
    type IntoIter = std::slice::Iter<'a, Light>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
