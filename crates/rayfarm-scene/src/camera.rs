// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Camera and image dimensions for a render session.

use crate::canon::{check_finite, check_finite_vec};
use crate::{SceneError, Vec3};
use core::f32::consts::PI;
use serde::{Deserialize, Serialize};

/// Orthonormal camera frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewBasis {
    /// Image +x direction in world space.
    pub right: Vec3,
    /// Image +y direction in world space.
    pub up: Vec3,
    /// Viewing direction.
    pub forward: Vec3,
}

/// Camera/viewport description. Fixed for the lifetime of a session.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    /// Eye position in world space.
    pub eye: Vec3,
    /// Camera frame.
    pub basis: ViewBasis,
    /// Vertical field of view in radians.
    pub fov_y_radians: f32,
    /// Image width W in columns.
    pub width: u32,
    /// Image height H in rows.
    pub height: u32,
}

impl Projection {
    /// Build a projection looking from `eye` towards `target`.
    pub fn look_at(
        eye: Vec3,
        target: Vec3,
        up: Vec3,
        fov_y_radians: f32,
        width: u32,
        height: u32,
    ) -> Result<Self, SceneError> {
        check_finite_vec(eye, "eye")?;
        check_finite_vec(target, "target")?;
        check_finite_vec(up, "up")?;
        let forward = normalize(sub(target, eye)).ok_or(SceneError::DegenerateView)?;
        let right = normalize(cross(forward, up)).ok_or(SceneError::DegenerateView)?;
        let up = cross(right, forward);
        let projection = Self {
            eye,
            basis: ViewBasis { right, up, forward },
            fov_y_radians,
            width,
            height,
        };
        projection.validate()?;
        Ok(projection)
    }

    /// Width over height.
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    /// Total number of pixels, W×H.
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub(crate) fn validate(&self) -> Result<(), SceneError> {
        if self.width == 0 || self.height == 0 {
            return Err(SceneError::EmptyImage {
                width: self.width,
                height: self.height,
            });
        }
        check_finite_vec(self.eye, "eye")?;
        check_finite_vec(self.basis.right, "view basis")?;
        check_finite_vec(self.basis.up, "view basis")?;
        check_finite_vec(self.basis.forward, "view basis")?;
        check_finite(self.fov_y_radians, "field of view")?;
        if !(self.fov_y_radians > 0.0 && self.fov_y_radians < PI) {
            return Err(SceneError::DegenerateView);
        }
        for v in [self.basis.right, self.basis.up, self.basis.forward] {
            if dot(v, v) == 0.0 {
                return Err(SceneError::DegenerateView);
            }
        }
        Ok(())
    }
}

fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: Vec3, b: Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize(v: Vec3) -> Option<Vec3> {
    let len = dot(v, v).sqrt();
    if len <= f32::EPSILON {
        return None;
    }
    Some([v[0] / len, v[1] / len, v[2] / len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn look_at_builds_orthonormal_frame() {
        let p = Projection::look_at(
            [0.0, 0.0, 0.0],
            [0.0, 0.0, -10.0],
            [0.0, 1.0, 0.0],
            1.0,
            640,
            480,
        )
        .unwrap();
        assert_eq!(p.basis.forward, [0.0, 0.0, -1.0]);
        assert_eq!(p.basis.right, [1.0, 0.0, 0.0]);
        assert_eq!(p.basis.up, [0.0, 1.0, 0.0]);
        assert_eq!(p.pixel_count(), 640 * 480);
    }

    #[test]
    fn eye_on_target_is_degenerate() {
        let err = Projection::look_at([1.0; 3], [1.0; 3], [0.0, 1.0, 0.0], 1.0, 4, 4);
        assert_eq!(err, Err(SceneError::DegenerateView));
    }

    #[test]
    fn up_parallel_to_view_is_degenerate() {
        let err = Projection::look_at([0.0; 3], [0.0, 5.0, 0.0], [0.0, 1.0, 0.0], 1.0, 4, 4);
        assert_eq!(err, Err(SceneError::DegenerateView));
    }
}
