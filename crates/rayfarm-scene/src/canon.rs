// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Finite-float checks shared by scene validation.
//!
//! Scene data must be finite: a NaN that reaches a worker poisons every pixel
//! it touches and makes scene digests unstable.

use crate::SceneError;

/// Reject NaN and infinities, naming the offending field in the error.
pub fn check_finite(x: f32, what: &'static str) -> Result<(), SceneError> {
    if x.is_finite() {
        Ok(())
    } else {
        Err(SceneError::NonFinite(what))
    }
}

/// [`check_finite`] for each component of a vector.
pub fn check_finite_vec(v: [f32; 3], what: &'static str) -> Result<(), SceneError> {
    v.iter().try_for_each(|c| check_finite(*c, what))
}
