// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-pixel compute capability.

use rayfarm_proto::{PixelColor, SceneDescriptor};

/// Computes the color of one image cell.
///
/// This is the worker's opaque capability: intersection and shading live
/// behind it. Implementations must be pure with respect to `(scene, column,
/// row)`; retried ranges are expected to produce identical pixels.
pub trait Shader: Send + Sync + 'static {
    /// Color of cell `(column, row)`.
    fn shade(&self, scene: &SceneDescriptor, column: u32, row: u32) -> PixelColor;
}

impl<F> Shader for F
where
    F: Fn(&SceneDescriptor, u32, u32) -> PixelColor + Send + Sync + 'static,
{
    fn shade(&self, scene: &SceneDescriptor, column: u32, row: u32) -> PixelColor {
        self(scene, column, row)
    }
}

/// Stub shader that paints each cell with its own coordinates.
///
/// `r` and `g` hold the low bytes of column and row; `b` holds their next
/// four bits each. Cells are distinguishable for images up to 4096×4096,
/// which makes misplaced pixels visible in both tests and on screen.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProbeShader;

impl ProbeShader {
    /// Marker color for `(column, row)`.
    pub fn encode(column: u32, row: u32) -> PixelColor {
        PixelColor::new(
            (column & 0xff) as u8,
            (row & 0xff) as u8,
            ((((column >> 8) & 0x0f) << 4) | ((row >> 8) & 0x0f)) as u8,
        )
    }

    /// Inverse of [`ProbeShader::encode`].
    pub fn decode(color: PixelColor) -> (u32, u32) {
        let hi = u32::from(color.b);
        (
            u32::from(color.r) | ((hi >> 4) << 8),
            u32::from(color.g) | ((hi & 0x0f) << 8),
        )
    }
}

impl Shader for ProbeShader {
    fn shade(&self, _scene: &SceneDescriptor, column: u32, row: u32) -> PixelColor {
        Self::encode(column, row)
    }
}
