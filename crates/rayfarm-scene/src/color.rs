// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pixel color produced by workers.

use serde::{Deserialize, Serialize};

/// One computed pixel, 8 bits per channel.
///
/// Channels are 0–255 everywhere in rayfarm; normalized light/material colors
/// are converted with [`PixelColor::from_linear`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelColor {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl PixelColor {
    /// Opaque black.
    pub const BLACK: Self = Self::new(0, 0, 0);

    /// Construct from raw channels.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Convert a normalized `[0, 1]` color, clamping out-of-range channels.
    pub fn from_linear(rgb: [f32; 3]) -> Self {
        let q = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        Self::new(q(rgb[0]), q(rgb[1]), q(rgb[2]))
    }

    /// Channels as an `[r, g, b]` array.
    pub const fn to_array(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

impl From<[u8; 3]> for PixelColor {
    fn from(c: [u8; 3]) -> Self {
        Self::new(c[0], c[1], c[2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_conversion_clamps() {
        assert_eq!(
            PixelColor::from_linear([-1.0, 0.5, 2.0]),
            PixelColor::new(0, 128, 255)
        );
    }
}
