// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fixture scenes and raster checks.

use rayfarm_coordinator::Raster;
use rayfarm_scene::{
    Light, LightSet, Material, Projection, SceneDescriptor, SceneGraph, SceneNode, Shape,
    Transform,
};
use rayfarm_worker::ProbeShader;

/// Camera at the origin looking down -Z with a 60° vertical field of view.
///
/// # Panics
/// If `width` or `height` makes the projection degenerate, which fixtures
/// never do.
pub fn camera(width: u32, height: u32) -> Projection {
    match Projection::look_at(
        [0.0, 0.0, 0.0],
        [0.0, 0.0, -1.0],
        [0.0, 1.0, 0.0],
        60f32.to_radians(),
        width,
        height,
    ) {
        Ok(projection) => projection,
        Err(err) => panic!("fixture camera: {err}"),
    }
}

/// A sphere on a floor plane lit by one point light and some ambient.
pub fn sphere_scene(width: u32, height: u32) -> SceneDescriptor {
    let sphere = SceneNode::primitive(
        Shape::Sphere {
            center: [0.0, 0.0, 0.0],
            radius: 1.0,
        },
        Material::default(),
    )
    .transformed(Transform::translation([0.0, 0.0, -5.0]));
    let floor = SceneNode::primitive(
        Shape::Plane {
            point: [0.0, -1.0, 0.0],
            normal: [0.0, 1.0, 0.0],
        },
        Material::default(),
    );
    SceneDescriptor::new(
        SceneGraph::new(SceneNode::group([sphere, floor])),
        LightSet::from(vec![
            Light::Point {
                position: [5.0, 5.0, 0.0],
                color: [1.0, 1.0, 1.0],
                intensity: 1.0,
            },
            Light::Ambient {
                color: [1.0, 1.0, 1.0],
                intensity: 0.1,
            },
        ]),
        camera(width, height),
    )
}

/// [`sphere_scene`] with a zero-height image.
pub fn empty_image_scene() -> SceneDescriptor {
    let mut scene = sphere_scene(4, 2);
    scene.projection.height = 0;
    scene
}

/// Cells of `raster` whose color is not the [`ProbeShader`] marker for that cell.
pub fn probe_mismatches(raster: &Raster) -> Vec<(u32, u32)> {
    let mut wrong = Vec::new();
    for column in 0..raster.width() {
        for row in 0..raster.height() {
            let ok = raster
                .pixel(column, row)
                .is_some_and(|color| ProbeShader::decode(color) == (column, row));
            if !ok {
                wrong.push((column, row));
            }
        }
    }
    wrong
}
