//! Directional light cascade fitting

use super::projection;
use super::ShadowSubView;
use crate::config::{DepthConvention, K_MAX_CASCADE_COUNT};
use crate::scene::{Aabb, Camera};
use glam::{Vec3, Vec4};

/// View distances bounding each cascade: `count + 1` entries starting at the
/// camera near plane and ending at the shadow distance.
pub fn split_distances(
    near: f32,
    shadow_distance: f32,
    ratios: &[f32; K_MAX_CASCADE_COUNT - 1],
    count: usize,
) -> Vec<f32> {
    let count = count.clamp(1, K_MAX_CASCADE_COUNT);
    let shadow_distance = shadow_distance.max(near);

    let mut distances = Vec::with_capacity(count + 1);
    distances.push(near);
    let mut previous_ratio = 0.0f32;
    for &ratio in ratios.iter().take(count - 1) {
        let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };
        previous_ratio = previous_ratio.max(ratio);
        let distance = (previous_ratio * shadow_distance).max(near);
        distances.push(distance);
    }
    distances.push(shadow_distance);
    distances
}

/// Smallest sphere enclosing the camera frustum between view depths `near`
/// and `far`. Returns the center distance along the view axis and the radius.
pub fn slice_bounding_sphere(fov_y: f32, aspect: f32, near: f32, far: f32) -> (f32, f32) {
    let tan_half = (fov_y * 0.5).tan();
    let k_sq = tan_half * tan_half * (1.0 + aspect * aspect);
    let center = 0.5 * (near + far) * (1.0 + k_sq);
    if center >= far {
        (far, far * k_sq.sqrt())
    } else {
        let radius = ((far - center) * (far - center) + far * far * k_sq).sqrt();
        (center, radius)
    }
}

pub(super) struct CascadeInput<'a> {
    pub camera: &'a Camera,
    pub light_direction: Vec3,
    pub caster_bounds: &'a Aabb,
    pub resolution: u32,
    pub convention: DepthConvention,
}

/// Fit one orthographic sub-view per frustum slice.
pub(super) fn fit_cascades(input: &CascadeInput<'_>, splits: &[f32], out: &mut Vec<ShadowSubView>) {
    let camera = input.camera;
    let projection_params = camera.projection.sanitized();
    let forward = camera.forward();
    let light_view = projection::look_along(Vec3::ZERO, input.light_direction);
    let resolution = input.resolution.max(1) as f32;

    let caster_corners = input.caster_bounds.corners();
    let caster_nearest = if input.caster_bounds.is_empty() {
        f32::INFINITY
    } else {
        caster_corners
            .iter()
            .map(|corner| -light_view.transform_point3(*corner).z)
            .fold(f32::INFINITY, f32::min)
    };

    let mut previous_radius = 0.0f32;
    for window in splits.windows(2) {
        let (center_distance, radius) = slice_bounding_sphere(
            projection_params.fov_y,
            projection_params.aspect,
            window[0],
            window[1],
        );
        let radius = radius.max(previous_radius);
        previous_radius = radius;

        let world_center = camera.position + forward * center_distance;
        let mut light_center = light_view.transform_point3(world_center);

        // Move in whole texels so the cascade does not shimmer as the camera moves
        let texel = 2.0 * radius / resolution;
        if texel > 0.0 {
            light_center.x = (light_center.x / texel).floor() * texel;
            light_center.y = (light_center.y / texel).floor() * texel;
        }

        let sphere_depth = -light_center.z;
        let near = (sphere_depth - radius).min(caster_nearest);
        let far = (sphere_depth + radius).max(near + f32::EPSILON.max(radius * 1.0e-4));

        let projection = projection::orthographic(
            light_center.x - radius,
            light_center.x + radius,
            light_center.y - radius,
            light_center.y + radius,
            near,
            far,
            input.convention,
        );
        let snapped_center = light_view.inverse().transform_point3(light_center);

        let mut sub_view = ShadowSubView::new(
            light_view,
            projection,
            projection::orthographic_depth_params(near, far, input.convention),
        );
        sub_view.culling_sphere = Vec4::new(snapped_center.x, snapped_center.y, snapped_center.z, radius);
        out.push(sub_view);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_cover_near_to_shadow_distance() {
        let splits = split_distances(0.1, 150.0, &[0.067, 0.2, 0.467], 4);
        assert_eq!(splits.len(), 5);
        assert_eq!(splits[0], 0.1);
        assert_eq!(splits[4], 150.0);
        assert!(splits.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn unsorted_ratios_are_made_monotonic() {
        let splits = split_distances(1.0, 100.0, &[0.5, 0.1, f32::NAN], 4);
        assert_eq!(splits, vec![1.0, 50.0, 50.0, 50.0, 100.0]);
    }

    #[test]
    fn single_cascade_ignores_ratios() {
        assert_eq!(split_distances(0.5, 20.0, &[0.1, 0.2, 0.3], 1), vec![0.5, 20.0]);
    }

    #[test]
    fn bounding_sphere_contains_slice_corners() {
        let (fov, aspect, near, far) = (1.0f32, 16.0 / 9.0, 2.0, 30.0);
        let (center, radius) = slice_bounding_sphere(fov, aspect, near, far);
        let tan_half = (fov * 0.5).tan();
        for depth in [near, far] {
            let half_h = depth * tan_half;
            let corner = Vec3::new(half_h * aspect, half_h, depth);
            let distance = (corner - Vec3::new(0.0, 0.0, center)).length();
            assert!(distance <= radius * 1.0001);
        }
    }

    #[test]
    fn wide_slices_center_on_far_plane() {
        let (center, radius) = slice_bounding_sphere(2.8, 2.0, 1.0, 1.5);
        assert_eq!(center, 1.5);
        assert!(radius > 1.5);
    }
}
