use glam::{Mat4, Vec2, Vec3};
use winit::dpi::PhysicalSize;

use crate::mesh::MeshBounds;

const DEFAULT_UP: Vec3 = Vec3::Y;
const FRAME_PITCH_RADIANS: f32 = -0.35;
const FRAME_DISTANCE_FACTOR: f32 = 2.0;
const PITCH_LIMIT_RADIANS: f32 = std::f32::consts::FRAC_PI_2 - 0.01;
const MIN_RADIUS: f32 = 0.1;
const MAX_RADIUS: f32 = 10_000.0;

/// Perspective camera feeding the preview pass.
#[derive(Debug, Clone)]
pub struct Camera3D {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera3D {
    pub fn new(position: Vec3, target: Vec3, fov_y_radians: f32, near: f32, far: f32) -> Self {
        Self { position, target, up: DEFAULT_UP, fov_y_radians, near, far }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        // wgpu clips z to [0, 1], so the GL-style projection is the wrong one here.
        Mat4::perspective_rh(self.fov_y_radians, aspect.max(0.0001), self.near, self.far)
    }

    pub fn view_projection(&self, viewport: PhysicalSize<u32>) -> Mat4 {
        self.projection_matrix(viewport_aspect(viewport)) * self.view_matrix()
    }
}

fn viewport_aspect(viewport: PhysicalSize<u32>) -> f32 {
    if viewport.height == 0 {
        1.0
    } else {
        viewport.width as f32 / viewport.height as f32
    }
}

/// Orbit controller: yaw and pitch around a target point at a fixed radius.
#[derive(Debug, Clone)]
pub struct OrbitCamera {
    pub target: Vec3,
    pub radius: f32,
    pub yaw_radians: f32,
    pub pitch_radians: f32,
}

impl OrbitCamera {
    pub fn new(target: Vec3, radius: f32) -> Self {
        Self { target, radius: radius.max(0.01), yaw_radians: 0.0, pitch_radians: 0.0 }
    }

    /// Default framing for a freshly loaded asset: look at the bounds center
    /// from twice its radius, slightly above. Assets following the glTF
    /// forward convention get the camera swung half a turn around the target.
    pub fn frame_bounds(bounds: &MeshBounds, gltf_convention: bool) -> Self {
        let mut orbit = OrbitCamera::new(bounds.center, (bounds.radius * FRAME_DISTANCE_FACTOR).max(0.5));
        orbit.pitch_radians = FRAME_PITCH_RADIANS;
        if gltf_convention {
            orbit.yaw_radians += std::f32::consts::PI;
        }
        orbit
    }

    /// Eye position on the orbit sphere. Yaw zero sits on the +Z side of the
    /// target; negative pitch raises the eye above it.
    pub fn eye_position(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw_radians.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch_radians.sin_cos();
        self.target + Vec3::new(cos_pitch * sin_yaw, -sin_pitch, cos_pitch * cos_yaw) * self.radius
    }

    pub fn to_camera(&self, fov_y_radians: f32, near: f32, far: f32) -> Camera3D {
        Camera3D::new(self.eye_position(), self.target, fov_y_radians, near, far)
    }

    pub fn orbit(&mut self, delta: Vec2) {
        self.yaw_radians += delta.x;
        self.pitch_radians = (self.pitch_radians + delta.y).clamp(-PITCH_LIMIT_RADIANS, PITCH_LIMIT_RADIANS);
    }

    pub fn zoom(&mut self, factor: f32) {
        self.radius = (self.radius * factor).clamp(MIN_RADIUS, MAX_RADIUS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_bounds() -> MeshBounds {
        MeshBounds { min: Vec3::splat(-1.0), max: Vec3::splat(1.0), center: Vec3::ZERO, radius: 1.0 }
    }

    #[test]
    fn view_projection_stays_finite() {
        let camera = Camera3D::new(Vec3::new(2.0, 1.5, 4.0), Vec3::ZERO, 50.0_f32.to_radians(), 0.1, 800.0);
        let vp = camera.view_projection(PhysicalSize::new(1024, 576));
        assert!(vp.to_cols_array().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn orbiting_keeps_the_eye_on_the_sphere() {
        let mut orbit = OrbitCamera::new(Vec3::ZERO, 5.0);
        orbit.orbit(Vec2::new(0.5, 0.25));
        let camera = orbit.to_camera(45.0_f32.to_radians(), 0.1, 500.0);
        assert!((camera.position.distance(Vec3::ZERO) - 5.0).abs() < 1e-4);
    }

    #[test]
    fn pitch_stops_short_of_the_poles() {
        let mut orbit = OrbitCamera::new(Vec3::ZERO, 2.0);
        orbit.orbit(Vec2::new(0.0, 10.0));
        assert!((orbit.pitch_radians - PITCH_LIMIT_RADIANS).abs() < 1e-6);
        orbit.orbit(Vec2::new(0.0, -20.0));
        assert!((orbit.pitch_radians + PITCH_LIMIT_RADIANS).abs() < 1e-6);
    }

    #[test]
    fn zoom_clamps_to_the_radius_range() {
        let mut orbit = OrbitCamera::new(Vec3::ZERO, 1.0);
        orbit.zoom(1e9);
        assert_eq!(orbit.radius, MAX_RADIUS);
        orbit.zoom(0.0);
        assert_eq!(orbit.radius, MIN_RADIUS);
    }

    #[test]
    fn frame_bounds_targets_center_at_double_radius() {
        let bounds = MeshBounds {
            min: Vec3::new(1.0, 1.0, 1.0),
            max: Vec3::new(3.0, 3.0, 3.0),
            center: Vec3::splat(2.0),
            radius: 1.5,
        };
        let orbit = OrbitCamera::frame_bounds(&bounds, false);
        assert_eq!(orbit.target, bounds.center);
        assert!((orbit.radius - 3.0).abs() < 1e-5);
        let camera = orbit.to_camera(60.0_f32.to_radians(), 0.1, 100.0);
        assert!((camera.position.distance(bounds.center) - 3.0).abs() < 1e-4);
        assert_eq!(camera.target, bounds.center);
    }

    #[test]
    fn gltf_convention_swings_camera_half_turn() {
        let plain = OrbitCamera::frame_bounds(&unit_bounds(), false);
        let gltf = OrbitCamera::frame_bounds(&unit_bounds(), true);
        assert!((gltf.yaw_radians - plain.yaw_radians - std::f32::consts::PI).abs() < 1e-6);
        assert!(plain.eye_position().z > 0.0);
        assert!(gltf.eye_position().z < 0.0);
    }

    #[test]
    fn tiny_bounds_keep_a_workable_radius() {
        let bounds = MeshBounds { min: Vec3::ZERO, max: Vec3::ZERO, center: Vec3::ZERO, radius: 0.0 };
        let orbit = OrbitCamera::frame_bounds(&bounds, false);
        assert!(orbit.radius >= 0.5);
    }
}
