// SPDX-License-Identifier: CEPL-1.0
//! Camera and transform helpers for the playground scene.
//!
//! Clip space follows Vulkan: depth in `0..=1`, Y pointing down.
pub use glam::{Mat4, Quat, Vec3, Vec4};

#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(2.5, 2.0, 3.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: 60f32.to_radians(),
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    pub fn projection(&self, aspect: f32) -> Mat4 {
        let mut proj =
            Mat4::perspective_rh(self.fov_y, aspect.max(f32::EPSILON), self.near, self.far);
        proj.y_axis.y = -proj.y_axis.y;
        proj
    }

    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        self.projection(aspect) * self.view()
    }
}

/// Model transform of an object spinning about a tilted axis, `seconds` into the animation.
pub fn spin(seconds: f32, radians_per_second: f32) -> Mat4 {
    let axis = Vec3::new(0.3, 1.0, 0.15).normalize();
    Mat4::from_quat(Quat::from_axis_angle(axis, seconds * radians_per_second))
}
