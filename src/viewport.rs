use glam::{DMat3, DMat4, DVec3};

use crate::mesh::BoundingBox;

const DEFAULT_UP: DVec3 = DVec3::Y;

/// Flips clip space z so the near plane lands at depth 1 and the far plane at 0.
const REVERSE_DEPTH: DMat4 = DMat4::from_cols_array(&[
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, -1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
]);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective { fov_y_radians: f64 },
    /// Half of the visible frustum height; the width follows the screen aspect.
    Parallel { half_height: f64 },
}

/// Camera, projection and screen port used for one view.
#[derive(Debug, Clone)]
pub struct Viewport {
    location: DVec3,
    direction: DVec3,
    up: DVec3,
    target: DVec3,
    projection: Projection,
    near: f64,
    far: f64,
    width: u32,
    height: u32,
}

impl Viewport {
    pub fn perspective(location: DVec3, target: DVec3, fov_y_radians: f64) -> Self {
        Self::looking_at(location, target, Projection::Perspective { fov_y_radians })
    }

    pub fn parallel(location: DVec3, target: DVec3, half_height: f64) -> Self {
        Self::looking_at(location, target, Projection::Parallel { half_height })
    }

    fn looking_at(location: DVec3, target: DVec3, projection: Projection) -> Self {
        let direction = (target - location).try_normalize().unwrap_or(DVec3::NEG_Z);
        Self {
            location,
            direction,
            up: DEFAULT_UP,
            target,
            projection,
            near: 0.005,
            far: 1000.0,
            width: 1,
            height: 1,
        }
    }

    /// Parallel view framing `bounds` from above, looking down -Z with a 10% margin.
    pub fn default_for_bounds(bounds: &BoundingBox) -> Self {
        let (min, max) = if bounds.is_valid() { (bounds.min, bounds.max) } else { (-DVec3::ONE, DVec3::ONE) };
        let target = 0.5 * (min + max);
        let mut dx = 1.1 * (max.x - min.x);
        let mut dy = 1.1 * (max.y - min.y);
        if dx <= 1.0e-6 && dy <= 1.0e-6 {
            dx = 2.0;
            dy = 2.0;
        }
        // square window
        let side = dx.max(dy);
        let dz = 0.5 * (1.1 * (max.z - min.z)).max(0.2 * side);

        let near = 1.0;
        let far = near + 2.0 * dz;
        let location = target + (dz + near) * DVec3::Z;
        let mut viewport = Self::parallel(location, target, 0.5 * side);
        viewport.set_near_far(near, far);
        viewport
    }

    pub fn location(&self) -> DVec3 {
        self.location
    }

    pub fn direction(&self) -> DVec3 {
        self.direction
    }

    pub fn target(&self) -> DVec3 {
        self.target
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    pub fn is_perspective(&self) -> bool {
        matches!(self.projection, Projection::Perspective { .. })
    }

    /// Unit camera Z axis. Points from the scene toward the eye, so distances in front of
    /// the camera are `(location - p) . camera_z()`.
    pub fn camera_z(&self) -> DVec3 {
        -self.direction
    }

    pub fn near(&self) -> f64 {
        self.near
    }

    pub fn far(&self) -> f64 {
        self.far
    }

    pub fn screen_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn aspect(&self) -> f64 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f64 / self.height as f64
        }
    }

    /// Moves the eye without turning it. The target point stays put.
    pub fn set_camera_location(&mut self, location: DVec3) {
        self.location = location;
    }

    pub fn set_camera_up(&mut self, up: DVec3) {
        if let Some(up) = up.try_normalize() {
            self.up = up;
        }
    }

    pub fn set_near_far(&mut self, near: f64, far: f64) {
        self.near = near;
        self.far = far;
    }

    pub fn set_screen_size(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }

    /// World to camera.
    pub fn view_matrix(&self) -> DMat4 {
        DMat4::look_to_rh(self.location, self.direction, self.up)
    }

    /// Camera to clip, with reversed depth so nearer fragments carry larger depth values.
    pub fn projection_matrix(&self) -> DMat4 {
        let aspect = self.aspect().max(1.0e-4);
        let projection = match self.projection {
            Projection::Perspective { fov_y_radians } => {
                DMat4::perspective_rh_gl(fov_y_radians, aspect, self.near, self.far)
            }
            Projection::Parallel { half_height } => {
                let half_width = half_height * aspect;
                DMat4::orthographic_rh_gl(
                    -half_width,
                    half_width,
                    -half_height,
                    half_height,
                    self.near,
                    self.far,
                )
            }
        };
        REVERSE_DEPTH * projection
    }

    /// World to clip.
    pub fn view_projection(&self) -> DMat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Inverse transpose of the upper 3x3 of `model_view`.
    pub fn normal_matrix(model_view: &DMat4) -> DMat3 {
        let upper = DMat3::from_mat4(*model_view);
        if upper.determinant().abs() <= f64::EPSILON {
            return upper;
        }
        upper.inverse().transpose()
    }
}
