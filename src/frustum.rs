//! Near/far clip plane derivation from the visible bounding box.
//!
//! The clipper never fails. Candidates that do not survive the acceptance gate are replaced
//! by the last accepted frustum, or by [`DEFAULT_NEAR`]/[`DEFAULT_FAR`] when nothing has
//! been accepted yet.

use glam::DVec3;
use log::debug;

use crate::mesh::BoundingBox;
use crate::viewport::Viewport;

pub const DEFAULT_NEAR: f64 = 0.005;
pub const DEFAULT_FAR: f64 = 1000.0;

const MIN_NEAR_DIST: f64 = 1.0e-4;
const MIN_NEAR_FLOOR: f64 = 1.0e-6;
const MIN_PARALLEL_SHIFT: f64 = 0.005;
const BEHIND_CAMERA: f64 = 1.0e-12;
const NEARLY_EQUAL: f64 = 1.490116119385e-8;
const MAX_DEPTH_RATIO: f64 = 1.0e16;
const MAX_DISTANCE: f64 = 1.0e30;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrustumState {
    pub near: f64,
    pub far: f64,
    pub min_near_dist: f64,
    pub target_dist: f64,
}

impl FrustumState {
    pub fn defaults(min_near_dist: f64, target_dist: f64) -> Self {
        Self { near: DEFAULT_NEAR, far: DEFAULT_FAR, min_near_dist, target_dist }
    }

    pub fn is_acceptable(&self, perspective: bool) -> bool {
        let (n, f) = (self.near, self.far);
        !(n.is_nan()
            || f.is_nan()
            || f <= n
            || (perspective && n <= BEHIND_CAMERA)
            || (perspective && f > MAX_DEPTH_RATIO * n)
            || n > MAX_DISTANCE
            || f > MAX_DISTANCE)
    }
}

/// Stateful only in remembering the last accepted result.
#[derive(Debug, Clone)]
pub struct FrustumClipper {
    last_good: Option<FrustumState>,
    min_near_dist: f64,
}

impl Default for FrustumClipper {
    fn default() -> Self {
        Self { last_good: None, min_near_dist: MIN_NEAR_DIST }
    }
}

impl FrustumClipper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smallest near distance handed to the depth buffer; floored at 1e-6.
    pub fn with_min_near_distance(mut self, min_near_dist: f64) -> Self {
        self.min_near_dist =
            if min_near_dist.is_nan() || min_near_dist < MIN_NEAR_FLOOR { MIN_NEAR_FLOOR } else { min_near_dist };
        self
    }

    pub fn min_near_distance(&self) -> f64 {
        self.min_near_dist
    }

    pub fn last_good(&self) -> Option<FrustumState> {
        self.last_good
    }

    /// Computes near/far for `bounds` and writes them into `viewport`. Parallel views whose
    /// near plane would fall behind the eye get their camera pulled back along its axis.
    pub fn compute(&mut self, bounds: &BoundingBox, viewport: &mut Viewport) -> FrustumState {
        let perspective = viewport.is_perspective();
        let camera_z = viewport.camera_z();
        let (near, far) = bounding_box_near_far(bounds, perspective, viewport.location(), camera_z);
        let (near, far) = clamp_near_far(near, far, self.min_near_dist, viewport);

        let mut target_dist = (viewport.location() - viewport.target()).dot(viewport.camera_z());
        if target_dist.is_nan() {
            target_dist = 0.5 * (near + far);
        }

        let candidate = FrustumState { near, far, min_near_dist: self.min_near_dist, target_dist };
        let accepted = if candidate.is_acceptable(perspective) {
            self.last_good = Some(candidate);
            candidate
        } else {
            debug!("[frustum] rejected near={near} far={far}; reverting");
            self.last_good.unwrap_or_else(|| FrustumState::defaults(self.min_near_dist, target_dist))
        };
        viewport.set_near_far(accepted.near, accepted.far);
        accepted
    }
}

/// Padded near/far distances of the eight box corners along the camera axis.
pub fn bounding_box_near_far(
    bounds: &BoundingBox,
    perspective: bool,
    camera_location: DVec3,
    camera_z: DVec3,
) -> (f64, f64) {
    if !bounds.is_valid() {
        return (DEFAULT_NEAR, DEFAULT_FAR);
    }
    let mut n = f64::INFINITY;
    let mut f = f64::NEG_INFINITY;
    for corner in bounds.corners() {
        let d = (camera_location - corner).dot(camera_z);
        if d.is_nan() {
            return (DEFAULT_NEAR, DEFAULT_FAR);
        }
        n = n.min(d);
        f = f.max(d);
    }
    if f < n {
        return (DEFAULT_NEAR, DEFAULT_FAR);
    }

    // bump out so geometry on the box does not land on a clip plane
    if perspective {
        if f <= BEHIND_CAMERA {
            // everything is behind the camera
            (DEFAULT_NEAR, DEFAULT_FAR)
        } else if n <= 0.0 {
            (n, f * 1.01)
        } else if f <= n + NEARLY_EQUAL * n {
            (n * 0.675, (f * 1.125).max(1.0e-6))
        } else {
            (n * 0.99, f * 1.01)
        }
    } else {
        let pad = (0.05 * (f - n).abs()).max(0.5);
        (n - pad, f + pad)
    }
}

fn clamp_near_far(near: f64, far: f64, min_near: f64, viewport: &mut Viewport) -> (f64, f64) {
    if near.is_nan() || far.is_nan() {
        return (DEFAULT_NEAR, DEFAULT_FAR);
    }
    let (mut n, mut f) =
        if viewport.is_perspective() { (near, far) } else { pull_back_parallel(near, far, min_near, viewport) };
    if n < min_near {
        n = min_near;
    }
    if f <= 1.00001 * n {
        f = 10.0 + 100.0 * n;
    }
    (n, f)
}

/// A parallel projection cannot see behind its eye, so move the eye instead of the plane.
fn pull_back_parallel(near: f64, far: f64, min_near: f64, viewport: &mut Viewport) -> (f64, f64) {
    if near >= min_near {
        return (near, far);
    }
    let d = (1.00001 * min_near - near).max(MIN_PARALLEL_SHIFT);
    let n = near + d;
    let f = far + d;
    if d.is_nan() || d <= 0.0 || n.is_nan() || f.is_nan() || n < min_near || f <= n {
        debug!("[frustum] parallel pull-back produced near={n} far={f}; using defaults");
        return (DEFAULT_NEAR, DEFAULT_FAR);
    }
    let location = viewport.location() + d * viewport.camera_z();
    viewport.set_camera_location(location);
    (n, f)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> BoundingBox {
        BoundingBox::new(DVec3::splat(-1.0), DVec3::splat(1.0))
    }

    #[test]
    fn perspective_box_is_padded_around_its_extent() {
        let mut viewport = Viewport::perspective(DVec3::new(0.0, 0.0, 10.0), DVec3::ZERO, 0.8);
        let mut clipper = FrustumClipper::new();
        let state = clipper.compute(&unit_box(), &mut viewport);
        assert!((state.near - 9.0 * 0.99).abs() < 1e-9);
        assert!((state.far - 11.0 * 1.01).abs() < 1e-9);
        assert!((state.target_dist - 10.0).abs() < 1e-9);
        assert_eq!(viewport.near(), state.near);
        assert_eq!(viewport.far(), state.far);
    }

    #[test]
    fn invalid_boxes_fall_back_to_defaults() {
        let nan = BoundingBox::new(DVec3::splat(f64::NAN), DVec3::ONE);
        for bounds in [BoundingBox::EMPTY, nan] {
            for perspective in [true, false] {
                let (n, f) = bounding_box_near_far(&bounds, perspective, DVec3::Z * 10.0, DVec3::Z);
                assert_eq!((n, f), (DEFAULT_NEAR, DEFAULT_FAR));
            }
        }
    }

    #[test]
    fn box_behind_perspective_camera_uses_defaults() {
        let (n, f) = bounding_box_near_far(&unit_box(), true, DVec3::new(0.0, 0.0, -10.0), DVec3::Z);
        assert_eq!((n, f), (DEFAULT_NEAR, DEFAULT_FAR));
    }

    #[test]
    fn flat_box_facing_camera_is_widened() {
        let flat = BoundingBox::new(DVec3::new(-1.0, -1.0, 0.0), DVec3::new(1.0, 1.0, 0.0));
        let (n, f) = bounding_box_near_far(&flat, true, DVec3::new(0.0, 0.0, 4.0), DVec3::Z);
        assert!((n - 4.0 * 0.675).abs() < 1e-12);
        assert!((f - 4.0 * 1.125).abs() < 1e-12);
    }

    #[test]
    fn camera_inside_box_grows_far_and_clamps_near() {
        let mut viewport = Viewport::perspective(DVec3::ZERO, DVec3::NEG_Z, 0.8);
        let mut clipper = FrustumClipper::new();
        let state = clipper.compute(&unit_box(), &mut viewport);
        assert!((state.near - MIN_NEAR_DIST).abs() < 1e-15);
        assert!((state.far - 1.01).abs() < 1e-12);
    }

    #[test]
    fn parallel_camera_inside_box_is_pulled_back() {
        let mut viewport = Viewport::parallel(DVec3::ZERO, DVec3::NEG_Z, 2.0);
        let mut clipper = FrustumClipper::new();
        let state = clipper.compute(&unit_box(), &mut viewport);
        assert!(state.near >= MIN_NEAR_DIST);
        assert!(state.far > state.near);
        // moved backward along +Z, direction unchanged
        assert!(viewport.location().z > 1.0);
        assert!((viewport.direction() - DVec3::NEG_Z).length() < 1e-12);
    }

    #[test]
    fn rejected_candidate_reverts_to_last_good() {
        let mut clipper = FrustumClipper::new();
        let mut viewport = Viewport::perspective(DVec3::new(0.0, 0.0, 10.0), DVec3::ZERO, 0.8);
        let good = clipper.compute(&unit_box(), &mut viewport);

        // a box spanning far more than 1e16 * near is rejected
        let huge = BoundingBox::new(DVec3::new(-1.0, -1.0, -1.0e25), DVec3::new(1.0, 1.0, 9.99));
        let state = clipper.compute(&huge, &mut viewport);
        assert_eq!(state, good);
        assert_eq!(clipper.last_good(), Some(good));
    }

    #[test]
    fn min_near_distance_is_floored() {
        assert_eq!(FrustumClipper::new().with_min_near_distance(0.0).min_near_distance(), MIN_NEAR_FLOOR);
        assert_eq!(FrustumClipper::new().with_min_near_distance(f64::NAN).min_near_distance(), MIN_NEAR_FLOOR);
        assert_eq!(FrustumClipper::new().with_min_near_distance(0.01).min_near_distance(), 0.01);
    }

    #[test]
    fn rejected_candidate_without_history_uses_defaults() {
        let mut clipper = FrustumClipper::new();
        let mut viewport = Viewport::perspective(DVec3::new(0.0, 0.0, 10.0), DVec3::ZERO, 0.8);
        let huge = BoundingBox::new(DVec3::new(-1.0, -1.0, -1.0e40), DVec3::new(1.0, 1.0, 1.0));
        let state = clipper.compute(&huge, &mut viewport);
        assert_eq!((state.near, state.far), (DEFAULT_NEAR, DEFAULT_FAR));
    }
}
