//! # Camera State Cache
//!
//! Holds the render camera's properties and lazily rebuilds its matrices.
//!
//! ## Design Principles
//! - Setters only record the new value and mark the affected matrix dirty
//! - [`CameraCache::fetch_matrices`] recomputes what is dirty and nothing else
//! - Projection is Vulkan-ready: right-handed perspective with the Y axis flipped
//!
//! ## Orientation Convention
//! Pan rotates about +Y, tilt about +X. A pan and tilt of zero looks down +Z;
//! positive tilt looks up. For a unit direction `d`:
//! `pan = atan2(d.x, d.z)`, `tilt = asin(d.y)`.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::core::CameraConfig;
use crate::foundation::math::{utils, Mat4, Mat4Ext, Vec3};

bitflags! {
    /// Matrices that must be rebuilt on the next fetch
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CameraDirty: u8 {
        /// Projection inputs changed
        const PROJECTION = 0b01;
        /// View inputs changed
        const VIEW = 0b10;
    }
}

const PARALLEL_EPSILON: f32 = 1e-6;
const NORMALIZED_EPSILON: f32 = 1e-4;

/// Matrices produced by [`CameraCache::fetch_matrices`]
#[derive(Debug, Clone, PartialEq)]
pub struct CameraMatrices {
    /// Perspective projection, Y flipped
    pub projection: Mat4,
    /// World to view transform
    pub view: Mat4,
    /// `projection * view`
    pub projection_view: Mat4,
    /// Shadow cascade view-projections; currently always empty
    pub shadow_cascades: Vec<Mat4>,
}

impl Default for CameraMatrices {
    fn default() -> Self {
        Self {
            projection: Mat4::identity(),
            view: Mat4::identity(),
            projection_view: Mat4::identity(),
            shadow_cascades: Vec::new(),
        }
    }
}

/// Camera properties in UI-friendly units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraSnapshot {
    /// Width / height
    pub aspect_ratio: f32,
    /// Vertical field of view in degrees
    pub fov_deg: f32,
    /// Near clip plane
    pub near: f32,
    /// Far clip plane
    pub far: f32,
    /// World position
    pub position: [f32; 3],
    /// Pan in degrees
    pub pan_deg: f32,
    /// Tilt in degrees
    pub tilt_deg: f32,
}

/// Render camera with cached matrices
///
/// Owned by the renderer. The camera rig writes through the setters during the
/// update unit and the render unit reads matrices with [`CameraCache::fetch_matrices`].
///
/// # Coordinate System
/// Right-handed, Y-up world space. The view matrix is a standard look-at toward
/// `position + view_direction`; when the direction is parallel to Y the up vector
/// becomes +Z so the look-at stays well defined.
#[derive(Debug, Clone)]
pub struct CameraCache {
    aspect_ratio: f32,
    fov: f32,
    near: f32,
    far: f32,
    position: Vec3,
    pan: f32,
    tilt: f32,
    view_direction: Vec3,
    dirty: CameraDirty,
    matrices: CameraMatrices,
}

impl Default for CameraCache {
    fn default() -> Self {
        Self {
            aspect_ratio: 1.0,
            fov: utils::deg_to_rad(90.0),
            near: 0.1,
            far: 100.0,
            position: Vec3::zeros(),
            pan: 0.0,
            tilt: 0.0,
            view_direction: Vec3::new(0.0, 0.0, 1.0),
            dirty: CameraDirty::all(),
            matrices: CameraMatrices::default(),
        }
    }
}

impl CameraCache {
    /// Create a camera looking down +Z from the origin
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the initial properties from configuration
    pub fn apply_config(&mut self, config: &CameraConfig) {
        self.set_fov(utils::deg_to_rad(config.fov_deg));
        self.set_near_far(config.near, config.far);
        self.set_view(
            Vec3::from(config.position),
            utils::deg_to_rad(config.pan_deg),
            utils::deg_to_rad(config.tilt_deg),
        );
    }

    /// Set the aspect ratio from a surface size; a zero-height surface is ignored
    pub fn set_aspect_ratio(&mut self, width: u32, height: u32) {
        if height == 0 {
            log::debug!("Ignoring aspect ratio for zero-height surface");
            return;
        }
        self.set_aspect_ratio_float(width as f32 / height as f32);
    }

    /// Set the aspect ratio (width / height)
    pub fn set_aspect_ratio_float(&mut self, aspect_ratio: f32) {
        self.aspect_ratio = aspect_ratio;
        self.dirty |= CameraDirty::PROJECTION;
    }

    /// Set the vertical field of view in radians
    pub fn set_fov(&mut self, radians: f32) {
        self.fov = radians;
        self.dirty |= CameraDirty::PROJECTION;
    }

    /// Set the clip planes
    pub fn set_near_far(&mut self, near: f32, far: f32) {
        self.near = near;
        self.far = far;
        self.dirty |= CameraDirty::PROJECTION;
    }

    /// Set position and orientation at once
    pub fn set_view(&mut self, position: Vec3, pan: f32, tilt: f32) {
        self.set_view_position(position);
        self.set_view_direction(pan, tilt);
    }

    /// Move the camera
    pub fn set_view_position(&mut self, position: Vec3) {
        self.position = position;
        self.dirty |= CameraDirty::VIEW;
    }

    /// Orient the camera by pan and tilt in radians
    pub fn set_view_direction(&mut self, pan: f32, tilt: f32) {
        let direction = Vec3::new(pan.sin() * tilt.cos(), tilt.sin(), pan.cos() * tilt.cos());
        self.store_direction(direction, pan, tilt);
    }

    /// Orient the camera along a unit vector
    ///
    /// # Panics
    /// In debug builds, if `direction` is not normalized.
    pub fn set_view_direction_vec3(&mut self, direction: Vec3) {
        let pan = direction.x.atan2(direction.z);
        let tilt = direction.y.clamp(-1.0, 1.0).asin();
        self.store_direction(direction, pan, tilt);
    }

    fn store_direction(&mut self, direction: Vec3, pan: f32, tilt: f32) {
        debug_assert!(
            (direction.norm_squared() - 1.0).abs() < NORMALIZED_EPSILON,
            "view direction must be normalized, got {direction:?}"
        );
        self.view_direction = direction;
        self.pan = pan;
        self.tilt = tilt;
        self.dirty |= CameraDirty::VIEW;
    }

    /// Matrices awaiting a rebuild
    pub fn dirty(&self) -> CameraDirty {
        self.dirty
    }

    /// Current position
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Current unit view direction
    pub fn view_direction(&self) -> Vec3 {
        self.view_direction
    }

    /// Current pan and tilt in radians
    pub fn pan_tilt(&self) -> (f32, f32) {
        (self.pan, self.tilt)
    }

    /// Rebuild dirty matrices and return the cache
    pub fn fetch_matrices(&mut self) -> &CameraMatrices {
        let mut rebuild_combined = false;

        if self.dirty.contains(CameraDirty::PROJECTION) {
            self.matrices.projection = Mat4::perspective_y_flipped(self.fov, self.aspect_ratio, self.near, self.far);
            rebuild_combined = true;
        }

        if self.dirty.contains(CameraDirty::VIEW) {
            let d = self.view_direction;
            let up = if d.x.abs() < PARALLEL_EPSILON && d.y.abs() > PARALLEL_EPSILON && d.z.abs() < PARALLEL_EPSILON {
                Vec3::new(0.0, 0.0, 1.0)
            } else {
                Vec3::new(0.0, 1.0, 0.0)
            };
            let target = self.position + d;
            self.matrices.view = Mat4::look_at(&self.position, &target, &up);
            rebuild_combined = true;
        }

        if rebuild_combined {
            self.matrices.projection_view = self.matrices.projection * self.matrices.view;
            self.matrices.shadow_cascades.clear();
        }

        self.dirty = CameraDirty::empty();
        &self.matrices
    }

    /// Properties in degrees for display
    pub fn snapshot(&self) -> CameraSnapshot {
        CameraSnapshot {
            aspect_ratio: self.aspect_ratio,
            fov_deg: utils::rad_to_deg(self.fov),
            near: self.near,
            far: self.far,
            position: self.position.into(),
            pan_deg: utils::rad_to_deg(self.pan),
            tilt_deg: utils::rad_to_deg(self.tilt),
        }
    }

    /// Apply edited properties
    pub fn apply_snapshot(&mut self, snapshot: &CameraSnapshot) {
        self.set_aspect_ratio_float(snapshot.aspect_ratio);
        self.set_fov(utils::deg_to_rad(snapshot.fov_deg));
        self.set_near_far(snapshot.near, snapshot.far);
        self.set_view(
            Vec3::from(snapshot.position),
            utils::deg_to_rad(snapshot.pan_deg),
            utils::deg_to_rad(snapshot.tilt_deg),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fetch_twice_is_bit_identical() {
        let mut camera = CameraCache::new();
        camera.set_view(Vec3::new(1.0, 2.0, 3.0), 0.4, -0.2);
        let first = camera.fetch_matrices().clone();
        assert!(camera.dirty().is_empty());
        let second = camera.fetch_matrices().clone();

        assert_eq!(first.projection.as_slice(), second.projection.as_slice());
        assert_eq!(first.view.as_slice(), second.view.as_slice());
        assert_eq!(first.projection_view.as_slice(), second.projection_view.as_slice());
        assert!(second.shadow_cascades.is_empty());
    }

    #[test]
    fn test_set_fov_only_rebuilds_projection() {
        let mut camera = CameraCache::new();
        let before = camera.fetch_matrices().clone();

        camera.set_fov(utils::deg_to_rad(45.0));
        assert_eq!(camera.dirty(), CameraDirty::PROJECTION);
        let after = camera.fetch_matrices().clone();

        assert_eq!(before.view, after.view);
        assert_ne!(before.projection, after.projection);
        assert_eq!(after.projection_view, after.projection * after.view);
    }

    #[test]
    fn test_projection_is_y_flipped() {
        let mut camera = CameraCache::new();
        camera.set_aspect_ratio(1920, 1080);
        let projection = camera.fetch_matrices().projection;
        assert!(projection[(1, 1)] < 0.0);
        assert!(projection[(0, 0)] > 0.0);
    }

    #[test]
    fn test_zero_height_surface_ignored() {
        let mut camera = CameraCache::new();
        camera.fetch_matrices();
        camera.set_aspect_ratio(800, 0);
        assert!(camera.dirty().is_empty());
        assert_relative_eq!(camera.snapshot().aspect_ratio, 1.0);
    }

    #[test]
    fn test_vertical_direction_uses_z_up() {
        let mut camera = CameraCache::new();
        camera.set_view_direction_vec3(Vec3::new(0.0, -1.0, 0.0));
        let view = camera.fetch_matrices().view;

        assert!(view.iter().all(|v| v.is_finite()));
        // Looking straight down, world +Z maps to view-space up.
        let up = view.transform_vector(&Vec3::new(0.0, 0.0, 1.0));
        assert_relative_eq!(up.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_pan_tilt_and_vector_agree() {
        let mut from_angles = CameraCache::new();
        from_angles.set_view_direction(utils::deg_to_rad(30.0), utils::deg_to_rad(-20.0));

        let mut from_vector = CameraCache::new();
        from_vector.set_view_direction_vec3(from_angles.view_direction());

        let (pan, tilt) = from_vector.pan_tilt();
        assert_relative_eq!(utils::rad_to_deg(pan), 30.0, epsilon = 1e-3);
        assert_relative_eq!(utils::rad_to_deg(tilt), -20.0, epsilon = 1e-3);
        assert_relative_eq!(
            from_angles.fetch_matrices().view,
            from_vector.fetch_matrices().view,
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut camera = CameraCache::new();
        camera.apply_config(&CameraConfig::default());
        let snapshot = camera.snapshot();
        assert_relative_eq!(snapshot.fov_deg, 70.0, epsilon = 1e-4);
        assert_relative_eq!(snapshot.tilt_deg, -30.0, epsilon = 1e-4);

        let mut copy = CameraCache::new();
        copy.apply_snapshot(&snapshot);
        assert_relative_eq!(copy.fetch_matrices().projection_view, camera.fetch_matrices().projection_view, epsilon = 1e-5);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "view direction must be normalized")]
    fn test_unnormalized_direction_asserts() {
        let mut camera = CameraCache::new();
        camera.set_view_direction_vec3(Vec3::new(0.0, 0.0, 2.0));
    }
}
