//! Camera rigs
//!
//! A rig drives the [`CameraCache`] once per update tick. Switching rigs runs the old
//! rig's exit hook and the new rig's enter hook.

use serde::{Deserialize, Serialize};

use super::camera::CameraCache;
use crate::foundation::math::{constants, Vec2, Vec3};

/// Rig selection, as stored in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraRigKind {
    /// The camera is only moved by explicit setter calls
    #[default]
    Fixed,
    /// Circles a focus point
    Orbit,
    /// Mouse and keyboard fly camera
    Freecam,
}

/// Cursor capture, provided by the windowing collaborator
pub trait CursorControl: Send {
    /// Hide the cursor and report relative motion
    fn lock_cursor(&mut self);
    /// Release the cursor
    fn unlock_cursor(&mut self);
}

/// Cursor control that does nothing, for headless runs
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCursor;

impl CursorControl for NoCursor {
    fn lock_cursor(&mut self) {}
    fn unlock_cursor(&mut self) {}
}

/// Input sampled for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RigInput {
    /// Movement axes in view space: x strafes right, y rises, z moves forward
    pub movement: Vec3,
    /// Cursor motion in pixels since the last tick
    pub look_delta: Vec2,
    /// Move faster
    pub boost: bool,
}

/// Orbit rig parameters and state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitRig {
    /// Point the camera looks at
    pub focus: Vec3,
    /// Horizontal distance from the focus
    pub distance: f32,
    /// Height above the focus
    pub height: f32,
    /// Angular speed in radians per second
    pub speed: f32,
    angle: f32,
}

impl Default for OrbitRig {
    fn default() -> Self {
        Self {
            focus: Vec3::zeros(),
            distance: 6.0,
            height: 2.0,
            speed: 0.5,
            angle: 0.0,
        }
    }
}

impl OrbitRig {
    /// Current orbit angle in radians
    pub fn angle(&self) -> f32 {
        self.angle
    }

    fn place(&self, camera: &mut CameraCache) {
        let offset = Vec3::new(self.angle.sin() * self.distance, self.height, self.angle.cos() * self.distance);
        let position = self.focus + offset;
        let to_focus = self.focus - position;
        camera.set_view_position(position);
        if let Some(direction) = to_focus.try_normalize(f32::EPSILON) {
            camera.set_view_direction_vec3(direction);
        }
    }
}

/// Fly camera parameters and state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreecamRig {
    /// Units per second
    pub move_speed: f32,
    /// Multiplier while boosting
    pub boost_multiplier: f32,
    /// Radians per pixel of cursor motion
    pub look_sensitivity: f32,
    pan: f32,
    tilt: f32,
}

impl Default for FreecamRig {
    fn default() -> Self {
        Self {
            move_speed: 5.0,
            boost_multiplier: 4.0,
            look_sensitivity: 0.002,
            pan: 0.0,
            tilt: 0.0,
        }
    }
}

/// Tilt stays just short of vertical
const MAX_TILT: f32 = constants::HALF_PI - 0.01;

/// Active camera rig
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraRig {
    /// No automatic movement
    Fixed,
    /// Orbit a focus point
    Orbit(OrbitRig),
    /// Fly with mouse and keyboard
    Freecam(FreecamRig),
}

impl CameraRig {
    /// Default rig of the given kind
    pub fn from_kind(kind: CameraRigKind) -> Self {
        match kind {
            CameraRigKind::Fixed => Self::Fixed,
            CameraRigKind::Orbit => Self::Orbit(OrbitRig::default()),
            CameraRigKind::Freecam => Self::Freecam(FreecamRig::default()),
        }
    }

    /// Kind of this rig
    pub fn kind(&self) -> CameraRigKind {
        match self {
            Self::Fixed => CameraRigKind::Fixed,
            Self::Orbit(_) => CameraRigKind::Orbit,
            Self::Freecam(_) => CameraRigKind::Freecam,
        }
    }

    /// Take over the camera
    pub fn enter(&mut self, camera: &mut CameraCache, cursor: &mut dyn CursorControl) {
        match self {
            Self::Fixed => {}
            Self::Orbit(orbit) => {
                let offset = camera.position() - orbit.focus;
                orbit.angle = offset.x.atan2(offset.z);
                orbit.place(camera);
            }
            Self::Freecam(freecam) => {
                (freecam.pan, freecam.tilt) = camera.pan_tilt();
                cursor.lock_cursor();
            }
        }
        log::debug!("Camera rig entered: {:?}", self.kind());
    }

    /// Hand the camera back
    pub fn exit(&mut self, cursor: &mut dyn CursorControl) {
        if let Self::Freecam(_) = self {
            cursor.unlock_cursor();
        }
    }

    /// Advance by `delta_time` seconds
    pub fn update(&mut self, delta_time: f32, input: &RigInput, camera: &mut CameraCache) {
        match self {
            Self::Fixed => {}
            Self::Orbit(orbit) => {
                orbit.angle = (orbit.angle + orbit.speed * delta_time) % constants::TAU;
                orbit.place(camera);
            }
            Self::Freecam(freecam) => {
                freecam.pan -= input.look_delta.x * freecam.look_sensitivity;
                freecam.tilt = (freecam.tilt - input.look_delta.y * freecam.look_sensitivity).clamp(-MAX_TILT, MAX_TILT);
                camera.set_view_direction(freecam.pan, freecam.tilt);

                if input.movement != Vec3::zeros() {
                    let forward = camera.view_direction();
                    let right = forward.cross(&Vec3::y()).try_normalize(f32::EPSILON).unwrap_or_else(Vec3::x);
                    let speed = if input.boost {
                        freecam.move_speed * freecam.boost_multiplier
                    } else {
                        freecam.move_speed
                    };
                    let step = (right * input.movement.x + Vec3::y() * input.movement.y + forward * input.movement.z)
                        * speed
                        * delta_time;
                    camera.set_view_position(camera.position() + step);
                }
            }
        }
    }
}

/// Owns the active rig and the cursor collaborator
pub struct CameraRigController {
    rig: CameraRig,
    cursor: Box<dyn CursorControl>,
    entered: bool,
}

impl std::fmt::Debug for CameraRigController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraRigController").field("rig", &self.rig).finish_non_exhaustive()
    }
}

impl CameraRigController {
    /// Create a controller; the rig is entered on the first [`set_rig`](Self::set_rig) or [`start`](Self::start)
    pub fn new(kind: CameraRigKind, cursor: Box<dyn CursorControl>) -> Self {
        Self {
            rig: CameraRig::from_kind(kind),
            cursor,
            entered: false,
        }
    }

    /// Enter the active rig against the current camera
    ///
    /// A rig already entered through [`set_rig`](Self::set_rig) is exited first, so
    /// cursor locks stay balanced.
    pub fn start(&mut self, camera: &mut CameraCache) {
        self.leave();
        self.rig.enter(camera, self.cursor.as_mut());
        self.entered = true;
    }

    /// Active rig
    pub fn rig(&self) -> &CameraRig {
        &self.rig
    }

    /// Switch to `rig`, running exit and enter hooks
    pub fn set_rig(&mut self, rig: CameraRig, camera: &mut CameraCache) {
        self.leave();
        self.rig = rig;
        self.rig.enter(camera, self.cursor.as_mut());
        self.entered = true;
    }

    /// Switch to the default rig of `kind`; no-op if it is already active
    pub fn set_rig_kind(&mut self, kind: CameraRigKind, camera: &mut CameraCache) {
        if self.rig.kind() != kind {
            self.set_rig(CameraRig::from_kind(kind), camera);
        }
    }

    /// Tick the active rig
    pub fn update(&mut self, delta_time: f32, input: &RigInput, camera: &mut CameraCache) {
        self.rig.update(delta_time, input, camera);
    }

    /// Release the cursor if the active rig holds it
    pub fn shutdown(&mut self) {
        self.leave();
    }

    fn leave(&mut self) {
        if std::mem::take(&mut self.entered) {
            self.rig.exit(self.cursor.as_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct CountingCursor(Arc<AtomicI32>);

    impl CursorControl for CountingCursor {
        fn lock_cursor(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn unlock_cursor(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_fixed_rig_leaves_camera_alone() {
        let mut camera = CameraCache::new();
        camera.fetch_matrices();
        let mut rig = CameraRig::from_kind(CameraRigKind::Fixed);
        rig.update(0.5, &RigInput::default(), &mut camera);
        assert!(camera.dirty().is_empty());
    }

    #[test]
    fn test_orbit_looks_at_focus() {
        let mut camera = CameraCache::new();
        camera.set_view_position(Vec3::new(0.0, 0.0, -6.0));
        let mut controller = CameraRigController::new(CameraRigKind::Orbit, Box::new(NoCursor));
        controller.start(&mut camera);
        controller.update(1.0, &RigInput::default(), &mut camera);

        let CameraRig::Orbit(orbit) = controller.rig() else {
            panic!("expected orbit rig");
        };
        let to_focus = (orbit.focus - camera.position()).normalize();
        assert_relative_eq!(camera.view_direction(), to_focus, epsilon = 1e-5);
        assert_relative_eq!(camera.position().y, orbit.height, epsilon = 1e-5);
    }

    #[test]
    fn test_freecam_locks_and_unlocks_cursor() {
        let cursor = CountingCursor::default();
        let locks = cursor.0.clone();
        let mut camera = CameraCache::new();
        let mut controller = CameraRigController::new(CameraRigKind::Fixed, Box::new(cursor));

        controller.set_rig_kind(CameraRigKind::Freecam, &mut camera);
        assert_eq!(locks.load(Ordering::SeqCst), 1);
        controller.set_rig_kind(CameraRigKind::Freecam, &mut camera);
        assert_eq!(locks.load(Ordering::SeqCst), 1);
        controller.set_rig_kind(CameraRigKind::Orbit, &mut camera);
        assert_eq!(locks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_freecam_chosen_before_start_locks_once() {
        let cursor = CountingCursor::default();
        let locks = cursor.0.clone();
        let mut camera = CameraCache::new();
        let mut controller = CameraRigController::new(CameraRigKind::Fixed, Box::new(cursor));

        controller.set_rig_kind(CameraRigKind::Freecam, &mut camera);
        controller.start(&mut camera);
        assert_eq!(locks.load(Ordering::SeqCst), 1);

        controller.shutdown();
        controller.shutdown();
        assert_eq!(locks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_freecam_moves_forward() {
        let mut camera = CameraCache::new();
        let mut rig = CameraRig::from_kind(CameraRigKind::Freecam);
        rig.enter(&mut camera, &mut NoCursor);
        let input = RigInput {
            movement: Vec3::new(0.0, 0.0, 1.0),
            ..RigInput::default()
        };
        rig.update(1.0, &input, &mut camera);
        assert_relative_eq!(camera.position(), Vec3::new(0.0, 0.0, 5.0), epsilon = 1e-5);
    }

    #[test]
    fn test_freecam_tilt_is_clamped() {
        let mut camera = CameraCache::new();
        let mut rig = CameraRig::from_kind(CameraRigKind::Freecam);
        rig.enter(&mut camera, &mut NoCursor);
        let input = RigInput {
            look_delta: Vec2::new(0.0, -1.0e6),
            ..RigInput::default()
        };
        rig.update(0.016, &input, &mut camera);
        let (_, tilt) = camera.pan_tilt();
        assert_relative_eq!(tilt, MAX_TILT, epsilon = 1e-5);
    }
}
