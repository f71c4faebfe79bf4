//! Camera primitives
//!
//! The cached render camera and the rigs that move it.

pub mod camera;
pub mod camera_rig;

pub use camera::{CameraCache, CameraDirty, CameraMatrices, CameraSnapshot};
pub use camera_rig::{
    CameraRig, CameraRigController, CameraRigKind, CursorControl, FreecamRig, NoCursor, OrbitRig, RigInput,
};
