//! # Rendering
//!
//! Everything below the lifecycle: the device abstraction and its backends, frame
//! pacing, the material registry, geometry bucketing and the camera.
//!
//! ## Architecture
//!
//! - **api**: [`GpuDevice`](api::GpuDevice) and the frame command vocabulary
//! - **backends**: Vulkan and headless devices
//! - **frame**: double-buffered frame slots over any device
//! - **resources**: materials, models and geometry instances
//! - **primitives**: camera state cache and camera rigs

pub mod api;
pub mod backends;
pub mod frame;
pub mod primitives;
pub mod resources;

pub use api::{GpuDevice, GpuError, GpuResult};
pub use frame::{AcquireOutcome, FrameError, FrameSyncManager};
pub use primitives::{CameraCache, CameraMatrices, CameraRigKind, CameraSnapshot};
