//! GPU device abstraction
//!
//! The renderer core never talks to a graphics API directly. Everything it needs from
//! the GPU (frame synchronization objects, image acquisition, command submission,
//! presentation and buffer uploads) goes through [`GpuDevice`], which is implemented by
//! the Vulkan backend and by a headless backend used for tests and offscreen runs.

use std::time::Duration;
use thiserror::Error;

use super::frame_commands::FrameCommand;

/// Result type for device operations
pub type GpuResult<T> = Result<T, GpuError>;

/// Device-level errors
#[derive(Error, Debug)]
pub enum GpuError {
    /// A bounded wait expired
    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout {
        /// What was being waited on
        what: &'static str,
        /// The timeout that expired
        after: Duration,
    },

    /// The device stopped responding or was lost
    #[error("GPU device lost")]
    DeviceLost,

    /// A handle that the device does not know about
    #[error("Unknown {kind} handle {id}")]
    InvalidHandle {
        /// Kind of handle (buffer, pipeline)
        kind: &'static str,
        /// Raw handle value
        id: u64,
    },

    /// A host write outside of a buffer's bounds
    #[error("Write of {len} bytes at offset {offset} exceeds buffer size {size}")]
    OutOfBounds {
        /// Write offset
        offset: u64,
        /// Write length
        len: u64,
        /// Buffer size
        size: u64,
    },

    /// Backend-specific failure
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Handle to a buffer owned by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

/// Handle to a graphics pipeline owned by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineHandle(pub u64);

bitflags::bitflags! {
    /// How a buffer will be consumed on the GPU
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Read from shaders as a storage buffer
        const STORAGE = 1 << 0;
        /// Read from shaders as a uniform buffer
        const UNIFORM = 1 << 1;
        /// Source of indirect draw commands or counts
        const INDIRECT = 1 << 2;
        /// Bound as an index buffer
        const INDEX = 1 << 3;
    }
}

/// Device limits the renderer core cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Minimum alignment for storage buffer offsets
    pub min_storage_buffer_offset_alignment: u64,
    /// Minimum alignment for uniform buffer offsets
    pub min_uniform_buffer_offset_alignment: u64,
}

impl DeviceLimits {
    /// Alignment satisfying both storage and uniform binding of packed blocks
    pub fn parameter_block_alignment(&self) -> u64 {
        self.min_storage_buffer_offset_alignment
            .max(self.min_uniform_buffer_offset_alignment)
            .max(1)
    }
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_storage_buffer_offset_alignment: 64,
            min_uniform_buffer_offset_alignment: 256,
        }
    }
}

/// Result of requesting the next presentable image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    /// An image was acquired; the slot's presentation-ready semaphore will be signaled
    Acquired {
        /// Swapchain image index
        image_index: u32,
    },
    /// The presentation surface no longer matches the swapchain
    OutOfDate,
}

/// Result of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentResult {
    /// The image was queued for presentation
    Presented,
    /// The surface went stale while presenting
    OutOfDate,
}

/// Description of a graphics pipeline built from SPIR-V stages
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    /// Debug name
    pub name: String,
    /// Vertex stage SPIR-V bytecode
    pub vertex_spirv: Vec<u8>,
    /// Fragment stage SPIR-V bytecode (absent for depth-only pipelines)
    pub fragment_spirv: Option<Vec<u8>>,
    /// Whether back faces are culled
    pub cull_back_faces: bool,
    /// Whether color blending is enabled (transparent passes)
    pub alpha_blend: bool,
}

/// GPU device used by the renderer core
///
/// `FrameResources` is everything one frame slot owns on the device: a command
/// recording context, a presentation-ready semaphore, a render-complete semaphore and a
/// retirement fence that is created signaled. Dropping it releases those objects; callers
/// must wait for the device to go idle first.
pub trait GpuDevice: Send + 'static {
    /// Per-slot synchronization and command recording objects
    type FrameResources: Send;

    /// Limits used when packing GPU data
    fn limits(&self) -> DeviceLimits;

    /// Current presentation extent (width, height)
    fn extent(&self) -> (u32, u32);

    /// Create the objects for one frame slot (retirement fence starts signaled)
    fn create_frame_resources(&mut self, slot: usize) -> GpuResult<Self::FrameResources>;

    /// Block until the slot's retirement fence is signaled, bounded by `timeout`
    fn wait_for_fence(&mut self, frame: &Self::FrameResources, timeout: Duration) -> GpuResult<()>;

    /// Return the slot's retirement fence to the unsignaled state
    fn reset_fence(&mut self, frame: &Self::FrameResources) -> GpuResult<()>;

    /// Request the next presentable image, signaling the slot's presentation-ready semaphore
    fn acquire_next_image(&mut self, frame: &Self::FrameResources, timeout: Duration) -> GpuResult<AcquireResult>;

    /// Record the frame: transition the target to a writable layout, run `commands`,
    /// transition to a presentable layout
    fn record_commands(
        &mut self,
        frame: &Self::FrameResources,
        image_index: u32,
        commands: &[FrameCommand],
    ) -> GpuResult<()>;

    /// Submit the slot's recorded commands, waiting on presentation-ready and signaling
    /// render-complete and the retirement fence
    fn submit(&mut self, frame: &Self::FrameResources) -> GpuResult<()>;

    /// Present `image_index`, gated on the slot's render-complete semaphore
    fn present(&mut self, frame: &Self::FrameResources, image_index: u32) -> GpuResult<PresentResult>;

    /// Rebuild the swapchain for a new surface extent
    fn recreate_swapchain(&mut self, extent: (u32, u32)) -> GpuResult<()>;

    /// Block until all submitted work has retired
    fn wait_idle(&mut self) -> GpuResult<()>;

    /// Build a graphics pipeline compatible with the device's frame target
    fn create_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> GpuResult<PipelineHandle>;

    /// Destroy a pipeline
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    /// Upload `bytes` into a new device-local buffer through a staging buffer
    fn upload_device_local(&mut self, bytes: &[u8], usage: BufferUsage) -> GpuResult<BufferHandle>;

    /// Create a host-visible buffer of `size` bytes
    fn create_host_buffer(&mut self, size: u64, usage: BufferUsage) -> GpuResult<BufferHandle>;

    /// Write into a host-visible buffer
    fn write_host_buffer(&mut self, buffer: BufferHandle, offset: u64, bytes: &[u8]) -> GpuResult<()>;

    /// Destroy a buffer
    fn destroy_buffer(&mut self, buffer: BufferHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_block_alignment_takes_strictest_limit() {
        let limits = DeviceLimits {
            min_storage_buffer_offset_alignment: 16,
            min_uniform_buffer_offset_alignment: 256,
        };
        assert_eq!(limits.parameter_block_alignment(), 256);

        let zero = DeviceLimits {
            min_storage_buffer_offset_alignment: 0,
            min_uniform_buffer_offset_alignment: 0,
        };
        assert_eq!(zero.parameter_block_alignment(), 1);
    }
}
