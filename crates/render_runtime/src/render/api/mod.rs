//! Public rendering API
//!
//! The device abstraction the renderer core is written against, and the frame command
//! vocabulary shared by every backend.

pub mod gpu_device;
pub mod frame_commands;

pub use gpu_device::{
    AcquireResult, BufferHandle, BufferUsage, DeviceLimits, GpuDevice, GpuError, GpuResult,
    GraphicsPipelineDesc, PipelineHandle, PresentResult,
};
pub use frame_commands::{DrawIndexedIndirectCommand, FrameCommand, DRAW_INDEXED_INDIRECT_STRIDE};
