//! Commands recorded into a frame
//!
//! The render unit describes a frame as a short list of [`FrameCommand`]s; the device
//! turns them into API calls between the layout transitions it owns.

use bytemuck::{Pod, Zeroable};

use super::gpu_device::{BufferHandle, PipelineHandle};

/// Indexed indirect draw command, laid out as the GPU consumes it
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirectCommand {
    /// Number of indices to draw
    pub index_count: u32,
    /// Number of instances to draw
    pub instance_count: u32,
    /// First index within the index buffer
    pub first_index: u32,
    /// Value added to each index
    pub vertex_offset: i32,
    /// Instance id of the first instance (the cooked geo instance id)
    pub first_instance: u32,
}

/// Size in bytes of one [`DrawIndexedIndirectCommand`]
pub const DRAW_INDEXED_INDIRECT_STRIDE: u32 = std::mem::size_of::<DrawIndexedIndirectCommand>() as u32;

/// One unit of work recorded into a frame's command buffer
#[derive(Debug, Clone, PartialEq)]
pub enum FrameCommand {
    /// Clear the whole target image
    Clear {
        /// RGBA clear color
        color: [f32; 4],
    },
    /// Camera matrix made visible to subsequent draws
    SetCamera {
        /// Projection * view, column-major
        projection_view: [[f32; 4]; 4],
    },
    /// Bind the shared index buffer
    BindIndexBuffer {
        /// Buffer holding u32 indices
        buffer: BufferHandle,
    },
    /// Make per-instance data visible to subsequent draws
    BindInstanceData {
        /// Buffer of [`GpuGeoInstanceData`](crate::render::resources::geo::GpuGeoInstanceData)
        buffer: BufferHandle,
    },
    /// Draw a contiguous range of indirect commands with one pipeline
    DrawIndexedIndirect {
        /// Pipeline to bind
        pipeline: PipelineHandle,
        /// Buffer of [`DrawIndexedIndirectCommand`]s
        commands: BufferHandle,
        /// First command in the buffer
        first_command: u32,
        /// Number of commands to draw
        command_count: u32,
    },
}

impl FrameCommand {
    /// Whether the command must be recorded inside the draw pass
    pub fn is_draw_pass_command(&self) -> bool {
        !matches!(self, Self::Clear { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indirect_command_layout() {
        assert_eq!(DRAW_INDEXED_INDIRECT_STRIDE, 20);
        let cmd = DrawIndexedIndirectCommand {
            index_count: 36,
            instance_count: 1,
            first_index: 6,
            vertex_offset: 0,
            first_instance: 4,
        };
        let words: &[u32] = bytemuck::cast_slice(std::slice::from_ref(&cmd));
        assert_eq!(words, &[36, 1, 6, 0, 4]);
    }
}
