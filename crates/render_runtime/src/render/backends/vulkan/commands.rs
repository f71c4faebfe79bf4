//! Command pools and frame recording
//!
//! Frame commands are resolved to raw handles by the device before recording, so the
//! recorder never sees an unknown handle. Recording owns the target image's layout
//! transitions: undefined to transfer destination for the clear, transfer destination
//! to color attachment for the draw pass, and the render pass leaves the image ready
//! for presentation.

use ash::{vk, Device};

use super::context::{VulkanError, VulkanResult};
use super::swapchain::color_subresource_range;

/// Command pool with resettable buffers
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a pool for `queue_family_index`
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe {
            device
                .create_command_pool(&pool_create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, command_pool })
    }

    /// Allocate one primary command buffer
    pub fn allocate(&self) -> VulkanResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe {
            self.device
                .allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)?
        };
        buffers.into_iter().next().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Driver returned no command buffer".to_string(),
        })
    }

    /// Return a command buffer to the pool
    pub fn free(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device.free_command_buffers(self.command_pool, &[command_buffer]);
        }
    }

    /// Record with `record`, submit to `queue` and block until it completes
    pub fn submit_one_time<F>(&self, queue: vk::Queue, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&Device, vk::CommandBuffer),
    {
        let command_buffer = self.allocate()?;
        let result = self.run_one_time(queue, command_buffer, record);
        self.free(command_buffer);
        result
    }

    fn run_one_time<F>(&self, queue: vk::Queue, command_buffer: vk::CommandBuffer, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&Device, vk::CommandBuffer),
    {
        let begin_info =
            vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();

        unsafe {
            self.device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
            record(&self.device, command_buffer);
            self.device.end_command_buffer(command_buffer).map_err(VulkanError::Api)?;
            self.device
                .queue_submit(queue, &[submit_info], vk::Fence::null())
                .map_err(VulkanError::Api)?;
            self.device.queue_wait_idle(queue).map_err(VulkanError::Api)
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// A frame command with every handle resolved
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedCommand {
    /// Clear the target image
    Clear([f32; 4]),
    /// Push the camera matrix
    PushCamera([[f32; 4]; 4]),
    /// Bind a u32 index buffer
    BindIndexBuffer(vk::Buffer),
    /// Bind the slot's instance data set
    BindInstanceSet(vk::DescriptorSet),
    /// Indirect indexed draw
    DrawIndexedIndirect {
        /// Pipeline to bind
        pipeline: vk::Pipeline,
        /// Command buffer on the GPU
        buffer: vk::Buffer,
        /// Byte offset of the first command
        offset: vk::DeviceSize,
        /// Number of commands
        count: u32,
        /// Byte stride between commands
        stride: u32,
    },
}

/// Where a frame is drawn
#[derive(Debug, Clone, Copy)]
pub struct FrameTarget {
    /// Swapchain image
    pub image: vk::Image,
    /// Framebuffer wrapping the image
    pub framebuffer: vk::Framebuffer,
    /// Forward render pass
    pub render_pass: vk::RenderPass,
    /// Layout shared by every pipeline
    pub pipeline_layout: vk::PipelineLayout,
    /// Image extent
    pub extent: vk::Extent2D,
    /// Whether one indirect call may issue several draws
    pub multi_draw_indirect: bool,
}

/// Record a whole frame into `command_buffer`
pub fn record_frame(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    target: &FrameTarget,
    commands: &[ResolvedCommand],
) -> VulkanResult<()> {
    let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    unsafe {
        device
            .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
            .map_err(VulkanError::Api)?;
        device
            .begin_command_buffer(command_buffer, &begin_info)
            .map_err(VulkanError::Api)?;

        transition_image(
            device,
            command_buffer,
            target.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );

        for command in commands {
            if let ResolvedCommand::Clear(color) = command {
                let clear = vk::ClearColorValue { float32: *color };
                device.cmd_clear_color_image(
                    command_buffer,
                    target.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &clear,
                    &[color_subresource_range()],
                );
            }
        }

        transition_image(
            device,
            command_buffer,
            target.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );

        record_draw_pass(device, command_buffer, target, commands);

        device.end_command_buffer(command_buffer).map_err(VulkanError::Api)
    }
}

unsafe fn record_draw_pass(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    target: &FrameTarget,
    commands: &[ResolvedCommand],
) {
    let render_area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: target.extent,
    };
    let clear_values = [
        vk::ClearValue::default(),
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
        },
    ];
    let begin = vk::RenderPassBeginInfo::builder()
        .render_pass(target.render_pass)
        .framebuffer(target.framebuffer)
        .render_area(render_area)
        .clear_values(&clear_values);

    device.cmd_begin_render_pass(command_buffer, &begin, vk::SubpassContents::INLINE);

    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: target.extent.width as f32,
        height: target.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    device.cmd_set_viewport(command_buffer, 0, &[viewport]);
    device.cmd_set_scissor(command_buffer, 0, &[render_area]);

    for command in commands {
        match *command {
            ResolvedCommand::Clear(_) => {}
            ResolvedCommand::PushCamera(matrix) => {
                device.cmd_push_constants(
                    command_buffer,
                    target.pipeline_layout,
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    bytemuck::bytes_of(&matrix),
                );
            }
            ResolvedCommand::BindIndexBuffer(buffer) => {
                device.cmd_bind_index_buffer(command_buffer, buffer, 0, vk::IndexType::UINT32);
            }
            ResolvedCommand::BindInstanceSet(set) => {
                device.cmd_bind_descriptor_sets(
                    command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    target.pipeline_layout,
                    0,
                    &[set],
                    &[],
                );
            }
            ResolvedCommand::DrawIndexedIndirect {
                pipeline,
                buffer,
                offset,
                count,
                stride,
            } => {
                device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
                if target.multi_draw_indirect {
                    device.cmd_draw_indexed_indirect(command_buffer, buffer, offset, count, stride);
                } else {
                    for i in 0..u64::from(count) {
                        let command_offset = offset + i * u64::from(stride);
                        device.cmd_draw_indexed_indirect(command_buffer, buffer, command_offset, 1, stride);
                    }
                }
            }
        }
    }

    device.cmd_end_render_pass(command_buffer);
}

/// Access and stage masks for a layout transition
fn transition_masks(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> (vk::AccessFlags, vk::AccessFlags, vk::PipelineStageFlags, vk::PipelineStageFlags) {
    match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        _ => (
            vk::AccessFlags::MEMORY_WRITE,
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

unsafe fn transition_image(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let (src_access, dst_access, src_stage, dst_stage) = transition_masks(old_layout, new_layout);
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_subresource_range())
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .build();

    device.cmd_pipeline_barrier(
        command_buffer,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_transition_waits_on_nothing() {
        let (src_access, dst_access, src_stage, dst_stage) =
            transition_masks(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert!(src_access.is_empty());
        assert_eq!(dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(dst_stage, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn test_draw_transition_orders_after_clear() {
        let (src_access, _, src_stage, dst_stage) = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        assert_eq!(src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(dst_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
    }
}
