//! [`GpuDevice`] implementation on Vulkan

use std::collections::HashMap;
use std::time::Duration;

use ash::vk;

use super::buffer::{vk_usage, Buffer};
use super::commands::{record_frame, CommandPool, FrameTarget, ResolvedCommand};
use super::context::{SurfaceProvider, VulkanContext, VulkanError, VulkanResult};
use super::descriptors::InstanceDescriptors;
use super::pipeline::{DepthTarget, Framebuffers, GraphicsPipeline, PipelineLayout, RenderPass};
use super::swapchain::Swapchain;
use super::sync::FrameSync;
use crate::core::config::RendererConfig;
use crate::render::api::{
    AcquireResult, BufferHandle, BufferUsage, DeviceLimits, FrameCommand, GpuDevice, GpuError, GpuResult,
    GraphicsPipelineDesc, PipelineHandle, PresentResult, DRAW_INDEXED_INDIRECT_STRIDE,
};

/// Map a `vkQueuePresentKHR` result; only an out-of-date surface stops presentation
fn present_outcome(result: ash::prelude::VkResult<bool>) -> GpuResult<PresentResult> {
    match result {
        Ok(false) => Ok(PresentResult::Presented),
        Ok(true) => {
            log::debug!("[VULKAN] Present reported a suboptimal swapchain");
            Ok(PresentResult::Presented)
        }
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentResult::OutOfDate),
        Err(e) => Err(VulkanError::Api(e).into()),
    }
}

fn duration_nanos(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

/// Frame slot objects on the Vulkan device
pub struct VulkanFrame {
    slot: usize,
    sync: FrameSync,
    command_buffer: vk::CommandBuffer,
    instance_set: vk::DescriptorSet,
}

impl VulkanFrame {
    /// Slot index this frame belongs to
    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// Swapchain plus everything sized to it
struct SurfaceTargets {
    framebuffers: Framebuffers,
    _depth: DepthTarget,
    swapchain: Swapchain,
}

impl SurfaceTargets {
    fn new(context: &VulkanContext, render_pass: vk::RenderPass, swapchain: Swapchain) -> VulkanResult<Self> {
        let depth = DepthTarget::new(context.raw_device().clone(), &context.physical_device, swapchain.extent())?;
        let framebuffers = Framebuffers::new(
            context.raw_device().clone(),
            render_pass,
            swapchain.image_views(),
            depth.view(),
            swapchain.extent(),
        )?;
        Ok(Self {
            framebuffers,
            _depth: depth,
            swapchain,
        })
    }
}

/// GPU device backed by a Vulkan swapchain
///
/// Fields drop in declaration order: device objects first, the context last.
pub struct VulkanDevice {
    buffers: HashMap<BufferHandle, Buffer>,
    pipelines: HashMap<PipelineHandle, GraphicsPipeline>,
    targets: Option<SurfaceTargets>,
    pipeline_layout: PipelineLayout,
    descriptors: InstanceDescriptors,
    render_pass: RenderPass,
    command_pool: CommandPool,
    context: VulkanContext,
    next_handle: u64,
}

impl VulkanDevice {
    /// Create the device and a swapchain for `provider`'s window
    pub fn new<P: SurfaceProvider + ?Sized>(provider: &mut P, config: &RendererConfig) -> VulkanResult<Self> {
        let context = VulkanContext::new(provider, &config.application_name, config.enable_validation)?;
        let device = context.raw_device().clone();

        let command_pool = CommandPool::new(device.clone(), context.physical_device.graphics_family)?;
        let swapchain = Swapchain::new(&context, provider.framebuffer_extent(), vk::SwapchainKHR::null())?;
        let render_pass = RenderPass::new_forward_pass(device.clone(), swapchain.format())?;
        let targets = SurfaceTargets::new(&context, render_pass.handle(), swapchain)?;
        let slots = u32::try_from(config.frames_in_flight).unwrap_or(u32::MAX);
        let descriptors = InstanceDescriptors::new(device.clone(), slots)?;
        let pipeline_layout = PipelineLayout::new(device, descriptors.set_layout())?;

        log::info!(
            "[VULKAN] Device ready: {}x{}",
            targets.swapchain.extent().width,
            targets.swapchain.extent().height
        );

        Ok(Self {
            buffers: HashMap::new(),
            pipelines: HashMap::new(),
            targets: Some(targets),
            pipeline_layout,
            descriptors,
            render_pass,
            command_pool,
            context,
            next_handle: 1,
        })
    }

    fn allocate_handle(&mut self) -> u64 {
        let id = self.next_handle;
        self.next_handle += 1;
        id
    }

    fn targets(&self) -> GpuResult<&SurfaceTargets> {
        self.targets
            .as_ref()
            .ok_or_else(|| GpuError::Backend("No swapchain".to_string()))
    }

    fn buffer(&self, handle: BufferHandle) -> GpuResult<&Buffer> {
        self.buffers
            .get(&handle)
            .ok_or(GpuError::InvalidHandle { kind: "buffer", id: handle.0 })
    }

    /// Map handles to Vulkan objects; instance data is written into the slot's set
    fn resolve(&self, frame: &VulkanFrame, commands: &[FrameCommand]) -> GpuResult<Vec<ResolvedCommand>> {
        commands
            .iter()
            .map(|command| {
                Ok(match command {
                    FrameCommand::Clear { color } => ResolvedCommand::Clear(*color),
                    FrameCommand::SetCamera { projection_view } => ResolvedCommand::PushCamera(*projection_view),
                    FrameCommand::BindIndexBuffer { buffer } => {
                        ResolvedCommand::BindIndexBuffer(self.buffer(*buffer)?.handle())
                    }
                    FrameCommand::BindInstanceData { buffer } => {
                        let buffer = self.buffer(*buffer)?.handle();
                        self.descriptors.write_instance_buffer(frame.instance_set, buffer);
                        ResolvedCommand::BindInstanceSet(frame.instance_set)
                    }
                    FrameCommand::DrawIndexedIndirect {
                        pipeline,
                        commands,
                        first_command,
                        command_count,
                    } => {
                        let pipeline = self
                            .pipelines
                            .get(pipeline)
                            .ok_or(GpuError::InvalidHandle { kind: "pipeline", id: pipeline.0 })?;
                        ResolvedCommand::DrawIndexedIndirect {
                            pipeline: pipeline.handle(),
                            buffer: self.buffer(*commands)?.handle(),
                            offset: u64::from(*first_command) * u64::from(DRAW_INDEXED_INDIRECT_STRIDE),
                            count: *command_count,
                            stride: DRAW_INDEXED_INDIRECT_STRIDE,
                        }
                    }
                })
            })
            .collect()
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::warn!("[VULKAN] wait_idle failed during drop: {}", e);
        }
    }
}

impl GpuDevice for VulkanDevice {
    type FrameResources = VulkanFrame;

    fn limits(&self) -> DeviceLimits {
        let limits = &self.context.physical_device.properties.limits;
        DeviceLimits {
            min_storage_buffer_offset_alignment: limits.min_storage_buffer_offset_alignment,
            min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
        }
    }

    fn extent(&self) -> (u32, u32) {
        self.targets
            .as_ref()
            .map_or((0, 0), |targets| {
                let extent = targets.swapchain.extent();
                (extent.width, extent.height)
            })
    }

    fn create_frame_resources(&mut self, slot: usize) -> GpuResult<VulkanFrame> {
        let sync = FrameSync::new(self.context.raw_device())?;
        let command_buffer = self.command_pool.allocate()?;
        let instance_set = self.descriptors.allocate()?;
        Ok(VulkanFrame {
            slot,
            sync,
            command_buffer,
            instance_set,
        })
    }

    fn wait_for_fence(&mut self, frame: &VulkanFrame, timeout: Duration) -> GpuResult<()> {
        match frame.sync.in_flight.wait(timeout) {
            Err(VulkanError::Api(vk::Result::TIMEOUT)) => Err(GpuError::Timeout {
                what: "frame retirement fence",
                after: timeout,
            }),
            other => other.map_err(GpuError::from),
        }
    }

    fn reset_fence(&mut self, frame: &VulkanFrame) -> GpuResult<()> {
        frame.sync.in_flight.reset().map_err(GpuError::from)
    }

    fn acquire_next_image(&mut self, frame: &VulkanFrame, timeout: Duration) -> GpuResult<AcquireResult> {
        let Some(targets) = self.targets.as_ref() else {
            return Ok(AcquireResult::OutOfDate);
        };

        let result = unsafe {
            targets.swapchain.loader().acquire_next_image(
                targets.swapchain.handle(),
                duration_nanos(timeout),
                frame.sync.image_available.handle(),
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => {
                if suboptimal {
                    log::debug!("[VULKAN] Acquired suboptimal image {}", image_index);
                }
                Ok(AcquireResult::Acquired { image_index })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireResult::OutOfDate),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(GpuError::Timeout {
                what: "swapchain image",
                after: timeout,
            }),
            Err(e) => Err(VulkanError::Api(e).into()),
        }
    }

    fn record_commands(&mut self, frame: &VulkanFrame, image_index: u32, commands: &[FrameCommand]) -> GpuResult<()> {
        let resolved = self.resolve(frame, commands)?;
        let targets = self.targets()?;

        let index = image_index as usize;
        let image = targets
            .swapchain
            .images()
            .get(index)
            .copied()
            .ok_or_else(|| GpuError::Backend(format!("Image index {} out of range", image_index)))?;
        let framebuffer = targets
            .framebuffers
            .get(index)
            .ok_or_else(|| GpuError::Backend(format!("No framebuffer for image {}", image_index)))?;

        let target = FrameTarget {
            image,
            framebuffer,
            render_pass: self.render_pass.handle(),
            pipeline_layout: self.pipeline_layout.handle(),
            extent: targets.swapchain.extent(),
            multi_draw_indirect: self.context.physical_device.multi_draw_indirect,
        };

        record_frame(self.context.raw_device(), frame.command_buffer, &target, &resolved)?;
        Ok(())
    }

    fn submit(&mut self, frame: &VulkanFrame) -> GpuResult<()> {
        let wait_semaphores = [frame.sync.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::TRANSFER | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [frame.sync.render_finished.handle()];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.context
                .raw_device()
                .queue_submit(
                    self.context.device.graphics_queue,
                    &[submit_info],
                    frame.sync.in_flight.handle(),
                )
                .map_err(|e| GpuError::from(VulkanError::Api(e)))
        }
    }

    fn present(&mut self, frame: &VulkanFrame, image_index: u32) -> GpuResult<PresentResult> {
        let targets = self.targets()?;
        let wait_semaphores = [frame.sync.render_finished.handle()];
        let swapchains = [targets.swapchain.handle()];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            targets
                .swapchain
                .loader()
                .queue_present(self.context.device.present_queue, &present_info)
        };

        present_outcome(result)
    }

    fn recreate_swapchain(&mut self, extent: (u32, u32)) -> GpuResult<()> {
        if extent.0 == 0 || extent.1 == 0 {
            return Err(GpuError::Backend("Cannot build a swapchain with a zero extent".to_string()));
        }
        self.context.wait_idle()?;

        let old = self.targets.take();
        let old_handle = old
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |targets| targets.swapchain.handle());
        let swapchain = Swapchain::new(&self.context, extent, old_handle);
        drop(old);

        let targets = SurfaceTargets::new(&self.context, self.render_pass.handle(), swapchain?)?;
        log::info!(
            "[VULKAN] Swapchain recreated: {}x{}",
            targets.swapchain.extent().width,
            targets.swapchain.extent().height
        );
        self.targets = Some(targets);
        Ok(())
    }

    fn wait_idle(&mut self) -> GpuResult<()> {
        self.context.wait_idle().map_err(GpuError::from)
    }

    fn create_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> GpuResult<PipelineHandle> {
        let pipeline = GraphicsPipeline::new(
            self.context.raw_device().clone(),
            self.render_pass.handle(),
            self.pipeline_layout.handle(),
            desc,
        )?;
        let handle = PipelineHandle(self.allocate_handle());
        self.pipelines.insert(handle, pipeline);
        Ok(handle)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        if let Some(removed) = self.pipelines.remove(&pipeline) {
            log::debug!("[VULKAN] Destroyed pipeline '{}'", removed.name());
        }
    }

    fn upload_device_local(&mut self, bytes: &[u8], usage: BufferUsage) -> GpuResult<BufferHandle> {
        let size = bytes.len() as vk::DeviceSize;
        let device = self.context.raw_device().clone();
        let physical_device = &self.context.physical_device;

        let staging = Buffer::new_host_visible(device.clone(), physical_device, size, vk::BufferUsageFlags::TRANSFER_SRC)?;
        staging.write(0, bytes)?;

        let buffer = Buffer::new(
            device,
            physical_device,
            size,
            vk_usage(usage) | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        if size > 0 {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            let (src, dst) = (staging.handle(), buffer.handle());
            self.command_pool
                .submit_one_time(self.context.device.graphics_queue, |device, command_buffer| unsafe {
                    device.cmd_copy_buffer(command_buffer, src, dst, &[region]);
                })?;
        }

        let handle = BufferHandle(self.allocate_handle());
        self.buffers.insert(handle, buffer);
        log::trace!("[VULKAN] Uploaded {} bytes to device-local {:?}", size, handle);
        Ok(handle)
    }

    fn create_host_buffer(&mut self, size: u64, usage: BufferUsage) -> GpuResult<BufferHandle> {
        let buffer = Buffer::new_host_visible(
            self.context.raw_device().clone(),
            &self.context.physical_device,
            size,
            vk_usage(usage),
        )?;
        let handle = BufferHandle(self.allocate_handle());
        self.buffers.insert(handle, buffer);
        Ok(handle)
    }

    fn write_host_buffer(&mut self, buffer: BufferHandle, offset: u64, bytes: &[u8]) -> GpuResult<()> {
        let target = self.buffer(buffer)?;
        let len = bytes.len() as u64;
        if offset.checked_add(len).map_or(true, |end| end > target.size()) {
            return Err(GpuError::OutOfBounds {
                offset,
                len,
                size: target.size(),
            });
        }
        target.write(offset, bytes)?;
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
    }
}
