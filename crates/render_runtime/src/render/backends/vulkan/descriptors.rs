//! Descriptor set exposing per-instance data to the vertex stage
//!
//! Set 0, binding 0 is a read-only storage buffer of instance records. Each frame slot
//! owns one set and rewrites it while recording, after its fence has retired. Sets are
//! returned to the driver when the pool is destroyed.

use ash::{vk, Device};

use super::context::{VulkanError, VulkanResult};

/// Binding of the instance storage buffer within set 0
pub const INSTANCE_DATA_BINDING: u32 = 0;

/// Set layout and the pool the frame slots allocate from
pub struct InstanceDescriptors {
    device: Device,
    set_layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
}

impl InstanceDescriptors {
    /// Create a layout and a pool with room for `max_sets` frame slots
    pub fn new(device: Device, max_sets: u32) -> VulkanResult<Self> {
        let bindings = [vk::DescriptorSetLayoutBinding::builder()
            .binding(INSTANCE_DATA_BINDING)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .build()];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let set_layout = unsafe {
            device
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        let max_sets = max_sets.max(1);
        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: max_sets,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);
        let pool = match unsafe { device.create_descriptor_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(set_layout, None) };
                return Err(VulkanError::Api(e));
            }
        };

        Ok(Self {
            device,
            set_layout,
            pool,
        })
    }

    /// Layout shared by every pipeline
    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }

    /// Allocate the set for one frame slot
    pub fn allocate(&self) -> VulkanResult<vk::DescriptorSet> {
        let layouts = [self.set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        let sets = unsafe {
            self.device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(VulkanError::Api)?
        };
        sets.into_iter().next().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Driver returned no descriptor set".to_string(),
        })
    }

    /// Point `set` at `buffer`; the set must not be in use by the GPU
    pub fn write_instance_buffer(&self, set: vk::DescriptorSet, buffer: vk::Buffer) {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(INSTANCE_DATA_BINDING)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(&buffer_info)
            .build();
        unsafe {
            self.device.update_descriptor_sets(&[write], &[]);
        }
    }
}

impl Drop for InstanceDescriptors {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
            self.device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}
