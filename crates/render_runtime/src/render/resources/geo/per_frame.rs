//! Per-frame geometry buffers
//!
//! Every frame slot owns one [`PerFrameGeoBuffer`]. When the bucketer flags a change,
//! the slot re-cooks the full instance and indirect draw data on the CPU and rewrites
//! its host-visible device buffers the next time it records. Device buffers grow in
//! fixed element intervals and never shrink.

use super::bucketer::GeoBucketer;
use super::instance::GpuGeoInstanceData;
use super::model::ModelCatalog;
use super::{GeoError, GeoResult};
use crate::foundation::math::utils::grow_to_interval;
use crate::render::api::{BufferHandle, BufferUsage, DrawIndexedIndirectCommand, GpuDevice, GpuResult};

/// A host-visible device buffer sized in elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GrowableBuffer {
    handle: BufferHandle,
    capacity: usize,
}

/// Device buffers of one frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerFrameGpuBuffers {
    /// [`GpuGeoInstanceData`] per instance, indexed by cooked instance id
    pub instance_data: BufferHandle,
    /// [`DrawIndexedIndirectCommand`] per bucketed primitive
    pub indirect_commands: BufferHandle,
    /// Base primitive index of each primitive's render group
    pub primitive_group_base_indices: BufferHandle,
    /// Count buffer slot of each primitive's render group
    pub count_buffer_indices: BufferHandle,
    /// Primitive count per render group
    pub group_counts: BufferHandle,
}

#[derive(Debug, Default)]
struct DeviceBuffers {
    instance_data: Option<GrowableBuffer>,
    indirect_commands: Option<GrowableBuffer>,
    primitive_group_base_indices: Option<GrowableBuffer>,
    count_buffer_indices: Option<GrowableBuffer>,
    group_counts: Option<GrowableBuffer>,
}

/// CPU cook and device buffers of one frame slot's geometry data
#[derive(Debug)]
pub struct PerFrameGeoBuffer {
    changed: bool,
    growth_interval: usize,
    count_growth_interval: usize,
    instance_data: Vec<GpuGeoInstanceData>,
    indirect_commands: Vec<DrawIndexedIndirectCommand>,
    primitive_group_base_indices: Vec<u32>,
    count_buffer_indices: Vec<u32>,
    group_counts: Vec<u32>,
    device: DeviceBuffers,
}

impl PerFrameGeoBuffer {
    /// Create an empty buffer set that grows by `growth_interval` elements
    /// (`count_growth_interval` for per-group data)
    pub fn new(growth_interval: usize, count_growth_interval: usize) -> Self {
        Self {
            changed: true,
            growth_interval: growth_interval.max(1),
            count_growth_interval: count_growth_interval.max(1),
            instance_data: Vec::new(),
            indirect_commands: Vec::new(),
            primitive_group_base_indices: Vec::new(),
            count_buffer_indices: Vec::new(),
            group_counts: Vec::new(),
            device: DeviceBuffers::default(),
        }
    }

    /// Request a re-cook and re-upload
    pub fn flag_changed(&mut self) {
        self.changed = true;
    }

    /// Whether a re-cook is pending
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Clear the pending flag without cooking
    pub fn mark_processed(&mut self) {
        self.changed = false;
    }

    /// Cooked instance data, indexed by cooked instance id
    pub fn instance_data(&self) -> &[GpuGeoInstanceData] {
        &self.instance_data
    }

    /// Cooked indirect draw commands, one per bucketed primitive
    pub fn indirect_commands(&self) -> &[DrawIndexedIndirectCommand] {
        &self.indirect_commands
    }

    /// Base primitive index of each primitive's render group
    pub fn primitive_group_base_indices(&self) -> &[u32] {
        &self.primitive_group_base_indices
    }

    /// Render group (count buffer slot) of each primitive
    pub fn count_buffer_indices(&self) -> &[u32] {
        &self.count_buffer_indices
    }

    /// Primitive count per render group
    pub fn group_counts(&self) -> &[u32] {
        &self.group_counts
    }

    /// Element capacity of the instance data buffer, if allocated
    pub fn instance_capacity(&self) -> Option<usize> {
        self.device.instance_data.map(|b| b.capacity)
    }

    /// Device buffers, once uploaded
    pub fn gpu_buffers(&self) -> Option<PerFrameGpuBuffers> {
        let d = &self.device;
        Some(PerFrameGpuBuffers {
            instance_data: d.instance_data?.handle,
            indirect_commands: d.indirect_commands?.handle,
            primitive_group_base_indices: d.primitive_group_base_indices?.handle,
            count_buffer_indices: d.count_buffer_indices?.handle,
            group_counts: d.group_counts?.handle,
        })
    }

    /// Rebuild the CPU-side data from the bucketer
    ///
    /// Assigns cooked instance ids in instance order; every indirect command draws one
    /// instance whose `first_instance` is that id.
    pub fn cook(&mut self, bucketer: &mut GeoBucketer, models: &ModelCatalog) -> GeoResult<()> {
        self.instance_data.clear();
        for (id, (_, instance)) in bucketer.all_unique_instances_mut().enumerate() {
            instance.cooked_buffer_instance_id = id as u32;
            self.instance_data.push(instance.gpu_instance_data);
        }

        self.indirect_commands.clear();
        for primitive in bucketer.all_primitives() {
            let instance = bucketer.get(primitive.instance).ok_or(GeoError::UnknownInstance)?;
            let range = models
                .get_model(primitive.model_idx)
                .and_then(|m| m.primitives.get(primitive.primitive_idx as usize))
                .ok_or_else(|| GeoError::UnknownModel(primitive.model_idx.to_string()))?;

            self.indirect_commands.push(DrawIndexedIndirectCommand {
                index_count: range.index_count,
                instance_count: 1,
                first_index: range.first_index,
                vertex_offset: range.vertex_offset,
                first_instance: instance.cooked_buffer_instance_id,
            });
        }

        self.primitive_group_base_indices.clear();
        self.count_buffer_indices.clear();
        self.group_counts.clear();
        for (group_idx, group) in bucketer.render_groups().iter().enumerate() {
            for _ in 0..group.primitive_count {
                self.primitive_group_base_indices.push(group.base_primitive_idx);
                self.count_buffer_indices.push(group_idx as u32);
            }
            self.group_counts.push(group.primitive_count);
        }

        Ok(())
    }

    /// Cook and upload if a change is pending; returns whether anything was written
    pub fn upload_changed<D: GpuDevice>(
        &mut self,
        device: &mut D,
        bucketer: &mut GeoBucketer,
        models: &ModelCatalog,
    ) -> GeoResult<bool> {
        if !self.changed {
            return Ok(false);
        }

        self.cook(bucketer, models)?;

        let interval = self.growth_interval;
        let count_interval = self.count_growth_interval;
        write_growable(device, &mut self.device.instance_data, &self.instance_data, interval, BufferUsage::STORAGE)?;
        write_growable(
            device,
            &mut self.device.indirect_commands,
            &self.indirect_commands,
            interval,
            BufferUsage::INDIRECT | BufferUsage::STORAGE,
        )?;
        write_growable(
            device,
            &mut self.device.primitive_group_base_indices,
            &self.primitive_group_base_indices,
            interval,
            BufferUsage::STORAGE,
        )?;
        write_growable(
            device,
            &mut self.device.count_buffer_indices,
            &self.count_buffer_indices,
            interval,
            BufferUsage::STORAGE,
        )?;
        write_growable(
            device,
            &mut self.device.group_counts,
            &self.group_counts,
            count_interval,
            BufferUsage::INDIRECT | BufferUsage::STORAGE,
        )?;

        self.changed = false;
        log::trace!(
            "[GEO] Uploaded {} instances, {} draw commands",
            self.instance_data.len(),
            self.indirect_commands.len()
        );
        Ok(true)
    }

    /// Destroy the device buffers
    pub fn release<D: GpuDevice>(&mut self, device: &mut D) {
        let d = &mut self.device;
        for buffer in [
            d.instance_data.take(),
            d.indirect_commands.take(),
            d.primitive_group_base_indices.take(),
            d.count_buffer_indices.take(),
            d.group_counts.take(),
        ]
        .into_iter()
        .flatten()
        {
            device.destroy_buffer(buffer.handle);
        }
        self.changed = true;
    }
}

/// Ensure `slot` holds at least `data.len()` elements (at least one interval) and write `data`
fn write_growable<D: GpuDevice, T: bytemuck::Pod>(
    device: &mut D,
    slot: &mut Option<GrowableBuffer>,
    data: &[T],
    interval: usize,
    usage: BufferUsage,
) -> GpuResult<()> {
    let needed = grow_to_interval(data.len().max(1), interval);
    let current = slot.map_or(0, |b| b.capacity);

    if needed > current {
        let size = (needed * std::mem::size_of::<T>()) as u64;
        let handle = device.create_host_buffer(size, usage)?;
        if let Some(old) = slot.replace(GrowableBuffer { handle, capacity: needed }) {
            device.destroy_buffer(old.handle);
        }
    }

    if let Some(buffer) = slot {
        if !data.is_empty() {
            device.write_host_buffer(buffer.handle, 0, bytemuck::cast_slice(data))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Mat4, Vec3};
    use crate::render::api::{DeviceLimits, PipelineHandle};
    use crate::render::backends::headless::{HeadlessConfig, HeadlessDevice};
    use crate::render::resources::geo::{GeoInstance, GeoRenderPass};
    use crate::render::resources::materials::{
        CameraType, MaterialDefinition, MaterialRegistry, PipelineDefinition, RegistryBuilder,
    };

    fn fixtures() -> (ModelCatalog, MaterialRegistry) {
        let builder = RegistryBuilder::new();
        for (i, name) in ["a", "b"].into_iter().enumerate() {
            builder.register_pipeline(name).unwrap();
            builder
                .define_pipeline(name, None, None, PipelineDefinition::new(PipelineHandle(i as u64 + 1), CameraType::MainView))
                .unwrap();
        }
        let ma = builder.register_material("ma", MaterialDefinition::new(0)).unwrap();
        let mb = builder.register_material("mb", MaterialDefinition::new(1)).unwrap();
        builder.register_material_set("two", vec![mb, ma]).unwrap();
        let registry = builder.finalize(DeviceLimits::default()).unwrap();

        let mut models = ModelCatalog::new();
        models
            .register_indexed_model("duo", &[vec![0, 1, 2], vec![0, 2, 3, 3, 4, 0]], [0.0; 4])
            .unwrap();
        (models, registry)
    }

    #[test]
    fn test_cook_assigns_ids_and_commands() {
        let (models, registry) = fixtures();
        let mut bucketer = GeoBucketer::new(64);
        let first = bucketer.register(GeoInstance::new(0, 0, GeoRenderPass::Opaque, true)).unwrap();
        let second = bucketer
            .register(
                GeoInstance::new(0, 0, GeoRenderPass::Opaque, true)
                    .with_transform(&Mat4::new_translation(&Vec3::new(0.0, 4.0, 0.0))),
            )
            .unwrap();

        let mut frame = PerFrameGeoBuffer::new(1024, 32);
        bucketer.rebuild_bucketed_lists(&models, &registry, std::slice::from_mut(&mut frame)).unwrap();
        frame.cook(&mut bucketer, &models).unwrap();

        assert_eq!(bucketer.get(first).unwrap().cooked_buffer_instance_id, 0);
        assert_eq!(bucketer.get(second).unwrap().cooked_buffer_instance_id, 1);
        assert_eq!(frame.instance_data()[1].transform[3], [0.0, 4.0, 0.0, 1.0]);

        // Pipeline 0 (material "ma") draws primitive 1 of each instance.
        let commands = frame.indirect_commands();
        assert_eq!(commands.len(), 4);
        assert_eq!(
            commands[0],
            DrawIndexedIndirectCommand {
                index_count: 6,
                instance_count: 1,
                first_index: 3,
                vertex_offset: 0,
                first_instance: 0,
            }
        );
        assert_eq!(commands[1].first_instance, 1);
        assert_eq!(commands[2].index_count, 3);

        assert_eq!(frame.primitive_group_base_indices(), &[0, 0, 2, 2]);
        assert_eq!(frame.count_buffer_indices(), &[0, 0, 1, 1]);
        assert_eq!(frame.group_counts(), &[2, 2]);
    }

    #[test]
    fn test_upload_only_when_changed() {
        let (models, registry) = fixtures();
        let mut device = HeadlessDevice::new(HeadlessConfig::default()).unwrap();
        let inspect = device.handle();
        let mut bucketer = GeoBucketer::new(64);
        bucketer.register(GeoInstance::new(0, 0, GeoRenderPass::Opaque, true)).unwrap();

        let mut frame = PerFrameGeoBuffer::new(1024, 32);
        bucketer.rebuild_bucketed_lists(&models, &registry, std::slice::from_mut(&mut frame)).unwrap();

        assert!(frame.upload_changed(&mut device, &mut bucketer, &models).unwrap());
        assert!(!frame.upload_changed(&mut device, &mut bucketer, &models).unwrap());

        let buffers = frame.gpu_buffers().unwrap();
        let bytes = inspect.buffer_contents(buffers.indirect_commands).unwrap();
        assert_eq!(bytes.len(), 1024 * 20);
        let words: Vec<u32> = bytemuck::pod_collect_to_vec(&bytes[..20]);
        assert_eq!(words, vec![6, 1, 3, 0, 0]);
        assert_eq!(inspect.buffer_contents(buffers.group_counts).unwrap().len(), 32 * 4);
    }

    #[test]
    fn test_buffers_grow_by_interval() {
        let (models, registry) = fixtures();
        let mut device = HeadlessDevice::new(HeadlessConfig::default()).unwrap();
        let inspect = device.handle();
        let mut bucketer = GeoBucketer::new(64);
        for _ in 0..5 {
            bucketer.register(GeoInstance::new(0, 0, GeoRenderPass::Opaque, true)).unwrap();
        }

        let mut frame = PerFrameGeoBuffer::new(4, 2);
        bucketer.rebuild_bucketed_lists(&models, &registry, std::slice::from_mut(&mut frame)).unwrap();
        frame.upload_changed(&mut device, &mut bucketer, &models).unwrap();

        // 5 instances round up to 8; 10 primitives round up to 12.
        assert_eq!(frame.instance_capacity(), Some(8));
        let buffers = frame.gpu_buffers().unwrap();
        assert_eq!(inspect.buffer_contents(buffers.indirect_commands).unwrap().len(), 12 * 20);

        frame.release(&mut device);
        assert_eq!(inspect.live_buffer_count(), 0);
        assert!(frame.gpu_buffers().is_none());
    }
}
