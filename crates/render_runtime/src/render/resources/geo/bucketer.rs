//! Render pass / pipeline bucketing of geometry instances
//!
//! Registering or unregistering an instance only flags the buckets stale. The next
//! [`GeoBucketer::rebuild_bucketed_lists`] recomputes the whole pass → pipeline →
//! primitive grouping from scratch and flags every per-frame buffer for re-upload.

use std::collections::BTreeMap;

use slotmap::SlotMap;

use super::instance::{GeoInstance, GeoInstanceKey, GeoRenderPass};
use super::model::ModelCatalog;
use super::per_frame::PerFrameGeoBuffer;
use super::{GeoError, GeoResult};
use crate::foundation::math::Mat4;
use crate::render::resources::materials::MaterialRegistry;

/// One primitive of one instance, as placed in a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstancePrimitive {
    /// Instance the primitive belongs to
    pub instance: GeoInstanceKey,
    /// Model the primitive comes from
    pub model_idx: u32,
    /// Primitive index within the model
    pub primitive_idx: u32,
    /// Material drawing the primitive
    pub material_idx: u32,
}

/// A contiguous run of primitives drawn with one pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderGroup {
    /// Pass the group belongs to
    pub render_pass: GeoRenderPass,
    /// Pipeline drawing the group
    pub pipeline_idx: u32,
    /// Index of the group's first primitive in the flattened primitive list
    pub base_primitive_idx: u32,
    /// Number of primitives in the group
    pub primitive_count: u32,
}

type PipelineBuckets = BTreeMap<u32, Vec<InstancePrimitive>>;

/// Live geometry instances and their bucketed view
#[derive(Debug)]
pub struct GeoBucketer {
    instances: SlotMap<GeoInstanceKey, GeoInstance>,
    capacity: usize,
    needs_rebucket: bool,
    needs_upload: bool,
    buckets: [PipelineBuckets; 3],
    render_groups: Vec<RenderGroup>,
}

impl GeoBucketer {
    /// Create a bucketer holding at most `capacity` instances
    pub fn new(capacity: usize) -> Self {
        Self {
            instances: SlotMap::with_capacity_and_key(capacity.min(1024)),
            capacity,
            needs_rebucket: false,
            needs_upload: false,
            buckets: Default::default(),
            render_groups: Vec::new(),
        }
    }

    /// Add an instance
    pub fn register(&mut self, mut instance: GeoInstance) -> GeoResult<GeoInstanceKey> {
        if self.instances.len() >= self.capacity {
            return Err(GeoError::CapacityExceeded { capacity: self.capacity });
        }

        instance.normalize();
        let key = self.instances.insert(instance);
        self.needs_rebucket = true;
        Ok(key)
    }

    /// Remove an instance
    pub fn unregister(&mut self, key: GeoInstanceKey) -> GeoResult<GeoInstance> {
        let instance = self.instances.remove(key).ok_or(GeoError::UnknownInstance)?;
        self.needs_rebucket = true;
        Ok(instance)
    }

    /// Move an instance; per-frame buffers re-upload on the next rebuild
    pub fn set_transform(&mut self, key: GeoInstanceKey, transform: &Mat4) -> GeoResult<()> {
        let instance = self.instances.get_mut(key).ok_or(GeoError::UnknownInstance)?;
        instance.set_transform(transform);
        self.needs_upload = true;
        Ok(())
    }

    /// Instance by key
    pub fn get(&self, key: GeoInstanceKey) -> Option<&GeoInstance> {
        self.instances.get(key)
    }

    /// Whether membership changed since the last rebuild
    pub fn needs_rebucket(&self) -> bool {
        self.needs_rebucket
    }

    /// Check that an instance's model and material set fit together
    ///
    /// Returns the set's material indices. Every material must exist and the set must
    /// have one material per model primitive.
    pub fn check_instance<'r>(
        instance: &GeoInstance,
        models: &ModelCatalog,
        registry: &'r MaterialRegistry,
    ) -> GeoResult<&'r [u32]> {
        let model = models
            .get_model(instance.model_idx())
            .ok_or_else(|| GeoError::UnknownModel(instance.model_idx().to_string()))?;
        let material_set = registry
            .get_material_set(instance.material_set_idx())
            .ok_or(GeoError::UnknownMaterialSet(instance.material_set_idx()))?;

        if model.primitives.len() != material_set.material_indices.len() {
            return Err(GeoError::PrimitiveMaterialMismatch {
                model: model.name.clone(),
                primitives: model.primitives.len(),
                materials: material_set.material_indices.len(),
            });
        }
        if let Some(&missing) = material_set
            .material_indices
            .iter()
            .find(|&&m| registry.pipeline_for_material(m).is_none())
        {
            return Err(GeoError::UnknownMaterial(missing));
        }
        Ok(&material_set.material_indices)
    }

    /// Recompute the buckets if anything changed
    ///
    /// Returns `Ok(true)` when the buckets were rebuilt. Any change, including a moved
    /// instance, flags all of `per_frame_buffers` for re-upload. On error the previous
    /// buckets and render groups are left in place.
    pub fn rebuild_bucketed_lists(
        &mut self,
        models: &ModelCatalog,
        registry: &MaterialRegistry,
        per_frame_buffers: &mut [PerFrameGeoBuffer],
    ) -> GeoResult<bool> {
        if !self.needs_rebucket && !self.needs_upload {
            return Ok(false);
        }

        for buffer in per_frame_buffers.iter_mut() {
            buffer.flag_changed();
        }
        self.needs_upload = false;

        if !self.needs_rebucket {
            return Ok(false);
        }

        let mut buckets: [PipelineBuckets; 3] = Default::default();
        for (key, instance) in &self.instances {
            let material_set = Self::check_instance(instance, models, registry)?;
            let bucket = &mut buckets[instance.render_pass().index()];
            for (primitive_idx, &material_idx) in material_set.iter().enumerate() {
                let pipeline_idx = registry
                    .pipeline_for_material(material_idx)
                    .ok_or(GeoError::UnknownMaterial(material_idx))?;

                bucket.entry(pipeline_idx).or_default().push(InstancePrimitive {
                    instance: key,
                    model_idx: instance.model_idx(),
                    primitive_idx: primitive_idx as u32,
                    material_idx,
                });
            }
        }

        let mut render_groups = Vec::new();
        let mut base_primitive_idx = 0;
        for pass in GeoRenderPass::ALL {
            for (&pipeline_idx, primitives) in &buckets[pass.index()] {
                let primitive_count = primitives.len() as u32;
                render_groups.push(RenderGroup {
                    render_pass: pass,
                    pipeline_idx,
                    base_primitive_idx,
                    primitive_count,
                });
                base_primitive_idx += primitive_count;
            }
        }

        self.buckets = buckets;
        self.render_groups = render_groups;
        self.needs_rebucket = false;
        log::debug!(
            "[GEO] Rebucketed {} instances into {} render groups ({} primitives)",
            self.instances.len(),
            self.render_groups.len(),
            base_primitive_idx
        );
        Ok(true)
    }

    /// Live instances in key order
    pub fn all_unique_instances(&self) -> impl Iterator<Item = (GeoInstanceKey, &GeoInstance)> {
        self.instances.iter()
    }

    pub(super) fn all_unique_instances_mut(&mut self) -> impl Iterator<Item = (GeoInstanceKey, &mut GeoInstance)> {
        self.instances.iter_mut()
    }

    /// Number of live instances
    pub fn unique_instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Every bucketed primitive, in render group order
    pub fn all_primitives(&self) -> impl Iterator<Item = &InstancePrimitive> {
        GeoRenderPass::ALL
            .into_iter()
            .flat_map(move |pass| self.buckets[pass.index()].values().flatten())
    }

    /// Primitives of one pass keyed by pipeline
    pub fn pipeline_grouped_primitives(&self, pass: GeoRenderPass) -> &BTreeMap<u32, Vec<InstancePrimitive>> {
        &self.buckets[pass.index()]
    }

    /// Render groups across all passes
    pub fn render_groups(&self) -> &[RenderGroup] {
        &self.render_groups
    }

    /// Number of primitives in a pass
    pub fn primitive_count(&self, pass: GeoRenderPass) -> usize {
        self.buckets[pass.index()].values().map(Vec::len).sum()
    }

    /// Number of render groups in a pass
    pub fn render_group_count(&self, pass: GeoRenderPass) -> usize {
        self.buckets[pass.index()].len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::{DeviceLimits, PipelineHandle};
    use crate::render::resources::materials::{CameraType, MaterialDefinition, PipelineDefinition, RegistryBuilder};

    struct Scene {
        models: ModelCatalog,
        registry: MaterialRegistry,
        rock_set: u32,
        water_set: u32,
        mismatched_set: u32,
        rock: u32,
        water: u32,
    }

    fn scene() -> Scene {
        let builder = RegistryBuilder::new();
        for (i, name) in ["stone", "moss", "water"].into_iter().enumerate() {
            builder.register_pipeline(name).unwrap();
            builder
                .define_pipeline(name, None, None, PipelineDefinition::new(PipelineHandle(i as u64 + 1), CameraType::MainView))
                .unwrap();
        }
        let stone = builder.register_material("stone", MaterialDefinition::new(0)).unwrap();
        let moss = builder.register_material("moss", MaterialDefinition::new(1)).unwrap();
        let water = builder.register_material("water", MaterialDefinition::new(2)).unwrap();
        let rock_set = builder.register_material_set("rock", vec![moss, stone]).unwrap();
        let water_set = builder.register_material_set("water", vec![water]).unwrap();
        let mismatched_set = builder.register_material_set("bad", vec![stone]).unwrap();
        let registry = builder.finalize(DeviceLimits::default()).unwrap();

        let mut models = ModelCatalog::new();
        let rock = models
            .register_indexed_model("rock", &[vec![0, 1, 2], vec![3, 4, 5]], [0.0; 4])
            .unwrap();
        let water = models.register_indexed_model("lake", &[vec![0, 1, 2]], [0.0; 4]).unwrap();

        Scene {
            models,
            registry,
            rock_set,
            water_set,
            mismatched_set,
            rock,
            water,
        }
    }

    #[test]
    fn test_registration_enforces_water_rule() {
        let s = scene();
        let mut bucketer = GeoBucketer::new(16);
        let key = bucketer
            .register(GeoInstance::new(s.water, s.water_set, GeoRenderPass::WaterTransparent, true))
            .unwrap();
        assert!(!bucketer.get(key).unwrap().is_shadow_caster());
    }

    #[test]
    fn test_rebuild_groups_by_pass_then_pipeline() {
        let s = scene();
        let mut bucketer = GeoBucketer::new(16);
        bucketer.register(GeoInstance::new(s.rock, s.rock_set, GeoRenderPass::Opaque, true)).unwrap();
        bucketer.register(GeoInstance::new(s.water, s.water_set, GeoRenderPass::WaterTransparent, false)).unwrap();
        bucketer.register(GeoInstance::new(s.rock, s.rock_set, GeoRenderPass::Opaque, true)).unwrap();

        let mut frames = vec![PerFrameGeoBuffer::new(1024, 32), PerFrameGeoBuffer::new(1024, 32)];
        for frame in &mut frames {
            frame.mark_processed();
        }
        assert!(bucketer.rebuild_bucketed_lists(&s.models, &s.registry, &mut frames).unwrap());
        assert!(frames.iter().all(PerFrameGeoBuffer::is_changed));

        let groups = bucketer.render_groups();
        assert_eq!(groups.len(), 3);
        assert_eq!((groups[0].pipeline_idx, groups[0].base_primitive_idx, groups[0].primitive_count), (0, 0, 2));
        assert_eq!((groups[1].pipeline_idx, groups[1].base_primitive_idx, groups[1].primitive_count), (1, 2, 2));
        assert_eq!(groups[2].render_pass, GeoRenderPass::WaterTransparent);
        assert_eq!(groups[2].base_primitive_idx, 4);

        assert_eq!(bucketer.primitive_count(GeoRenderPass::Opaque), 4);
        assert_eq!(bucketer.render_group_count(GeoRenderPass::Opaque), 2);
        assert_eq!(bucketer.render_group_count(GeoRenderPass::Transparent), 0);
        assert_eq!(bucketer.all_primitives().count(), 5);

        // Moss is primitive 0 of the rock model and draws with pipeline 1.
        let moss = &bucketer.pipeline_grouped_primitives(GeoRenderPass::Opaque)[&1];
        assert!(moss.iter().all(|p| p.primitive_idx == 0));
    }

    #[test]
    fn test_rebuild_is_noop_without_changes() {
        let s = scene();
        let mut bucketer = GeoBucketer::new(16);
        bucketer.register(GeoInstance::new(s.rock, s.rock_set, GeoRenderPass::Opaque, true)).unwrap();

        let mut frames = vec![PerFrameGeoBuffer::new(1024, 32)];
        assert!(bucketer.rebuild_bucketed_lists(&s.models, &s.registry, &mut frames).unwrap());

        frames[0].mark_processed();
        assert!(!bucketer.rebuild_bucketed_lists(&s.models, &s.registry, &mut frames).unwrap());
        assert!(!frames[0].is_changed());
    }

    #[test]
    fn test_transform_change_flags_upload_without_rebucket() {
        let s = scene();
        let mut bucketer = GeoBucketer::new(16);
        let key = bucketer.register(GeoInstance::new(s.rock, s.rock_set, GeoRenderPass::Opaque, true)).unwrap();
        let mut frames = vec![PerFrameGeoBuffer::new(1024, 32)];
        bucketer.rebuild_bucketed_lists(&s.models, &s.registry, &mut frames).unwrap();
        frames[0].mark_processed();

        bucketer.set_transform(key, &Mat4::new_scaling(2.0)).unwrap();
        assert!(!bucketer.rebuild_bucketed_lists(&s.models, &s.registry, &mut frames).unwrap());
        assert!(frames[0].is_changed());
        assert_eq!(bucketer.get(key).unwrap().transform(), Mat4::new_scaling(2.0));
    }

    #[test]
    fn test_unregistering_only_instance_empties_pass() {
        let s = scene();
        let mut bucketer = GeoBucketer::new(16);
        let key = bucketer
            .register(GeoInstance::new(s.water, s.water_set, GeoRenderPass::WaterTransparent, false))
            .unwrap();
        let mut frames = vec![PerFrameGeoBuffer::new(1024, 32)];
        bucketer.rebuild_bucketed_lists(&s.models, &s.registry, &mut frames).unwrap();
        assert_eq!(bucketer.render_group_count(GeoRenderPass::WaterTransparent), 1);

        bucketer.unregister(key).unwrap();
        assert!(bucketer.rebuild_bucketed_lists(&s.models, &s.registry, &mut frames).unwrap());
        assert_eq!(bucketer.render_group_count(GeoRenderPass::WaterTransparent), 0);
        assert_eq!(bucketer.primitive_count(GeoRenderPass::WaterTransparent), 0);
        assert!(bucketer.render_groups().is_empty());
        assert!(matches!(bucketer.unregister(key), Err(GeoError::UnknownInstance)));
    }

    #[test]
    fn test_primitive_material_mismatch_rejected() {
        let s = scene();
        let mut bucketer = GeoBucketer::new(16);
        bucketer.register(GeoInstance::new(s.rock, s.mismatched_set, GeoRenderPass::Opaque, true)).unwrap();
        let err = bucketer.rebuild_bucketed_lists(&s.models, &s.registry, &mut []).unwrap_err();
        assert!(matches!(err, GeoError::PrimitiveMaterialMismatch { primitives: 2, materials: 1, .. }));
    }

    #[test]
    fn test_check_instance_rejects_mismatched_set() {
        let s = scene();
        let good = GeoInstance::new(s.rock, s.rock_set, GeoRenderPass::Opaque, true);
        assert_eq!(GeoBucketer::check_instance(&good, &s.models, &s.registry).unwrap().len(), 2);

        let bad = GeoInstance::new(s.water, s.rock_set, GeoRenderPass::Opaque, true);
        assert!(matches!(
            GeoBucketer::check_instance(&bad, &s.models, &s.registry),
            Err(GeoError::PrimitiveMaterialMismatch { primitives: 1, materials: 2, .. })
        ));

        let unknown = GeoInstance::new(s.rock, 99, GeoRenderPass::Opaque, true);
        assert!(matches!(
            GeoBucketer::check_instance(&unknown, &s.models, &s.registry),
            Err(GeoError::UnknownMaterialSet(99))
        ));
    }

    #[test]
    fn test_failed_rebuild_keeps_previous_grouping() {
        let s = scene();
        let mut bucketer = GeoBucketer::new(16);
        bucketer.register(GeoInstance::new(s.water, s.water_set, GeoRenderPass::WaterTransparent, false)).unwrap();
        bucketer.rebuild_bucketed_lists(&s.models, &s.registry, &mut []).unwrap();

        bucketer.register(GeoInstance::new(s.rock, s.rock_set, GeoRenderPass::Opaque, true)).unwrap();
        bucketer.register(GeoInstance::new(s.rock, s.mismatched_set, GeoRenderPass::Opaque, true)).unwrap();
        assert!(bucketer.rebuild_bucketed_lists(&s.models, &s.registry, &mut []).is_err());

        assert!(bucketer.needs_rebucket());
        assert_eq!(bucketer.render_groups().len(), 1);
        let grouped: u32 = bucketer.render_groups().iter().map(|g| g.primitive_count).sum();
        assert_eq!(bucketer.all_primitives().count(), grouped as usize);
        assert_eq!(bucketer.primitive_count(GeoRenderPass::Opaque), 0);
    }

    #[test]
    fn test_capacity_limit() {
        let s = scene();
        let mut bucketer = GeoBucketer::new(1);
        bucketer.register(GeoInstance::new(s.rock, s.rock_set, GeoRenderPass::Opaque, true)).unwrap();
        let err = bucketer
            .register(GeoInstance::new(s.rock, s.rock_set, GeoRenderPass::Opaque, true))
            .unwrap_err();
        assert!(matches!(err, GeoError::CapacityExceeded { capacity: 1 }));
    }
}
