//! Cooked, read-only material registry

use std::collections::HashMap;

use super::records::{Material, MaterialSet, Pipeline};
use crate::render::api::GpuDevice;

/// Pipelines, materials and material sets with final indices
///
/// Produced by [`RegistryBuilder::finalize`](super::RegistryBuilder::finalize) or
/// [`RegistryBuilder::cook_and_upload`](super::RegistryBuilder::cook_and_upload).
#[derive(Debug, Default)]
pub struct MaterialRegistry {
    pipelines: Vec<Pipeline>,
    materials: Vec<Material>,
    material_sets: Vec<MaterialSet>,
    pipeline_names: HashMap<String, u32>,
    material_names: HashMap<String, u32>,
    material_set_names: HashMap<String, u32>,
    texture_names: HashMap<String, u32>,
}

impl MaterialRegistry {
    pub(super) fn new(
        pipelines: Vec<Pipeline>,
        materials: Vec<Material>,
        material_sets: Vec<MaterialSet>,
        pipeline_names: HashMap<String, u32>,
        material_names: HashMap<String, u32>,
        material_set_names: HashMap<String, u32>,
        texture_names: HashMap<String, u32>,
    ) -> Self {
        Self {
            pipelines,
            materials,
            material_sets,
            pipeline_names,
            material_names,
            material_set_names,
            texture_names,
        }
    }

    pub(super) fn pipelines_mut(&mut self) -> impl Iterator<Item = &mut Pipeline> {
        self.pipelines.iter_mut()
    }

    /// Pipeline by index
    pub fn get_pipeline(&self, idx: u32) -> Option<&Pipeline> {
        self.pipelines.get(idx as usize)
    }

    /// Material by index
    pub fn get_material(&self, idx: u32) -> Option<&Material> {
        self.materials.get(idx as usize)
    }

    /// Material set by index
    pub fn get_material_set(&self, idx: u32) -> Option<&MaterialSet> {
        self.material_sets.get(idx as usize)
    }

    /// Resolve a pipeline name
    pub fn pipeline_idx(&self, name: &str) -> Option<u32> {
        self.pipeline_names.get(name).copied()
    }

    /// Resolve a material name
    pub fn material_idx(&self, name: &str) -> Option<u32> {
        self.material_names.get(name).copied()
    }

    /// Resolve a material set name
    pub fn material_set_idx(&self, name: &str) -> Option<u32> {
        self.material_set_names.get(name).copied()
    }

    /// Resolve a texture name to its texture index
    pub fn texture_idx(&self, name: &str) -> Option<u32> {
        self.texture_names.get(name).copied()
    }

    /// All pipelines in index order
    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    /// All material sets in index order
    pub fn material_sets(&self) -> &[MaterialSet] {
        &self.material_sets
    }

    /// Number of pipelines
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Number of materials
    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    /// Pipeline a material draws with
    pub fn pipeline_for_material(&self, material_idx: u32) -> Option<u32> {
        self.get_material(material_idx).map(|m| m.pipeline_idx)
    }

    /// Destroy the device objects owned by the registry
    pub fn release<D: GpuDevice>(&mut self, device: &mut D) {
        for pipeline in &mut self.pipelines {
            if let Some(buffer) = pipeline.params_buffer.take() {
                device.destroy_buffer(buffer);
            }
            device.destroy_pipeline(pipeline.handle);
        }
        log::debug!("[REGISTRY] Released {} pipelines", self.pipelines.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::GraphicsPipelineDesc;
    use crate::render::backends::headless::{HeadlessConfig, HeadlessDevice};
    use crate::render::resources::materials::{
        CameraType, MaterialDefinition, ParamType, PipelineDefinition, RegistryBuilder,
    };

    fn build(device: &mut HeadlessDevice) -> MaterialRegistry {
        let handle = device
            .create_pipeline(&GraphicsPipelineDesc {
                name: "opaque".to_string(),
                vertex_spirv: vec![0; 8],
                fragment_spirv: Some(vec![0; 8]),
                cull_back_faces: true,
                alpha_blend: false,
            })
            .unwrap();

        let builder = RegistryBuilder::new();
        let p = builder.register_pipeline("opaque").unwrap();
        builder
            .define_pipeline(
                "opaque",
                None,
                None,
                PipelineDefinition::new(handle, CameraType::MainView).with_param("tint", ParamType::Vec4),
            )
            .unwrap();
        let m = builder.register_material("rock", MaterialDefinition::new(p)).unwrap();
        builder.register_material_set("rock_set", vec![m]).unwrap();
        builder.register_texture_name("rock_albedo").unwrap();
        builder.cook_and_upload(device).unwrap()
    }

    #[test]
    fn test_name_lookups() {
        let mut device = HeadlessDevice::new(HeadlessConfig::default()).unwrap();
        let registry = build(&mut device);

        assert_eq!(registry.pipeline_idx("opaque"), Some(0));
        assert_eq!(registry.material_idx("rock"), Some(0));
        assert_eq!(registry.material_set_idx("rock_set"), Some(0));
        assert_eq!(registry.texture_idx("rock_albedo"), Some(0));
        assert_eq!(registry.material_idx("sand"), None);
        assert_eq!(registry.get_material_set(0).unwrap().material_indices, vec![0]);
        assert_eq!(registry.pipeline_for_material(0), Some(0));
        assert!(registry.get_pipeline(1).is_none());
    }

    #[test]
    fn test_release_destroys_device_objects() {
        let mut device = HeadlessDevice::new(HeadlessConfig::default()).unwrap();
        let inspect = device.handle();
        let mut registry = build(&mut device);
        assert_eq!(inspect.live_buffer_count(), 1);
        assert_eq!(inspect.live_pipeline_count(), 1);

        registry.release(&mut device);
        assert_eq!(inspect.live_buffer_count(), 0);
        assert_eq!(inspect.live_pipeline_count(), 0);
        assert!(registry.get_pipeline(0).unwrap().params_buffer.is_none());
    }
}
