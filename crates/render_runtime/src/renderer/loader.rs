//! Asset loading collaborator
//!
//! The build unit hands an [`AssetLoader`] a [`LoadContext`]: the device (for pipeline
//! creation), the registry builder and the model catalog. Geometry instances requested
//! during loading are queued and registered after the registry is cooked, because
//! their material sets only resolve against the cooked registry.

use super::{RendererError, RendererResult};
use crate::render::api::GpuDevice;
use crate::render::resources::geo::{GeoBucketer, GeoInstance, GeoRenderPass, ModelCatalog};
use crate::render::resources::materials::{MaterialRegistry, RegistryBuilder};

/// A geometry instance requested by name
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRequest {
    /// Registered model name
    pub model: String,
    /// Registered material set name
    pub material_set: String,
    /// Pass to draw in
    pub render_pass: GeoRenderPass,
    /// Whether the instance casts shadows (ignored for water)
    pub shadow_caster: bool,
}

impl InstanceRequest {
    /// Resolve names into a [`GeoInstance`]
    ///
    /// The material set must hold one existing material per model primitive.
    pub fn resolve(&self, models: &ModelCatalog, registry: &MaterialRegistry) -> RendererResult<GeoInstance> {
        let model_idx = models
            .model_idx(&self.model)
            .ok_or_else(|| RendererError::UnknownAsset(format!("model '{}'", self.model)))?;
        let set_idx = registry
            .material_set_idx(&self.material_set)
            .ok_or_else(|| RendererError::UnknownAsset(format!("material set '{}'", self.material_set)))?;
        let instance = GeoInstance::new(model_idx, set_idx, self.render_pass, self.shadow_caster);
        GeoBucketer::check_instance(&instance, models, registry)?;
        Ok(instance)
    }
}

/// What a loader may touch while the renderer builds
pub struct LoadContext<'a, D> {
    /// Device used to create pipelines and upload data
    pub device: &'a mut D,
    /// Pipelines, materials and material sets
    pub registry: &'a RegistryBuilder,
    /// Models and their index data
    pub models: &'a mut ModelCatalog,
    pending_instances: &'a mut Vec<InstanceRequest>,
}

impl<'a, D: GpuDevice> LoadContext<'a, D> {
    pub(crate) fn new(
        device: &'a mut D,
        registry: &'a RegistryBuilder,
        models: &'a mut ModelCatalog,
        pending_instances: &'a mut Vec<InstanceRequest>,
    ) -> Self {
        Self {
            device,
            registry,
            models,
            pending_instances,
        }
    }

    /// Queue a geometry instance for registration once the registry is cooked
    pub fn create_geo_instance(
        &mut self,
        model: &str,
        material_set: &str,
        render_pass: GeoRenderPass,
        shadow_caster: bool,
    ) {
        self.pending_instances.push(InstanceRequest {
            model: model.to_string(),
            material_set: material_set.to_string(),
            render_pass,
            shadow_caster,
        });
    }
}

/// Registers the renderer's pipelines, materials, material sets and models
pub trait AssetLoader<D: GpuDevice>: Send + 'static {
    /// Populate the context; unknown names are errors
    fn load_assets(&mut self, ctx: &mut LoadContext<'_, D>) -> RendererResult<()>;
}

/// Loader that registers nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyLoader;

impl<D: GpuDevice> AssetLoader<D> for EmptyLoader {
    fn load_assets(&mut self, _ctx: &mut LoadContext<'_, D>) -> RendererResult<()> {
        Ok(())
    }
}
