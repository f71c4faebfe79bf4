//! Registration phase of the material registry
//!
//! Loaders register pipelines, materials, material sets and texture names against a
//! shared [`RegistryBuilder`]. Registration takes `&self` so several loader threads can
//! feed one builder; name tables and record lists sit behind separate locks. Cooking
//! consumes the builder, so nothing can be registered once indices are final.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use thiserror::Error;

use super::params::{BlockLayout, ParamType};
use super::records::{Material, MaterialDefinition, MaterialSet, Pipeline, PipelineDefinition};
use super::registry::MaterialRegistry;
use crate::foundation::sync::lock;
use crate::render::api::{BufferUsage, DeviceLimits, GpuDevice, GpuError};

/// Load-time registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A record was registered without a name
    #[error("Empty {kind} name")]
    EmptyName {
        /// Record kind
        kind: &'static str,
    },

    /// A name was registered twice
    #[error("Duplicate {kind} name '{name}'")]
    DuplicateName {
        /// Record kind
        kind: &'static str,
        /// Offending name
        name: String,
    },

    /// A name lookup failed
    #[error("Unknown {kind} '{name}'")]
    UnknownName {
        /// Record kind
        kind: &'static str,
        /// Name that was looked up
        name: String,
    },

    /// A pipeline was defined twice
    #[error("Pipeline '{0}' is already defined")]
    AlreadyDefined(String),

    /// A registered pipeline was never defined
    #[error("Pipeline '{0}' was registered but never defined")]
    UndefinedPipeline(String),

    /// A material refers to a pipeline index that does not exist
    #[error("Material '{material}' refers to unknown pipeline index {pipeline_idx}")]
    UnknownPipelineIndex {
        /// Material name
        material: String,
        /// Offending index
        pipeline_idx: u32,
    },

    /// A material set refers to a material index that does not exist
    #[error("Material set '{set}' refers to unknown material index {material_idx}")]
    UnknownMaterialIndex {
        /// Material set name
        set: String,
        /// Offending index
        material_idx: u32,
    },

    /// A pipeline declares the same parameter twice
    #[error("Pipeline '{pipeline}' declares parameter '{param}' twice")]
    DuplicateParam {
        /// Pipeline name
        pipeline: String,
        /// Parameter name
        param: String,
    },

    /// A material sets a parameter its pipeline does not declare
    #[error("Material '{material}' sets undeclared parameter '{param}'")]
    UnknownParam {
        /// Material name
        material: String,
        /// Parameter name
        param: String,
    },

    /// A material parameter value has the wrong type
    #[error("Material '{material}' parameter '{param}': expected {expected:?}, found {found:?}")]
    ParamTypeMismatch {
        /// Material name
        material: String,
        /// Parameter name
        param: String,
        /// Type the pipeline declares
        expected: ParamType,
        /// Type the material supplied
        found: ParamType,
    },

    /// A texture parameter names a texture that was never registered
    #[error("Material '{material}' refers to unknown texture '{texture}'")]
    UnknownTexture {
        /// Material name
        material: String,
        /// Texture name
        texture: String,
    },

    /// Uploading cooked data failed
    #[error("Upload failed: {0}")]
    Gpu(#[from] GpuError),
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Pipeline slot: registered by name first, defined later
#[derive(Debug, Default)]
struct PipelineSlot {
    name: String,
    definition: Option<PendingDefinition>,
}

#[derive(Debug)]
struct PendingDefinition {
    shadow_name: Option<String>,
    z_prepass_name: Option<String>,
    definition: PipelineDefinition,
}

/// Name table guarded independently from the records it indexes
#[derive(Debug, Default)]
struct NameTable {
    map: Mutex<HashMap<String, u32>>,
}

impl NameTable {
    fn get(&self, kind: &'static str, name: &str) -> RegistryResult<u32> {
        lock(&self.map)
            .get(name)
            .copied()
            .ok_or_else(|| RegistryError::UnknownName {
                kind,
                name: name.to_string(),
            })
    }

    /// Reserve `name`, push the record with `push` and map the name to the returned index
    fn insert_with(
        &self,
        kind: &'static str,
        name: &str,
        push: impl FnOnce() -> u32,
    ) -> RegistryResult<u32> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName { kind });
        }

        let mut map = lock(&self.map);
        if map.contains_key(name) {
            return Err(RegistryError::DuplicateName {
                kind,
                name: name.to_string(),
            });
        }
        let idx = push();
        map.insert(name.to_string(), idx);
        Ok(idx)
    }

    fn into_inner(self) -> HashMap<String, u32> {
        self.map.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Collects registry records ahead of cooking
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    pipeline_names: NameTable,
    pipelines: Mutex<Vec<PipelineSlot>>,
    material_names: NameTable,
    materials: Mutex<Vec<(String, MaterialDefinition)>>,
    material_set_names: NameTable,
    material_sets: Mutex<Vec<(String, MaterialSet)>>,
    texture_names: NameTable,
    texture_count: Mutex<u32>,
}

fn push_index<T>(list: &Mutex<Vec<T>>, item: T) -> u32 {
    let mut list = lock(list);
    let idx = list.len() as u32;
    list.push(item);
    idx
}

impl RegistryBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a pipeline index for `name`; the pipeline is defined later
    pub fn register_pipeline(&self, name: &str) -> RegistryResult<u32> {
        let idx = self.pipeline_names.insert_with("pipeline", name, || {
            push_index(
                &self.pipelines,
                PipelineSlot {
                    name: name.to_string(),
                    definition: None,
                },
            )
        })?;
        log::debug!("[REGISTRY] Registered pipeline '{}' as {}", name, idx);
        Ok(idx)
    }

    /// Define a registered pipeline
    ///
    /// Shadow and early-depth pipelines are referenced by name and resolved when cooking,
    /// so they may be defined in any order.
    pub fn define_pipeline(
        &self,
        name: &str,
        shadow_pipeline: Option<&str>,
        z_prepass_pipeline: Option<&str>,
        definition: PipelineDefinition,
    ) -> RegistryResult<()> {
        let idx = self.pipeline_names.get("pipeline", name)?;

        let mut pipelines = lock(&self.pipelines);
        let slot = &mut pipelines[idx as usize];
        if slot.definition.is_some() {
            return Err(RegistryError::AlreadyDefined(name.to_string()));
        }

        let duplicate = {
            let mut seen = HashSet::new();
            definition
                .params
                .iter()
                .find(|(param, _)| !seen.insert(param.as_str()))
                .map(|(param, _)| param.clone())
        };
        if let Some(param) = duplicate {
            return Err(RegistryError::DuplicateParam {
                pipeline: name.to_string(),
                param,
            });
        }

        slot.definition = Some(PendingDefinition {
            shadow_name: shadow_pipeline.map(str::to_string),
            z_prepass_name: z_prepass_pipeline.map(str::to_string),
            definition,
        });
        Ok(())
    }

    /// Append a material; its local index is assigned when cooking
    pub fn register_material(&self, name: &str, material: MaterialDefinition) -> RegistryResult<u32> {
        self.material_names.insert_with("material", name, || {
            push_index(&self.materials, (name.to_string(), material))
        })
    }

    /// Register an ordered list of material indices
    pub fn register_material_set(&self, name: &str, material_indices: Vec<u32>) -> RegistryResult<u32> {
        self.material_set_names.insert_with("material set", name, || {
            push_index(&self.material_sets, (name.to_string(), MaterialSet::new(material_indices)))
        })
    }

    /// Assign the next texture index to `name`
    pub fn register_texture_name(&self, name: &str) -> RegistryResult<u32> {
        self.texture_names.insert_with("texture", name, || {
            let mut count = lock(&self.texture_count);
            let idx = *count;
            *count += 1;
            idx
        })
    }

    /// Resolve a pipeline name
    pub fn pipeline_idx(&self, name: &str) -> RegistryResult<u32> {
        self.pipeline_names.get("pipeline", name)
    }

    /// Resolve a material name
    pub fn material_idx(&self, name: &str) -> RegistryResult<u32> {
        self.material_names.get("material", name)
    }

    /// Resolve a material set name
    pub fn material_set_idx(&self, name: &str) -> RegistryResult<u32> {
        self.material_set_names.get("material set", name)
    }

    /// Cook on the CPU: resolve cross references, assign local indices, pack parameter blocks
    pub fn finalize(self, limits: DeviceLimits) -> RegistryResult<MaterialRegistry> {
        let pipeline_names = self.pipeline_names.into_inner();
        let material_names = self.material_names.into_inner();
        let material_set_names = self.material_set_names.into_inner();
        let texture_names = self.texture_names.into_inner();

        let slots = self.pipelines.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner);
        let material_defs = self.materials.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner);
        let sets = self.material_sets.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner);

        let resolve = |name: &Option<String>| -> RegistryResult<Option<u32>> {
            name.as_deref()
                .map(|name| {
                    pipeline_names.get(name).copied().ok_or_else(|| RegistryError::UnknownName {
                        kind: "pipeline",
                        name: name.to_string(),
                    })
                })
                .transpose()
        };

        let alignment = limits.parameter_block_alignment();
        let mut pipelines = Vec::with_capacity(slots.len());
        for slot in slots {
            let pending = slot
                .definition
                .ok_or_else(|| RegistryError::UndefinedPipeline(slot.name.clone()))?;

            pipelines.push(Pipeline {
                shadow_pipeline: resolve(&pending.shadow_name)?,
                z_prepass_pipeline: resolve(&pending.z_prepass_name)?,
                handle: pending.definition.handle,
                camera_type: pending.definition.camera_type,
                layout: BlockLayout::compute(&pending.definition.params, alignment),
                name: slot.name,
                materials: Vec::new(),
                cooked_params: Vec::new(),
                params_buffer: None,
            });
        }

        // Group materials by pipeline; local index is the position within the group.
        let mut materials = Vec::with_capacity(material_defs.len());
        for (global_idx, (name, def)) in material_defs.into_iter().enumerate() {
            let pipeline = pipelines.get_mut(def.pipeline_idx as usize).ok_or_else(|| {
                RegistryError::UnknownPipelineIndex {
                    material: name.clone(),
                    pipeline_idx: def.pipeline_idx,
                }
            })?;

            let cooked_local_idx = pipeline.materials.len() as u32;
            pipeline.materials.push(global_idx as u32);
            materials.push(Material {
                name,
                pipeline_idx: def.pipeline_idx,
                params: def.params,
                cooked_local_idx,
            });
        }

        for pipeline in &mut pipelines {
            pack_parameter_blocks(pipeline, &materials, &texture_names)?;
        }

        let material_count = materials.len() as u32;
        let mut material_sets = Vec::with_capacity(sets.len());
        for (name, set) in sets {
            if let Some(&bad) = set.material_indices.iter().find(|&&idx| idx >= material_count) {
                return Err(RegistryError::UnknownMaterialIndex {
                    set: name,
                    material_idx: bad,
                });
            }
            material_sets.push(set);
        }

        log::info!(
            "[REGISTRY] Cooked {} pipelines, {} materials, {} material sets",
            pipelines.len(),
            materials.len(),
            material_sets.len()
        );

        Ok(MaterialRegistry::new(
            pipelines,
            materials,
            material_sets,
            pipeline_names,
            material_names,
            material_set_names,
            texture_names,
        ))
    }

    /// Cook and upload every pipeline's parameter blocks into a device-local buffer
    pub fn cook_and_upload<D: GpuDevice>(self, device: &mut D) -> RegistryResult<MaterialRegistry> {
        let mut registry = self.finalize(device.limits())?;

        for pipeline in registry.pipelines_mut() {
            if pipeline.cooked_params.is_empty() {
                continue;
            }
            let buffer = device.upload_device_local(&pipeline.cooked_params, BufferUsage::STORAGE)?;
            log::debug!(
                "[REGISTRY] Uploaded {} parameter blocks ({} bytes) for '{}'",
                pipeline.block_count(),
                pipeline.cooked_params.len(),
                pipeline.name
            );
            pipeline.params_buffer = Some(buffer);
        }

        Ok(registry)
    }
}

fn pack_parameter_blocks(
    pipeline: &mut Pipeline,
    materials: &[Material],
    texture_names: &HashMap<String, u32>,
) -> RegistryResult<()> {
    let stride = pipeline.layout.block_size_padded as usize;
    let mut packed = vec![0u8; stride * pipeline.materials.len()];

    for (local_idx, &global_idx) in pipeline.materials.iter().enumerate() {
        let material = &materials[global_idx as usize];
        let block = &mut packed[local_idx * stride..(local_idx + 1) * stride];

        for (param, value) in &material.params {
            let definition = pipeline.layout.definition(param).ok_or_else(|| RegistryError::UnknownParam {
                material: material.name.clone(),
                param: param.clone(),
            })?;

            if definition.param_type != value.param_type() {
                return Err(RegistryError::ParamTypeMismatch {
                    material: material.name.clone(),
                    param: param.clone(),
                    expected: definition.param_type,
                    found: value.param_type(),
                });
            }

            let offset = definition.offset as usize;
            value.write_packed(&mut block[offset..], |texture| {
                texture_names.get(texture).copied().ok_or_else(|| RegistryError::UnknownTexture {
                    material: material.name.clone(),
                    texture: texture.to_string(),
                })
            })?;
        }
    }

    pipeline.cooked_params = packed;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::PipelineHandle;
    use crate::render::resources::materials::{CameraType, ParamValue};

    fn limits() -> DeviceLimits {
        DeviceLimits {
            min_storage_buffer_offset_alignment: 16,
            min_uniform_buffer_offset_alignment: 16,
        }
    }

    fn define_simple(builder: &RegistryBuilder, name: &str, handle: u64) -> u32 {
        let idx = builder.register_pipeline(name).unwrap();
        builder
            .define_pipeline(
                name,
                None,
                None,
                PipelineDefinition::new(PipelineHandle(handle), CameraType::MainView)
                    .with_param("tint", ParamType::Vec4),
            )
            .unwrap();
        idx
    }

    #[test]
    fn test_local_indices_group_by_pipeline() {
        let builder = RegistryBuilder::new();
        let p0 = define_simple(&builder, "p0", 1);
        let p1 = define_simple(&builder, "p1", 2);

        let a = builder.register_material("A", MaterialDefinition::new(p0)).unwrap();
        let b = builder.register_material("B", MaterialDefinition::new(p0)).unwrap();
        let c = builder.register_material("C", MaterialDefinition::new(p1)).unwrap();

        let registry = builder.finalize(limits()).unwrap();
        assert_eq!(registry.get_material(a).unwrap().cooked_local_idx, 0);
        assert_eq!(registry.get_material(b).unwrap().cooked_local_idx, 1);
        assert_eq!(registry.get_material(c).unwrap().cooked_local_idx, 0);

        let p0 = registry.get_pipeline(p0).unwrap();
        let p1 = registry.get_pipeline(p1).unwrap();
        assert_eq!(p0.block_count(), 2);
        assert_eq!(p0.cooked_params.len(), 2 * 16);
        assert_eq!(p1.block_count(), 1);
        assert_eq!(p1.cooked_params.len(), 16);
    }

    #[test]
    fn test_cross_references_resolve_in_any_order() {
        let builder = RegistryBuilder::new();
        let main = builder.register_pipeline("main").unwrap();
        let shadow = builder.register_pipeline("shadow").unwrap();
        let prepass = builder.register_pipeline("prepass").unwrap();

        builder
            .define_pipeline(
                "main",
                Some("shadow"),
                Some("prepass"),
                PipelineDefinition::new(PipelineHandle(1), CameraType::MainView),
            )
            .unwrap();
        builder
            .define_pipeline("shadow", None, None, PipelineDefinition::new(PipelineHandle(2), CameraType::ShadowView))
            .unwrap();
        builder
            .define_pipeline("prepass", None, None, PipelineDefinition::new(PipelineHandle(3), CameraType::MainView))
            .unwrap();

        let registry = builder.finalize(limits()).unwrap();
        let main = registry.get_pipeline(main).unwrap();
        assert_eq!(main.shadow_pipeline, Some(shadow));
        assert_eq!(main.z_prepass_pipeline, Some(prepass));
        assert_eq!(registry.get_pipeline(shadow).unwrap().camera_type, CameraType::ShadowView);
    }

    #[test]
    fn test_undefined_cross_reference_fails_cook() {
        let builder = RegistryBuilder::new();
        builder.register_pipeline("main").unwrap();
        builder
            .define_pipeline("main", Some("missing"), None, PipelineDefinition::new(PipelineHandle(1), CameraType::MainView))
            .unwrap();

        let err = builder.finalize(limits()).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownName { kind: "pipeline", ref name } if name == "missing"));
    }

    #[test]
    fn test_registered_but_undefined_pipeline_fails_cook() {
        let builder = RegistryBuilder::new();
        builder.register_pipeline("orphan").unwrap();
        assert!(matches!(builder.finalize(limits()), Err(RegistryError::UndefinedPipeline(_))));
    }

    #[test]
    fn test_duplicate_and_unknown_names() {
        let builder = RegistryBuilder::new();
        builder.register_pipeline("p").unwrap();
        assert!(matches!(builder.register_pipeline("p"), Err(RegistryError::DuplicateName { .. })));
        assert!(matches!(builder.register_pipeline(""), Err(RegistryError::EmptyName { .. })));
        assert!(matches!(
            builder.define_pipeline("nope", None, None, PipelineDefinition::new(PipelineHandle(1), CameraType::MainView)),
            Err(RegistryError::UnknownName { .. })
        ));
        assert!(builder.material_idx("nope").is_err());
    }

    #[test]
    fn test_parameter_values_are_packed() {
        let builder = RegistryBuilder::new();
        let p = builder.register_pipeline("lit").unwrap();
        builder
            .define_pipeline(
                "lit",
                None,
                None,
                PipelineDefinition::new(PipelineHandle(1), CameraType::MainView)
                    .with_param("roughness", ParamType::Float)
                    .with_param("albedo", ParamType::TextureName),
            )
            .unwrap();
        builder.register_texture_name("dirt").unwrap();
        builder.register_texture_name("grass").unwrap();

        let m = builder
            .register_material(
                "turf",
                MaterialDefinition::new(p)
                    .with_param("albedo", ParamValue::TextureName("grass".to_string()))
                    .with_param("roughness", ParamValue::Float(0.5)),
            )
            .unwrap();

        let registry = builder.finalize(limits()).unwrap();
        let pipeline = registry.get_pipeline(p).unwrap();
        let block = pipeline.block(registry.get_material(m).unwrap().cooked_local_idx).unwrap();
        assert_eq!(block.len(), 16);
        assert_eq!(f32::from_ne_bytes(block[0..4].try_into().unwrap()), 0.5);
        assert_eq!(u32::from_ne_bytes(block[4..8].try_into().unwrap()), 1);
    }

    #[test]
    fn test_bad_parameter_values_fail_cook() {
        let make = |value: ParamValue, param: &str| {
            let builder = RegistryBuilder::new();
            let p = builder.register_pipeline("p").unwrap();
            builder
                .define_pipeline(
                    "p",
                    None,
                    None,
                    PipelineDefinition::new(PipelineHandle(1), CameraType::MainView)
                        .with_param("tex", ParamType::TextureName)
                        .with_param("scale", ParamType::Float),
                )
                .unwrap();
            builder
                .register_material("m", MaterialDefinition::new(p).with_param(param, value))
                .unwrap();
            builder.finalize(limits()).unwrap_err()
        };

        assert!(matches!(make(ParamValue::Int(3), "scale"), RegistryError::ParamTypeMismatch { .. }));
        assert!(matches!(make(ParamValue::Float(1.0), "gloss"), RegistryError::UnknownParam { .. }));
        assert!(matches!(
            make(ParamValue::TextureName("nowhere".to_string()), "tex"),
            RegistryError::UnknownTexture { .. }
        ));
    }

    #[test]
    fn test_material_set_indices_checked() {
        let builder = RegistryBuilder::new();
        let p = define_simple(&builder, "p", 1);
        let m = builder.register_material("m", MaterialDefinition::new(p)).unwrap();
        builder.register_material_set("ok", vec![m, m]).unwrap();
        builder.register_material_set("bad", vec![m, 9]).unwrap();

        let err = builder.finalize(limits()).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownMaterialIndex { material_idx: 9, .. }));
    }

    #[test]
    fn test_concurrent_material_registration() {
        let builder = std::sync::Arc::new(RegistryBuilder::new());
        let p = define_simple(&builder, "p", 1);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let builder = std::sync::Arc::clone(&builder);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        builder
                            .register_material(&format!("m{}_{}", t, i), MaterialDefinition::new(p))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let builder = std::sync::Arc::try_unwrap(builder).unwrap();
        let registry = builder.finalize(limits()).unwrap();
        assert_eq!(registry.material_count(), 100);

        let mut locals: Vec<u32> = (0..100).map(|i| registry.get_material(i).unwrap().cooked_local_idx).collect();
        locals.sort_unstable();
        assert_eq!(locals, (0..100).collect::<Vec<u32>>());
        assert_eq!(registry.material_idx("m3_24").map(|i| registry.get_material(i).unwrap().name.clone()), Some("m3_24".to_string()));
    }

    #[test]
    fn test_cook_and_upload_creates_one_buffer_per_pipeline() {
        use crate::render::backends::headless::{HeadlessConfig, HeadlessDevice};

        let mut device = HeadlessDevice::new(HeadlessConfig::default()).unwrap();
        let inspect = device.handle();

        let builder = RegistryBuilder::new();
        let p0 = define_simple(&builder, "p0", 1);
        let bare = builder.register_pipeline("bare").unwrap();
        builder
            .define_pipeline("bare", None, None, PipelineDefinition::new(PipelineHandle(2), CameraType::MainView))
            .unwrap();
        builder.register_material("A", MaterialDefinition::new(p0)).unwrap();
        builder.register_material("B", MaterialDefinition::new(bare)).unwrap();

        let registry = builder.cook_and_upload(&mut device).unwrap();
        let buffer = registry.get_pipeline(p0).unwrap().params_buffer.unwrap();
        // Default limits align blocks to 256 bytes.
        assert_eq!(inspect.buffer_contents(buffer).unwrap().len(), 256);
        assert_eq!(inspect.buffer_usage(buffer), Some(BufferUsage::STORAGE));
        assert!(registry.get_pipeline(bare).unwrap().params_buffer.is_none());
    }
}
