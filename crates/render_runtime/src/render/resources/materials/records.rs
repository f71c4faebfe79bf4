//! Pipeline, material and material set records

use serde::{Deserialize, Serialize};

use super::params::{BlockLayout, ParamType, ParamValue};
use crate::render::api::{BufferHandle, PipelineHandle};

/// Which camera a pipeline renders from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraType {
    /// The main view camera
    #[default]
    MainView,
    /// A shadow cascade camera
    ShadowView,
}

/// Pipeline definition supplied by the loader before cooking
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    /// Compiled device pipeline
    pub handle: PipelineHandle,
    /// Camera this pipeline renders from
    pub camera_type: CameraType,
    /// Ordered material parameters (name, type)
    pub params: Vec<(String, ParamType)>,
}

impl PipelineDefinition {
    /// Definition without material parameters
    pub fn new(handle: PipelineHandle, camera_type: CameraType) -> Self {
        Self {
            handle,
            camera_type,
            params: Vec::new(),
        }
    }

    /// Append a material parameter
    pub fn with_param(mut self, name: impl Into<String>, param_type: ParamType) -> Self {
        self.params.push((name.into(), param_type));
        self
    }
}

/// Cooked pipeline record, owned by the registry and referenced by index
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Registered name
    pub name: String,
    /// Compiled device pipeline
    pub handle: PipelineHandle,
    /// Pipeline used when this geometry casts shadows
    pub shadow_pipeline: Option<u32>,
    /// Early-depth pipeline run before this one
    pub z_prepass_pipeline: Option<u32>,
    /// Camera this pipeline renders from
    pub camera_type: CameraType,
    /// Material parameter layout
    pub layout: BlockLayout,
    /// Global indices of the materials using this pipeline, in local index order
    pub materials: Vec<u32>,
    /// Packed parameter blocks, one per material
    pub cooked_params: Vec<u8>,
    /// Device buffer holding `cooked_params` once uploaded
    pub params_buffer: Option<BufferHandle>,
}

impl Pipeline {
    /// Number of parameter blocks packed for this pipeline
    pub fn block_count(&self) -> usize {
        if self.layout.block_size_padded == 0 {
            0
        } else {
            self.materials.len()
        }
    }

    /// Bytes of the parameter block at `local_idx`
    pub fn block(&self, local_idx: u32) -> Option<&[u8]> {
        let stride = usize::try_from(self.layout.block_size_padded).ok()?;
        let start = usize::try_from(local_idx).ok()?.checked_mul(stride)?;
        self.cooked_params.get(start..start.checked_add(stride)?)
    }
}

/// Material supplied by the loader before cooking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialDefinition {
    /// Pipeline this material draws with
    pub pipeline_idx: u32,
    /// Named parameter values; parameters left out stay zeroed
    #[serde(default)]
    pub params: Vec<(String, ParamValue)>,
}

impl MaterialDefinition {
    /// Material without parameter values
    pub fn new(pipeline_idx: u32) -> Self {
        Self {
            pipeline_idx,
            params: Vec::new(),
        }
    }

    /// Set a parameter value
    pub fn with_param(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.params.push((name.into(), value));
        self
    }
}

/// Cooked material record
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    /// Registered name
    pub name: String,
    /// Pipeline this material draws with
    pub pipeline_idx: u32,
    /// Named parameter values
    pub params: Vec<(String, ParamValue)>,
    /// Index of this material's block within its pipeline's parameter buffer
    pub cooked_local_idx: u32,
}

/// Ordered material indices, one per model primitive
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MaterialSet {
    /// Global material indices
    pub material_indices: Vec<u32>,
}

impl MaterialSet {
    /// Build a set from material indices
    pub fn new(material_indices: Vec<u32>) -> Self {
        Self { material_indices }
    }
}
