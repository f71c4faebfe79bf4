//! Pipeline and material registry
//!
//! Pipelines and materials are registered during asset loading, cooked once into
//! per-pipeline parameter buffers, and then only read while rendering.

pub mod params;
pub mod records;
pub mod builder;
pub mod registry;

pub use params::{BlockLayout, ParamDefinition, ParamType, ParamValue};
pub use records::{
    CameraType, Material, MaterialDefinition, MaterialSet, Pipeline, PipelineDefinition,
};
pub use builder::{RegistryBuilder, RegistryError, RegistryResult};
pub use registry::MaterialRegistry;
