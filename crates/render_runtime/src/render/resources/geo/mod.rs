//! Geometry instances and draw bucketing
//!
//! Models are registered once during loading. Geometry instances come and go at runtime;
//! the bucketer groups their primitives by render pass and pipeline, and each frame slot
//! cooks that grouping into the instance and indirect draw buffers it renders from.

pub mod model;
pub mod instance;
pub mod bucketer;
pub mod per_frame;

use thiserror::Error;

use crate::render::api::GpuError;

pub use model::{Model, ModelCatalog, Primitive};
pub use instance::{GeoInstance, GeoInstanceKey, GeoRenderPass, GpuGeoInstanceData, RenderLayer};
pub use bucketer::{GeoBucketer, InstancePrimitive, RenderGroup};
pub use per_frame::{PerFrameGeoBuffer, PerFrameGpuBuffers};

/// Geometry errors
#[derive(Error, Debug)]
pub enum GeoError {
    /// The key does not refer to a live instance
    #[error("Unknown geo instance key")]
    UnknownInstance,

    /// The instance pool is full
    #[error("Geo instance capacity of {capacity} reached")]
    CapacityExceeded {
        /// Configured capacity
        capacity: usize,
    },

    /// A model name or index that was never registered
    #[error("Unknown model '{0}'")]
    UnknownModel(String),

    /// A model name registered twice
    #[error("Duplicate model name '{0}'")]
    DuplicateModel(String),

    /// An instance refers to a material set that does not exist
    #[error("Unknown material set index {0}")]
    UnknownMaterialSet(u32),

    /// A material set refers to a material that does not exist
    #[error("Unknown material index {0}")]
    UnknownMaterial(u32),

    /// A model's primitive count differs from its material set's length
    #[error("Model '{model}' has {primitives} primitives but its material set has {materials} materials")]
    PrimitiveMaterialMismatch {
        /// Model name
        model: String,
        /// Number of model primitives
        primitives: usize,
        /// Number of materials in the set
        materials: usize,
    },

    /// Uploading per-frame data failed
    #[error("Upload failed: {0}")]
    Gpu(#[from] GpuError),
}

/// Result type for geometry operations
pub type GeoResult<T> = Result<T, GeoError>;
