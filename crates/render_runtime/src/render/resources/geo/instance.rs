//! Geometry instances

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::foundation::math::Mat4;

slotmap::new_key_type! {
    /// Opaque handle to a registered geometry instance
    pub struct GeoInstanceKey;
}

/// Draw-ordering bucket for geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoRenderPass {
    /// Opaque geometry
    Opaque,
    /// Water surfaces; never casts shadows
    WaterTransparent,
    /// Other transparent geometry
    Transparent,
}

impl GeoRenderPass {
    /// Every pass in draw order
    pub const ALL: [Self; 3] = [Self::Opaque, Self::WaterTransparent, Self::Transparent];

    /// Position in [`GeoRenderPass::ALL`]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Visibility layer read by culling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum RenderLayer {
    /// Always visible
    #[default]
    Default = 0,
    /// Never drawn
    Invisible = 1,
    /// Visible only in the level editor
    LevelEditor = 2,
}

/// Per-instance data read by shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuGeoInstanceData {
    /// Model transform, column-major
    pub transform: [[f32; 4]; 4],
    /// Index into the bounding sphere buffer
    pub bounding_sphere_idx: u32,
    /// Material set used by this instance
    pub material_param_set_idx: u32,
    /// [`RenderLayer`] as u32
    pub render_layer: u32,
    /// Non-zero to skip culling
    pub never_cull: u32,
}

impl Default for GpuGeoInstanceData {
    fn default() -> Self {
        Self {
            transform: Mat4::identity().into(),
            bounding_sphere_idx: 0,
            material_param_set_idx: 0,
            render_layer: RenderLayer::Default as u32,
            never_cull: 0,
        }
    }
}

/// A placed model
#[derive(Debug, Clone, PartialEq)]
pub struct GeoInstance {
    model_idx: u32,
    render_pass: GeoRenderPass,
    is_shadow_caster: bool,
    /// Position of this instance in the per-frame instance buffer, assigned when cooked
    pub cooked_buffer_instance_id: u32,
    /// Data uploaded for this instance
    pub gpu_instance_data: GpuGeoInstanceData,
}

impl GeoInstance {
    /// Create an instance of `model_idx` drawn with `material_set_idx`
    ///
    /// Water is never a shadow caster regardless of `shadow_caster`.
    pub fn new(model_idx: u32, material_set_idx: u32, render_pass: GeoRenderPass, shadow_caster: bool) -> Self {
        Self {
            model_idx,
            render_pass,
            is_shadow_caster: shadow_caster && render_pass != GeoRenderPass::WaterTransparent,
            cooked_buffer_instance_id: 0,
            gpu_instance_data: GpuGeoInstanceData {
                bounding_sphere_idx: model_idx,
                material_param_set_idx: material_set_idx,
                ..GpuGeoInstanceData::default()
            },
        }
    }

    /// Set the initial transform
    pub fn with_transform(mut self, transform: &Mat4) -> Self {
        self.gpu_instance_data.transform = (*transform).into();
        self
    }

    /// Set the render layer
    pub fn with_render_layer(mut self, layer: RenderLayer) -> Self {
        self.gpu_instance_data.render_layer = layer as u32;
        self
    }

    /// Exclude the instance from culling
    pub fn with_never_cull(mut self, never_cull: bool) -> Self {
        self.gpu_instance_data.never_cull = u32::from(never_cull);
        self
    }

    /// Model drawn by this instance
    pub fn model_idx(&self) -> u32 {
        self.model_idx
    }

    /// Material set used by this instance
    pub fn material_set_idx(&self) -> u32 {
        self.gpu_instance_data.material_param_set_idx
    }

    /// Render pass this instance is drawn in
    pub fn render_pass(&self) -> GeoRenderPass {
        self.render_pass
    }

    /// Whether the instance is drawn into shadow maps
    pub fn is_shadow_caster(&self) -> bool {
        self.is_shadow_caster
    }

    /// Current transform
    pub fn transform(&self) -> Mat4 {
        Mat4::from(self.gpu_instance_data.transform)
    }

    pub(super) fn set_transform(&mut self, transform: &Mat4) {
        self.gpu_instance_data.transform = (*transform).into();
    }

    /// Re-apply registration rules
    pub(super) fn normalize(&mut self) {
        self.gpu_instance_data.bounding_sphere_idx = self.model_idx;
        if self.render_pass == GeoRenderPass::WaterTransparent {
            self.is_shadow_caster = false;
        }
    }
}
