//! Demo scene: a grid of spinning cubes
//!
//! The loader registers one pipeline, a few tinted materials and a cube model. Once the
//! renderer is built the scene creates the cube instances and animates their transforms
//! from the main thread.

use std::path::{Path, PathBuf};

use rand::Rng;

use render_runtime::foundation::math::{Mat4, Vec3};
use render_runtime::render::api::{GpuDevice, GraphicsPipelineDesc};
use render_runtime::render::resources::geo::{GeoInstanceKey, GeoRenderPass};
use render_runtime::render::resources::materials::{
    CameraType, MaterialDefinition, ParamType, ParamValue, PipelineDefinition,
};
use render_runtime::renderer::{AssetLoader, LoadContext, Renderer, RendererError, RendererResult};

/// Name of the registered cube model
pub const CUBE_MODEL: &str = "cube";

const TINTS: [(&str, [f32; 4]); 3] = [
    ("cube_red", [0.9, 0.2, 0.2, 1.0]),
    ("cube_green", [0.2, 0.9, 0.3, 1.0]),
    ("cube_blue", [0.2, 0.4, 0.9, 1.0]),
];

/// Where pipeline bytecode comes from
#[derive(Debug, Clone)]
pub enum ShaderSource {
    /// `instanced.vert.spv` and `instanced.frag.spv` in a directory
    Directory(PathBuf),
    /// Word-aligned filler accepted by the headless device
    Placeholder,
}

impl ShaderSource {
    fn load(&self, file_name: &str) -> RendererResult<Vec<u8>> {
        match self {
            Self::Directory(dir) => read_spirv(&dir.join(file_name)),
            Self::Placeholder => Ok(0x0723_0203_u32.to_le_bytes().repeat(5)),
        }
    }
}

fn read_spirv(path: &Path) -> RendererResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| RendererError::UnknownAsset(format!("shader '{}': {}", path.display(), e)))
}

/// Eight corners, twelve triangles; the vertex shader maps each index to a corner
pub fn cube_indices() -> Vec<u32> {
    vec![
        0, 1, 2, 2, 3, 0, // -z
        4, 6, 5, 6, 4, 7, // +z
        0, 3, 7, 7, 4, 0, // -x
        1, 5, 6, 6, 2, 1, // +x
        3, 2, 6, 6, 7, 3, // +y
        0, 4, 5, 5, 1, 0, // -y
    ]
}

/// Registers the demo's assets during the build unit
#[derive(Debug, Clone)]
pub struct DemoLoader {
    shaders: ShaderSource,
}

impl DemoLoader {
    /// Loader reading bytecode from `shaders`
    pub fn new(shaders: ShaderSource) -> Self {
        Self { shaders }
    }
}

impl<D: GpuDevice> AssetLoader<D> for DemoLoader {
    fn load_assets(&mut self, ctx: &mut LoadContext<'_, D>) -> RendererResult<()> {
        let desc = GraphicsPipelineDesc {
            name: "instanced".to_string(),
            vertex_spirv: self.shaders.load("instanced.vert.spv")?,
            fragment_spirv: Some(self.shaders.load("instanced.frag.spv")?),
            cull_back_faces: false,
            alpha_blend: false,
        };
        let handle = ctx.device.create_pipeline(&desc)?;

        let pipeline = ctx.registry.register_pipeline("instanced")?;
        ctx.registry.define_pipeline(
            "instanced",
            None,
            None,
            PipelineDefinition::new(handle, CameraType::MainView).with_param("tint", ParamType::Vec4),
        )?;

        for (name, tint) in TINTS {
            let material = ctx.registry.register_material(
                name,
                MaterialDefinition::new(pipeline).with_param("tint", ParamValue::Vec4(tint)),
            )?;
            ctx.registry.register_material_set(name, vec![material])?;
        }

        ctx.models
            .register_indexed_model(CUBE_MODEL, &[cube_indices()], [0.0, 0.0, 0.0, 0.87])?;

        log::info!("Demo assets registered");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Cube {
    key: GeoInstanceKey,
    position: Vec3,
    spin_rate: f32,
}

/// Cube instances laid out on a grid
#[derive(Debug, Default)]
pub struct DemoScene {
    cubes: Vec<Cube>,
    elapsed: f32,
}

impl DemoScene {
    /// Whether the instances exist yet
    pub fn is_populated(&self) -> bool {
        !self.cubes.is_empty()
    }

    /// Create a `side` x `side` grid of cubes; `NotBuilt` until the build unit has run
    pub fn populate<D: GpuDevice, L: AssetLoader<D>>(
        &mut self,
        renderer: &Renderer<D, L>,
        side: usize,
    ) -> RendererResult<()> {
        let mut rng = rand::thread_rng();
        let half = side as f32 * 0.5;
        for row in 0..side {
            for column in 0..side {
                let (material_set, _) = TINTS[(row + column) % TINTS.len()];
                let key = renderer.create_geo_instance(CUBE_MODEL, material_set, GeoRenderPass::Opaque, true)?;
                let position = Vec3::new((column as f32 - half) * 2.5, 0.0, (row as f32 - half) * 2.5);
                renderer.set_geo_instance_transform(key, &Mat4::new_translation(&position))?;
                self.cubes.push(Cube {
                    key,
                    position,
                    spin_rate: rng.gen_range(0.3..1.2),
                });
            }
        }
        log::info!("Demo scene populated with {} cubes", self.cubes.len());
        Ok(())
    }

    /// Spin every cube about its own vertical axis
    pub fn animate<D: GpuDevice, L: AssetLoader<D>>(&mut self, renderer: &Renderer<D, L>, dt: f32) -> RendererResult<()> {
        self.elapsed += dt;
        for cube in &self.cubes {
            let angle = self.elapsed * cube.spin_rate;
            let transform = Mat4::new_translation(&cube.position) * Mat4::from_euler_angles(0.0, angle, 0.0);
            renderer.set_geo_instance_transform(cube.key, &transform)?;
        }
        Ok(())
    }

    /// Remove every cube
    pub fn clear<D: GpuDevice, L: AssetLoader<D>>(&mut self, renderer: &Renderer<D, L>) {
        for cube in self.cubes.drain(..) {
            if let Err(e) = renderer.destroy_geo_instance(cube.key) {
                log::warn!("Failed to remove cube: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_indices_reference_eight_corners() {
        let indices = cube_indices();
        assert_eq!(indices.len(), 36);
        assert!(indices.iter().all(|&i| i < 8));
    }

    #[test]
    fn test_placeholder_spirv_is_word_aligned() {
        let bytes = ShaderSource::Placeholder.load("anything.spv").unwrap();
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(&bytes[..4], &0x0723_0203_u32.to_le_bytes());
    }

    #[test]
    fn test_missing_shader_is_unknown_asset() {
        let source = ShaderSource::Directory(PathBuf::from("/nonexistent/shaders"));
        assert!(matches!(source.load("instanced.vert.spv"), Err(RendererError::UnknownAsset(_))));
    }
}
