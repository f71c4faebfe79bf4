//! Model catalog
//!
//! A model is a list of primitives, each an index range into one shared index buffer.
//! Vertex data is pulled by the shaders, so the catalog only tracks index ranges.

use std::collections::HashMap;

use super::{GeoError, GeoResult};
use crate::render::api::{BufferHandle, BufferUsage, GpuDevice, GpuResult};

/// An indexed draw range within the shared index buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Primitive {
    /// Number of indices
    pub index_count: u32,
    /// First index within the shared index buffer
    pub first_index: u32,
    /// Value added to each index before vertex lookup
    pub vertex_offset: i32,
}

/// A registered model
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    /// Registered name
    pub name: String,
    /// Primitives in material-set order
    pub primitives: Vec<Primitive>,
    /// Bounding sphere: origin in xyz, radius in w
    pub bounding_sphere: [f32; 4],
}

/// All models known to the renderer, plus the index data they share
#[derive(Debug, Default)]
pub struct ModelCatalog {
    models: Vec<Model>,
    names: HashMap<String, u32>,
    indices: Vec<u32>,
    index_buffer: Option<BufferHandle>,
}

impl ModelCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model whose primitives reference already appended indices
    pub fn register_model(
        &mut self,
        name: &str,
        primitives: Vec<Primitive>,
        bounding_sphere: [f32; 4],
    ) -> GeoResult<u32> {
        if self.names.contains_key(name) {
            return Err(GeoError::DuplicateModel(name.to_string()));
        }

        let idx = self.models.len() as u32;
        self.models.push(Model {
            name: name.to_string(),
            primitives,
            bounding_sphere,
        });
        self.names.insert(name.to_string(), idx);
        log::debug!("[GEO] Registered model '{}' as {}", name, idx);
        Ok(idx)
    }

    /// Register a model from per-primitive index lists, appending them to the shared indices
    pub fn register_indexed_model(
        &mut self,
        name: &str,
        primitive_indices: &[Vec<u32>],
        bounding_sphere: [f32; 4],
    ) -> GeoResult<u32> {
        if self.names.contains_key(name) {
            return Err(GeoError::DuplicateModel(name.to_string()));
        }

        let primitives = primitive_indices
            .iter()
            .map(|indices| {
                let primitive = Primitive {
                    index_count: indices.len() as u32,
                    first_index: self.indices.len() as u32,
                    vertex_offset: 0,
                };
                self.indices.extend_from_slice(indices);
                primitive
            })
            .collect();

        self.register_model(name, primitives, bounding_sphere)
    }

    /// Upload the shared index data to the device
    pub fn upload_indices<D: GpuDevice>(&mut self, device: &mut D) -> GpuResult<()> {
        if self.indices.is_empty() {
            return Ok(());
        }
        let buffer = device.upload_device_local(bytemuck::cast_slice(&self.indices), BufferUsage::INDEX)?;
        if let Some(old) = self.index_buffer.replace(buffer) {
            device.destroy_buffer(old);
        }
        Ok(())
    }

    /// Shared index buffer, once uploaded
    pub fn index_buffer(&self) -> Option<BufferHandle> {
        self.index_buffer
    }

    /// Model by index
    pub fn get_model(&self, idx: u32) -> Option<&Model> {
        self.models.get(idx as usize)
    }

    /// Resolve a model name
    pub fn model_idx(&self, name: &str) -> Option<u32> {
        self.names.get(name).copied()
    }

    /// Number of registered models
    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// Bounding spheres in model order, indexed by an instance's bounding sphere index
    pub fn bounding_spheres(&self) -> Vec<[f32; 4]> {
        self.models.iter().map(|m| m.bounding_sphere).collect()
    }

    /// Destroy the shared index buffer
    pub fn release<D: GpuDevice>(&mut self, device: &mut D) {
        if let Some(buffer) = self.index_buffer.take() {
            device.destroy_buffer(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{HeadlessConfig, HeadlessDevice};

    #[test]
    fn test_indexed_models_share_index_data() {
        let mut catalog = ModelCatalog::new();
        let quad = catalog
            .register_indexed_model("quad", &[vec![0, 1, 2, 2, 3, 0]], [0.0, 0.0, 0.0, 1.5])
            .unwrap();
        let pair = catalog
            .register_indexed_model("pair", &[vec![0, 1, 2], vec![3, 4, 5]], [0.0; 4])
            .unwrap();

        assert_eq!(catalog.model_idx("pair"), Some(pair));
        let pair = catalog.get_model(pair).unwrap();
        assert_eq!(pair.primitives[0].first_index, 6);
        assert_eq!(pair.primitives[1].first_index, 9);
        assert_eq!(pair.primitives[1].index_count, 3);
        assert_eq!(catalog.bounding_spheres()[quad as usize][3], 1.5);
    }

    #[test]
    fn test_duplicate_model_rejected() {
        let mut catalog = ModelCatalog::new();
        catalog.register_model("rock", vec![], [0.0; 4]).unwrap();
        assert!(matches!(
            catalog.register_model("rock", vec![], [0.0; 4]),
            Err(GeoError::DuplicateModel(_))
        ));
    }

    #[test]
    fn test_index_upload() {
        let mut device = HeadlessDevice::new(HeadlessConfig::default()).unwrap();
        let inspect = device.handle();
        let mut catalog = ModelCatalog::new();
        catalog.register_indexed_model("tri", &[vec![0, 1, 2]], [0.0; 4]).unwrap();

        catalog.upload_indices(&mut device).unwrap();
        let buffer = catalog.index_buffer().unwrap();
        assert_eq!(inspect.buffer_contents(buffer).unwrap().len(), 12);

        catalog.release(&mut device);
        assert_eq!(inspect.live_buffer_count(), 0);
    }
}
