//! Material parameter types and block layout
//!
//! A pipeline declares an ordered list of typed parameters. Each material using that
//! pipeline is packed into one fixed-size block following std430 alignment rules, so a
//! shader can index the pipeline's parameter buffer by the material's local index.

use serde::{Deserialize, Serialize};

use crate::foundation::math::utils::align_up;

/// Blocks are always at least vec4 aligned
const MIN_BLOCK_ALIGNMENT: u64 = 16;

/// Semantic type of a material parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    /// 32-bit signed integer
    Int,
    /// 32-bit unsigned integer
    Uint,
    /// 32-bit float
    Float,
    /// Two signed integers
    IVec2,
    /// Three signed integers
    IVec3,
    /// Four signed integers
    IVec4,
    /// Two unsigned integers
    UVec2,
    /// Three unsigned integers
    UVec3,
    /// Four unsigned integers
    UVec4,
    /// Two floats
    Vec2,
    /// Three floats
    Vec3,
    /// Four floats
    Vec4,
    /// 3x3 float matrix, columns padded to vec4
    Mat3,
    /// 4x4 float matrix
    Mat4,
    /// Texture referenced by name; stored as a u32 texture index
    TextureName,
}

impl ParamType {
    /// Size of the packed value in bytes (including column padding for matrices)
    pub const fn size(self) -> u64 {
        match self {
            Self::Int | Self::Uint | Self::Float | Self::TextureName => 4,
            Self::IVec2 | Self::UVec2 | Self::Vec2 => 8,
            Self::IVec3 | Self::UVec3 | Self::Vec3 => 12,
            Self::IVec4 | Self::UVec4 | Self::Vec4 => 16,
            Self::Mat3 => 48,
            Self::Mat4 => 64,
        }
    }

    /// Required offset alignment in bytes
    pub const fn alignment(self) -> u64 {
        match self {
            Self::Int | Self::Uint | Self::Float | Self::TextureName => 4,
            Self::IVec2 | Self::UVec2 | Self::Vec2 => 8,
            _ => 16,
        }
    }
}

/// A parameter value supplied by a material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    /// Signed integer
    Int(i32),
    /// Unsigned integer
    Uint(u32),
    /// Float
    Float(f32),
    /// Signed integer vector
    IVec2([i32; 2]),
    /// Signed integer vector
    IVec3([i32; 3]),
    /// Signed integer vector
    IVec4([i32; 4]),
    /// Unsigned integer vector
    UVec2([u32; 2]),
    /// Unsigned integer vector
    UVec3([u32; 3]),
    /// Unsigned integer vector
    UVec4([u32; 4]),
    /// Float vector
    Vec2([f32; 2]),
    /// Float vector
    Vec3([f32; 3]),
    /// Float vector
    Vec4([f32; 4]),
    /// Column-major 3x3 matrix
    Mat3([[f32; 3]; 3]),
    /// Column-major 4x4 matrix
    Mat4([[f32; 4]; 4]),
    /// Name of a registered texture
    TextureName(String),
}

impl ParamValue {
    /// Semantic type of this value
    pub fn param_type(&self) -> ParamType {
        match self {
            Self::Int(_) => ParamType::Int,
            Self::Uint(_) => ParamType::Uint,
            Self::Float(_) => ParamType::Float,
            Self::IVec2(_) => ParamType::IVec2,
            Self::IVec3(_) => ParamType::IVec3,
            Self::IVec4(_) => ParamType::IVec4,
            Self::UVec2(_) => ParamType::UVec2,
            Self::UVec3(_) => ParamType::UVec3,
            Self::UVec4(_) => ParamType::UVec4,
            Self::Vec2(_) => ParamType::Vec2,
            Self::Vec3(_) => ParamType::Vec3,
            Self::Vec4(_) => ParamType::Vec4,
            Self::Mat3(_) => ParamType::Mat3,
            Self::Mat4(_) => ParamType::Mat4,
            Self::TextureName(_) => ParamType::TextureName,
        }
    }

    /// Write the value into `dst` at its packed layout
    ///
    /// `texture_index` resolves texture names; it is only called for
    /// [`ParamValue::TextureName`]. `dst` must be at least `param_type().size()` bytes.
    pub(crate) fn write_packed<E>(
        &self,
        dst: &mut [u8],
        texture_index: impl FnOnce(&str) -> Result<u32, E>,
    ) -> Result<(), E> {
        fn put<T: bytemuck::Pod>(dst: &mut [u8], offset: usize, value: &[T]) {
            let bytes: &[u8] = bytemuck::cast_slice(value);
            dst[offset..offset + bytes.len()].copy_from_slice(bytes);
        }

        match self {
            Self::Int(v) => put(dst, 0, &[*v]),
            Self::Uint(v) => put(dst, 0, &[*v]),
            Self::Float(v) => put(dst, 0, &[*v]),
            Self::IVec2(v) => put(dst, 0, v),
            Self::IVec3(v) => put(dst, 0, v),
            Self::IVec4(v) => put(dst, 0, v),
            Self::UVec2(v) => put(dst, 0, v),
            Self::UVec3(v) => put(dst, 0, v),
            Self::UVec4(v) => put(dst, 0, v),
            Self::Vec2(v) => put(dst, 0, v),
            Self::Vec3(v) => put(dst, 0, v),
            Self::Vec4(v) => put(dst, 0, v),
            Self::Mat3(columns) => {
                for (i, column) in columns.iter().enumerate() {
                    put(dst, i * 16, column);
                }
            }
            Self::Mat4(columns) => {
                for (i, column) in columns.iter().enumerate() {
                    put(dst, i * 16, column);
                }
            }
            Self::TextureName(name) => put(dst, 0, &[texture_index(name)?]),
        }
        Ok(())
    }
}

/// A parameter declared by a pipeline, with its computed place in the block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDefinition {
    /// Parameter name as materials refer to it
    pub name: String,
    /// Semantic type
    pub param_type: ParamType,
    /// Byte offset within the material block
    pub offset: u64,
    /// Size rounded up to the type's alignment
    pub padded_size: u64,
}

/// Computed layout of one pipeline's material block
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockLayout {
    /// Parameters in declaration order
    pub definitions: Vec<ParamDefinition>,
    /// Block stride: the packed size rounded up to 16 bytes and the device alignment
    pub block_size_padded: u64,
}

impl BlockLayout {
    /// Lay out `params` in order for a device requiring `device_alignment` between blocks
    ///
    /// An empty parameter list yields a zero-sized block.
    pub fn compute(params: &[(String, ParamType)], device_alignment: u64) -> Self {
        let mut cursor = 0;
        let definitions = params
            .iter()
            .map(|(name, param_type)| {
                let offset = align_up(cursor, param_type.alignment());
                let padded_size = align_up(param_type.size(), param_type.alignment());
                cursor = offset + padded_size;
                ParamDefinition {
                    name: name.clone(),
                    param_type: *param_type,
                    offset,
                    padded_size,
                }
            })
            .collect();

        let block_size_padded = if cursor == 0 {
            0
        } else {
            align_up(align_up(cursor, MIN_BLOCK_ALIGNMENT), device_alignment.max(1))
        };

        Self {
            definitions,
            block_size_padded,
        }
    }

    /// Look up a parameter by name
    pub fn definition(&self, name: &str) -> Option<&ParamDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(list: &[(&str, ParamType)]) -> Vec<(String, ParamType)> {
        list.iter().map(|(n, t)| ((*n).to_string(), *t)).collect()
    }

    #[test]
    fn test_layout_follows_alignment_rules() {
        let layout = BlockLayout::compute(
            &params(&[
                ("roughness", ParamType::Float),
                ("tint", ParamType::Vec3),
                ("uv_scale", ParamType::Vec2),
                ("albedo", ParamType::TextureName),
                ("model", ParamType::Mat4),
            ]),
            1,
        );

        let offsets: Vec<u64> = layout.definitions.iter().map(|d| d.offset).collect();
        assert_eq!(offsets, vec![0, 16, 32, 40, 48]);
        assert_eq!(layout.definitions[1].padded_size, 16);
        assert_eq!(layout.block_size_padded, 112);
    }

    #[test]
    fn test_block_size_respects_device_alignment() {
        let layout = BlockLayout::compute(&params(&[("metallic", ParamType::Float)]), 256);
        assert_eq!(layout.block_size_padded, 256);

        let empty = BlockLayout::compute(&[], 256);
        assert_eq!(empty.block_size_padded, 0);
    }

    #[test]
    fn test_mat3_columns_are_padded() {
        let value = ParamValue::Mat3([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);
        let mut dst = vec![0u8; 48];
        value.write_packed::<()>(&mut dst, |_| Ok(0)).unwrap();

        let floats: Vec<f32> = bytemuck::pod_collect_to_vec(&dst);
        assert_eq!(floats[0..3], [1.0, 2.0, 3.0]);
        assert_eq!(floats[3], 0.0);
        assert_eq!(floats[4..7], [4.0, 5.0, 6.0]);
        assert_eq!(floats[8..11], [7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_texture_name_resolves_through_table() {
        let value = ParamValue::TextureName("stone".to_string());
        let mut dst = vec![0u8; 4];
        value
            .write_packed::<()>(&mut dst, |name| if name == "stone" { Ok(7) } else { Err(()) })
            .unwrap();
        assert_eq!(u32::from_ne_bytes([dst[0], dst[1], dst[2], dst[3]]), 7);

        let missing = ParamValue::TextureName("moss".to_string());
        assert!(missing.write_packed::<()>(&mut dst, |_| Err(())).is_err());
    }
}
