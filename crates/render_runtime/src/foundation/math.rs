//! Math utilities and types
//!
//! Thin aliases over nalgebra plus the few matrix helpers the renderer needs.

pub use nalgebra::{
    Vector2, Vector3, Vector4,
    Matrix3, Matrix4,
    Rotation3,
    Unit,
};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Math constants
pub mod constants {
    /// Pi constant
    pub const PI: f32 = std::f32::consts::PI;

    /// 2 * Pi
    pub const TAU: f32 = 2.0 * PI;

    /// Pi / 2
    pub const HALF_PI: f32 = PI * 0.5;

    /// Degrees to radians conversion factor
    pub const DEG_TO_RAD: f32 = PI / 180.0;

    /// Radians to degrees conversion factor
    pub const RAD_TO_DEG: f32 = 180.0 / PI;
}

/// Math utility functions
pub mod utils {
    use super::constants;

    /// Convert degrees to radians
    pub fn deg_to_rad(degrees: f32) -> f32 {
        degrees * constants::DEG_TO_RAD
    }

    /// Convert radians to degrees
    pub fn rad_to_deg(radians: f32) -> f32 {
        radians * constants::RAD_TO_DEG
    }

    /// Round `value` up to the next multiple of `alignment` (`alignment` of 0 or 1 is a no-op)
    pub const fn align_up(value: u64, alignment: u64) -> u64 {
        if alignment <= 1 {
            value
        } else {
            value.div_ceil(alignment) * alignment
        }
    }

    /// Round an element count up to the next multiple of `interval`, never returning 0 for a non-zero count
    pub const fn grow_to_interval(count: usize, interval: usize) -> usize {
        if interval == 0 {
            count
        } else {
            count.div_ceil(interval) * interval
        }
    }
}

/// Extension trait for Mat4 with renderer-specific constructors
pub trait Mat4Ext {
    /// Right-handed perspective projection with the Y axis flipped for Vulkan clip space
    fn perspective_y_flipped(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4;

    /// Right-handed look-at view matrix
    fn look_at(eye: &Vec3, target: &Vec3, up: &Vec3) -> Mat4;

    /// Column-major array layout as consumed by shaders
    fn to_cols_array(&self) -> [[f32; 4]; 4];
}

impl Mat4Ext for Mat4 {
    fn perspective_y_flipped(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        let mut projection = Mat4::new_perspective(aspect, fov_y, near, far);
        projection[(1, 1)] *= -1.0;
        projection
    }

    fn look_at(eye: &Vec3, target: &Vec3, up: &Vec3) -> Mat4 {
        Mat4::look_at_rh(&Point3::from(*eye), &Point3::from(*target), up)
    }

    fn to_cols_array(&self) -> [[f32; 4]; 4] {
        let mut out = [[0.0; 4]; 4];
        for (col, column) in out.iter_mut().enumerate() {
            for (row, value) in column.iter_mut().enumerate() {
                *value = self[(row, col)];
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_align_up() {
        assert_eq!(utils::align_up(0, 256), 0);
        assert_eq!(utils::align_up(1, 256), 256);
        assert_eq!(utils::align_up(256, 256), 256);
        assert_eq!(utils::align_up(257, 256), 512);
        assert_eq!(utils::align_up(13, 1), 13);
    }

    #[test]
    fn test_grow_to_interval() {
        assert_eq!(utils::grow_to_interval(0, 1024), 0);
        assert_eq!(utils::grow_to_interval(1, 1024), 1024);
        assert_eq!(utils::grow_to_interval(1025, 1024), 2048);
        assert_eq!(utils::grow_to_interval(33, 32), 64);
    }

    #[test]
    fn test_perspective_flips_y_only() {
        let regular = Mat4::new_perspective(1.5, utils::deg_to_rad(70.0), 0.1, 100.0);
        let flipped = Mat4::perspective_y_flipped(utils::deg_to_rad(70.0), 1.5, 0.1, 100.0);

        assert_relative_eq!(flipped[(1, 1)], -regular[(1, 1)]);
        assert_relative_eq!(flipped[(0, 0)], regular[(0, 0)]);
        assert_relative_eq!(flipped[(2, 2)], regular[(2, 2)]);
        assert_relative_eq!(flipped[(2, 3)], regular[(2, 3)]);
    }

    #[test]
    fn test_cols_array_is_column_major() {
        let m = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let cols = m.to_cols_array();
        assert_eq!(cols[3], [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(cols[0], [1.0, 0.0, 0.0, 0.0]);
    }
}
