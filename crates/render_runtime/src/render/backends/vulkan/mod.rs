//! Vulkan backend
//!
//! [`VulkanDevice`] implements [`GpuDevice`](crate::render::api::GpuDevice) with ash:
//! instance and device selection, a swapchain that is rebuilt on demand, per-slot
//! command buffers and synchronization objects, staged uploads for device-local data
//! and host-visible buffers for per-frame data. Windowing stays outside this crate;
//! the window owner implements [`SurfaceProvider`].

pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptors;
pub mod device;
pub mod pipeline;
pub mod swapchain;
pub mod sync;

use ash::vk;

use crate::render::api::GpuError;

pub use context::{PhysicalDeviceInfo, SurfaceProvider, VulkanContext, VulkanError, VulkanResult};
pub use device::{VulkanDevice, VulkanFrame};

impl From<VulkanError> for GpuError {
    fn from(error: VulkanError) -> Self {
        match error {
            VulkanError::Api(vk::Result::ERROR_DEVICE_LOST) => Self::DeviceLost,
            other => Self::Backend(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_maps_to_gpu_error() {
        assert!(matches!(
            GpuError::from(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST)),
            GpuError::DeviceLost
        ));
        assert!(matches!(
            GpuError::from(VulkanError::NoSuitableMemoryType),
            GpuError::Backend(message) if message.contains("memory type")
        ));
    }
}
