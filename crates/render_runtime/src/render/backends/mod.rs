//! GPU device implementations

/// Simulated device driven by a background thread
pub mod headless;
/// Vulkan device
pub mod vulkan;
