//! # Application Configuration
//!
//! All runtime configuration for the renderer lives here: engine behaviour (logging),
//! the renderer core (frame pacing, timeouts, buffer growth), the initial camera, and the
//! presentation window. Every section deserializes with defaults, so a config file only
//! needs to name the values it overrides.

use serde::{Serialize, Deserialize};
use std::time::Duration;

use crate::render::primitives::CameraRigKind;

pub use crate::config::{Config, ConfigError};

/// Default number of frame slots in the submission ring
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// # Engine Configuration
///
/// Process-wide behaviour that is not specific to rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Log level filter passed to env_logger (`error`, `warn`, `info`, `debug`, `trace`)
    pub log_level: String,
    /// Number of worker threads the job scheduler should spin up
    pub worker_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            worker_threads: 2,
        }
    }
}

/// # Renderer Configuration
///
/// Settings for the renderer core and its GPU backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Number of frame slots (double buffering by default)
    pub frames_in_flight: usize,
    /// Upper bound for waiting on a frame slot's retirement fence
    pub fence_timeout_ms: u64,
    /// Upper bound for acquiring the next presentable image
    pub acquire_timeout_ms: u64,
    /// Color the draw target is cleared to at the start of every frame
    pub clear_color: [f32; 4],
    /// Whether to enable Vulkan validation layers (debug builds only)
    pub enable_validation: bool,
    /// Maximum number of live geometry instances
    pub geo_instance_capacity: usize,
    /// Element interval the per-frame instance and draw buffers grow by
    pub instance_buffer_growth: usize,
    /// Element interval the per-frame draw count buffer grows by
    pub count_buffer_growth: usize,
}

impl RendererConfig {
    /// Create a renderer configuration with defaults for the given application name
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            ..Self::default()
        }
    }

    /// Set the number of frames in flight
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Set both GPU wait timeouts
    pub fn with_timeouts(mut self, fence: Duration, acquire: Duration) -> Self {
        self.fence_timeout_ms = u64::try_from(fence.as_millis()).unwrap_or(u64::MAX);
        self.acquire_timeout_ms = u64::try_from(acquire.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = enabled;
        self
    }

    /// Fence wait timeout
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    /// Image acquire timeout
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }

        if !(1..=4).contains(&self.frames_in_flight) {
            return Err(ConfigError::Invalid(format!(
                "frames_in_flight must be between 1 and 4, got {}",
                self.frames_in_flight
            )));
        }

        if self.fence_timeout_ms == 0 || self.acquire_timeout_ms == 0 {
            return Err(ConfigError::Invalid("GPU wait timeouts must be non-zero".to_string()));
        }

        if self.geo_instance_capacity == 0 {
            return Err(ConfigError::Invalid("geo_instance_capacity must be non-zero".to_string()));
        }

        if self.instance_buffer_growth == 0 || self.count_buffer_growth == 0 {
            return Err(ConfigError::Invalid("Buffer growth intervals must be non-zero".to_string()));
        }

        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "render_runtime".to_string(),
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            fence_timeout_ms: 10_000,
            acquire_timeout_ms: 10_000,
            clear_color: [0.0, 0.5, 0.1, 1.0],
            enable_validation: cfg!(debug_assertions),
            geo_instance_capacity: 1024,
            instance_buffer_growth: 1024,
            count_buffer_growth: 32,
        }
    }
}

/// # Camera Configuration
///
/// Initial camera properties applied by the build unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Vertical field of view in degrees
    pub fov_deg: f32,
    /// Near clip plane
    pub near: f32,
    /// Far clip plane
    pub far: f32,
    /// Initial camera position
    pub position: [f32; 3],
    /// Initial pan (rotation about Y) in degrees
    pub pan_deg: f32,
    /// Initial tilt (rotation about X) in degrees
    pub tilt_deg: f32,
    /// Rig that drives the camera after build
    pub rig: CameraRigKind,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_deg: 70.0,
            near: 0.1,
            far: 1000.0,
            position: [0.0, 1.0, -5.0],
            pan_deg: 0.0,
            tilt_deg: -30.0,
            rig: CameraRigKind::Fixed,
        }
    }
}

impl CameraConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fov_deg > 0.0 && self.fov_deg < 180.0) {
            return Err(ConfigError::Invalid(format!("fov_deg out of range: {}", self.fov_deg)));
        }
        if !(self.near > 0.0 && self.far > self.near) {
            return Err(ConfigError::Invalid(format!(
                "near/far planes invalid: {} / {}",
                self.near, self.far
            )));
        }
        Ok(())
    }
}

/// # Window Configuration
///
/// Presentation surface settings consumed by the windowing collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Requested content width
    pub width: u32,
    /// Requested content height
    pub height: u32,
    /// Content width used when the requested size cannot be satisfied
    pub fallback_width: u32,
    /// Content height used when the requested size cannot be satisfied
    pub fallback_height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "render_runtime viewer".to_string(),
            width: 1920,
            height: 1080,
            fallback_width: 1280,
            fallback_height: 720,
        }
    }
}

/// # Application Configuration
///
/// Top-level configuration grouping every section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Engine configuration
    pub engine: EngineConfig,
    /// Renderer configuration
    pub renderer: RendererConfig,
    /// Initial camera configuration
    pub camera: CameraConfig,
    /// Window configuration
    pub window: WindowConfig,
}

impl Config for ApplicationConfig {}

impl ApplicationConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.renderer.validate()?;
        self.camera.validate()?;
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid("Window size must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ApplicationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.renderer.frames_in_flight, 2);
        assert_eq!(config.renderer.fence_timeout(), Duration::from_secs(10));
        assert_eq!(config.renderer.clear_color, [0.0, 0.5, 0.1, 1.0]);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ApplicationConfig::from_toml_str(
            r#"
            [renderer]
            frames_in_flight = 3

            [camera]
            fov_deg = 90.0
            rig = "orbit"
            "#,
        )
        .unwrap();

        assert_eq!(config.renderer.frames_in_flight, 3);
        assert_eq!(config.renderer.geo_instance_capacity, 1024);
        assert_eq!(config.camera.fov_deg, 90.0);
        assert_eq!(config.camera.rig, CameraRigKind::Orbit);
        assert_eq!(config.engine.log_level, "info");
    }

    #[test]
    fn test_ron_round_trip_through_file() {
        let path = std::env::temp_dir().join(format!("render_runtime_cfg_{}.ron", std::process::id()));
        let mut config = ApplicationConfig::default();
        config.window.title = "ron test".to_string();
        config.save_to_file(&path).unwrap();

        let loaded = ApplicationConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.window.title, "ron test");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_rejects_unknown_extension() {
        let err = ApplicationConfig::load_from_file("settings.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_invalid_frame_count() {
        let config = RendererConfig::default().with_frames_in_flight(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_camera_planes() {
        let config = CameraConfig { near: 10.0, far: 1.0, ..CameraConfig::default() };
        assert!(config.validate().is_err());
    }
}
