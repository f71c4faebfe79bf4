//! # Core Module
//!
//! Shared configuration used by every renderer subsystem.

pub mod config;

pub use config::{
    ApplicationConfig,
    CameraConfig,
    Config,
    ConfigError,
    EngineConfig,
    RendererConfig,
    WindowConfig,
};
