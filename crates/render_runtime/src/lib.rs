//! # Render Runtime
//!
//! Runtime core of a real-time Vulkan renderer.
//!
//! ## Features
//!
//! - **Lifecycle jobs**: build, update/render loop and teardown handed out as pollable
//!   units to an external scheduler
//! - **Frame pacing**: double-buffered frame slots with fence and semaphore discipline
//! - **Materials**: two-phase registry that packs material parameters into GPU blocks
//! - **Geometry**: instance bucketing by render pass and pipeline for indirect draws
//! - **Camera**: cached projection/view matrices and Fixed, Orbit and Freecam rigs
//! - **Backends**: Vulkan through ash, plus a headless device for tests and offscreen runs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_runtime::prelude::*;
//! use render_runtime::render::backends::headless::{HeadlessConfig, HeadlessDevice};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ApplicationConfig::default();
//!     let device = HeadlessDevice::new(HeadlessConfig::default())?;
//!     let renderer = Renderer::new(device, EmptyLoader, &config, Box::new(NoCursor))?;
//!
//!     renderer.request_close();
//!     let errors = run_inline(&renderer, 16);
//!     assert!(errors.is_empty());
//!     assert!(renderer.is_finished_shutdown());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod lifecycle;
pub mod render;
pub mod renderer;

pub use lifecycle::{Job, JobError, JobSource, NextJobs, Stage};
pub use renderer::{Renderer, RendererError, RendererResult};

/// Common imports for renderer users
pub mod prelude {
    pub use crate::{
        core::config::{ApplicationConfig, CameraConfig, Config, RendererConfig, WindowConfig},
        lifecycle::{run_inline, Job, JobError, JobSource, NextJobs, Stage},
        render::{
            api::{GpuDevice, GraphicsPipelineDesc},
            primitives::{CameraRigKind, CameraSnapshot, CursorControl, NoCursor, RigInput},
            resources::geo::GeoRenderPass,
        },
        renderer::{AssetLoader, EmptyLoader, LoadContext, Renderer, RendererError},
    };
}
