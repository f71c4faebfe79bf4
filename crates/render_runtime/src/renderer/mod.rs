//! # Renderer
//!
//! The renderer facade: a [`LifecycleController`] around [`RendererCore`], plus the calls
//! the window, camera and gameplay collaborators make from their own threads.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use render_runtime::core::ApplicationConfig;
//! use render_runtime::lifecycle::{run_inline, JobSource};
//! use render_runtime::render::backends::headless::{HeadlessConfig, HeadlessDevice};
//! use render_runtime::render::primitives::NoCursor;
//! use render_runtime::renderer::{EmptyLoader, Renderer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let device = HeadlessDevice::new(HeadlessConfig::default())?;
//! let renderer = Renderer::new(device, EmptyLoader, &ApplicationConfig::default(), Box::new(NoCursor))?;
//! renderer.request_shutdown();
//! let errors = run_inline(&renderer, 16);
//! assert!(errors.is_empty() && renderer.is_finished_shutdown());
//! # Ok(())
//! # }
//! ```

pub mod instance_guard;
pub mod loader;
pub mod work;

pub use work::RendererCore;
pub use instance_guard::InstanceGuard;
pub use loader::{AssetLoader, EmptyLoader, InstanceRequest, LoadContext};

use thiserror::Error;

use crate::core::{ApplicationConfig, ConfigError};
use crate::foundation::math::Mat4;
use crate::foundation::sync::lock;
use crate::lifecycle::{JobError, JobSource, LifecycleController, NextJobs, Stage};
use crate::render::api::{GpuDevice, GpuError};
use crate::render::frame::FrameError;
use crate::render::primitives::{CameraRigController, CameraRigKind, CameraSnapshot, CursorControl, RigInput};
use crate::render::resources::geo::{GeoError, GeoInstanceKey, GeoRenderPass};
use crate::render::resources::materials::RegistryError;

use self::work::CoreState;

/// Renderer errors
#[derive(Debug, Error)]
pub enum RendererError {
    /// Another renderer is alive in this process
    #[error("A renderer instance is already running")]
    AlreadyRunning,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Frame synchronization failed
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// A device call failed
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    /// Pipeline or material registration failed
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Geometry bookkeeping failed
    #[error("Geometry error: {0}")]
    Geo(#[from] GeoError),

    /// A name did not resolve to a loaded asset
    #[error("Unknown asset: {0}")]
    UnknownAsset(String),

    /// The call needs the build unit to have completed
    #[error("Renderer has not been built")]
    NotBuilt,

    /// The device has been released by teardown
    #[error("Renderer device has been released")]
    DeviceReleased,
}

/// Result type for renderer operations
pub type RendererResult<T> = Result<T, RendererError>;

/// The renderer
///
/// Poll it as a [`JobSource`] from a scheduler. Every other method may be called from
/// any thread at any time.
pub struct Renderer<D: GpuDevice, L: AssetLoader<D>> {
    controller: LifecycleController<RendererCore<D, L>>,
    _guard: InstanceGuard,
}

impl<D: GpuDevice, L: AssetLoader<D>> Renderer<D, L> {
    /// Create the renderer around an opened device
    ///
    /// Fails with [`RendererError::AlreadyRunning`] while another renderer is alive.
    pub fn new(
        device: D,
        loader: L,
        config: &ApplicationConfig,
        cursor: Box<dyn CursorControl>,
    ) -> RendererResult<Self> {
        config.validate()?;
        let guard = InstanceGuard::acquire()?;

        let rig = CameraRigController::new(config.camera.rig, cursor);
        let state = CoreState::new(device, loader, &config.renderer, rig);
        let core = RendererCore::new(config.renderer.clone(), config.camera.clone(), state);

        log::info!("Renderer created for '{}'", config.renderer.application_name);
        Ok(Self {
            controller: LifecycleController::new(core),
            _guard: guard,
        })
    }

    fn core(&self) -> &RendererCore<D, L> {
        self.controller.work()
    }

    /// Stage the next poll will hand out
    pub fn stage(&self) -> Stage {
        self.controller.stage()
    }

    /// Wind down after the current frame
    pub fn request_shutdown(&self) {
        self.controller.request_shutdown();
    }

    /// The window asked to close
    pub fn request_close(&self) {
        self.core().request_close();
    }

    /// Whether teardown has completed
    pub fn is_finished_shutdown(&self) -> bool {
        self.controller.is_finished_shutdown()
    }

    /// First unit failure, if any
    pub fn fault(&self) -> Option<JobError> {
        self.controller.fault()
    }

    /// Number of frames submitted
    pub fn frame_number(&self) -> u64 {
        self.core().frame_number()
    }

    /// Whether frame acquisition is paused on a stale surface
    pub fn is_paused(&self) -> bool {
        lock(&self.core().state).frames.as_ref().is_some_and(|f| f.is_paused())
    }

    /// The surface was resized; the swapchain is rebuilt by the next render unit
    pub fn notify_resized(&self, width: u32, height: u32) {
        lock(&self.core().state).pending_extent = Some((width, height));
    }

    /// The surface is usable again after being stale or minimized
    pub fn notify_restored(&self, width: u32, height: u32) {
        self.notify_resized(width, height);
    }

    /// Register a geometry instance by model and material set name
    pub fn create_geo_instance(
        &self,
        model: &str,
        material_set: &str,
        render_pass: GeoRenderPass,
        shadow_caster: bool,
    ) -> RendererResult<GeoInstanceKey> {
        let mut state = lock(&self.core().state);
        let state = &mut *state;
        let registry = state.registry.as_ref().ok_or(RendererError::NotBuilt)?;
        let request = InstanceRequest {
            model: model.to_string(),
            material_set: material_set.to_string(),
            render_pass,
            shadow_caster,
        };
        let instance = request.resolve(&state.models, registry)?;
        Ok(state.bucketer.register(instance)?)
    }

    /// Remove a geometry instance
    pub fn destroy_geo_instance(&self, key: GeoInstanceKey) -> RendererResult<()> {
        lock(&self.core().state).bucketer.unregister(key)?;
        Ok(())
    }

    /// Move a geometry instance
    pub fn set_geo_instance_transform(&self, key: GeoInstanceKey, transform: &Mat4) -> RendererResult<()> {
        lock(&self.core().state).bucketer.set_transform(key, transform)?;
        Ok(())
    }

    /// Number of live geometry instances
    pub fn geo_instance_count(&self) -> usize {
        lock(&self.core().state).bucketer.unique_instance_count()
    }

    /// Camera properties for display
    pub fn camera_snapshot(&self) -> CameraSnapshot {
        lock(&self.core().state).camera.snapshot()
    }

    /// Apply edited camera properties
    pub fn apply_camera_snapshot(&self, snapshot: &CameraSnapshot) {
        lock(&self.core().state).camera.apply_snapshot(snapshot);
    }

    /// Switch camera rig
    pub fn set_camera_rig(&self, kind: CameraRigKind) {
        let mut state = lock(&self.core().state);
        let state = &mut *state;
        state.rig.set_rig_kind(kind, &mut state.camera);
    }

    /// Active camera rig
    pub fn camera_rig(&self) -> CameraRigKind {
        lock(&self.core().state).rig.rig().kind()
    }

    /// Input for the next update unit; movement replaces, look deltas accumulate
    pub fn submit_rig_input(&self, input: RigInput) {
        let mut state = lock(&self.core().state);
        let pending = &mut state.rig_input;
        pending.movement = input.movement;
        pending.look_delta += input.look_delta;
        pending.boost = input.boost;
    }
}

impl<D: GpuDevice, L: AssetLoader<D>> JobSource for Renderer<D, L> {
    fn fetch_next_jobs(&self) -> NextJobs {
        self.controller.fetch_next_jobs()
    }
}

impl<D: GpuDevice, L: AssetLoader<D>> std::fmt::Debug for Renderer<D, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer").field("controller", &self.controller).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::instance_guard::TEST_SLOT_LOCK;
    use super::*;
    use crate::lifecycle::run_inline;
    use crate::render::api::{FrameCommand, GraphicsPipelineDesc};
    use crate::render::backends::headless::{HeadlessConfig, HeadlessDevice, HeadlessHandle};
    use crate::render::primitives::NoCursor;
    use crate::render::resources::materials::{CameraType, MaterialDefinition, ParamType, ParamValue, PipelineDefinition};

    struct CubeLoader;

    impl AssetLoader<HeadlessDevice> for CubeLoader {
        fn load_assets(&mut self, ctx: &mut LoadContext<'_, HeadlessDevice>) -> RendererResult<()> {
            let handle = ctx.device.create_pipeline(&GraphicsPipelineDesc {
                name: "lit".to_string(),
                vertex_spirv: vec![0; 16],
                fragment_spirv: Some(vec![0; 16]),
                cull_back_faces: true,
                alpha_blend: false,
            })?;
            let pipeline = ctx.registry.register_pipeline("lit")?;
            ctx.registry.define_pipeline(
                "lit",
                None,
                None,
                PipelineDefinition::new(handle, CameraType::MainView).with_param("tint", ParamType::Vec4),
            )?;
            let material = ctx.registry.register_material(
                "red",
                MaterialDefinition::new(pipeline).with_param("tint", ParamValue::Vec4([1.0, 0.0, 0.0, 1.0])),
            )?;
            ctx.registry.register_material_set("cube", vec![material])?;
            ctx.registry.register_material_set("pair", vec![material, material])?;
            ctx.models.register_indexed_model("cube", &[vec![0, 1, 2, 2, 3, 0]], [0.0, 0.0, 0.0, 1.0])?;
            ctx.create_geo_instance("cube", "cube", GeoRenderPass::Opaque, true);
            Ok(())
        }
    }

    fn renderer() -> (Renderer<HeadlessDevice, CubeLoader>, HeadlessHandle) {
        let device = HeadlessDevice::new(HeadlessConfig::default()).unwrap();
        let inspect = device.handle();
        let renderer = Renderer::new(device, CubeLoader, &ApplicationConfig::default(), Box::new(NoCursor)).unwrap();
        (renderer, inspect)
    }

    fn poll_once(renderer: &Renderer<HeadlessDevice, CubeLoader>) -> Vec<JobError> {
        let mut errors = Vec::new();
        for job in renderer.fetch_next_jobs().jobs {
            if let Err(e) = job.execute() {
                errors.push(e);
            }
        }
        errors
    }

    #[test]
    fn test_second_renderer_fails() {
        let _serial = lock(&TEST_SLOT_LOCK);
        let (first, _inspect) = renderer();
        let device = HeadlessDevice::new(HeadlessConfig::default()).unwrap();
        let second = Renderer::new(device, EmptyLoader, &ApplicationConfig::default(), Box::new(NoCursor));
        assert!(matches!(second, Err(RendererError::AlreadyRunning)));
        drop(first);
    }

    #[test]
    fn test_frames_draw_loaded_geometry() {
        let _serial = lock(&TEST_SLOT_LOCK);
        let (renderer, inspect) = renderer();

        for _ in 0..7 {
            assert!(poll_once(&renderer).is_empty());
        }
        assert_eq!(renderer.frame_number(), 3);
        assert_eq!(renderer.geo_instance_count(), 1);

        let commands = inspect.recorded_commands(0);
        assert!(matches!(commands[0], FrameCommand::Clear { color } if color == [0.0, 0.5, 0.1, 1.0]));
        assert!(matches!(commands[1], FrameCommand::SetCamera { .. }));
        assert!(matches!(commands[2], FrameCommand::BindIndexBuffer { .. }));
        assert!(matches!(commands[3], FrameCommand::BindInstanceData { .. }));
        assert!(matches!(
            commands[4],
            FrameCommand::DrawIndexedIndirect { first_command: 0, command_count: 1, .. }
        ));

        renderer.request_close();
        assert!(run_inline(&renderer, 16).is_empty());
        assert!(renderer.is_finished_shutdown());
        assert_eq!(inspect.live_buffer_count(), 0);
    }

    #[test]
    fn test_instances_created_after_build() {
        let _serial = lock(&TEST_SLOT_LOCK);
        let (renderer, _inspect) = renderer();
        assert!(matches!(
            renderer.create_geo_instance("cube", "cube", GeoRenderPass::Opaque, true),
            Err(RendererError::NotBuilt)
        ));

        poll_once(&renderer);
        let key = renderer.create_geo_instance("cube", "cube", GeoRenderPass::Transparent, false).unwrap();
        assert!(matches!(
            renderer.create_geo_instance("sphere", "cube", GeoRenderPass::Opaque, true),
            Err(RendererError::UnknownAsset(_))
        ));
        renderer.set_geo_instance_transform(key, &Mat4::new_scaling(3.0)).unwrap();
        assert_eq!(renderer.geo_instance_count(), 2);
        renderer.destroy_geo_instance(key).unwrap();
        assert_eq!(renderer.geo_instance_count(), 1);

        renderer.request_shutdown();
        assert!(run_inline(&renderer, 16).is_empty());
    }

    #[test]
    fn test_instance_destroyed_between_update_and_render() {
        let _serial = lock(&TEST_SLOT_LOCK);
        let (renderer, inspect) = renderer();
        assert!(poll_once(&renderer).is_empty());

        let key = renderer.create_geo_instance("cube", "cube", GeoRenderPass::Opaque, true).unwrap();
        assert!(poll_once(&renderer).is_empty());
        renderer.destroy_geo_instance(key).unwrap();
        assert!(poll_once(&renderer).is_empty());

        assert!(renderer.fault().is_none());
        assert_eq!(renderer.frame_number(), 1);
        let commands = inspect.recorded_commands(0);
        assert!(matches!(
            commands.last(),
            Some(FrameCommand::DrawIndexedIndirect { first_command: 0, command_count: 1, .. })
        ));

        renderer.request_close();
        assert!(run_inline(&renderer, 16).is_empty());
    }

    #[test]
    fn test_mismatched_material_set_rejected_at_creation() {
        let _serial = lock(&TEST_SLOT_LOCK);
        let (renderer, _inspect) = renderer();
        assert!(poll_once(&renderer).is_empty());

        let result = renderer.create_geo_instance("cube", "pair", GeoRenderPass::Opaque, true);
        assert!(matches!(
            result,
            Err(RendererError::Geo(GeoError::PrimitiveMaterialMismatch { primitives: 1, materials: 2, .. }))
        ));
        assert_eq!(renderer.geo_instance_count(), 1);

        for _ in 0..4 {
            assert!(poll_once(&renderer).is_empty());
        }
        assert!(renderer.fault().is_none());
        assert_eq!(renderer.frame_number(), 2);

        renderer.request_close();
        assert!(run_inline(&renderer, 16).is_empty());
    }

    #[test]
    fn test_stale_surface_pauses_until_restored() {
        let _serial = lock(&TEST_SLOT_LOCK);
        let (renderer, inspect) = renderer();
        poll_once(&renderer);
        poll_once(&renderer);
        inspect.set_surface_out_of_date(true);
        poll_once(&renderer);
        assert!(renderer.is_paused());
        assert_eq!(renderer.frame_number(), 0);

        inspect.set_surface_out_of_date(false);
        renderer.notify_restored(800, 600);
        poll_once(&renderer);
        poll_once(&renderer);
        assert!(!renderer.is_paused());
        assert_eq!(renderer.frame_number(), 1);
        assert!((renderer.camera_snapshot().aspect_ratio - 800.0 / 600.0).abs() < 1e-6);

        renderer.request_shutdown();
        assert!(run_inline(&renderer, 16).is_empty());
    }

    #[test]
    fn test_camera_rig_switch() {
        let _serial = lock(&TEST_SLOT_LOCK);
        let (renderer, _inspect) = renderer();
        assert_eq!(renderer.camera_rig(), CameraRigKind::Fixed);
        renderer.set_camera_rig(CameraRigKind::Orbit);
        assert_eq!(renderer.camera_rig(), CameraRigKind::Orbit);
        renderer.request_shutdown();
        run_inline(&renderer, 16);
    }
}
