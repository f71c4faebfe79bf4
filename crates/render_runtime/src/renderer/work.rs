//! Stage work of the renderer
//!
//! [`RendererCore`] is the [`StageWork`] driven by the lifecycle controller. All mutable
//! renderer state lives in one [`CoreState`] behind a mutex; units never overlap, so the
//! lock is only contended by facade calls from other threads.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use super::loader::{AssetLoader, InstanceRequest, LoadContext};
use super::{RendererError, RendererResult};
use crate::core::{CameraConfig, RendererConfig};
use crate::foundation::math::Mat4Ext;
use crate::foundation::sync::lock;
use crate::lifecycle::StageWork;
use crate::render::api::{FrameCommand, GpuDevice};
use crate::render::frame::{AcquireOutcome, FrameSyncManager};
use crate::render::primitives::{CameraCache, CameraRigController, RigInput};
use crate::render::resources::geo::{GeoBucketer, ModelCatalog, PerFrameGeoBuffer};
use crate::render::resources::materials::{MaterialRegistry, RegistryBuilder};

/// Everything the units mutate
pub(crate) struct CoreState<D: GpuDevice, L> {
    pub(crate) device: Option<D>,
    pub(crate) loader: L,
    pub(crate) frames: Option<FrameSyncManager<D>>,
    pub(crate) registry: Option<MaterialRegistry>,
    pub(crate) models: ModelCatalog,
    pub(crate) bucketer: GeoBucketer,
    pub(crate) per_frame: Vec<PerFrameGeoBuffer>,
    pub(crate) camera: CameraCache,
    pub(crate) rig: CameraRigController,
    pub(crate) rig_input: RigInput,
    pub(crate) pending_extent: Option<(u32, u32)>,
    last_update: Option<Instant>,
}

impl<D: GpuDevice, L> CoreState<D, L> {
    pub(crate) fn new(device: D, loader: L, config: &RendererConfig, rig: CameraRigController) -> Self {
        Self {
            device: Some(device),
            loader,
            frames: None,
            registry: None,
            models: ModelCatalog::new(),
            bucketer: GeoBucketer::new(config.geo_instance_capacity),
            per_frame: Vec::new(),
            camera: CameraCache::new(),
            rig,
            rig_input: RigInput::default(),
            pending_extent: None,
            last_update: None,
        }
    }
}

/// Renderer stage work
pub struct RendererCore<D: GpuDevice, L> {
    config: RendererConfig,
    camera_config: CameraConfig,
    pub(crate) state: Mutex<CoreState<D, L>>,
    close_requested: AtomicBool,
    frame_number: AtomicU64,
}

impl<D: GpuDevice, L: AssetLoader<D>> RendererCore<D, L> {
    pub(crate) fn new(config: RendererConfig, camera_config: CameraConfig, state: CoreState<D, L>) -> Self {
        Self {
            config,
            camera_config,
            state: Mutex::new(state),
            close_requested: AtomicBool::new(false),
            frame_number: AtomicU64::new(0),
        }
    }

    pub(crate) fn request_close(&self) {
        self.close_requested.store(true, Ordering::Release);
    }

    pub(crate) fn frame_number(&self) -> u64 {
        self.frame_number.load(Ordering::Acquire)
    }

    fn build_inner(&self, state: &mut CoreState<D, L>) -> RendererResult<()> {
        let CoreState {
            device,
            loader,
            frames,
            registry,
            models,
            bucketer,
            per_frame,
            camera,
            rig,
            ..
        } = state;
        let device = device.as_mut().ok_or(RendererError::DeviceReleased)?;

        *frames = Some(FrameSyncManager::new(
            device,
            self.config.frames_in_flight,
            self.config.fence_timeout(),
            self.config.acquire_timeout(),
        )?);
        *per_frame = (0..self.config.frames_in_flight)
            .map(|_| PerFrameGeoBuffer::new(self.config.instance_buffer_growth, self.config.count_buffer_growth))
            .collect();

        let (width, height) = device.extent();
        camera.set_aspect_ratio(width, height);
        camera.apply_config(&self.camera_config);
        rig.start(camera);

        let builder = RegistryBuilder::new();
        let mut requests: Vec<InstanceRequest> = Vec::new();
        loader.load_assets(&mut LoadContext::new(device, &builder, models, &mut requests))?;

        let cooked = builder.cook_and_upload(device)?;
        models.upload_indices(device)?;

        for request in &requests {
            bucketer.register(request.resolve(models, &cooked)?)?;
        }
        log::info!(
            "Renderer built: {} pipelines, {} materials, {} models, {} instances",
            cooked.pipeline_count(),
            cooked.material_count(),
            models.model_count(),
            bucketer.unique_instance_count()
        );
        *registry = Some(cooked);
        Ok(())
    }

    fn update_inner(&self, state: &mut CoreState<D, L>) -> RendererResult<()> {
        let now = Instant::now();
        let delta_time = state.last_update.map_or(0.0, |last| (now - last).as_secs_f32());
        state.last_update = Some(now);

        let input = std::mem::take(&mut state.rig_input);
        state.rig.update(delta_time, &input, &mut state.camera);

        let registry = state.registry.as_ref().ok_or(RendererError::NotBuilt)?;
        state.bucketer.rebuild_bucketed_lists(&state.models, registry, &mut state.per_frame)?;
        Ok(())
    }

    fn render_inner(&self, state: &mut CoreState<D, L>) -> RendererResult<()> {
        let CoreState {
            device,
            frames,
            registry,
            models,
            bucketer,
            per_frame,
            camera,
            pending_extent,
            ..
        } = state;
        let device = device.as_mut().ok_or(RendererError::DeviceReleased)?;
        let frames = frames.as_mut().ok_or(RendererError::NotBuilt)?;
        let registry = registry.as_ref().ok_or(RendererError::NotBuilt)?;

        if let Some((width, height)) = pending_extent.take() {
            if width == 0 || height == 0 {
                // Minimized; keep the request until the surface has an area again.
                *pending_extent = Some((width, height));
                return Ok(());
            }
            frames.resume(device, (width, height))?;
            camera.set_aspect_ratio(width, height);
        }

        let handle = match frames.acquire_frame(device)? {
            AcquireOutcome::Frame(handle) => handle,
            AcquireOutcome::Paused => return Ok(()),
        };

        // Instances registered or removed since the update unit must be bucketed before
        // any slot cooks from the buckets.
        if bucketer.needs_rebucket() {
            bucketer.rebuild_bucketed_lists(models, registry, per_frame)?;
        }
        let geo = per_frame.get_mut(handle.slot()).ok_or(RendererError::NotBuilt)?;
        geo.upload_changed(device, bucketer, models)?;

        let matrices = camera.fetch_matrices();
        let mut commands = vec![
            FrameCommand::Clear {
                color: self.config.clear_color,
            },
            FrameCommand::SetCamera {
                projection_view: matrices.projection_view.to_cols_array(),
            },
        ];

        if let (Some(index_buffer), Some(buffers)) = (models.index_buffer(), geo.gpu_buffers()) {
            commands.push(FrameCommand::BindIndexBuffer { buffer: index_buffer });
            commands.push(FrameCommand::BindInstanceData {
                buffer: buffers.instance_data,
            });
            for group in bucketer.render_groups() {
                let pipeline = registry
                    .get_pipeline(group.pipeline_idx)
                    .ok_or_else(|| RendererError::UnknownAsset(format!("pipeline {}", group.pipeline_idx)))?;
                commands.push(FrameCommand::DrawIndexedIndirect {
                    pipeline: pipeline.handle,
                    commands: buffers.indirect_commands,
                    first_command: group.base_primitive_idx,
                    command_count: group.primitive_count,
                });
            }
        }

        frames.submit_and_present(device, handle, &commands)?;
        self.frame_number.store(frames.frame_counter(), Ordering::Release);
        Ok(())
    }

    fn teardown_inner(&self, state: &mut CoreState<D, L>) -> RendererResult<()> {
        state.rig.shutdown();

        let Some(mut device) = state.device.take() else {
            return Ok(());
        };

        let idle = device.wait_idle();
        for buffer in &mut state.per_frame {
            buffer.release(&mut device);
        }
        state.per_frame.clear();
        state.models.release(&mut device);
        if let Some(mut registry) = state.registry.take() {
            registry.release(&mut device);
        }
        let frames = match state.frames.take() {
            Some(mut frames) => frames.release(&mut device).map_err(RendererError::from),
            None => Ok(()),
        };
        drop(device);

        idle?;
        frames
    }
}

impl<D: GpuDevice, L: AssetLoader<D>> StageWork for RendererCore<D, L> {
    type Error = RendererError;

    fn build(&self) -> RendererResult<()> {
        self.build_inner(&mut lock(&self.state))
    }

    fn update_data(&self) -> RendererResult<()> {
        self.update_inner(&mut lock(&self.state))
    }

    fn render(&self) -> RendererResult<()> {
        self.render_inner(&mut lock(&self.state))
    }

    fn teardown(&self) -> RendererResult<()> {
        self.teardown_inner(&mut lock(&self.state))
    }

    fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Acquire)
    }
}
