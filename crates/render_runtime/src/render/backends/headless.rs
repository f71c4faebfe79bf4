//! Headless GPU device
//!
//! Implements [`GpuDevice`] without a graphics API. Submissions are handed to a
//! simulated GPU thread that retires them in order after a configurable latency and then
//! signals the submitting slot's fence, so fence waits really block the caller the way
//! they would on hardware. Every synchronization step is appended to a timeline log that
//! tests (and the headless viewer) can inspect through a [`HeadlessHandle`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::foundation::sync::lock;
use crate::render::api::{
    AcquireResult, BufferHandle, BufferUsage, DeviceLimits, FrameCommand, GpuDevice, GpuError,
    GpuResult, GraphicsPipelineDesc, PipelineHandle, PresentResult,
};

/// Upper bound for `wait_idle` on the simulated timeline
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// One step observed on the simulated timeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEvent {
    /// The CPU started waiting on a slot's retirement fence
    FenceWaitBegin {
        /// Frame slot
        slot: usize,
    },
    /// The CPU stopped waiting on a slot's retirement fence
    FenceWaitEnd {
        /// Frame slot
        slot: usize,
    },
    /// A presentable image was acquired for a slot
    Acquired {
        /// Frame slot
        slot: usize,
        /// Swapchain image index
        image_index: u32,
    },
    /// Work was submitted to the GPU
    Submitted {
        /// Submission sequence number (0-based)
        submission: u64,
        /// Frame slot
        slot: usize,
    },
    /// The GPU finished a submission and signaled its fence
    Retired {
        /// Submission sequence number (0-based)
        submission: u64,
        /// Frame slot
        slot: usize,
    },
    /// An image was presented
    Presented {
        /// Frame slot
        slot: usize,
        /// Swapchain image index
        image_index: u32,
    },
    /// The swapchain was rebuilt
    SwapchainRecreated {
        /// New extent
        extent: (u32, u32),
    },
}

/// Construction parameters for [`HeadlessDevice`]
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// Simulated surface extent
    pub extent: (u32, u32),
    /// Number of simulated swapchain images
    pub image_count: u32,
    /// Time the simulated GPU spends on each submission
    pub gpu_latency: Duration,
    /// Reported device limits
    pub limits: DeviceLimits,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            extent: (1280, 720),
            image_count: 3,
            gpu_latency: Duration::from_millis(1),
            limits: DeviceLimits::default(),
        }
    }
}

/// Binary fence with a blocking wait
#[derive(Debug)]
struct SimFence {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl SimFence {
    fn new(signaled: bool) -> Self {
        Self {
            signaled: Mutex::new(signaled),
            cond: Condvar::new(),
        }
    }

    fn signal(&self) {
        *lock(&self.signaled) = true;
        self.cond.notify_all();
    }

    fn reset(&self) {
        *lock(&self.signaled) = false;
    }

    fn is_signaled(&self) -> bool {
        *lock(&self.signaled)
    }

    /// Returns whether the fence was signaled before `timeout` expired
    fn wait(&self, timeout: Duration) -> bool {
        let guard = lock(&self.signaled);
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |signaled| !*signaled)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard
    }
}

/// Frame slot objects on the headless device
#[derive(Debug)]
pub struct HeadlessFrame {
    slot: usize,
    fence: Arc<SimFence>,
}

impl HeadlessFrame {
    /// Slot index this frame belongs to
    pub fn slot(&self) -> usize {
        self.slot
    }
}

#[derive(Debug)]
struct Submission {
    id: u64,
    slot: usize,
    fence: Arc<SimFence>,
}

#[derive(Debug, Default)]
struct Progress {
    submitted: u64,
    retired: u64,
}

#[derive(Debug)]
struct StoredBuffer {
    usage: BufferUsage,
    host_visible: bool,
    bytes: Vec<u8>,
}

/// State shared between the device, its GPU thread and any [`HeadlessHandle`]s
#[derive(Debug)]
struct Shared {
    events: Mutex<Vec<TimelineEvent>>,
    progress: Mutex<Progress>,
    progress_cond: Condvar,
    held: Mutex<bool>,
    held_cond: Condvar,
    surface_out_of_date: AtomicBool,
    present_out_of_date_once: AtomicBool,
    buffers: Mutex<HashMap<BufferHandle, StoredBuffer>>,
    pipelines: Mutex<HashMap<PipelineHandle, String>>,
    recorded: Mutex<HashMap<usize, Vec<FrameCommand>>>,
}

impl Shared {
    fn log(&self, event: TimelineEvent) {
        log::trace!("[HEADLESS] {:?}", event);
        lock(&self.events).push(event);
    }
}

/// Inspection and fault-injection handle for a [`HeadlessDevice`]
#[derive(Debug, Clone)]
pub struct HeadlessHandle {
    shared: Arc<Shared>,
}

impl HeadlessHandle {
    /// Snapshot of the timeline so far
    pub fn events(&self) -> Vec<TimelineEvent> {
        lock(&self.shared.events).clone()
    }

    /// Mark the surface stale; acquisition reports out-of-date until the swapchain is recreated
    pub fn set_surface_out_of_date(&self, out_of_date: bool) {
        self.shared.surface_out_of_date.store(out_of_date, Ordering::Release);
    }

    /// Make the next present report out-of-date (and leave the surface stale)
    pub fn fail_next_present(&self) {
        self.shared.present_out_of_date_once.store(true, Ordering::Release);
    }

    /// Stop (or resume) the simulated GPU from retiring work
    pub fn hold_gpu(&self, held: bool) {
        *lock(&self.shared.held) = held;
        self.shared.held_cond.notify_all();
    }

    /// Number of submissions the simulated GPU has retired
    pub fn retired_count(&self) -> u64 {
        lock(&self.shared.progress).retired
    }

    /// Number of images presented so far
    pub fn presented_count(&self) -> usize {
        lock(&self.shared.events)
            .iter()
            .filter(|event| matches!(event, TimelineEvent::Presented { .. }))
            .count()
    }

    /// Contents of a buffer, if it is still alive
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        lock(&self.shared.buffers).get(&buffer).map(|stored| stored.bytes.clone())
    }

    /// Usage flags a buffer was created with
    pub fn buffer_usage(&self, buffer: BufferHandle) -> Option<BufferUsage> {
        lock(&self.shared.buffers).get(&buffer).map(|stored| stored.usage)
    }

    /// Number of live buffers
    pub fn live_buffer_count(&self) -> usize {
        lock(&self.shared.buffers).len()
    }

    /// Number of live pipelines
    pub fn live_pipeline_count(&self) -> usize {
        lock(&self.shared.pipelines).len()
    }

    /// Commands most recently recorded for a slot
    pub fn recorded_commands(&self, slot: usize) -> Vec<FrameCommand> {
        lock(&self.shared.recorded).get(&slot).cloned().unwrap_or_default()
    }
}

/// GPU device backed by a simulated timeline thread
pub struct HeadlessDevice {
    config: HeadlessConfig,
    shared: Arc<Shared>,
    sender: Option<Sender<Submission>>,
    gpu_thread: Option<JoinHandle<()>>,
    next_handle: u64,
    next_image: u32,
}

impl HeadlessDevice {
    /// Create a headless device and start its GPU thread
    pub fn new(config: HeadlessConfig) -> GpuResult<Self> {
        log::debug!("Creating HeadlessDevice ({}x{}, {} images)", config.extent.0, config.extent.1, config.image_count);

        if config.image_count == 0 {
            return Err(GpuError::Backend("Headless swapchain needs at least one image".to_string()));
        }

        let shared = Arc::new(Shared {
            events: Mutex::new(Vec::new()),
            progress: Mutex::new(Progress::default()),
            progress_cond: Condvar::new(),
            held: Mutex::new(false),
            held_cond: Condvar::new(),
            surface_out_of_date: AtomicBool::new(false),
            present_out_of_date_once: AtomicBool::new(false),
            buffers: Mutex::new(HashMap::new()),
            pipelines: Mutex::new(HashMap::new()),
            recorded: Mutex::new(HashMap::new()),
        });

        let (sender, receiver) = mpsc::channel::<Submission>();
        let thread_shared = Arc::clone(&shared);
        let latency = config.gpu_latency;

        let gpu_thread = std::thread::Builder::new()
            .name("headless-gpu".to_string())
            .spawn(move || {
                for submission in receiver {
                    {
                        let held = lock(&thread_shared.held);
                        let _released = thread_shared
                            .held_cond
                            .wait_while(held, |held| *held)
                            .unwrap_or_else(std::sync::PoisonError::into_inner);
                    }

                    if !latency.is_zero() {
                        std::thread::sleep(latency);
                    }

                    thread_shared.log(TimelineEvent::Retired {
                        submission: submission.id,
                        slot: submission.slot,
                    });
                    submission.fence.signal();

                    lock(&thread_shared.progress).retired += 1;
                    thread_shared.progress_cond.notify_all();
                }
            })
            .map_err(|e| GpuError::Backend(format!("Failed to spawn headless GPU thread: {}", e)))?;

        Ok(Self {
            config,
            shared,
            sender: Some(sender),
            gpu_thread: Some(gpu_thread),
            next_handle: 1,
            next_image: 0,
        })
    }

    /// Handle for inspecting the device after it has been moved into a renderer
    pub fn handle(&self) -> HeadlessHandle {
        HeadlessHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn allocate_handle(&mut self) -> u64 {
        let id = self.next_handle;
        self.next_handle += 1;
        id
    }

    fn check_buffer(&self, buffer: BufferHandle) -> GpuResult<()> {
        if lock(&self.shared.buffers).contains_key(&buffer) {
            Ok(())
        } else {
            Err(GpuError::InvalidHandle { kind: "buffer", id: buffer.0 })
        }
    }

    fn check_pipeline(&self, pipeline: PipelineHandle) -> GpuResult<()> {
        if lock(&self.shared.pipelines).contains_key(&pipeline) {
            Ok(())
        } else {
            Err(GpuError::InvalidHandle { kind: "pipeline", id: pipeline.0 })
        }
    }
}

impl GpuDevice for HeadlessDevice {
    type FrameResources = HeadlessFrame;

    fn limits(&self) -> DeviceLimits {
        self.config.limits
    }

    fn extent(&self) -> (u32, u32) {
        self.config.extent
    }

    fn create_frame_resources(&mut self, slot: usize) -> GpuResult<HeadlessFrame> {
        Ok(HeadlessFrame {
            slot,
            fence: Arc::new(SimFence::new(true)),
        })
    }

    fn wait_for_fence(&mut self, frame: &HeadlessFrame, timeout: Duration) -> GpuResult<()> {
        self.shared.log(TimelineEvent::FenceWaitBegin { slot: frame.slot });
        if !frame.fence.wait(timeout) {
            return Err(GpuError::Timeout { what: "frame retirement fence", after: timeout });
        }
        self.shared.log(TimelineEvent::FenceWaitEnd { slot: frame.slot });
        Ok(())
    }

    fn reset_fence(&mut self, frame: &HeadlessFrame) -> GpuResult<()> {
        frame.fence.reset();
        Ok(())
    }

    fn acquire_next_image(&mut self, frame: &HeadlessFrame, _timeout: Duration) -> GpuResult<AcquireResult> {
        if self.shared.surface_out_of_date.load(Ordering::Acquire) {
            return Ok(AcquireResult::OutOfDate);
        }

        let image_index = self.next_image;
        self.next_image = (self.next_image + 1) % self.config.image_count;
        self.shared.log(TimelineEvent::Acquired { slot: frame.slot, image_index });
        Ok(AcquireResult::Acquired { image_index })
    }

    fn record_commands(
        &mut self,
        frame: &HeadlessFrame,
        image_index: u32,
        commands: &[FrameCommand],
    ) -> GpuResult<()> {
        if image_index >= self.config.image_count {
            return Err(GpuError::Backend(format!("Image index {} out of range", image_index)));
        }

        for command in commands {
            match command {
                FrameCommand::BindIndexBuffer { buffer } | FrameCommand::BindInstanceData { buffer } => {
                    self.check_buffer(*buffer)?;
                }
                FrameCommand::DrawIndexedIndirect { pipeline, commands, .. } => {
                    self.check_pipeline(*pipeline)?;
                    self.check_buffer(*commands)?;
                }
                FrameCommand::Clear { .. } | FrameCommand::SetCamera { .. } => {}
            }
        }

        lock(&self.shared.recorded).insert(frame.slot, commands.to_vec());
        Ok(())
    }

    fn submit(&mut self, frame: &HeadlessFrame) -> GpuResult<()> {
        if frame.fence.is_signaled() {
            return Err(GpuError::Backend(format!(
                "Slot {} submitted with a signaled fence",
                frame.slot
            )));
        }

        let id = {
            let mut progress = lock(&self.shared.progress);
            let id = progress.submitted;
            progress.submitted += 1;
            id
        };
        self.shared.log(TimelineEvent::Submitted { submission: id, slot: frame.slot });

        let sender = self.sender.as_ref().ok_or(GpuError::DeviceLost)?;
        sender
            .send(Submission {
                id,
                slot: frame.slot,
                fence: Arc::clone(&frame.fence),
            })
            .map_err(|_| GpuError::DeviceLost)
    }

    fn present(&mut self, frame: &HeadlessFrame, image_index: u32) -> GpuResult<PresentResult> {
        if self.shared.present_out_of_date_once.swap(false, Ordering::AcqRel) {
            self.shared.surface_out_of_date.store(true, Ordering::Release);
            return Ok(PresentResult::OutOfDate);
        }

        self.shared.log(TimelineEvent::Presented { slot: frame.slot, image_index });
        Ok(PresentResult::Presented)
    }

    fn recreate_swapchain(&mut self, extent: (u32, u32)) -> GpuResult<()> {
        self.wait_idle()?;
        self.config.extent = extent;
        self.next_image = 0;
        self.shared.surface_out_of_date.store(false, Ordering::Release);
        self.shared.log(TimelineEvent::SwapchainRecreated { extent });
        Ok(())
    }

    fn wait_idle(&mut self) -> GpuResult<()> {
        let progress = lock(&self.shared.progress);
        let (progress, result) = self
            .shared
            .progress_cond
            .wait_timeout_while(progress, IDLE_TIMEOUT, |p| p.retired < p.submitted)
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if result.timed_out() && progress.retired < progress.submitted {
            return Err(GpuError::Timeout { what: "device idle", after: IDLE_TIMEOUT });
        }
        Ok(())
    }

    fn create_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> GpuResult<PipelineHandle> {
        let valid_spirv = |bytes: &[u8]| !bytes.is_empty() && bytes.len() % 4 == 0;
        if !valid_spirv(&desc.vertex_spirv)
            || desc.fragment_spirv.as_deref().is_some_and(|bytes| !valid_spirv(bytes))
        {
            return Err(GpuError::Backend(format!(
                "Pipeline '{}' has malformed SPIR-V",
                desc.name
            )));
        }

        let handle = PipelineHandle(self.allocate_handle());
        lock(&self.shared.pipelines).insert(handle, desc.name.clone());
        log::debug!("[HEADLESS] Created pipeline '{}' as {:?}", desc.name, handle);
        Ok(handle)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        lock(&self.shared.pipelines).remove(&pipeline);
    }

    fn upload_device_local(&mut self, bytes: &[u8], usage: BufferUsage) -> GpuResult<BufferHandle> {
        let handle = BufferHandle(self.allocate_handle());
        lock(&self.shared.buffers).insert(
            handle,
            StoredBuffer {
                usage,
                host_visible: false,
                bytes: bytes.to_vec(),
            },
        );
        Ok(handle)
    }

    fn create_host_buffer(&mut self, size: u64, usage: BufferUsage) -> GpuResult<BufferHandle> {
        let len = usize::try_from(size)
            .map_err(|_| GpuError::Backend(format!("Buffer size {} too large", size)))?;
        let handle = BufferHandle(self.allocate_handle());
        lock(&self.shared.buffers).insert(
            handle,
            StoredBuffer {
                usage,
                host_visible: true,
                bytes: vec![0; len],
            },
        );
        Ok(handle)
    }

    fn write_host_buffer(&mut self, buffer: BufferHandle, offset: u64, bytes: &[u8]) -> GpuResult<()> {
        let mut buffers = lock(&self.shared.buffers);
        let stored = buffers
            .get_mut(&buffer)
            .ok_or(GpuError::InvalidHandle { kind: "buffer", id: buffer.0 })?;

        if !stored.host_visible {
            return Err(GpuError::Backend(format!("Buffer {} is not host visible", buffer.0)));
        }

        let size = stored.bytes.len() as u64;
        let len = bytes.len() as u64;
        if offset.checked_add(len).map_or(true, |end| end > size) {
            return Err(GpuError::OutOfBounds { offset, len, size });
        }

        // Bounds checked above, so both conversions fit in usize.
        let start = offset as usize;
        stored.bytes[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        lock(&self.shared.buffers).remove(&buffer);
    }
}

impl Drop for HeadlessDevice {
    fn drop(&mut self) {
        // Closing the channel lets the GPU thread drain and exit.
        self.sender.take();
        self.handle().hold_gpu(false);
        if let Some(thread) = self.gpu_thread.take() {
            if thread.join().is_err() {
                log::error!("[HEADLESS] GPU thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(latency_ms: u64) -> HeadlessDevice {
        HeadlessDevice::new(HeadlessConfig {
            gpu_latency: Duration::from_millis(latency_ms),
            ..HeadlessConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_fences_start_signaled() {
        let mut device = device(0);
        let frame = device.create_frame_resources(0).unwrap();
        device.wait_for_fence(&frame, Duration::from_millis(10)).unwrap();
    }

    #[test]
    fn test_submission_signals_fence_after_retirement() {
        let mut device = device(5);
        let frame = device.create_frame_resources(0).unwrap();
        device.reset_fence(&frame).unwrap();
        device.submit(&frame).unwrap();
        device.wait_for_fence(&frame, Duration::from_secs(2)).unwrap();
        assert_eq!(device.handle().retired_count(), 1);
    }

    #[test]
    fn test_held_gpu_times_out_fence_wait() {
        let mut device = device(0);
        let handle = device.handle();
        handle.hold_gpu(true);

        let frame = device.create_frame_resources(1).unwrap();
        device.reset_fence(&frame).unwrap();
        device.submit(&frame).unwrap();

        let err = device.wait_for_fence(&frame, Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, GpuError::Timeout { .. }));

        handle.hold_gpu(false);
        device.wait_for_fence(&frame, Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn test_submit_with_signaled_fence_is_rejected() {
        let mut device = device(0);
        let frame = device.create_frame_resources(0).unwrap();
        assert!(device.submit(&frame).is_err());
    }

    #[test]
    fn test_out_of_date_until_recreated() {
        let mut device = device(0);
        let handle = device.handle();
        let frame = device.create_frame_resources(0).unwrap();

        handle.set_surface_out_of_date(true);
        assert_eq!(
            device.acquire_next_image(&frame, Duration::from_millis(1)).unwrap(),
            AcquireResult::OutOfDate
        );

        device.recreate_swapchain((800, 600)).unwrap();
        assert_eq!(device.extent(), (800, 600));
        assert!(matches!(
            device.acquire_next_image(&frame, Duration::from_millis(1)).unwrap(),
            AcquireResult::Acquired { image_index: 0 }
        ));
    }

    #[test]
    fn test_host_buffer_bounds() {
        let mut device = device(0);
        let buffer = device.create_host_buffer(8, BufferUsage::STORAGE).unwrap();
        device.write_host_buffer(buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(device.handle().buffer_contents(buffer).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);

        let err = device.write_host_buffer(buffer, 6, &[0; 4]).unwrap_err();
        assert!(matches!(err, GpuError::OutOfBounds { .. }));

        let device_local = device.upload_device_local(&[9; 4], BufferUsage::UNIFORM).unwrap();
        assert!(device.write_host_buffer(device_local, 0, &[1]).is_err());
    }

    #[test]
    fn test_record_rejects_unknown_handles() {
        let mut device = device(0);
        let frame = device.create_frame_resources(0).unwrap();
        let err = device
            .record_commands(&frame, 0, &[FrameCommand::BindIndexBuffer { buffer: BufferHandle(77) }])
            .unwrap_err();
        assert!(matches!(err, GpuError::InvalidHandle { kind: "buffer", id: 77 }));
    }

    #[test]
    fn test_malformed_spirv_rejected() {
        let mut device = device(0);
        let desc = GraphicsPipelineDesc {
            name: "bad".to_string(),
            vertex_spirv: vec![1, 2, 3],
            fragment_spirv: None,
            cull_back_faces: true,
            alpha_blend: false,
        };
        assert!(device.create_pipeline(&desc).is_err());
    }
}
