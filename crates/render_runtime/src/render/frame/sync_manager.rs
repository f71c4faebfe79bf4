//! Double-buffered frame submission
//!
//! Each of the N frame slots owns a command recording context, a presentation-ready
//! semaphore, a render-complete semaphore and a retirement fence. Frame `i` always uses
//! slot `i mod N`, and the slot's fence from its previous use is waited on before the slot
//! is recorded again, so at most N frames are in flight.
//!
//! The fence is reset only after an image has been acquired. Resetting it first would
//! leave an unsignaled fence with no pending submission whenever acquisition reports an
//! out-of-date surface, and the next wait on that slot would never return.

use std::time::Duration;
use thiserror::Error;

use crate::render::api::{AcquireResult, FrameCommand, GpuDevice, GpuError, PresentResult};

/// Frame synchronization errors
#[derive(Error, Debug)]
pub enum FrameError {
    /// A device call failed
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    /// A handle from another frame was submitted
    #[error("Frame handle for frame {handle} submitted while frame {current} is current")]
    StaleHandle {
        /// Frame the handle was acquired for
        handle: u64,
        /// Current frame counter
        current: u64,
    },

    /// The frame slots were already released
    #[error("Frame slots have been released")]
    Released,

    /// Invalid construction parameters
    #[error("Invalid frame configuration: {0}")]
    InvalidConfig(String),
}

/// A frame that has an acquired image and may be recorded and submitted
///
/// Not `Clone`: a handle is consumed by [`FrameSyncManager::submit_and_present`].
#[derive(Debug, PartialEq, Eq)]
pub struct FrameHandle {
    slot: usize,
    image_index: u32,
    frame_number: u64,
}

impl FrameHandle {
    /// Slot this frame records into
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Acquired swapchain image
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Frame counter value this handle was acquired for
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }
}

/// Result of [`FrameSyncManager::acquire_frame`]
#[derive(Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// A frame is ready to be recorded
    Frame(FrameHandle),
    /// The surface is out of date; nothing may be submitted until it is resumed
    Paused,
}

/// Ring of in-flight frame slots
pub struct FrameSyncManager<D: GpuDevice> {
    slots: Vec<D::FrameResources>,
    frame_counter: u64,
    paused: bool,
    fence_timeout: Duration,
    acquire_timeout: Duration,
}

impl<D: GpuDevice> FrameSyncManager<D> {
    /// Allocate `frames_in_flight` slots on the device
    pub fn new(
        device: &mut D,
        frames_in_flight: usize,
        fence_timeout: Duration,
        acquire_timeout: Duration,
    ) -> Result<Self, FrameError> {
        if frames_in_flight == 0 {
            return Err(FrameError::InvalidConfig("At least one frame slot is required".to_string()));
        }

        let slots = (0..frames_in_flight)
            .map(|slot| device.create_frame_resources(slot))
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!("[FRAME] Created {} frame slots", frames_in_flight);

        Ok(Self {
            slots,
            frame_counter: 0,
            paused: false,
            fence_timeout,
            acquire_timeout,
        })
    }

    /// Number of frames submitted so far
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Whether acquisition is suspended on a stale surface
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn current_slot(&self) -> Result<usize, FrameError> {
        let count = self.slots.len() as u64;
        if count == 0 {
            return Err(FrameError::Released);
        }
        // Remainder is below the slot count, which came from a usize.
        Ok((self.frame_counter % count) as usize)
    }

    /// Wait for the current slot to retire and acquire the next presentable image
    pub fn acquire_frame(&mut self, device: &mut D) -> Result<AcquireOutcome, FrameError> {
        if self.paused {
            return Ok(AcquireOutcome::Paused);
        }

        let slot = self.current_slot()?;
        let frame = &self.slots[slot];

        device.wait_for_fence(frame, self.fence_timeout)?;

        match device.acquire_next_image(frame, self.acquire_timeout)? {
            AcquireResult::Acquired { image_index } => {
                device.reset_fence(frame)?;
                Ok(AcquireOutcome::Frame(FrameHandle {
                    slot,
                    image_index,
                    frame_number: self.frame_counter,
                }))
            }
            AcquireResult::OutOfDate => {
                log::info!("[FRAME] Surface out of date, pausing at frame {}", self.frame_counter);
                self.paused = true;
                Ok(AcquireOutcome::Paused)
            }
        }
    }

    /// Record `commands` into the handle's slot, submit and present
    ///
    /// The frame counter advances once the submission succeeds. An out-of-date surface
    /// during presentation pauses the manager but does not undo the submission.
    pub fn submit_and_present(
        &mut self,
        device: &mut D,
        handle: FrameHandle,
        commands: &[FrameCommand],
    ) -> Result<(), FrameError> {
        if handle.frame_number != self.frame_counter {
            return Err(FrameError::StaleHandle {
                handle: handle.frame_number,
                current: self.frame_counter,
            });
        }

        let frame = self.slots.get(handle.slot).ok_or(FrameError::Released)?;

        device.record_commands(frame, handle.image_index, commands)?;
        device.submit(frame)?;
        self.frame_counter += 1;

        match device.present(frame, handle.image_index)? {
            PresentResult::Presented => {}
            PresentResult::OutOfDate => {
                log::info!("[FRAME] Surface went stale while presenting frame {}", handle.frame_number);
                self.paused = true;
            }
        }

        Ok(())
    }

    /// Rebuild the swapchain for `extent` and leave the paused state
    pub fn resume(&mut self, device: &mut D, extent: (u32, u32)) -> Result<(), FrameError> {
        device.recreate_swapchain(extent)?;
        if self.paused {
            log::info!("[FRAME] Resuming at frame {} ({}x{})", self.frame_counter, extent.0, extent.1);
        }
        self.paused = false;
        Ok(())
    }

    /// Wait for all in-flight work and release the slots
    pub fn release(&mut self, device: &mut D) -> Result<(), FrameError> {
        device.wait_idle()?;
        let released = self.slots.len();
        self.slots.clear();
        log::debug!("[FRAME] Released {} frame slots", released);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{HeadlessConfig, HeadlessDevice, TimelineEvent};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn setup() -> (HeadlessDevice, FrameSyncManager<HeadlessDevice>) {
        let mut device = HeadlessDevice::new(HeadlessConfig {
            gpu_latency: Duration::from_millis(1),
            ..HeadlessConfig::default()
        })
        .unwrap();
        let frames = FrameSyncManager::new(&mut device, 2, TIMEOUT, TIMEOUT).unwrap();
        (device, frames)
    }

    fn run_frame(device: &mut HeadlessDevice, frames: &mut FrameSyncManager<HeadlessDevice>) -> usize {
        match frames.acquire_frame(device).unwrap() {
            AcquireOutcome::Frame(handle) => {
                let slot = handle.slot();
                frames
                    .submit_and_present(device, handle, &[FrameCommand::Clear { color: [0.0; 4] }])
                    .unwrap();
                slot
            }
            AcquireOutcome::Paused => panic!("unexpected pause"),
        }
    }

    #[test]
    fn test_slots_alternate_and_counter_advances() {
        let (mut device, mut frames) = setup();
        let slots: Vec<usize> = (0..4).map(|_| run_frame(&mut device, &mut frames)).collect();
        assert_eq!(slots, vec![0, 1, 0, 1]);
        assert_eq!(frames.frame_counter(), 4);
        assert_eq!(device.handle().presented_count(), 4);
    }

    #[test]
    fn test_slot_reuse_waits_for_previous_submission() {
        let (mut device, mut frames) = setup();
        let handle = device.handle();

        handle.hold_gpu(true);
        run_frame(&mut device, &mut frames);
        run_frame(&mut device, &mut frames);

        // Frame N+1 reuses slot 0 and must block until frame 1 has retired.
        let worker = std::thread::spawn(move || {
            let outcome = frames.acquire_frame(&mut device).unwrap();
            (device, frames, outcome)
        });

        let slot0_waits = |events: &[TimelineEvent]| {
            events
                .iter()
                .filter(|e| matches!(e, TimelineEvent::FenceWaitBegin { slot: 0 }))
                .count()
        };
        let deadline = std::time::Instant::now() + TIMEOUT;
        while slot0_waits(&handle.events()) < 2 {
            assert!(std::time::Instant::now() < deadline, "third acquire never started waiting");
            std::thread::sleep(Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(20));
        assert!(!worker.is_finished());

        handle.hold_gpu(false);
        let (_device, _frames, outcome) = worker.join().unwrap();
        assert!(matches!(outcome, AcquireOutcome::Frame(ref h) if h.slot() == 0 && h.frame_number() == 2));

        let events = handle.events();
        let retired_first = events
            .iter()
            .position(|e| *e == TimelineEvent::Retired { submission: 0, slot: 0 })
            .unwrap();
        let third_wait_end = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, TimelineEvent::FenceWaitEnd { slot: 0 }))
            .map(|(i, _)| i)
            .nth(1)
            .unwrap();
        assert!(retired_first < third_wait_end);
    }

    #[test]
    fn test_out_of_date_pauses_without_advancing() {
        let (mut device, mut frames) = setup();
        run_frame(&mut device, &mut frames);

        device.handle().set_surface_out_of_date(true);
        assert_eq!(frames.acquire_frame(&mut device).unwrap(), AcquireOutcome::Paused);
        assert!(frames.is_paused());
        assert_eq!(frames.acquire_frame(&mut device).unwrap(), AcquireOutcome::Paused);
        assert_eq!(frames.frame_counter(), 1);

        let submissions = device
            .handle()
            .events()
            .iter()
            .filter(|e| matches!(e, TimelineEvent::Submitted { .. }))
            .count();
        assert_eq!(submissions, 1);

        frames.resume(&mut device, (640, 480)).unwrap();
        assert!(!frames.is_paused());
        assert_eq!(run_frame(&mut device, &mut frames), 1);
        assert_eq!(frames.frame_counter(), 2);
    }

    #[test]
    fn test_present_out_of_date_counts_submission() {
        let (mut device, mut frames) = setup();
        device.handle().fail_next_present();

        run_frame(&mut device, &mut frames);
        assert_eq!(frames.frame_counter(), 1);
        assert!(frames.is_paused());
        assert_eq!(device.handle().presented_count(), 0);
    }

    #[test]
    fn test_stale_handle_rejected() {
        let (mut device, mut frames) = setup();
        let AcquireOutcome::Frame(handle) = frames.acquire_frame(&mut device).unwrap() else {
            panic!("expected a frame");
        };
        let stale = FrameHandle {
            slot: handle.slot(),
            image_index: handle.image_index(),
            frame_number: 7,
        };
        let err = frames.submit_and_present(&mut device, stale, &[]).unwrap_err();
        assert!(matches!(err, FrameError::StaleHandle { handle: 7, current: 0 }));
    }

    #[test]
    fn test_fence_timeout_is_fatal() {
        let mut device = HeadlessDevice::new(HeadlessConfig::default()).unwrap();
        let mut frames =
            FrameSyncManager::new(&mut device, 1, Duration::from_millis(10), TIMEOUT).unwrap();
        device.handle().hold_gpu(true);

        run_frame(&mut device, &mut frames);
        let err = frames.acquire_frame(&mut device).unwrap_err();
        assert!(matches!(err, FrameError::Gpu(GpuError::Timeout { .. })));
        device.handle().hold_gpu(false);
    }

    #[test]
    fn test_release_clears_slots() {
        let (mut device, mut frames) = setup();
        run_frame(&mut device, &mut frames);
        frames.release(&mut device).unwrap();
        assert_eq!(frames.frames_in_flight(), 0);
        assert!(matches!(frames.acquire_frame(&mut device), Err(FrameError::Released)));
    }
}
