//! Single live renderer per process

use std::sync::atomic::{AtomicBool, Ordering};

use super::RendererError;

static RENDERER_SLOT: AtomicBool = AtomicBool::new(false);

/// Proof that the holder is the only live renderer; released on drop
#[derive(Debug)]
pub struct InstanceGuard {
    _private: (),
}

impl InstanceGuard {
    /// Claim the renderer slot
    pub fn acquire() -> Result<Self, RendererError> {
        RENDERER_SLOT
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RendererError::AlreadyRunning)?;
        Ok(Self { _private: () })
    }

    /// Whether some renderer currently holds the slot
    pub fn is_claimed() -> bool {
        RENDERER_SLOT.load(Ordering::Acquire)
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        RENDERER_SLOT.store(false, Ordering::Release);
    }
}

/// Serializes unit tests that claim the process-wide slot
#[cfg(test)]
pub(crate) static TEST_SLOT_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
