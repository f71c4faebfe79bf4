//! Lifecycle stages

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Renderer lifecycle stage
///
/// Advances along `Build → UpdateData ⇄ Render → Teardown → EndOfLife`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Stage {
    /// Create device objects and load assets
    Build = 0,
    /// Tick the camera and rebuild geometry buckets
    UpdateData = 1,
    /// Upload frame data and submit a frame
    Render = 2,
    /// Release everything
    Teardown = 3,
    /// Nothing left to do
    EndOfLife = 4,
}

impl Stage {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Build,
            1 => Self::UpdateData,
            2 => Self::Render,
            3 => Self::Teardown,
            _ => Self::EndOfLife,
        }
    }

    /// Stage the controller moves to after handing out this stage's unit
    pub const fn successor(self) -> Self {
        match self {
            Self::Build | Self::Render => Self::UpdateData,
            Self::UpdateData => Self::Render,
            Self::Teardown | Self::EndOfLife => Self::EndOfLife,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Build => "BUILD",
            Self::UpdateData => "UPDATE_DATA",
            Self::Render => "RENDER",
            Self::Teardown => "TEARDOWN",
            Self::EndOfLife => "END_OF_LIFE",
        };
        f.write_str(name)
    }
}

/// A [`Stage`] shared between the poller and running units
#[derive(Debug)]
pub struct AtomicStage(AtomicU8);

impl AtomicStage {
    /// Create holding `stage`
    pub const fn new(stage: Stage) -> Self {
        Self(AtomicU8::new(stage as u8))
    }

    /// Current stage
    pub fn load(&self) -> Stage {
        Stage::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Overwrite the stage
    pub fn store(&self, stage: Stage) {
        self.0.store(stage as u8, Ordering::Release);
    }

    /// Move from `current` to `next`; fails with the actual stage if it changed
    pub fn advance(&self, current: Stage, next: Stage) -> Result<(), Stage> {
        self.0
            .compare_exchange(current as u8, next as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(Stage::from_u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successors() {
        assert_eq!(Stage::Build.successor(), Stage::UpdateData);
        assert_eq!(Stage::UpdateData.successor(), Stage::Render);
        assert_eq!(Stage::Render.successor(), Stage::UpdateData);
        assert_eq!(Stage::Teardown.successor(), Stage::EndOfLife);
        assert_eq!(Stage::EndOfLife.successor(), Stage::EndOfLife);
    }

    #[test]
    fn test_advance_detects_interleaved_store() {
        let stage = AtomicStage::new(Stage::UpdateData);
        stage.store(Stage::Teardown);
        assert_eq!(stage.advance(Stage::UpdateData, Stage::Render), Err(Stage::Teardown));
        assert_eq!(stage.advance(Stage::Teardown, Stage::EndOfLife), Ok(()));
        assert_eq!(stage.load(), Stage::EndOfLife);
        assert_eq!(Stage::UpdateData.to_string(), "UPDATE_DATA");
    }
}
