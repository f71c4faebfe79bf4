//! Frame synchronization
//!
//! A fixed ring of frame slots that lets the CPU record frame `i + N` while the GPU is
//! still working on frame `i`.

pub mod sync_manager;

pub use sync_manager::{AcquireOutcome, FrameError, FrameHandle, FrameSyncManager};
