//! Renderer lifecycle
//!
//! The renderer does not own a loop. An external scheduler polls
//! [`JobSource::fetch_next_jobs`] and runs the returned units, one poll at a time.

pub mod controller;
pub mod job;
pub mod stage;

pub use controller::LifecycleController;
pub use job::{run_inline, Job, JobError, JobSource, NextJobs, StageWork};
pub use stage::{AtomicStage, Stage};
