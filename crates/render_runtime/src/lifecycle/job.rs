//! Units of work handed to an external scheduler

use std::fmt;

use thiserror::Error;

use super::stage::Stage;

/// Failure of a lifecycle unit
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The unit's work returned an error
    #[error("{stage} unit failed: {message}")]
    Failed {
        /// Stage the unit belonged to
        stage: Stage,
        /// Rendered error
        message: String,
    },

    /// The unit did no work because an earlier unit faulted
    #[error("{stage} unit skipped after an earlier fault")]
    Skipped {
        /// Stage the unit belonged to
        stage: Stage,
    },
}

impl JobError {
    /// Wrap an error from `stage`
    pub fn failed(stage: Stage, error: impl fmt::Display) -> Self {
        Self::Failed {
            stage,
            message: error.to_string(),
        }
    }

    /// Stage that produced the error
    pub fn stage(&self) -> Stage {
        match self {
            Self::Failed { stage, .. } | Self::Skipped { stage } => *stage,
        }
    }
}

/// Work performed by each lifecycle stage
///
/// Units never run concurrently with each other; the controller only hands out the
/// next unit when polled, and the scheduler polls after the previous units finished.
pub trait StageWork: Send + Sync + 'static {
    /// Error type returned by the stage methods
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create device objects and load assets
    fn build(&self) -> Result<(), Self::Error>;

    /// Per-tick CPU updates
    fn update_data(&self) -> Result<(), Self::Error>;

    /// Record and submit one frame
    fn render(&self) -> Result<(), Self::Error>;

    /// Release everything; runs even after a fault
    fn teardown(&self) -> Result<(), Self::Error>;

    /// External close request, checked after every render unit
    fn close_requested(&self) -> bool {
        false
    }
}

/// One schedulable unit of work
pub struct Job {
    stage: Stage,
    run: Box<dyn FnOnce() -> Result<(), JobError> + Send>,
}

impl Job {
    pub(crate) fn new(stage: Stage, run: impl FnOnce() -> Result<(), JobError> + Send + 'static) -> Self {
        Self {
            stage,
            run: Box::new(run),
        }
    }

    /// Stage this unit belongs to
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Run the unit
    pub fn execute(self) -> Result<(), JobError> {
        (self.run)()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("stage", &self.stage).finish_non_exhaustive()
    }
}

/// Result of one poll
#[derive(Debug, Default)]
pub struct NextJobs {
    /// Units to run before the next poll
    pub jobs: Vec<Job>,
    /// Set once the source has nothing more to do; sticky
    pub end_of_life: bool,
}

/// Something an external scheduler polls for work
pub trait JobSource: Send + Sync {
    /// Hand out the next units and advance
    fn fetch_next_jobs(&self) -> NextJobs;
}

/// Poll `source` on the calling thread until end of life
///
/// Returns every unit error in the order they occurred. `max_polls` bounds the loop.
pub fn run_inline<S: JobSource + ?Sized>(source: &S, max_polls: usize) -> Vec<JobError> {
    let mut errors = Vec::new();
    for _ in 0..max_polls {
        let next = source.fetch_next_jobs();
        if next.end_of_life {
            break;
        }
        for job in next.jobs {
            if let Err(error) = job.execute() {
                errors.push(error);
            }
        }
    }
    errors
}
