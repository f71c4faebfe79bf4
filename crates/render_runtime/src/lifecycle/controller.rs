//! Lifecycle controller
//!
//! Each poll hands out exactly one unit for the current stage and advances the stage.
//! The render unit is the only place that leaves the update/render loop: when it sees
//! a close request, a shutdown request or a recorded fault it stores `Teardown` and the
//! next poll yields the teardown unit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::job::{Job, JobError, JobSource, NextJobs, StageWork};
use super::stage::{AtomicStage, Stage};
use crate::foundation::sync::lock;

struct Shared<W> {
    stage: AtomicStage,
    shutdown_requested: AtomicBool,
    finished_shutdown: AtomicBool,
    fault: Mutex<Option<JobError>>,
    work: W,
}

impl<W: StageWork> Shared<W> {
    fn faulted(&self) -> bool {
        lock(&self.fault).is_some()
    }

    fn record_fault(&self, error: &JobError) {
        let mut fault = lock(&self.fault);
        if fault.is_none() {
            log::error!("[LIFECYCLE] {}", error);
            *fault = Some(error.clone());
        } else {
            log::warn!("[LIFECYCLE] Additional failure after fault: {}", error);
        }
    }

    fn run_stage(&self, stage: Stage) -> Result<(), JobError> {
        let result = match stage {
            Stage::Build => self.work.build(),
            Stage::UpdateData => self.work.update_data(),
            Stage::Render => self.work.render(),
            Stage::Teardown => self.work.teardown(),
            Stage::EndOfLife => Ok(()),
        };
        result.map_err(|e| {
            let error = JobError::failed(stage, e);
            self.record_fault(&error);
            error
        })
    }

    fn build_unit(&self) -> Result<(), JobError> {
        log::info!("[LIFECYCLE] Build");
        self.run_stage(Stage::Build)
    }

    fn update_unit(&self) -> Result<(), JobError> {
        if self.faulted() {
            return Err(JobError::Skipped { stage: Stage::UpdateData });
        }
        self.run_stage(Stage::UpdateData)
    }

    fn render_unit(&self) -> Result<(), JobError> {
        let result = if self.faulted() {
            Err(JobError::Skipped { stage: Stage::Render })
        } else {
            self.run_stage(Stage::Render)
        };

        if self.work.close_requested() || self.shutdown_requested.load(Ordering::Acquire) || self.faulted() {
            log::info!("[LIFECYCLE] Close observed, moving to teardown");
            self.stage.store(Stage::Teardown);
        }
        result
    }

    fn teardown_unit(&self) -> Result<(), JobError> {
        log::info!("[LIFECYCLE] Teardown");
        let result = self.run_stage(Stage::Teardown);
        self.finished_shutdown.store(true, Ordering::Release);
        result
    }
}

/// Drives [`StageWork`] through the renderer lifecycle as pollable units
pub struct LifecycleController<W> {
    shared: Arc<Shared<W>>,
}

impl<W: StageWork> LifecycleController<W> {
    /// Create a controller in [`Stage::Build`]
    pub fn new(work: W) -> Self {
        Self {
            shared: Arc::new(Shared {
                stage: AtomicStage::new(Stage::Build),
                shutdown_requested: AtomicBool::new(false),
                finished_shutdown: AtomicBool::new(false),
                fault: Mutex::new(None),
                work,
            }),
        }
    }

    /// Stage the next poll will hand out
    pub fn stage(&self) -> Stage {
        self.shared.stage.load()
    }

    /// Ask the render loop to wind down; observed by the next render unit
    pub fn request_shutdown(&self) {
        self.shared.shutdown_requested.store(true, Ordering::Release);
    }

    /// Whether the teardown unit has completed
    pub fn is_finished_shutdown(&self) -> bool {
        self.shared.finished_shutdown.load(Ordering::Acquire)
    }

    /// First recorded fault, if any
    pub fn fault(&self) -> Option<JobError> {
        lock(&self.shared.fault).clone()
    }

    /// The work object
    pub fn work(&self) -> &W {
        &self.shared.work
    }

    fn unit(&self, stage: Stage) -> Job {
        let shared = Arc::clone(&self.shared);
        match stage {
            Stage::Build => Job::new(stage, move || shared.build_unit()),
            Stage::UpdateData => Job::new(stage, move || shared.update_unit()),
            Stage::Render => Job::new(stage, move || shared.render_unit()),
            Stage::Teardown | Stage::EndOfLife => Job::new(stage, move || shared.teardown_unit()),
        }
    }
}

impl<W: StageWork> JobSource for LifecycleController<W> {
    fn fetch_next_jobs(&self) -> NextJobs {
        let mut current = self.shared.stage.load();
        loop {
            if current == Stage::EndOfLife {
                return NextJobs {
                    jobs: Vec::new(),
                    end_of_life: true,
                };
            }

            match self.shared.stage.advance(current, current.successor()) {
                Ok(()) => {
                    log::trace!("[LIFECYCLE] Dispatching {}", current);
                    return NextJobs {
                        jobs: vec![self.unit(current)],
                        end_of_life: false,
                    };
                }
                Err(actual) => current = actual,
            }
        }
    }
}

impl<W> std::fmt::Debug for LifecycleController<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("stage", &self.shared.stage.load())
            .field("finished_shutdown", &self.shared.finished_shutdown.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    #[derive(Default)]
    struct Recorder {
        close_after_renders: Option<usize>,
        fail_update_at: Option<usize>,
        renders: AtomicUsize,
        updates: AtomicUsize,
        teardowns: AtomicUsize,
    }

    impl StageWork for Recorder {
        type Error = Boom;

        fn build(&self) -> Result<(), Boom> {
            Ok(())
        }

        fn update_data(&self) -> Result<(), Boom> {
            let n = self.updates.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_update_at == Some(n) {
                return Err(Boom);
            }
            Ok(())
        }

        fn render(&self) -> Result<(), Boom> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn teardown(&self) -> Result<(), Boom> {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn close_requested(&self) -> bool {
            self.close_after_renders
                .is_some_and(|n| self.renders.load(Ordering::SeqCst) >= n)
        }
    }

    fn poll_stages(controller: &LifecycleController<Recorder>, polls: usize) -> Vec<Option<Stage>> {
        (0..polls)
            .map(|_| {
                let next = controller.fetch_next_jobs();
                if next.end_of_life {
                    assert!(next.jobs.is_empty());
                    return None;
                }
                assert_eq!(next.jobs.len(), 1);
                let job = next.jobs.into_iter().next().unwrap();
                let stage = job.stage();
                let _ = job.execute();
                Some(stage)
            })
            .collect()
    }

    #[test]
    fn test_poll_order_until_close() {
        let controller = LifecycleController::new(Recorder {
            close_after_renders: Some(2),
            ..Recorder::default()
        });

        let stages = poll_stages(&controller, 10);
        assert_eq!(
            stages,
            vec![
                Some(Stage::Build),
                Some(Stage::UpdateData),
                Some(Stage::Render),
                Some(Stage::UpdateData),
                Some(Stage::Render),
                Some(Stage::Teardown),
                None,
                None,
                None,
                None,
            ]
        );
        assert!(controller.is_finished_shutdown());
        assert_eq!(controller.work().teardowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_request_observed_by_render() {
        let controller = LifecycleController::new(Recorder::default());
        assert_eq!(poll_stages(&controller, 2), vec![Some(Stage::Build), Some(Stage::UpdateData)]);

        controller.request_shutdown();
        assert_eq!(controller.stage(), Stage::Render);
        assert!(!controller.is_finished_shutdown());
        assert_eq!(
            poll_stages(&controller, 3),
            vec![Some(Stage::Render), Some(Stage::Teardown), None]
        );
        assert!(controller.is_finished_shutdown());
    }

    #[test]
    fn test_fault_skips_work_and_tears_down() {
        let controller = LifecycleController::new(Recorder {
            fail_update_at: Some(1),
            ..Recorder::default()
        });

        let errors = run_inline_collect(&controller);
        assert_eq!(
            errors,
            vec![
                JobError::failed(Stage::UpdateData, Boom),
                JobError::Skipped { stage: Stage::Render },
            ]
        );
        assert_eq!(controller.work().renders.load(Ordering::SeqCst), 0);
        assert_eq!(controller.work().teardowns.load(Ordering::SeqCst), 1);
        assert_eq!(controller.fault().map(|f| f.stage()), Some(Stage::UpdateData));
        assert!(controller.is_finished_shutdown());
    }

    fn run_inline_collect(controller: &LifecycleController<Recorder>) -> Vec<JobError> {
        crate::lifecycle::run_inline(controller, 64)
    }

    #[test]
    fn test_units_run_on_other_threads() {
        let controller = LifecycleController::new(Recorder {
            close_after_renders: Some(3),
            ..Recorder::default()
        });

        loop {
            let next = controller.fetch_next_jobs();
            if next.end_of_life {
                break;
            }
            for job in next.jobs {
                std::thread::spawn(move || job.execute()).join().unwrap().unwrap();
            }
        }
        assert_eq!(controller.work().renders.load(Ordering::SeqCst), 3);
        assert_eq!(controller.work().updates.load(Ordering::SeqCst), 3);
    }
}
