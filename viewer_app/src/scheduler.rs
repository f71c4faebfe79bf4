//! Worker-thread scheduler for lifecycle jobs
//!
//! A driver thread polls a [`JobSource`], hands every unit of a poll to the worker
//! pool, and waits for all of them before polling again.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use render_runtime::lifecycle::{Job, JobError, JobSource};

type JobResult = Result<(), JobError>;

/// Fixed pool of threads executing jobs
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    results: Receiver<JobResult>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers (at least one)
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let (result_sender, results) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..threads.max(1))
            .map(|index| {
                let receiver = Arc::clone(&receiver);
                let result_sender = result_sender.clone();
                std::thread::Builder::new()
                    .name(format!("render-worker-{index}"))
                    .spawn(move || loop {
                        let job = {
                            let guard = receiver.lock().unwrap_or_else(PoisonError::into_inner);
                            guard.recv()
                        };
                        let Ok(job) = job else { break };
                        log::trace!("Worker {} running {}", index, job.stage());
                        if result_sender.send(job.execute()).is_err() {
                            break;
                        }
                    })
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        Ok(Self {
            sender: Some(sender),
            results,
            workers,
        })
    }

    /// Run one batch of jobs and wait for all of them
    fn run_batch(&self, jobs: Vec<Job>) -> Vec<JobError> {
        let Some(sender) = self.sender.as_ref() else {
            return Vec::new();
        };

        let mut errors = Vec::new();
        let mut dispatched = 0;
        for job in jobs {
            match sender.send(job) {
                Ok(()) => dispatched += 1,
                Err(returned) => {
                    log::warn!("Worker pool closed; running {} inline", returned.0.stage());
                    if let Err(e) = returned.0.execute() {
                        errors.push(e);
                    }
                }
            }
        }

        for _ in 0..dispatched {
            match self.results.recv() {
                Ok(Err(e)) => errors.push(e),
                Ok(Ok(())) => {}
                Err(_) => break,
            }
        }
        errors
    }

    /// Poll `source` until it reports end of life; returns every unit error
    pub fn drive<S: JobSource + ?Sized>(&self, source: &S) -> Vec<JobError> {
        let mut errors = Vec::new();
        loop {
            let next = source.fetch_next_jobs();
            if next.end_of_life {
                break;
            }
            for error in self.run_batch(next.jobs) {
                log::error!("Job failed: {}", error);
                errors.push(error);
            }
        }
        errors
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Drive `source` from a background thread with a pool of `threads` workers
pub fn spawn_driver<S>(source: Arc<S>, threads: usize) -> std::io::Result<JoinHandle<Vec<JobError>>>
where
    S: JobSource + 'static,
{
    let pool = WorkerPool::new(threads)?;
    std::thread::Builder::new()
        .name("render-driver".to_string())
        .spawn(move || pool.drive(source.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use render_runtime::core::ApplicationConfig;
    use render_runtime::render::backends::headless::{HeadlessConfig, HeadlessDevice};
    use render_runtime::render::primitives::NoCursor;
    use render_runtime::renderer::{EmptyLoader, Renderer};

    #[test]
    fn test_drives_renderer_to_end_of_life() {
        let device = HeadlessDevice::new(HeadlessConfig::default()).unwrap();
        let inspect = device.handle();
        let renderer = Renderer::new(device, EmptyLoader, &ApplicationConfig::default(), Box::new(NoCursor)).unwrap();
        renderer.request_close();

        let pool = WorkerPool::new(2).unwrap();
        assert!(pool.drive(&renderer).is_empty());
        assert!(renderer.is_finished_shutdown());
        assert_eq!(inspect.presented_count(), 1);
    }
}
