use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crate::error::Result;
use crate::session::SessionReport;

type Outcome = Result<SessionReport>;

/// Exit status of a reaped worker.
#[derive(Debug)]
pub enum WorkerExit {
    Finished(SessionReport),
    Failed(String),
}

impl WorkerExit {
    /// Errors this worker contributes to the monitor's aggregate count.
    pub fn errors(&self) -> u64 {
        match self {
            WorkerExit::Finished(report) => report.files_errored,
            WorkerExit::Failed(_) => 1,
        }
    }
}

struct Worker {
    run_id: String,
    handle: JoinHandle<Outcome>,
}

/// Bounded pool of per-run worker threads.
///
/// Each worker exclusively owns its run's manifest and containers, so a
/// crashing worker cannot corrupt another's state; panics are caught at join
/// and surfaced as failed exits. Finished workers are collected by polling,
/// never by blocking on a running thread.
pub struct WorkerPool {
    max_workers: usize,
    inflight: HashMap<PathBuf, Worker>,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            inflight: HashMap::new(),
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.inflight.len() < self.max_workers
    }

    /// True if a worker is already bound to this run path.
    pub fn contains(&self, run_dir: &Path) -> bool {
        self.inflight.contains_key(run_dir)
    }

    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }

    /// Spawn a worker for `run_dir`. Callers check capacity and uniqueness
    /// first; the monitor's event loop is the only dispatcher.
    pub fn spawn<F>(&mut self, run_dir: &Path, run_id: &str, job: F) -> Result<()>
    where
        F: FnOnce() -> Outcome + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(format!("seqvault-run-{run_id}"))
            .spawn(job)?;
        self.inflight.insert(
            run_dir.to_path_buf(),
            Worker {
                run_id: run_id.to_string(),
                handle,
            },
        );
        Ok(())
    }

    /// Collect every finished worker without blocking on running ones.
    pub fn reap(&mut self) -> Vec<(PathBuf, String, WorkerExit)> {
        let done: Vec<PathBuf> = self
            .inflight
            .iter()
            .filter(|(_, w)| w.handle.is_finished())
            .map(|(path, _)| path.clone())
            .collect();
        let mut reaped = Vec::with_capacity(done.len());
        for path in done {
            let Some(worker) = self.inflight.remove(&path) else {
                continue;
            };
            let exit = match worker.handle.join() {
                Ok(Ok(report)) => WorkerExit::Finished(report),
                Ok(Err(e)) => WorkerExit::Failed(e.to_string()),
                Err(_) => WorkerExit::Failed("worker panicked".to_string()),
            };
            reaped.push((path, worker.run_id, exit));
        }
        reaped
    }
}
