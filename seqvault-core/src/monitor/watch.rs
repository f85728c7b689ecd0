use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::archive::publisher::ArchivePublisher;
use crate::error::Result;
use crate::monitor::events::{self, FsEvent, FsEventKind};
use crate::monitor::pool::{WorkerExit, WorkerPool};
use crate::monitor::runid;
use crate::policy::Limits;
use crate::session::RunSession;
use crate::store::FsContentStore;

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Staging tree where instrument run folders appear.
    pub staging: PathBuf,
    /// Root receiving per-run container/manifest directories.
    pub dest: PathBuf,
    /// Landing root for the content store; `None` skips upload.
    pub store_root: Option<PathBuf>,
    /// Maximum concurrent run sessions.
    pub max_workers: usize,
    /// How long one loop iteration waits for a filesystem event.
    pub poll_timeout: Duration,
    pub limits: Limits,
}

/// Watches the staging tree and supervises one worker session per active
/// run folder.
///
/// The event loop is single-threaded and cooperative: wait for an event
/// with a timeout, drain whatever queued behind it, reap finished workers,
/// repeat until the stop flag flips. Workers are never awaited inside the
/// loop, so new directory events stay responsive while runs are busy.
pub struct RunMonitor {
    config: MonitorConfig,
    stop: Arc<AtomicBool>,
    pool: WorkerPool,
    deferred: VecDeque<FsEvent>,
    dispatched: u64,
    errors: u64,
}

impl RunMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let pool = WorkerPool::new(config.max_workers);
        Self {
            config,
            stop: Arc::new(AtomicBool::new(false)),
            pool,
            deferred: VecDeque::new(),
            dispatched: 0,
            errors: 0,
        }
    }

    /// Shared flag that ends the loop; hand it to a signal handler.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Sessions dispatched over this monitor's lifetime.
    pub fn runs_dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Watch staging and supervise workers until told to stop. Returns the
    /// aggregate error count across all reaped workers.
    pub fn run(&mut self) -> Result<u64> {
        let (watch, rx) = events::watch(&self.config.staging)?;
        info!("watching {}", self.config.staging.display());
        self.seed_existing()?;
        let errors = self.run_loop(&rx);
        // Dropping the handle cancels the filesystem subscription.
        drop(watch);
        errors
    }

    /// Event loop against an already-established event source; separated
    /// from `run` so tests and alternative sources can feed it directly.
    pub fn run_loop(&mut self, rx: &Receiver<FsEvent>) -> Result<u64> {
        while !self.stop.load(Ordering::Relaxed) {
            match rx.recv_timeout(self.config.poll_timeout) {
                Ok(event) => {
                    self.handle_event(event);
                    while let Ok(queued) = rx.try_recv() {
                        self.handle_event(queued);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.reap();
            self.retry_deferred();
        }
        self.reap();
        if !self.pool.is_empty() {
            info!(
                "{} workers still running; each ends on its own session timeout",
                self.pool.len()
            );
        }
        info!(
            "monitor stopped: {} runs dispatched, {} errors",
            self.dispatched, self.errors
        );
        Ok(self.errors)
    }

    /// Run folders already sitting in staging when the monitor starts, e.g.
    /// written while a previous monitor was down.
    fn seed_existing(&mut self) -> Result<()> {
        for entry in std::fs::read_dir(&self.config.staging)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                self.handle_event(FsEvent {
                    path: entry.path(),
                    kind: FsEventKind::Created,
                    is_dir: true,
                });
            }
        }
        Ok(())
    }

    fn handle_event(&mut self, event: FsEvent) {
        match event.kind {
            FsEventKind::MovedFrom | FsEventKind::Deleted => {
                debug!(
                    "{} went away; no compensating action",
                    event.path.display()
                );
                return;
            }
            FsEventKind::Created | FsEventKind::MovedIn | FsEventKind::Attrib => {}
        }
        let Some(run_dir) = self.run_root(&event.path) else {
            return;
        };
        if self.pool.contains(&run_dir) {
            // At most one session per run path.
            return;
        }
        if !self.pool.has_capacity() {
            self.deferred.push_back(event);
            return;
        }
        match runid::identify(&run_dir) {
            Ok(run_id) => self.dispatch(&run_dir, &run_id),
            Err(e) => {
                // No data yet; the next write to this folder re-triggers us.
                debug!("{e}");
            }
        }
    }

    /// Top-level run folder a change event belongs to.
    fn run_root(&self, path: &Path) -> Option<PathBuf> {
        let rel = path.strip_prefix(&self.config.staging).ok()?;
        let first = rel.components().next()?;
        let root = self.config.staging.join(first);
        root.is_dir().then_some(root)
    }

    fn dispatch(&mut self, run_dir: &Path, run_id: &str) {
        info!("run {run_id} detected at {}", run_dir.display());
        let dest = self.config.dest.join(run_id);
        let store_root = self.config.store_root.clone();
        let limits = self.config.limits.clone();
        let run_dir_owned = run_dir.to_path_buf();
        let id = run_id.to_string();
        let spawned = self.pool.spawn(run_dir, run_id, move || {
            let mut publisher = ArchivePublisher::new(&id, &run_dir_owned, &dest, limits.clone())?;
            if let Some(root) = store_root {
                publisher = publisher.with_store(Box::new(FsContentStore::new(&root)?));
            }
            RunSession::new(&run_dir_owned, publisher, limits).run()
        });
        match spawned {
            Ok(()) => self.dispatched += 1,
            Err(e) => {
                warn!("failed to spawn worker for {}: {e}", run_dir.display());
                self.errors += 1;
            }
        }
    }

    fn reap(&mut self) {
        for (path, run_id, exit) in self.pool.reap() {
            match &exit {
                WorkerExit::Finished(report) if report.files_errored == 0 => info!(
                    "run {run_id} complete: {} published in {} containers",
                    report.files_published, report.containers_closed
                ),
                WorkerExit::Finished(report) => warn!(
                    "run {run_id} finished with {} errors ({} published)",
                    report.files_errored, report.files_published
                ),
                WorkerExit::Failed(msg) => {
                    warn!("run {run_id} at {} failed: {msg}", path.display());
                }
            }
            self.errors += exit.errors();
        }
    }

    /// Re-offer events parked while the pool was saturated.
    fn retry_deferred(&mut self) {
        let mut remaining = self.deferred.len();
        while remaining > 0 && self.pool.has_capacity() {
            let Some(event) = self.deferred.pop_front() else {
                break;
            };
            remaining -= 1;
            self.handle_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::mpsc;

    fn config(staging: &Path, dest: &Path, max_workers: usize) -> MonitorConfig {
        MonitorConfig {
            staging: staging.to_path_buf(),
            dest: dest.to_path_buf(),
            store_root: None,
            max_workers,
            poll_timeout: Duration::from_millis(10),
            limits: Limits {
                // Workers outlive these tests: the loop's dispatch
                // accounting is what is under test, not the sessions.
                session_timeout: Duration::from_secs(60),
                poll_interval: Duration::from_millis(20),
                ..Limits::default()
            },
        }
    }

    fn seed_run(staging: &Path, name: &str) -> PathBuf {
        let run = staging.join(name);
        fs::create_dir_all(run.join("1")).unwrap();
        fs::write(
            run.join("1").join("FAK12345_6007177c_123_0.fast5"),
            b"reads",
        )
        .unwrap();
        run
    }

    fn created(path: &Path) -> FsEvent {
        FsEvent {
            path: path.to_path_buf(),
            kind: FsEventKind::Created,
            is_dir: true,
        }
    }

    #[test]
    fn duplicate_events_spawn_exactly_one_worker() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        fs::create_dir_all(&staging).unwrap();
        let run = seed_run(&staging, "run_a");

        let mut monitor = RunMonitor::new(config(&staging, &dir.path().join("dest"), 4));
        let (tx, rx) = mpsc::channel();
        tx.send(created(&run)).unwrap();
        tx.send(created(&run)).unwrap();
        tx.send(created(&run.join("1"))).unwrap();
        drop(tx);

        monitor.run_loop(&rx).unwrap();
        assert_eq!(monitor.runs_dispatched(), 1);
    }

    #[test]
    fn saturated_pool_defers_instead_of_dropping() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        fs::create_dir_all(&staging).unwrap();
        let run_a = seed_run(&staging, "run_a");
        let run_b = seed_run(&staging, "run_b");

        let mut monitor = RunMonitor::new(config(&staging, &dir.path().join("dest"), 1));
        let (tx, rx) = mpsc::channel();
        tx.send(created(&run_a)).unwrap();
        tx.send(created(&run_b)).unwrap();
        drop(tx);

        monitor.run_loop(&rx).unwrap();
        assert_eq!(monitor.runs_dispatched(), 1);
        assert_eq!(monitor.deferred.len(), 1);
    }

    #[test]
    fn dataless_folder_is_dropped_until_data_appears() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        let run = staging.join("run_new");
        fs::create_dir_all(&run).unwrap();
        fs::write(run.join("config.txt"), b"settings").unwrap();

        let mut monitor = RunMonitor::new(config(&staging, &dir.path().join("dest"), 4));
        let (tx, rx) = mpsc::channel();
        tx.send(created(&run)).unwrap();
        drop(tx);
        monitor.run_loop(&rx).unwrap();
        assert_eq!(monitor.runs_dispatched(), 0);

        // Data arrives; the write event re-offers the folder.
        fs::write(run.join("FAK12345_6007177c_0.fast5"), b"reads").unwrap();
        let (tx, rx) = mpsc::channel();
        tx.send(FsEvent {
            path: run.join("FAK12345_6007177c_0.fast5"),
            kind: FsEventKind::Attrib,
            is_dir: false,
        })
        .unwrap();
        drop(tx);
        monitor.run_loop(&rx).unwrap();
        assert_eq!(monitor.runs_dispatched(), 1);
    }

    #[test]
    fn removal_events_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        fs::create_dir_all(&staging).unwrap();
        let run = seed_run(&staging, "run_a");

        let mut monitor = RunMonitor::new(config(&staging, &dir.path().join("dest"), 4));
        let (tx, rx) = mpsc::channel();
        tx.send(FsEvent {
            path: run.clone(),
            kind: FsEventKind::Deleted,
            is_dir: true,
        })
        .unwrap();
        tx.send(FsEvent {
            path: run,
            kind: FsEventKind::MovedFrom,
            is_dir: true,
        })
        .unwrap();
        drop(tx);
        monitor.run_loop(&rx).unwrap();
        assert_eq!(monitor.runs_dispatched(), 0);
    }

    #[test]
    fn events_outside_staging_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        fs::create_dir_all(&staging).unwrap();
        let elsewhere = dir.path().join("elsewhere");
        fs::create_dir_all(&elsewhere).unwrap();

        let mut monitor = RunMonitor::new(config(&staging, &dir.path().join("dest"), 4));
        let (tx, rx) = mpsc::channel();
        tx.send(created(&elsewhere)).unwrap();
        tx.send(created(&staging)).unwrap();
        drop(tx);
        monitor.run_loop(&rx).unwrap();
        assert_eq!(monitor.runs_dispatched(), 0);
    }
}
