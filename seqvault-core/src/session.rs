use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use rayon::prelude::*;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::archive::publisher::ArchivePublisher;
use crate::error::{Result, VaultError};
use crate::policy::Limits;

/// Final accounting for one run-folder session.
#[derive(Clone, Debug)]
pub struct SessionReport {
    pub files_seen: u64,
    pub files_published: u64,
    pub files_errored: u64,
    pub containers_closed: u64,
    pub started: OffsetDateTime,
}

/// Drives one publisher against one run folder until the run goes idle.
///
/// Each cycle discovers the files currently under the run root, skips those
/// already committed with unchanged content, and publishes the rest. The
/// session ends once no file has been successfully published for the
/// configured timeout; a shorter archive timeout independently flushes a
/// container that has stopped filling while the session keeps scanning.
pub struct RunSession {
    run_dir: PathBuf,
    publisher: ArchivePublisher,
    limits: Limits,
}

impl RunSession {
    pub fn new(run_dir: &Path, publisher: ArchivePublisher, limits: Limits) -> Self {
        Self {
            run_dir: run_dir.to_path_buf(),
            publisher,
            limits,
        }
    }

    pub fn run(&mut self) -> Result<SessionReport> {
        let started = OffsetDateTime::now_utc();
        let base_count = self.publisher.archive_count();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut published: u64 = 0;
        let mut errored: u64 = 0;
        let mut last_progress = Instant::now();

        info!("session start for {}", self.run_dir.display());
        loop {
            let candidates = self.discover()?;
            seen.extend(candidates.iter().cloned());

            let publisher = &self.publisher;
            let skip: Vec<bool> = candidates
                .par_iter()
                .map(|path| {
                    if !publisher.file_published(path) {
                        return false;
                    }
                    match publisher.file_updated(path) {
                        Ok(updated) => !updated,
                        Err(e) => {
                            // Vanished mid-check; the next scan settles it.
                            debug!("skipping {}: {e}", path.display());
                            true
                        }
                    }
                })
                .collect();

            for (path, skip) in candidates.iter().zip(&skip) {
                if *skip {
                    continue;
                }
                match self.publish_one(path) {
                    Ok(()) => {
                        published += 1;
                        last_progress = Instant::now();
                    }
                    Err(VaultError::SourceMissing(p)) => {
                        warn!("source vanished before archiving: {}", p.display());
                        errored += 1;
                    }
                    Err(e) => return Err(e),
                }
            }

            if let Some(idle) = self.publisher.archive_idle() {
                if idle >= self.limits.archive_timeout {
                    info!("archive idle for {idle:?}; closing current container");
                    self.publisher.close_stream()?;
                }
            }

            if last_progress.elapsed() >= self.limits.session_timeout {
                self.publisher.close_stream()?;
                break;
            }
            thread::sleep(self.limits.poll_interval);
        }

        let report = SessionReport {
            files_seen: seen.len() as u64,
            files_published: published,
            files_errored: errored,
            containers_closed: self.publisher.archive_count() - base_count,
            started,
        };
        info!(
            "session end for {}: {} seen, {} published, {} errored, {} containers",
            self.run_dir.display(),
            report.files_seen,
            report.files_published,
            report.files_errored,
            report.containers_closed
        );
        Ok(report)
    }

    /// Publish one file, re-offering it when a byte-budget rotation returned
    /// no destination: the retry lands in the freshly opened container.
    fn publish_one(&mut self, src: &Path) -> Result<()> {
        loop {
            if self.publisher.publish(src)?.is_some() {
                return Ok(());
            }
        }
    }

    /// Files currently under the run root, sorted for a deterministic
    /// publish order within each pass.
    fn discover(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.run_dir).follow_links(false) {
            let entry = entry.map_err(std::io::Error::other)?;
            if entry.file_type().is_file() {
                files.push(entry.path().to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }
}
