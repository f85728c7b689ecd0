use std::collections::HashMap;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tar::Builder;
use tracing::debug;

use crate::error::{Result, VaultError};
use crate::hash::blake3::file_digest;

/// Archive member name for `src` relative to `work_dir`. Sources outside the
/// working directory keep only their file name.
pub fn item_name(work_dir: &Path, src: &Path) -> String {
    match src.strip_prefix(work_dir) {
        Ok(rel) => rel.to_string_lossy().to_string(),
        Err(_) => src
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| src.to_string_lossy().to_string()),
    }
}

/// One container under construction. At most one of these is open per
/// publisher at any time; the publisher decides when to rotate.
pub struct ArchiveStream {
    dest: PathBuf,
    work_dir: PathBuf,
    remove_after_add: bool,
    builder: Option<Builder<File>>,
    failed: bool,
    bytes: u64,
    files: u64,
    added: Vec<PathBuf>,
    history: HashMap<PathBuf, Vec<String>>,
    opened_at: Instant,
    last_add: Instant,
}

impl ArchiveStream {
    pub fn new(dest: &Path, work_dir: &Path, remove_after_add: bool) -> Self {
        let now = Instant::now();
        Self {
            dest: dest.to_path_buf(),
            work_dir: work_dir.to_path_buf(),
            remove_after_add,
            builder: None,
            failed: false,
            bytes: 0,
            files: 0,
            added: Vec::new(),
            history: HashMap::new(),
            opened_at: now,
            last_add: now,
        }
    }

    /// Create the backing container file for writing. Calling this on an
    /// already-open stream is a programming error.
    pub fn open(&mut self) -> Result<()> {
        assert!(
            self.builder.is_none() && !self.failed,
            "archive stream already open: {}",
            self.dest.display()
        );
        let f = File::create(&self.dest).map_err(|e| VaultError::ArchiveIo {
            container: self.dest.clone(),
            source: e,
        })?;
        self.builder = Some(Builder::new(f));
        self.opened_at = Instant::now();
        self.last_add = self.opened_at;
        debug!("opened container {}", self.dest.display());
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.builder.is_some()
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    pub fn container_name(&self) -> String {
        self.dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.dest.to_string_lossy().to_string())
    }

    /// Append one source file under its path relative to the working dir.
    /// Counters grow by the source's byte size; the content checksum is
    /// appended to that path's history. With destructive-move enabled the
    /// source is removed after a successful add.
    pub fn add_file(&mut self, src: &Path) -> Result<()> {
        let size = match fs::metadata(src) {
            Ok(md) => md.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(VaultError::SourceMissing(src.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let digest = match file_digest(src) {
            Ok(d) => d,
            Err(VaultError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(VaultError::SourceMissing(src.to_path_buf()));
            }
            Err(e) => return Err(e),
        };
        let rel = item_name(&self.work_dir, src);
        let Some(builder) = self.builder.as_mut() else {
            panic!("add_file on a stream that is not open");
        };
        if let Err(e) = builder.append_path_with_name(src, &rel) {
            self.failed = true;
            return Err(VaultError::ArchiveIo {
                container: self.dest.clone(),
                source: e,
            });
        }
        self.bytes += size;
        self.files += 1;
        self.added.push(src.to_path_buf());
        self.history
            .entry(src.to_path_buf())
            .or_default()
            .push(digest);
        self.last_add = Instant::now();
        if self.remove_after_add {
            fs::remove_file(src)?;
        }
        Ok(())
    }

    /// True if this stream has ever added `src`.
    pub fn file_added(&self, src: &Path) -> bool {
        self.history.contains_key(src)
    }

    /// True if `src` was re-added with different content: its checksum
    /// history holds more than one distinct value.
    pub fn file_updated(&self, src: &Path) -> bool {
        let Some(history) = self.history.get(src) else {
            return false;
        };
        let first = &history[0];
        history.iter().any(|c| c != first)
    }

    pub fn checksum_history(&self, src: &Path) -> &[String] {
        self.history.get(src).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn latest_checksum(&self, src: &Path) -> Option<&str> {
        self.history.get(src)?.last().map(String::as_str)
    }

    /// Ordered list of every absolute path added, repeats included.
    pub fn added(&self) -> &[PathBuf] {
        &self.added
    }

    pub fn byte_count(&self) -> u64 {
        self.bytes
    }

    pub fn file_count(&self) -> u64 {
        self.files
    }

    pub fn start_time(&self) -> Instant {
        self.opened_at
    }

    pub fn elapsed(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Time since the last successful add; drives the archive timeout.
    pub fn idle(&self) -> Duration {
        self.last_add.elapsed()
    }

    /// Finalize the container: write the tar footer and flush to disk.
    /// On failure the stream is unusable and must not be reused; either the
    /// container is a complete, valid archive or this returns an error.
    pub fn close(&mut self) -> Result<()> {
        let Some(builder) = self.builder.take() else {
            panic!("close on a stream that is not open");
        };
        let file = match builder.into_inner() {
            Ok(f) => f,
            Err(e) => {
                self.failed = true;
                return Err(VaultError::ArchiveIo {
                    container: self.dest.clone(),
                    source: e,
                });
            }
        };
        if let Err(e) = file.sync_all() {
            self.failed = true;
            return Err(VaultError::ArchiveIo {
                container: self.dest.clone(),
                source: e,
            });
        }
        debug!(
            "closed container {} ({} files, {} bytes)",
            self.dest.display(),
            self.files,
            self.bytes
        );
        Ok(())
    }

    /// Drop an empty container: release the handle and remove the backing
    /// file so no zero-entry archive lingers on disk.
    pub fn discard(mut self) -> Result<()> {
        if let Some(builder) = self.builder.take() {
            let _ = builder.into_inner();
        }
        match fs::remove_file(&self.dest) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
