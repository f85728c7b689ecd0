use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::archive::stream::{ArchiveStream, item_name};
use crate::error::{Result, VaultError};
use crate::hash::blake3::file_digest;
use crate::manifest::Manifest;
use crate::policy::Limits;
use crate::store::ContentStore;

pub const CONTAINER_EXT: &str = "tar";

/// Orchestrates container lifecycle against the capacity limits: opens a
/// stream on demand, rotates when a budget is hit, and commits manifest
/// entries only once a container has fully closed.
///
/// Containers are named `<name>.<archive_count>.tar` under the destination
/// directory, alongside the `<name>.manifest` ledger. Loading the manifest at
/// construction is what makes restart safe: every `file_published` answer
/// from the first call onward reflects prior-run state.
pub struct ArchivePublisher {
    name: String,
    work_dir: PathBuf,
    dest_dir: PathBuf,
    limits: Limits,
    manifest: Manifest,
    stream: Option<ArchiveStream>,
    archive_count: u64,
    store: Option<Box<dyn ContentStore>>,
}

impl ArchivePublisher {
    pub fn new(name: &str, work_dir: &Path, dest_dir: &Path, limits: Limits) -> Result<Self> {
        fs::create_dir_all(dest_dir)?;
        let mut manifest = Manifest::new(&dest_dir.join(format!("{name}.manifest")));
        if manifest.exists() {
            manifest.read()?;
        }
        // Resume numbering past committed containers; a fresh lifetime must
        // never overwrite container 0 of the previous one.
        let archive_count = manifest.max_container_index().map_or(0, |i| i + 1);
        Ok(Self {
            name: name.to_string(),
            work_dir: work_dir.to_path_buf(),
            dest_dir: dest_dir.to_path_buf(),
            limits,
            manifest,
            stream: None,
            archive_count,
            store: None,
        })
    }

    /// Attach a content store; each closed container is uploaded to it.
    pub fn with_store(mut self, store: Box<dyn ContentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Containers closed so far in this publisher's lifetime, resumed from
    /// the manifest across restarts.
    pub fn archive_count(&self) -> u64 {
        self.archive_count
    }

    fn next_container_path(&self) -> PathBuf {
        self.dest_dir
            .join(format!("{}.{}.{}", self.name, self.archive_count, CONTAINER_EXT))
    }

    fn open_stream(&mut self) -> Result<()> {
        let mut stream = ArchiveStream::new(
            &self.next_container_path(),
            &self.work_dir,
            self.limits.remove_after_add,
        );
        stream.open()?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Publish one file into the current container.
    ///
    /// Returns the destination container name, or `None` when the byte
    /// budget forced a rotation instead: the file was NOT added and the
    /// caller must re-offer it, which lands it in the fresh container.
    /// The byte budget is checked before adding (a closed container never
    /// exceeds it); the file budget after (the triggering file is included).
    pub fn publish(&mut self, src: &Path) -> Result<Option<String>> {
        let incoming = match fs::metadata(src) {
            Ok(md) => md.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(VaultError::SourceMissing(src.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(stream) = &self.stream {
            // An oversized file still lands alone in an empty container;
            // rotating on it forever would livelock the session.
            if stream.file_count() > 0
                && stream.byte_count() + incoming > self.limits.max_bytes
            {
                debug!(
                    "rotating {}: {} + {} bytes would exceed budget",
                    stream.container_name(),
                    stream.byte_count(),
                    incoming
                );
                self.close_stream()?;
                return Ok(None);
            }
        }
        if self.stream.is_none() {
            self.open_stream()?;
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        stream.add_file(src)?;
        let container = stream.container_name();
        if stream.file_count() >= self.limits.max_files {
            self.close_stream()?;
        }
        Ok(Some(container))
    }

    /// Close the open container, commit its items to the manifest and
    /// persist it. A stream with zero files is discarded instead: no
    /// `archive_count` bump, no manifest churn, no empty container on disk.
    /// No-op when nothing is open.
    pub fn close_stream(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        if stream.file_count() == 0 {
            debug!("discarding empty container {}", stream.container_name());
            return stream.discard();
        }
        stream.close()?;
        let container = stream.container_name();
        if let Some(store) = &self.store {
            store.put_file(stream.dest(), &container)?;
            store.attach_metadata(
                &container,
                &[
                    ("run".to_string(), self.name.clone()),
                    ("items".to_string(), stream.file_count().to_string()),
                    ("bytes".to_string(), stream.byte_count().to_string()),
                ],
            )?;
        }
        for src in stream.added() {
            let item = item_name(&self.work_dir, src);
            if let Some(checksum) = stream.latest_checksum(src) {
                self.manifest.add_item(&container, &item, checksum);
            }
        }
        self.manifest.persist()?;
        self.archive_count += 1;
        info!(
            "committed {} ({} files, {} bytes)",
            container,
            stream.file_count(),
            stream.byte_count()
        );
        Ok(())
    }

    /// Idempotent-restart check: the manifest already holds this path's
    /// relative form, or the open stream has added it.
    pub fn file_published(&self, src: &Path) -> bool {
        if let Some(stream) = &self.stream {
            if stream.file_added(src) {
                return true;
            }
        }
        self.manifest.contains_item(&item_name(&self.work_dir, src))
    }

    /// True if the committed checksum differs from the file's current
    /// content, or the open stream saw it change. Decides re-publication of
    /// a file whose archived copy may be stale.
    pub fn file_updated(&self, src: &Path) -> Result<bool> {
        if let Some(stream) = &self.stream {
            if stream.file_updated(src) {
                return Ok(true);
            }
            if stream.file_added(src) {
                return Ok(false);
            }
        }
        let Some(entry) = self.manifest.get_item(&item_name(&self.work_dir, src)) else {
            return Ok(false);
        };
        let current = match file_digest(src) {
            Ok(d) => d,
            Err(VaultError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(VaultError::SourceMissing(src.to_path_buf()));
            }
            Err(e) => return Err(e),
        };
        Ok(entry.checksum != current)
    }

    /// True while a container is open with at least one file in it.
    pub fn session_in_progress(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.file_count() > 0)
    }

    /// Wall-clock time since the open stream was created; zero when none is.
    pub fn elapsed_time(&self) -> Duration {
        self.stream
            .as_ref()
            .map_or(Duration::ZERO, ArchiveStream::elapsed)
    }

    /// Idle time of the open container, when it holds at least one file.
    pub fn archive_idle(&self) -> Option<Duration> {
        self.stream
            .as_ref()
            .filter(|s| s.file_count() > 0)
            .map(|s| s.idle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn write_file(dir: &Path, rel: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn limits(max_bytes: u64, max_files: u64) -> Limits {
        Limits {
            max_bytes,
            max_files,
            ..Limits::default()
        }
    }

    fn publisher(run: &Path, dest: &Path, limits: Limits) -> ArchivePublisher {
        ArchivePublisher::new("run", run, dest, limits).unwrap()
    }

    fn tar_entry_count(path: &Path) -> usize {
        let mut archive = tar::Archive::new(File::open(path).unwrap());
        archive.entries().unwrap().count()
    }

    #[test]
    fn five_files_with_capacity_two_close_three_containers() {
        let dir = tempfile::tempdir().unwrap();
        let run = dir.path().join("run");
        let dest = dir.path().join("dest");
        fs::create_dir_all(&run).unwrap();
        let mut p = publisher(&run, &dest, limits(u64::MAX, 2));

        for i in 0..5 {
            let f = write_file(&run, &format!("lane1/r_{i}.fast5"), b"data");
            assert!(p.publish(&f).unwrap().is_some());
        }
        p.close_stream().unwrap();

        assert_eq!(p.archive_count(), 3);
        assert_eq!(p.manifest().len(), 5);
        assert_eq!(tar_entry_count(&dest.join("run.0.tar")), 2);
        assert_eq!(tar_entry_count(&dest.join("run.1.tar")), 2);
        assert_eq!(tar_entry_count(&dest.join("run.2.tar")), 1);
    }

    #[test]
    fn byte_budget_splits_sixty_sixty_into_two_containers() {
        let dir = tempfile::tempdir().unwrap();
        let run = dir.path().join("run");
        let dest = dir.path().join("dest");
        fs::create_dir_all(&run).unwrap();
        let mut p = publisher(&run, &dest, limits(100, u64::MAX));

        let a = write_file(&run, "a.fast5", &[0u8; 60]);
        let b = write_file(&run, "b.fast5", &[1u8; 60]);
        assert!(p.publish(&a).unwrap().is_some());
        // Adding b would exceed the budget: rotation, no destination yet.
        assert!(p.publish(&b).unwrap().is_none());
        assert_eq!(p.archive_count(), 1);
        // The retry lands in the fresh container.
        assert_eq!(p.publish(&b).unwrap().unwrap(), "run.1.tar");
        p.close_stream().unwrap();

        assert_eq!(p.archive_count(), 2);
        assert_eq!(tar_entry_count(&dest.join("run.0.tar")), 1);
        assert_eq!(tar_entry_count(&dest.join("run.1.tar")), 1);
    }

    #[test]
    fn oversized_file_still_ships_alone() {
        let dir = tempfile::tempdir().unwrap();
        let run = dir.path().join("run");
        let dest = dir.path().join("dest");
        fs::create_dir_all(&run).unwrap();
        let mut p = publisher(&run, &dest, limits(10, u64::MAX));

        let big = write_file(&run, "big.fast5", &[0u8; 64]);
        assert!(p.publish(&big).unwrap().is_some());
        p.close_stream().unwrap();
        assert_eq!(p.archive_count(), 1);
    }

    #[test]
    fn manifest_is_untouched_until_close() {
        let dir = tempfile::tempdir().unwrap();
        let run = dir.path().join("run");
        let dest = dir.path().join("dest");
        fs::create_dir_all(&run).unwrap();
        let mut p = publisher(&run, &dest, limits(u64::MAX, u64::MAX));

        let a = write_file(&run, "a.fast5", b"x");
        p.publish(&a).unwrap();
        assert!(p.manifest().is_empty());
        assert!(!dest.join("run.manifest").exists());
        assert!(p.session_in_progress());

        p.close_stream().unwrap();
        assert_eq!(p.manifest().len(), 1);
        assert!(dest.join("run.manifest").exists());
        assert!(!p.session_in_progress());
    }

    #[test]
    fn empty_stream_is_discarded_without_commit() {
        let dir = tempfile::tempdir().unwrap();
        let run = dir.path().join("run");
        let dest = dir.path().join("dest");
        fs::create_dir_all(&run).unwrap();
        let mut p = publisher(&run, &dest, limits(u64::MAX, u64::MAX));

        // An add that fails mid-publish leaves an empty open stream behind;
        // a directory survives the metadata check but cannot be hashed.
        let sub = run.join("lane1");
        fs::create_dir_all(&sub).unwrap();
        assert!(p.publish(&sub).is_err());
        assert!(dest.join("run.0.tar").exists());

        p.close_stream().unwrap();
        assert_eq!(p.archive_count(), 0, "empty close must not bump the count");
        assert!(!dest.join("run.0.tar").exists());
        assert!(p.manifest().is_empty());
        assert!(!dest.join("run.manifest").exists());

        // close_stream with nothing open is a no-op.
        p.close_stream().unwrap();
        assert_eq!(p.archive_count(), 0);
    }

    #[test]
    fn restart_resumes_container_numbering_and_membership() {
        let dir = tempfile::tempdir().unwrap();
        let run = dir.path().join("run");
        let dest = dir.path().join("dest");
        fs::create_dir_all(&run).unwrap();
        let a = write_file(&run, "a.fast5", b"a");
        let b = write_file(&run, "b.fast5", b"b");

        {
            let mut p = publisher(&run, &dest, limits(u64::MAX, u64::MAX));
            p.publish(&a).unwrap();
            p.close_stream().unwrap();
        }

        // New lifetime against the same manifest.
        let mut p = publisher(&run, &dest, limits(u64::MAX, u64::MAX));
        assert_eq!(p.archive_count(), 1);
        assert!(p.file_published(&a));
        assert!(!p.file_updated(&a).unwrap());
        assert!(!p.file_published(&b));

        p.publish(&b).unwrap();
        p.close_stream().unwrap();
        assert_eq!(
            p.manifest().get_item("b.fast5").unwrap().container,
            "run.1.tar"
        );
        assert!(dest.join("run.0.tar").exists());
    }

    #[test]
    fn change_detection_overwrites_manifest_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let run = dir.path().join("run");
        let dest = dir.path().join("dest");
        fs::create_dir_all(&run).unwrap();
        let a = write_file(&run, "a.fast5", b"v1");

        let mut p = publisher(&run, &dest, limits(u64::MAX, u64::MAX));
        p.publish(&a).unwrap();
        p.close_stream().unwrap();
        let first = p.manifest().get_item("a.fast5").unwrap().checksum.clone();

        fs::write(&a, b"v2").unwrap();
        assert!(p.file_updated(&a).unwrap());
        p.publish(&a).unwrap();
        p.close_stream().unwrap();

        let entry = p.manifest().get_item("a.fast5").unwrap();
        assert_ne!(entry.checksum, first);
        assert_eq!(entry.container, "run.1.tar");
        assert_eq!(p.manifest().len(), 1);
    }

    #[test]
    fn elapsed_time_is_zero_without_a_stream() {
        let dir = tempfile::tempdir().unwrap();
        let run = dir.path().join("run");
        fs::create_dir_all(&run).unwrap();
        let p = publisher(&run, &dir.path().join("dest"), limits(1, 1));
        assert_eq!(p.elapsed_time(), Duration::ZERO);
        assert!(p.archive_idle().is_none());
    }
}
