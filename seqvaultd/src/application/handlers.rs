use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use seqvault_core::error::Result;
use seqvault_core::monitor::runid;
use seqvault_core::{
    ArchivePublisher, FsContentStore, Limits, Manifest, MonitorConfig, RunMonitor, RunSession,
    SessionReport,
};

pub fn handle_watch(
    staging: PathBuf,
    dest: PathBuf,
    store: Option<PathBuf>,
    max_workers: usize,
    limits: Limits,
) -> Result<u64> {
    let mut monitor = RunMonitor::new(MonitorConfig {
        staging,
        dest,
        store_root: store,
        max_workers,
        poll_timeout: Duration::from_millis(500),
        limits,
    });
    let stop = monitor.stop_flag();
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::Relaxed);
    })
    .map_err(std::io::Error::other)?;
    monitor.run()
}

pub fn handle_publish(
    run_dir: PathBuf,
    dest: PathBuf,
    store: Option<PathBuf>,
    run_id: Option<String>,
    limits: Limits,
) -> Result<SessionReport> {
    let id = match run_id {
        Some(id) => id,
        None => runid::identify(&run_dir)?,
    };
    let mut publisher = ArchivePublisher::new(&id, &run_dir, &dest.join(&id), limits.clone())?;
    if let Some(root) = store {
        publisher = publisher.with_store(Box::new(FsContentStore::new(&root)?));
    }
    RunSession::new(&run_dir, publisher, limits).run()
}

pub fn handle_manifest(path: PathBuf) -> Result<()> {
    let mut manifest = Manifest::new(&path);
    manifest.read()?;
    for entry in manifest.entries() {
        println!("{}\t{}\t{}", entry.container, entry.item_path, entry.checksum);
    }
    Ok(())
}
