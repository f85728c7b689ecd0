use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::warn;

use crate::error::{Result, VaultError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsEventKind {
    Created,
    MovedIn,
    MovedFrom,
    Deleted,
    Attrib,
}

/// One simplified filesystem change under the watched root.
#[derive(Clone, Debug)]
pub struct FsEvent {
    pub path: std::path::PathBuf,
    pub kind: FsEventKind,
    pub is_dir: bool,
}

/// Keeps the native watcher alive; dropping it cancels the subscription.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
}

/// Subscribe to `root`, feeding simplified events into a channel. The
/// notification callback only queues; all handling happens in the monitor
/// loop, which keeps the callback non-blocking.
pub fn watch(root: &Path) -> Result<(WatchHandle, Receiver<FsEvent>)> {
    let (tx, rx) = mpsc::channel();
    let mut watcher =
        notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            forward(res, &tx);
        })
        .map_err(|e| VaultError::Watch(e.to_string()))?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|e| VaultError::Watch(e.to_string()))?;
    Ok((WatchHandle { _watcher: watcher }, rx))
}

fn forward(res: notify::Result<notify::Event>, tx: &Sender<FsEvent>) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            warn!("filesystem watch error: {e}");
            return;
        }
    };
    if event.need_rescan() {
        warn!("watch queue overflowed; some events were dropped");
    }
    let kind = match event.kind {
        EventKind::Create(_) => FsEventKind::Created,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => FsEventKind::MovedFrom,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FsEventKind::MovedIn,
        EventKind::Modify(_) => FsEventKind::Attrib,
        EventKind::Remove(_) => FsEventKind::Deleted,
        _ => return,
    };
    for path in event.paths {
        let is_dir = path.is_dir();
        // The receiver going away just means the monitor stopped.
        let _ = tx.send(FsEvent { path, kind, is_dir });
    }
}
