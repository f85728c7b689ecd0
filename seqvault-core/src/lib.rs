#![forbid(unsafe_code)]

pub mod error;
pub mod policy;

pub mod hash {
    pub mod blake3;
}

pub mod manifest;

pub mod archive {
    pub mod publisher;
    pub mod stream;
}

pub mod session;

pub mod monitor {
    pub mod events;
    pub mod pool;
    pub mod runid;
    pub mod watch;
}

pub mod store;

// Re-exports: stable API surface
pub use archive::publisher::ArchivePublisher;
pub use archive::stream::ArchiveStream;
pub use manifest::{Manifest, ManifestEntry};
pub use monitor::watch::{MonitorConfig, RunMonitor};
pub use policy::Limits;
pub use session::{RunSession, SessionReport};
pub use store::{ContentStore, FsContentStore};
