use std::time::Duration;

/// Capacity and timeout limits for one publisher/session pair.
#[derive(Clone, Debug)]
pub struct Limits {
    /// Byte budget per container. A closed container never exceeds this.
    pub max_bytes: u64,
    /// File budget per container. The file that reaches it is still included.
    pub max_files: u64,
    /// End the session after this long without a successful publish.
    pub session_timeout: Duration,
    /// Close a container no file has been added to for this long.
    pub archive_timeout: Duration,
    /// Delay between discovery scans.
    pub poll_interval: Duration,
    /// Remove source files after a successful add (destructive move).
    pub remove_after_add: bool,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024 * 1024,
            max_files: 10_000,
            session_timeout: Duration::from_secs(60 * 60),
            archive_timeout: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(15),
            remove_after_add: false,
        }
    }
}
