use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, VaultError};
use crate::hash::blake3::file_digest;

/// Remote content-store boundary. Authentication, collection management and
/// warehouse metadata lookups all live behind this seam.
pub trait ContentStore: Send + Sync {
    /// Upload one local file to `remote`, a store-relative destination.
    fn put_file(&self, local: &Path, remote: &str) -> Result<()>;

    /// Attach key/value attributes to an uploaded object.
    fn attach_metadata(&self, remote: &str, attrs: &[(String, String)]) -> Result<()>;

    /// Content checksum of an uploaded object, hex-encoded.
    fn compute_checksum(&self, remote: &str) -> Result<String>;
}

/// Landing-directory store: uploads are copies under a local root, metadata
/// rides in a `<object>.meta` sidecar. Stands in for the real store in
/// deployments that land on a mounted archive share, and in tests.
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn object_path(&self, remote: &str) -> PathBuf {
        self.root.join(remote)
    }
}

impl ContentStore for FsContentStore {
    fn put_file(&self, local: &Path, remote: &str) -> Result<()> {
        let dst = self.object_path(remote);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(local, &dst).map_err(|e| VaultError::Store(format!("put {remote}: {e}")))?;
        Ok(())
    }

    fn attach_metadata(&self, remote: &str, attrs: &[(String, String)]) -> Result<()> {
        let mut text = String::new();
        for (key, value) in attrs {
            text.push_str(key);
            text.push('=');
            text.push_str(value);
            text.push('\n');
        }
        fs::write(self.object_path(&format!("{remote}.meta")), text)
            .map_err(|e| VaultError::Store(format!("meta {remote}: {e}")))?;
        Ok(())
    }

    fn compute_checksum(&self, remote: &str) -> Result<String> {
        file_digest(&self.object_path(remote))
    }
}
