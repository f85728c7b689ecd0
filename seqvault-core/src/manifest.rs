use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, VaultError};

/// One committed item: which container it went into and the content checksum
/// it was written with. Immutable once recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub container: String,
    pub item_path: String,
    pub checksum: String,
}

/// Persisted ledger of which item went into which closed container.
///
/// One record per line, three tab-separated fields:
/// `<container>\t<item-path>\t<checksum>`. Entries are keyed by item path;
/// a later publish of the same item overwrites rather than duplicates. The
/// backing file only ever reflects containers that closed successfully.
pub struct Manifest {
    path: PathBuf,
    by_item: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            by_item: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the backing file, replacing any in-memory state.
    pub fn read(&mut self) -> Result<()> {
        let text = fs::read_to_string(&self.path)?;
        let mut by_item = BTreeMap::new();
        for (idx, line) in text.lines().enumerate() {
            let mut cols = line.split('\t');
            let (Some(container), Some(item), Some(checksum), None) =
                (cols.next(), cols.next(), cols.next(), cols.next())
            else {
                return Err(VaultError::ManifestCorrupt {
                    path: self.path.clone(),
                    line: idx + 1,
                    reason: "expected 3 tab-separated fields".to_string(),
                });
            };
            if container.is_empty() || item.is_empty() || checksum.is_empty() {
                return Err(VaultError::ManifestCorrupt {
                    path: self.path.clone(),
                    line: idx + 1,
                    reason: "empty field".to_string(),
                });
            }
            by_item.insert(
                item.to_string(),
                ManifestEntry {
                    container: container.to_string(),
                    item_path: item.to_string(),
                    checksum: checksum.to_string(),
                },
            );
        }
        self.by_item = by_item;
        Ok(())
    }

    /// Insert or overwrite the entry for `item_path`. Memory only; nothing
    /// touches disk until `persist`.
    pub fn add_item(&mut self, container: &str, item_path: &str, checksum: &str) {
        self.by_item.insert(
            item_path.to_string(),
            ManifestEntry {
                container: container.to_string(),
                item_path: item_path.to_string(),
                checksum: checksum.to_string(),
            },
        );
    }

    /// Rewrite the backing file. Writes a sibling temp file and renames it
    /// over the target, so a crash never leaves a half-written manifest.
    pub fn persist(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        for entry in self.by_item.values() {
            writeln!(tmp, "{}\t{}\t{}", entry.container, entry.item_path, entry.checksum)?;
        }
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| VaultError::Io(e.error))?;
        Ok(())
    }

    pub fn contains_item(&self, item_path: &str) -> bool {
        self.by_item.contains_key(item_path)
    }

    pub fn get_item(&self, item_path: &str) -> Option<&ManifestEntry> {
        self.by_item.get(item_path)
    }

    pub fn len(&self) -> usize {
        self.by_item.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_item.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.by_item.values()
    }

    /// Highest numeric index among recorded container names of the form
    /// `<base>.<index>.<ext>`. Lets a restarted publisher resume numbering
    /// past containers it already committed.
    pub fn max_container_index(&self) -> Option<u64> {
        self.by_item
            .values()
            .filter_map(|e| e.container.rsplit('.').nth(1)?.parse::<u64>().ok())
            .max()
    }
}
