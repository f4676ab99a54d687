//! Single-blob-per-context persistent store.
//!
//! Each context owns one backing blob file plus a [`WindowTable`] that maps
//! unit ids to byte ranges inside it. Space is reused circularly, which keeps
//! the file-handle count at one per context at the cost of a documented
//! starvation risk (see the `window` module) when writes for different unit
//! ids of the same context interleave.
//!
//! Blob files live at a hashed two-level path derived from the context id,
//! bounding directory fan-out. Allocator state is held in memory and flushed
//! to an index file at `destroy()`; the index is loaded at startup and
//! deleted immediately after, so an unclean shutdown leaves no stale index
//! behind.

use crate::error::StorageError;
use crate::store::DataStore;
use crate::types::{UnitId, UnitSummary};
use crate::window::WindowTable;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const INDEX_FILE_NAME: &str = "index.bin";
const BLOB_EXTENSION: &str = "blob";

/// Hashed relative path for a context: `aa/bb/<hex>` from the blake3 hash of
/// the context id. Stable across restarts, two levels deep so no directory
/// accumulates an unbounded number of entries.
pub(crate) fn hashed_context_path(context_id: &str) -> PathBuf {
    let hash = blake3::hash(context_id.as_bytes());
    let hex = hex::encode(hash.as_bytes());
    PathBuf::from(&hex[0..2]).join(&hex[2..4]).join(hex)
}

/// Removes a context's file-system footprint, pruning the two fan-out parent
/// directories when they become empty.
pub(crate) fn prune_fanout_dirs(leaf: &Path) {
    let mut dir = leaf.parent();
    for _ in 0..2 {
        let Some(d) = dir else { break };
        // Fails while non-empty, which is exactly the behavior wanted.
        if fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedContext {
    context_id: String,
    table: WindowTable,
}

struct ContextEntry {
    blob_path: PathBuf,
    table: Mutex<WindowTable>,
}

/// Disk-backed [`DataStore`] with one blob file per context.
pub struct DiskStore {
    root: PathBuf,
    max_blob_size: u64,
    contexts: DashMap<String, Arc<ContextEntry>>,
}

impl DiskStore {
    /// Opens the store rooted at `root`, creating it if needed and loading
    /// (then deleting) any index file a previous `destroy()` left behind.
    /// A missing or corrupt index is treated as empty, never fatal.
    pub fn new(root: impl Into<PathBuf>, max_blob_size: u64) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let store = Self {
            root,
            max_blob_size,
            contexts: DashMap::new(),
        };
        store.load_index();
        Ok(store)
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE_NAME)
    }

    fn blob_path(&self, context_id: &str) -> PathBuf {
        self.root
            .join(hashed_context_path(context_id))
            .with_extension(BLOB_EXTENSION)
    }

    fn entry(&self, context_id: &str) -> Option<Arc<ContextEntry>> {
        self.contexts.get(context_id).map(|e| Arc::clone(&e))
    }

    fn entry_or_create(&self, context_id: &str) -> Arc<ContextEntry> {
        let entry = self
            .contexts
            .entry(context_id.to_string())
            .or_insert_with(|| {
                Arc::new(ContextEntry {
                    blob_path: self.blob_path(context_id),
                    table: Mutex::new(WindowTable::new(self.max_blob_size)),
                })
            });
        Arc::clone(&entry)
    }

    fn load_index(&self) {
        let path = self.index_path();
        if path.exists() {
            match fs::read(&path).map_err(StorageError::from).and_then(|bytes| {
                bincode::deserialize::<Vec<PersistedContext>>(&bytes).map_err(|e| {
                    StorageError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        e.to_string(),
                    ))
                })
            }) {
                Ok(persisted) => {
                    for ctx in persisted {
                        let blob_path = self.blob_path(&ctx.context_id);
                        self.contexts.insert(
                            ctx.context_id,
                            Arc::new(ContextEntry {
                                blob_path,
                                table: Mutex::new(ctx.table),
                            }),
                        );
                    }
                    debug!(contexts = self.contexts.len(), "Loaded disk store index");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not load disk store index, starting empty");
                }
            }
        }
        // Deleted unconditionally: an unclean shutdown without a later save
        // must not leave a stale index describing windows that moved.
        let _ = fs::remove_file(&path);
    }

    fn save_index(&self) {
        let persisted: Vec<PersistedContext> = self
            .contexts
            .iter()
            .map(|entry| PersistedContext {
                context_id: entry.key().clone(),
                table: entry.value().table.lock().clone(),
            })
            .collect();

        let path = self.index_path();
        let tmp = path.with_extension("bin.tmp");
        let result = bincode::serialize(&persisted)
            .map_err(|e| {
                StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    e.to_string(),
                ))
            })
            .and_then(|bytes| {
                fs::write(&tmp, bytes)?;
                fs::rename(&tmp, &path)?;
                Ok(())
            });
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            warn!(path = %path.display(), error = %e, "Could not write disk store index");
        }
    }

    fn open_blob(&self, path: &Path, create: bool) -> Result<File, StorageError> {
        if create {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            Ok(OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?)
        } else {
            Ok(File::open(path)?)
        }
    }
}

impl DataStore for DiskStore {
    fn save(
        &self,
        context_id: &str,
        unit_id: UnitId,
        data: &[u8],
        _type_tag: Option<&str>,
    ) -> Result<(), StorageError> {
        let entry = self.entry_or_create(context_id);

        // The table lock is held across the write: offsets handed out by the
        // allocator are only valid while no concurrent allocation for this
        // context can move them.
        let mut table = entry.table.lock();
        let window = table.allocate(unit_id, data.len() as u64);

        let mut file = self.open_blob(&entry.blob_path, true)?;
        file.seek(SeekFrom::Start(window.offset))?;
        file.write_all(data)?;

        debug!(
            context_id = %context_id,
            unit_id,
            offset = window.offset,
            size = window.size,
            "Stored unit in context blob"
        );
        Ok(())
    }

    fn load(&self, context_id: &str, unit_id: UnitId) -> Option<Vec<u8>> {
        let entry = self.entry(context_id)?;
        let table = entry.table.lock();
        let window = table.lookup(unit_id)?;

        let result = (|| -> Result<Vec<u8>, StorageError> {
            let mut file = self.open_blob(&entry.blob_path, false)?;
            file.seek(SeekFrom::Start(window.offset))?;
            let mut buf = vec![0u8; window.size as usize];
            file.read_exact(&mut buf)?;
            Ok(buf)
        })();

        match result {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                // A truncated or missing blob degrades to "not found"; the
                // caller treats the unit as expired.
                warn!(context_id = %context_id, unit_id, error = %e, "Could not read unit from context blob");
                None
            }
        }
    }

    fn remove(&self, context_id: &str, unit_id: UnitId) {
        if let Some(entry) = self.entry(context_id) {
            debug!(context_id = %context_id, unit_id, "Removing unit window");
            entry.table.lock().free(unit_id);
        }
    }

    fn remove_context(&self, context_id: &str) {
        if let Some((_, entry)) = self.contexts.remove(context_id) {
            debug!(context_id = %context_id, "Removing context blob");
            let _table = entry.table.lock();
            if let Err(e) = fs::remove_file(&entry.blob_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(context_id = %context_id, error = %e, "Could not delete context blob");
                }
            }
            prune_fanout_dirs(&entry.blob_path);
        }
    }

    fn list(&self, context_id: &str) -> Vec<UnitSummary> {
        match self.entry(context_id) {
            Some(entry) => {
                let table = entry.table.lock();
                table
                    .recent_windows(usize::MAX)
                    .into_iter()
                    .map(|w| UnitSummary {
                        unit_id: w.unit_id,
                        size: w.size,
                        type_tag: None,
                    })
                    .collect()
            }
            None => Vec::new(),
        }
    }

    fn total_size(&self, context_id: &str) -> u64 {
        self.entry(context_id)
            .map(|entry| entry.table.lock().total_size())
            .unwrap_or(0)
    }

    fn destroy(&self) {
        debug!(root = %self.root.display(), "Flushing disk store index");
        self.save_index();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path(), 0).unwrap();

        store.save("s1", 1, b"hello", None).unwrap();
        store.save("s1", 2, b"world!", None).unwrap();

        assert_eq!(store.load("s1", 1).unwrap(), b"hello");
        assert_eq!(store.load("s1", 2).unwrap(), b"world!");
        assert_eq!(store.total_size("s1"), 11);
    }

    #[test]
    fn test_overwrite_replaces_old_window() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path(), 0).unwrap();

        store.save("s1", 1, b"first", None).unwrap();
        store.save("s1", 1, b"second version", None).unwrap();

        assert_eq!(store.load("s1", 1).unwrap(), b"second version");
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path(), 0).unwrap();

        assert!(store.load("nope", 1).is_none());
        store.save("s1", 1, b"x", None).unwrap();
        assert!(store.load("s1", 2).is_none());
    }

    #[test]
    fn test_remove_then_load_is_none() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path(), 0).unwrap();

        store.save("s1", 1, b"data", None).unwrap();
        store.remove("s1", 1);
        assert!(store.load("s1", 1).is_none());
    }

    #[test]
    fn test_remove_context_deletes_blob() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path(), 0).unwrap();

        store.save("s1", 1, b"data", None).unwrap();
        let blob = store.blob_path("s1");
        assert!(blob.exists());

        store.remove_context("s1");
        assert!(!blob.exists());
        assert!(store.load("s1", 1).is_none());
        assert_eq!(store.total_size("s1"), 0);
    }

    #[test]
    fn test_circular_reuse_bounds_blob_size() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path(), 64).unwrap();

        for id in 0..32u32 {
            store.save("s1", id, &[id as u8; 16], None).unwrap();
        }
        assert!(store.total_size("s1") <= 64 + 16);
        let blob_len = fs::metadata(store.blob_path("s1")).unwrap().len();
        assert!(blob_len <= 64 + 16);
    }

    #[test]
    fn test_index_survives_destroy_and_reload() {
        let dir = TempDir::new().unwrap();
        {
            let store = DiskStore::new(dir.path(), 0).unwrap();
            store.save("s1", 1, b"persisted", None).unwrap();
            store.destroy();
        }
        assert!(dir.path().join(INDEX_FILE_NAME).exists());

        let reopened = DiskStore::new(dir.path(), 0).unwrap();
        assert_eq!(reopened.load("s1", 1).unwrap(), b"persisted");
        // Load-then-delete: a second unclean start sees no stale index.
        assert!(!dir.path().join(INDEX_FILE_NAME).exists());
    }

    #[test]
    fn test_corrupt_index_starts_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(INDEX_FILE_NAME), b"not bincode at all").unwrap();

        let store = DiskStore::new(dir.path(), 0).unwrap();
        assert!(store.load("s1", 1).is_none());
        assert!(!dir.path().join(INDEX_FILE_NAME).exists());
    }

    #[test]
    fn test_truncated_blob_degrades_to_none() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path(), 0).unwrap();

        store.save("s1", 1, b"0123456789", None).unwrap();
        let blob = store.blob_path("s1");
        let f = OpenOptions::new().write(true).open(&blob).unwrap();
        f.set_len(4).unwrap();

        assert!(store.load("s1", 1).is_none());
    }

    #[test]
    fn test_list_reports_live_units() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path(), 0).unwrap();

        store.save("s1", 1, b"aa", None).unwrap();
        store.save("s1", 2, b"bbbb", None).unwrap();
        store.remove("s1", 1);

        let listing = store.list("s1");
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].unit_id, 2);
        assert_eq!(listing[0].size, 4);
    }
}
