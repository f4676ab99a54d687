//! One-file-per-unit persistent store.
//!
//! Every unit is its own file inside a context-scoped directory at a hashed
//! two-level path, avoiding both the single-cursor starvation of the blob
//! store and huge flat directories. The trade-off is one open/create/delete
//! per operation instead of one shared handle per context.
//!
//! A per-context byte cap is enforced by deleting the least-recently-written
//! files once the total exceeds the cap. An oversized unit is accepted and
//! then evicted by the same sweep rather than rejected.
//!
//! The type tag travels in an optional `.tag` sidecar next to the data file;
//! a missing sidecar is never an error.

use crate::error::StorageError;
use crate::store::disk::{hashed_context_path, prune_fanout_dirs};
use crate::store::DataStore;
use crate::types::{UnitId, UnitSummary};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

const INDEX_FILE_NAME: &str = "files.bin";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileRecord {
    unit_id: UnitId,
    size: u64,
    type_tag: Option<String>,
}

/// Write-ordered record list for one context; oldest first.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct FileIndex {
    records: Vec<FileRecord>,
    total: u64,
}

impl FileIndex {
    fn drop_record(&mut self, unit_id: UnitId) {
        if let Some(pos) = self.records.iter().position(|r| r.unit_id == unit_id) {
            let record = self.records.remove(pos);
            self.total -= record.size;
        }
    }

    fn push_record(&mut self, record: FileRecord) {
        self.drop_record(record.unit_id);
        self.total += record.size;
        self.records.push(record);
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedContext {
    context_id: String,
    index: FileIndex,
}

struct ContextEntry {
    dir: PathBuf,
    index: Mutex<FileIndex>,
}

/// [`DataStore`] that keeps each unit in its own file.
pub struct FileStore {
    root: PathBuf,
    max_bytes_per_context: u64,
    contexts: DashMap<String, Arc<ContextEntry>>,
}

impl FileStore {
    /// Opens the store rooted at `root`. `max_bytes_per_context` of zero
    /// disables the per-context byte cap.
    pub fn new(root: impl Into<PathBuf>, max_bytes_per_context: u64) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let store = Self {
            root,
            max_bytes_per_context,
            contexts: DashMap::new(),
        };
        store.load_index();
        Ok(store)
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE_NAME)
    }

    fn context_dir(&self, context_id: &str) -> PathBuf {
        self.root.join(hashed_context_path(context_id))
    }

    fn data_path(&self, context_id: &str, unit_id: UnitId) -> PathBuf {
        self.context_dir(context_id).join(format!("{}.data", unit_id))
    }

    fn tag_path(&self, context_id: &str, unit_id: UnitId) -> PathBuf {
        self.context_dir(context_id).join(format!("{}.tag", unit_id))
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
                    dir: self.context_dir(context_id),
                    index: Mutex::new(FileIndex::default()),
                })
            });
        Arc::clone(&entry)
    }

    fn delete_unit_files(&self, entry: &ContextEntry, unit_id: UnitId) {
        let data = entry.dir.join(format!("{}.data", unit_id));
        if let Err(e) = fs::remove_file(&data) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %data.display(), error = %e, "Could not delete unit file");
            }
        }
        let _ = fs::remove_file(entry.dir.join(format!("{}.tag", unit_id)));
    }

    /// Deletes least-recently-written files until the context fits its cap.
    /// The just-written unit is last in write order, so an oversized unit is
    /// evicted only after everything older is gone.
    fn enforce_cap(&self, entry: &ContextEntry, index: &mut FileIndex) {
        if self.max_bytes_per_context == 0 {
            return;
        }
        while index.total > self.max_bytes_per_context {
            let Some(oldest) = index.records.first().map(|r| r.unit_id) else {
                break;
            };
            debug!(unit_id = oldest, "Evicting least-recently-written unit over byte cap");
            index.drop_record(oldest);
            self.delete_unit_files(entry, oldest);
        }
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
                        let dir = self.context_dir(&ctx.context_id);
                        self.contexts.insert(
                            ctx.context_id,
                            Arc::new(ContextEntry {
                                dir,
                                index: Mutex::new(ctx.index),
                            }),
                        );
                    }
                    debug!(contexts = self.contexts.len(), "Loaded file store index");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not load file store index, starting empty");
                }
            }
        }
        let _ = fs::remove_file(&path);
    }

    fn save_index(&self) {
        let persisted: Vec<PersistedContext> = self
            .contexts
            .iter()
            .map(|entry| PersistedContext {
                context_id: entry.key().clone(),
                index: entry.value().index.lock().clone(),
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
            warn!(path = %path.display(), error = %e, "Could not write file store index");
        }
    }
}

impl DataStore for FileStore {
    fn save(
        &self,
        context_id: &str,
        unit_id: UnitId,
        data: &[u8],
        type_tag: Option<&str>,
    ) -> Result<(), StorageError> {
        let entry = self.entry_or_create(context_id);
        let mut index = entry.index.lock();

        fs::create_dir_all(&entry.dir)?;
        let data_path = entry.dir.join(format!("{}.data", unit_id));
        fs::write(&data_path, data)?;

        // Sidecar is best-effort: its absence on read is not an error.
        let tag_path = entry.dir.join(format!("{}.tag", unit_id));
        match type_tag {
            Some(tag) => {
                if let Err(e) = fs::write(&tag_path, tag) {
                    warn!(path = %tag_path.display(), error = %e, "Could not write type tag sidecar");
                }
            }
            None => {
                let _ = fs::remove_file(&tag_path);
            }
        }

        index.push_record(FileRecord {
            unit_id,
            size: data.len() as u64,
            type_tag: type_tag.map(str::to_string),
        });
        self.enforce_cap(&entry, &mut index);

        debug!(
            context_id = %context_id,
            unit_id,
            size = data.len(),
            "Stored unit file"
        );
        Ok(())
    }

    fn load(&self, context_id: &str, unit_id: UnitId) -> Option<Vec<u8>> {
        let path = self.data_path(context_id, unit_id);
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(context_id = %context_id, unit_id, error = %e, "Could not read unit file");
                }
                None
            }
        }
    }

    fn remove(&self, context_id: &str, unit_id: UnitId) {
        if let Some(entry) = self.entry(context_id) {
            let mut index = entry.index.lock();
            index.drop_record(unit_id);
            self.delete_unit_files(&entry, unit_id);
        }
    }

    fn remove_context(&self, context_id: &str) {
        if let Some((_, entry)) = self.contexts.remove(context_id) {
            debug!(context_id = %context_id, "Removing context directory");
            let _index = entry.index.lock();
            if let Err(e) = fs::remove_dir_all(&entry.dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(context_id = %context_id, error = %e, "Could not delete context directory");
                }
            }
            prune_fanout_dirs(&entry.dir);
        }
    }

    fn list(&self, context_id: &str) -> Vec<UnitSummary> {
        match self.entry(context_id) {
            Some(entry) => entry
                .index
                .lock()
                .records
                .iter()
                .map(|r| UnitSummary {
                    unit_id: r.unit_id,
                    size: r.size,
                    type_tag: r.type_tag.clone(),
                })
                .collect(),
            None => Vec::new(),
        }
    }

    fn total_size(&self, context_id: &str) -> u64 {
        self.entry(context_id)
            .map(|entry| entry.index.lock().total)
            .unwrap_or(0)
    }

    fn destroy(&self) {
        debug!(root = %self.root.display(), "Flushing file store index");
        self.save_index();
    }
}
