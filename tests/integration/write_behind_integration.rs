//! Integration tests for write-behind persistence over a real backend.

use sediment::store::disk::DiskStore;
use sediment::store::write_behind::WriteBehindStore;
use sediment::store::DataStore;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn deferred(dir: &TempDir, capacity: usize) -> (Arc<DiskStore>, WriteBehindStore) {
    let disk = Arc::new(DiskStore::new(dir.path(), 1024 * 1024).unwrap());
    let store = WriteBehindStore::new(
        disk.clone(),
        capacity,
        Duration::from_millis(20),
        Duration::from_millis(50),
    );
    (disk, store)
}

/// Everything written before shutdown is durable after it, whether it went
/// through the queue or the synchronous fallback.
#[test]
fn test_no_loss_under_sustained_writes() {
    let dir = TempDir::new().unwrap();
    let (_, store) = deferred(&dir, 4);

    for id in 0..200u32 {
        store
            .save("s1", id, format!("payload-{id}").as_bytes(), None)
            .unwrap();
    }
    store.destroy();

    let reopened = DiskStore::new(dir.path(), 1024 * 1024).unwrap();
    for id in 0..200u32 {
        assert_eq!(
            reopened.load("s1", id).unwrap(),
            format!("payload-{id}").as_bytes()
        );
    }
}

/// Reads see a just-written unit immediately, regardless of flush progress.
#[test]
fn test_read_your_write_through_queue() {
    let dir = TempDir::new().unwrap();
    let (_, store) = deferred(&dir, 64);

    for id in 0..50u32 {
        store.save("s1", id, &id.to_le_bytes(), None).unwrap();
        assert_eq!(store.load("s1", id).unwrap(), id.to_le_bytes());
    }
    store.destroy();
}

/// A remove issued after a save always wins, wherever the save was.
#[test]
fn test_remove_after_save_wins() {
    let dir = TempDir::new().unwrap();
    let (disk, store) = deferred(&dir, 64);

    for id in 0..20u32 {
        store.save("s1", id, b"temp", None).unwrap();
    }
    for id in 0..20u32 {
        store.remove("s1", id);
    }
    store.destroy();

    for id in 0..20u32 {
        assert!(disk.load("s1", id).is_none());
    }
}

/// Restart cycle through the decorated store: destroy flushes both the
/// queue and the backend index.
#[test]
fn test_restart_preserves_deferred_writes() {
    let dir = TempDir::new().unwrap();
    {
        let (_, store) = deferred(&dir, 8);
        store.save("s1", 1, b"deferred but durable", None).unwrap();
        store.destroy();
    }

    let (_, store) = deferred(&dir, 8);
    assert_eq!(store.load("s1", 1).unwrap(), b"deferred but durable");
    store.destroy();
}
