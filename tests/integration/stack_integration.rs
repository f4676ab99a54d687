//! Integration tests for the composed store stack.

use crate::integration::test_utils::StringCodec;
use sediment::cache::grouping::UnitGrouper;
use sediment::store::disk::DiskStore;
use sediment::store::file::FileStore;
use sediment::store::DataStore;
use sediment::unit::Payload;
use sediment::{StoreStack, StoredUnit};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn backend(dir: &TempDir) -> Arc<dyn DataStore> {
    Arc::new(DiskStore::new(dir.path(), 1024 * 1024).unwrap())
}

fn full_stack(dir: &TempDir) -> StoreStack<String> {
    StoreStack::builder(backend(dir), Arc::new(StringCodec))
        .session(16, 0)
        .second_level(16)
        .write_behind(
            16,
            Duration::from_millis(20),
            Duration::from_millis(50),
        )
        .build()
}

/// The end-to-end lifecycle: add two units, read them back, wipe the
/// context, and confirm nothing is left anywhere.
#[test]
fn test_end_to_end_lifecycle() {
    let dir = TempDir::new().unwrap();
    let stack = full_stack(&dir);

    stack.add("s1", 1, Arc::new("one".to_string())).unwrap();
    stack.add("s1", 2, Arc::new("two".to_string())).unwrap();
    stack.end_request("s1");

    assert_eq!(stack.get("s1", 1).as_deref(), Some(&"one".to_string()));
    assert_eq!(stack.get("s1", 2).as_deref(), Some(&"two".to_string()));

    stack.remove_all("s1");
    assert!(stack.get("s1", 1).is_none());
    assert!(stack.get("s1", 2).is_none());
    assert_eq!(stack.total_size("s1"), 0);
    stack.destroy();
}

/// `remove_all` is idempotent through every tier.
#[test]
fn test_remove_all_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let stack = full_stack(&dir);

    stack.add("s1", 1, Arc::new("x".to_string())).unwrap();
    stack.end_request("s1");

    stack.remove_all("s1");
    stack.remove_all("s1");
    assert!(stack.get("s1", 1).is_none());
    assert_eq!(stack.total_size("s1"), 0);
    stack.destroy();
}

/// Units survive the full trip down to disk and back up after the caches
/// are no longer serving them.
#[test]
fn test_reads_fall_back_to_disk_after_restartlike_rebuild() {
    let dir = TempDir::new().unwrap();

    {
        let stack = full_stack(&dir);
        stack.add("s1", 1, Arc::new("durable".to_string())).unwrap();
        stack.end_request("s1");
        stack.destroy();
    }

    // Fresh stack over the same directory: only the disk copy remains.
    let stack = full_stack(&dir);
    assert_eq!(stack.get("s1", 1).as_deref(), Some(&"durable".to_string()));
    stack.destroy();
}

/// Units buffered in a request never reach the backend when the context is
/// wiped before the request ends.
#[test]
fn test_remove_all_mid_request_discards_buffer() {
    let dir = TempDir::new().unwrap();
    let stack = full_stack(&dir);

    stack.add("s1", 1, Arc::new("fleeting".to_string())).unwrap();
    stack.remove_all("s1");
    stack.end_request("s1");

    assert!(stack.get("s1", 1).is_none());
    assert_eq!(stack.total_size("s1"), 0);
    stack.destroy();
}

/// Grouping by unit value: filling a third group expires the oldest one
/// all the way down to the backend.
#[test]
fn test_grouping_expires_oldest_group_through_stack() {
    struct ValueGrouper;
    impl UnitGrouper<String> for ValueGrouper {
        fn group_of(&self, _context_id: &str, unit: &StoredUnit<String>) -> String {
            match &unit.payload {
                Payload::Raw(value) => value.as_str().to_string(),
                Payload::Encoded { .. } => "encoded".to_string(),
            }
        }
    }

    let dir = TempDir::new().unwrap();
    let stack = StoreStack::builder(backend(&dir), Arc::new(StringCodec))
        .grouping(Arc::new(ValueGrouper), 2, false)
        .build();

    stack.add("s1", 1, Arc::new("checkout".to_string())).unwrap();
    stack.add("s1", 2, Arc::new("search".to_string())).unwrap();
    stack.end_request("s1");
    stack.add("s1", 3, Arc::new("admin".to_string())).unwrap();
    stack.end_request("s1");

    // "checkout" was the oldest group once "admin" arrived.
    assert!(stack.get("s1", 1).is_none());
    assert!(stack.get("s1", 2).is_some());
    assert!(stack.get("s1", 3).is_some());
    stack.destroy();
}

/// Listings carry the codec's type tag through to a backend that stores
/// them (the one-file-per-unit flavor).
#[test]
fn test_listing_carries_type_tags() {
    let dir = TempDir::new().unwrap();
    let file_backend: Arc<dyn DataStore> =
        Arc::new(FileStore::new(dir.path(), 0).unwrap());
    let stack = StoreStack::builder(file_backend, Arc::new(StringCodec)).build();

    stack.add("s1", 1, Arc::new("tagged".to_string())).unwrap();
    stack.end_request("s1");

    let listing = stack.list("s1");
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].type_tag.as_deref(), Some("String"));
    stack.destroy();
}
