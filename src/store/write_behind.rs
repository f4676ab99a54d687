//! Write-behind decoration for a [`DataStore`].
//!
//! Saves are published to a side index and queued for a single consumer
//! thread, so the request thread returns as soon as the entry is enqueued.
//! Reads consult the side index first, which keeps read-your-write intact
//! while an entry is still in flight. When the queue stays full past the
//! offer timeout, the save falls through synchronously on the caller thread;
//! back-pressure degrades latency, never durability.
//!
//! Removals win: a remove scrubs the queue and the side index, then takes
//! the same write mutex the consumer holds while flushing, so a unit removed
//! after an in-flight flush began is removed from the delegate afterwards.

use crate::error::StorageError;
use crate::store::DataStore;
use crate::types::{UnitId, UnitSummary};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// A save waiting to be flushed. Shared between the queue and the side
/// index; pointer identity decides whether an index entry still belongs to
/// a given queued save.
struct PendingEntry {
    context_id: String,
    unit_id: UnitId,
    data: Vec<u8>,
    type_tag: Option<String>,
}

struct QueueState {
    entries: VecDeque<Arc<PendingEntry>>,
    shutdown: bool,
}

struct Shared {
    delegate: Arc<dyn DataStore>,
    queue: Mutex<QueueState>,
    not_full: Condvar,
    not_empty: Condvar,
    /// Serializes delegate writes against removals.
    write_lock: Mutex<()>,
    /// Set by the consumer on exit; lets shutdown wait with a bound.
    done: Mutex<bool>,
    done_cv: Condvar,
    pending: DashMap<(String, UnitId), Arc<PendingEntry>>,
    capacity: usize,
    offer_timeout: Duration,
    poll_timeout: Duration,
}

impl Shared {
    /// Tries to enqueue within the offer timeout. `false` means the queue
    /// stayed full and the caller must flush synchronously.
    fn offer(&self, entry: Arc<PendingEntry>) -> bool {
        let mut queue = self.queue.lock();
        if queue.shutdown {
            return false;
        }
        if queue.entries.len() >= self.capacity {
            self.not_full.wait_for(&mut queue, self.offer_timeout);
            if queue.shutdown || queue.entries.len() >= self.capacity {
                return false;
            }
        }
        queue.entries.push_back(entry);
        self.not_empty.notify_one();
        true
    }

    /// Blocks up to the poll timeout for the next entry. `None` on timeout
    /// or when shut down with an empty queue.
    fn poll(&self) -> Option<Arc<PendingEntry>> {
        let mut queue = self.queue.lock();
        if queue.entries.is_empty() {
            if queue.shutdown {
                return None;
            }
            self.not_empty.wait_for(&mut queue, self.poll_timeout);
        }
        let entry = queue.entries.pop_front();
        if entry.is_some() {
            self.not_full.notify_one();
        }
        entry
    }

    fn flush(&self, entry: &Arc<PendingEntry>) {
        let _write = self.write_lock.lock();
        let key = (entry.context_id.clone(), entry.unit_id);
        // A removed or superseded entry no longer owns its index slot; skip
        // the delegate write instead of resurrecting stale bytes.
        let still_current = self
            .pending
            .get(&key)
            .map(|current| Arc::ptr_eq(&current, entry))
            .unwrap_or(false);
        if !still_current {
            return;
        }
        if let Err(e) = self.delegate.save(
            &entry.context_id,
            entry.unit_id,
            &entry.data,
            entry.type_tag.as_deref(),
        ) {
            error!(
                context_id = %entry.context_id,
                unit_id = entry.unit_id,
                error = %e,
                "Deferred save failed, unit dropped"
            );
        }
        self.pending
            .remove_if(&key, |_, current| Arc::ptr_eq(current, entry));
    }

    fn drain_loop(&self) {
        loop {
            match self.poll() {
                Some(entry) => self.flush(&entry),
                None => {
                    if self.queue.lock().shutdown {
                        break;
                    }
                }
            }
        }
        debug!("Write-behind consumer stopped");
        *self.done.lock() = true;
        self.done_cv.notify_all();
    }
}

/// [`DataStore`] decorator that defers saves to a background thread.
pub struct WriteBehindStore {
    shared: Arc<Shared>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl WriteBehindStore {
    pub fn new(
        delegate: Arc<dyn DataStore>,
        capacity: usize,
        offer_timeout: Duration,
        poll_timeout: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            delegate,
            queue: Mutex::new(QueueState {
                entries: VecDeque::with_capacity(capacity),
                shutdown: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            write_lock: Mutex::new(()),
            done: Mutex::new(false),
            done_cv: Condvar::new(),
            pending: DashMap::new(),
            capacity: capacity.max(1),
            offer_timeout,
            poll_timeout,
        });

        let consumer_shared = Arc::clone(&shared);
        let consumer = thread::Builder::new()
            .name("write-behind".to_string())
            .spawn(move || consumer_shared.drain_loop());
        let consumer = match consumer {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Could not spawn write-behind consumer, saves run synchronously");
                shared.queue.lock().shutdown = true;
                None
            }
        };

        Self {
            shared,
            consumer: Mutex::new(consumer),
            destroyed: AtomicBool::new(false),
        }
    }

    fn save_sync(
        &self,
        entry: &Arc<PendingEntry>,
    ) -> Result<(), StorageError> {
        let _write = self.shared.write_lock.lock();
        let result = self.shared.delegate.save(
            &entry.context_id,
            entry.unit_id,
            &entry.data,
            entry.type_tag.as_deref(),
        );
        let key = (entry.context_id.clone(), entry.unit_id);
        self.shared
            .pending
            .remove_if(&key, |_, current| Arc::ptr_eq(current, entry));
        result
    }

    fn scrub(&self, context_id: &str, unit_id: Option<UnitId>) {
        {
            let mut queue = self.shared.queue.lock();
            queue.entries.retain(|e| {
                e.context_id != context_id || unit_id.is_some_and(|id| e.unit_id != id)
            });
            self.shared.not_full.notify_all();
        }
        match unit_id {
            Some(id) => {
                self.shared.pending.remove(&(context_id.to_string(), id));
            }
            None => {
                self.shared.pending.retain(|key, _| key.0 != context_id);
            }
        }
    }
}

impl DataStore for WriteBehindStore {
    fn save(
        &self,
        context_id: &str,
        unit_id: UnitId,
        data: &[u8],
        type_tag: Option<&str>,
    ) -> Result<(), StorageError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(StorageError::ShutDown);
        }
        if !self.shared.delegate.can_defer() {
            return self
                .shared
                .delegate
                .save(context_id, unit_id, data, type_tag);
        }

        let entry = Arc::new(PendingEntry {
            context_id: context_id.to_string(),
            unit_id,
            data: data.to_vec(),
            type_tag: type_tag.map(str::to_string),
        });
        // Publish before enqueueing so a read between the two still hits.
        self.shared
            .pending
            .insert((context_id.to_string(), unit_id), Arc::clone(&entry));

        if self.shared.offer(Arc::clone(&entry)) {
            Ok(())
        } else {
            debug!(
                context_id = %context_id,
                unit_id,
                "Write-behind queue full, saving synchronously"
            );
            self.save_sync(&entry)
        }
    }

    fn load(&self, context_id: &str, unit_id: UnitId) -> Option<Vec<u8>> {
        if let Some(entry) = self
            .shared
            .pending
            .get(&(context_id.to_string(), unit_id))
        {
            return Some(entry.data.clone());
        }
        self.shared.delegate.load(context_id, unit_id)
    }

    fn remove(&self, context_id: &str, unit_id: UnitId) {
        self.scrub(context_id, Some(unit_id));
        let _write = self.shared.write_lock.lock();
        self.shared.delegate.remove(context_id, unit_id);
    }

    fn remove_context(&self, context_id: &str) {
        self.scrub(context_id, None);
        let _write = self.shared.write_lock.lock();
        self.shared.delegate.remove_context(context_id);
    }

    fn list(&self, context_id: &str) -> Vec<UnitSummary> {
        self.shared.delegate.list(context_id)
    }

    fn total_size(&self, context_id: &str) -> u64 {
        self.shared.delegate.total_size(context_id)
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut queue = self.shared.queue.lock();
            queue.shutdown = true;
            self.shared.not_empty.notify_all();
            self.shared.not_full.notify_all();
        }
        if let Some(handle) = self.consumer.lock().take() {
            // The consumer drains what is queued before observing shutdown.
            // Wait with a bound rather than joining blindly, then detach if
            // it is still wedged inside a delegate write.
            let mut done = self.shared.done.lock();
            if !*done {
                self.shared
                    .done_cv
                    .wait_for(&mut done, self.shared.poll_timeout * 4);
            }
            let finished = *done;
            drop(done);
            if finished {
                if let Err(e) = handle.join() {
                    warn!(?e, "Write-behind consumer panicked during shutdown");
                }
            } else {
                warn!("Write-behind consumer did not stop in time, detaching");
            }
        }
        // Anything still pending was published but never flushed (consumer
        // failed to spawn, or a flush raced shutdown). Flush inline.
        let leftovers: Vec<Arc<PendingEntry>> = self
            .shared
            .pending
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        for entry in leftovers {
            self.shared.flush(&entry);
        }
        self.shared.delegate.destroy();
    }
}

impl Drop for WriteBehindStore {
    fn drop(&mut self) {
        self.destroy();
    }
}
