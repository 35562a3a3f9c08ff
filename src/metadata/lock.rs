use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Process-wide table of per-upload-ID locks.
///
/// The filesystem metadata backend round-trips a whole JSON document per
/// upload, so concurrent single-file upserts into the same upload must be
/// serialized or one of them silently disappears. The table only guards
/// map access; the document I/O runs under the per-upload lock, never under
/// the table mutex.
///
/// Entries are evicted by reference counting: when the releasing caller is
/// the last user of an entry, it is dropped on release. The table is thus
/// bounded by the number of uploads with in-flight mutations.
#[derive(Default)]
pub struct LockTable {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the exclusive lock for `key`.
    pub fn with_lock<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let lock = self.acquire(key);
        let result = {
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            f()
        };
        drop(lock);
        self.release(key);
        result
    }

    fn acquire(&self, key: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(key.to_string()).or_default().clone()
    }

    fn release(&self, key: &str) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lock) = map.get(key) {
            // Only the map itself still references the entry.
            if Arc::strong_count(lock) == 1 {
                map.remove(key);
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_lock_table_serializes_and_evicts() {
        let table = Arc::new(LockTable::new());
        let counter = Arc::new(Mutex::new(0u32));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let table = Arc::clone(&table);
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                table.with_lock("upload-1", || {
                    let mut n = counter.lock().unwrap();
                    *n += 1;
                });
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*counter.lock().unwrap(), 8);
        // All callers released, so the entry must be gone.
        assert_eq!(table.len(), 0);
    }
}
