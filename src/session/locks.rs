// Per-research mutual exclusion
//
// Stop, resume, message delivery and exit settlement for the same Research
// run one at a time. Different Researches never contend.

use crate::utils::lock_mutex_recover;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Lock handle for `key`. Hold the guard of the returned mutex for the
    /// duration of the critical section.
    pub fn get(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = lock_mutex_recover(&self.locks);
        // Drop entries nobody holds
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        lock_mutex_recover(&self.locks).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                thread::spawn(move || {
                    let lock = locks.get("r1");
                    let _guard = lock_mutex_recover(&lock);
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let a = locks.get("a");
        let _guard_a = lock_mutex_recover(&a);
        let b = locks.get("b");
        assert!(b.try_lock().is_ok());
    }

    #[test]
    fn test_unused_entries_are_pruned() {
        let locks = KeyedLocks::new();
        drop(locks.get("a"));
        drop(locks.get("b"));
        let _c = locks.get("c");
        assert_eq!(locks.len(), 1);
    }
}
