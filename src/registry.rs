use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::Fairness;
use crate::mutex::ReentrantLock;

struct Entry {
    lock: Arc<ReentrantLock>,
    // Number of guards and waiters for this key. The entry is removed when this drops to zero.
    reservations: usize,
}

/// Maps keys to their [ReentrantLock]. An entry exists exactly as long as somebody holds or waits for
/// the lock of its key.
///
/// Every thread has to take a reservation through [Registry::acquire_entry] before it touches the lock,
/// so when the count drops to zero nobody else can still be using that lock and the entry can go.
pub(crate) struct Registry<K> {
    fairness: Fairness,
    entries: Mutex<HashMap<K, Entry>>,
}

impl<K> Registry<K>
where
    K: Eq + PartialEq + Hash + Clone + Debug,
{
    pub fn new(fairness: Fairness) -> Self {
        Self {
            fairness,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<K, Entry>> {
        self.entries
            .lock()
            .expect("The global mutex protecting the lock registry is poisoned. This shouldn't happen since there shouldn't be any user code running while this lock is held so no thread should ever panic with it")
    }

    /// Adds a reservation for `key`, creating its entry if needed, and returns its lock.
    /// Every call must be matched by exactly one [Registry::release_entry].
    pub fn acquire_entry(&self, key: &K) -> Arc<ReentrantLock> {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(key) {
            entry.reservations += 1;
            return Arc::clone(&entry.lock);
        }
        tracing::trace!(?key, "Creating lock entry");
        let lock = Arc::new(ReentrantLock::new(self.fairness));
        let insert_result = entries.insert(
            key.clone(),
            Entry {
                lock: Arc::clone(&lock),
                reservations: 1,
            },
        );
        assert!(
            insert_result.is_none(),
            "We just checked that the entry doesn't exist, why does it exist now?"
        );
        lock
    }

    /// Gives back a reservation taken by [Registry::acquire_entry] and removes the entry once it was the last one.
    ///
    /// This doesn't unlock anything. Callers holding the lock must unlock it after this returns,
    /// so that the registry mutex isn't held while waiters are woken up.
    pub fn release_entry(&self, key: &K) {
        let mut entries = self.entries();
        let entry = entries.get_mut(key).unwrap_or_else(|| {
            panic!(
                "Released a reservation for {:?} but there is no entry for it. Every release must be matched by an acquire",
                key
            )
        });
        entry.reservations -= 1;
        if entry.reservations == 0 {
            let remove_result = entries.remove(key);
            assert!(
                remove_result.is_some(),
                "We just got this entry above from the hash map, it cannot have vanished since then"
            );
            tracing::trace!(?key, "Removed lock entry");
        }
    }

    /// Takes a reservation that is given back automatically unless it is committed.
    pub fn reserve<'r>(&'r self, key: &'r K) -> Reservation<'r, K> {
        let lock = self.acquire_entry(key);
        Reservation {
            registry: self,
            key,
            lock,
            committed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn reservations(&self, key: &K) -> usize {
        self.entries()
            .get(key)
            .map_or(0, |entry| entry.reservations)
    }

    pub fn lock_for(&self, key: &K) -> Option<Arc<ReentrantLock>> {
        self.entries().get(key).map(|entry| Arc::clone(&entry.lock))
    }
}

/// A reservation taken while trying to acquire a lock.
///
/// If the attempt fails for any reason (timeout, cancellation, unwinding) the reservation is
/// released on drop. On success, [Reservation::commit] hands it over to the guard.
pub(crate) struct Reservation<'r, K>
where
    K: Eq + PartialEq + Hash + Clone + Debug,
{
    registry: &'r Registry<K>,
    key: &'r K,
    lock: Arc<ReentrantLock>,
    committed: bool,
}

impl<K> Reservation<'_, K>
where
    K: Eq + PartialEq + Hash + Clone + Debug,
{
    pub fn lock(&self) -> &Arc<ReentrantLock> {
        &self.lock
    }

    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl<K> Drop for Reservation<'_, K>
where
    K: Eq + PartialEq + Hash + Clone + Debug,
{
    fn drop(&mut self) {
        if !self.committed {
            self.registry.release_entry(self.key);
        }
    }
}
