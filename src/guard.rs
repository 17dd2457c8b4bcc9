use owning_ref::OwningHandle;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;

use crate::locker::EntityLocker;
use crate::mutex::{HeldLock, ReentrantLock};

pub(crate) type OwnedHeldLock<'a> = OwningHandle<Arc<ReentrantLock>, HeldLock<'a>>;

/// A RAII implementation of a scoped lock for keys of an [EntityLocker]. When this instance is dropped
/// (falls out of scope) or [closed](Guard::close), the lock will be unlocked.
///
/// Guards can't be sent to other threads since only the thread that locked a key can unlock it.
#[must_use = "if unused the lock will immediately unlock"]
pub struct Guard<'a, K, P>
where
    K: Eq + PartialEq + Hash + Clone + Debug,
    P: Deref<Target = EntityLocker<K>>,
{
    locker: P,
    key: K,
    held: Option<OwnedHeldLock<'a>>,
}

impl<'a, K, P> Guard<'a, K, P>
where
    K: Eq + PartialEq + Hash + Clone + Debug,
    P: Deref<Target = EntityLocker<K>>,
{
    pub(crate) fn new(locker: P, key: K, held: OwnedHeldLock<'a>) -> Self {
        Self {
            locker,
            key,
            held: Some(held),
        }
    }

    /// The key this guard locks
    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns true if [Guard::close] was already called
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.held.is_none()
    }

    /// Unlocks the key. Calling this more than once has no further effect.
    ///
    /// ```
    /// use entitylocker::{EntityLocker, Locker};
    ///
    /// let locker = EntityLocker::new();
    /// let mut guard = locker.lock(1);
    /// guard.close();
    /// guard.close();
    /// assert_eq!(0, locker.num_locked());
    /// ```
    pub fn close(&mut self) {
        if let Some(held) = self.held.take() {
            self.locker._unlock(&self.key, held);
        }
    }
}

impl<'a, K, P> Drop for Guard<'a, K, P>
where
    K: Eq + PartialEq + Hash + Clone + Debug,
    P: Deref<Target = EntityLocker<K>>,
{
    fn drop(&mut self) {
        self.close();
    }
}

impl<'a, K, P> Debug for Guard<'a, K, P>
where
    K: Eq + PartialEq + Hash + Clone + Debug,
    P: Deref<Target = EntityLocker<K>>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guard({:?})", self.key)
    }
}
