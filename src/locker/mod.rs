use owning_ref::OwningHandle;
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cancel::CancellationToken;
use crate::config::LockerConfig;
use crate::error::LockError;
use crate::guard::{Guard, OwnedHeldLock};
use crate::mutex::{Interrupted, ReentrantLock};
use crate::registry::Registry;

/// Locks entities by key, similar to row-level locking in a database.
/// It initially considers all keys as "unlocked", but they can be locked
/// and if a second thread tries to acquire a lock for the same key, it will have to wait.
/// Locks for different keys never wait for each other.
///
/// Locks are reentrant: a thread holding the lock for a key can lock it again without blocking.
/// The key stays locked until all guards of that thread are released.
///
/// There are two styles of API:
/// - Scoped guards: [Locker::lock], [Locker::lock_timeout], [Locker::try_lock] and [Locker::lock_cancellable]
///   return a [Guard] that unlocks when it is dropped or [closed](Guard::close).
/// - Callbacks: [Locker::with_lock], [Locker::with_lock_timeout] and [Locker::with_lock_cancellable] run
///   a closure while the lock is held and always unlock afterwards, even if the closure panics.
///
/// ```
/// use entitylocker::{EntityLocker, Locker};
///
/// let locker = EntityLocker::new();
/// let guard1 = locker.lock(4);
/// let _guard2 = locker.lock(5);
///
/// // Locking 4 again on this thread doesn't block since the lock is reentrant
/// let guard3 = locker.lock(4);
/// assert_eq!(2, locker.reservations(&4));
///
/// // 4 is only unlocked for other threads once both guards are gone
/// std::mem::drop(guard3);
/// std::mem::drop(guard1);
/// assert_eq!(0, locker.reservations(&4));
/// assert_eq!(1, locker.num_locked());
/// ```
///
/// You can use an arbitrary type as key, as long as that type implements [PartialEq] + [Eq] + [Hash] + [Clone] + [Debug].
///
/// ```
/// use entitylocker::{EntityLocker, Locker};
///
/// #[derive(PartialEq, Eq, Hash, Clone, Debug)]
/// struct RowId(u32);
///
/// let locker = EntityLocker::new();
/// let guard = locker.lock(RowId(4));
/// ```
///
/// Deadlocks between threads that lock multiple keys in different orders are not detected.
/// Lock keys in a consistent order if you need more than one at a time.
pub trait Locker<K>: Default
where
    K: Eq + PartialEq + Hash + Clone + Debug,
{
    /// A handle to a held lock.
    /// The guard internally borrows the [Locker], so the [Locker] will not be dropped while a guard exists.
    type Guard<'a>: Debug
    where
        Self: 'a;

    /// An owned handle to a held lock.
    /// This guard is only available from a [Locker] that is wrapped in an [Arc]. It is identical to [Locker::Guard], except that rather than borrowing the [Locker], it clones the [Arc], incrementing the reference count.
    /// This means that unlike [Locker::Guard], it will have the `'static` lifetime.
    type OwnedGuard: Debug;

    /// Create a new locker with the default configuration where no key is locked
    #[inline]
    fn new() -> Self {
        Self::default()
    }

    /// Create a new locker where no key is locked
    fn with_config(config: LockerConfig) -> Self;

    /// The configuration this locker was created with
    fn config(&self) -> LockerConfig;

    /// Return the number of keys that are currently locked or waited for
    fn num_locked(&self) -> usize;

    /// Return the number of outstanding reservations for a key, i.e. the number of guards
    /// (including nested guards of the owning thread) plus the number of threads waiting for it.
    /// Zero means the locker has no state for this key.
    fn reservations(&self, key: &K) -> usize;

    /// Returns true if the current thread holds the lock for this key
    fn is_held_by_current_thread(&self, key: &K) -> bool;

    /// Lock a key, blocking until it becomes available.
    ///
    /// If the key is currently locked by a different thread, then the current thread blocks until it becomes available.
    /// If the current thread already holds it, this returns immediately and the key stays locked until both guards are released.
    fn lock(&self, key: K) -> Self::Guard<'_>;

    /// Lock a key, blocking until it becomes available.
    ///
    /// This is similar to [Locker::lock], but it works on an `Arc<Locker>` instead of a [Locker] and
    /// returns a guard that keeps the [Arc] alive instead of borrowing the [Locker].
    ///
    /// ```
    /// use entitylocker::{EntityLocker, Locker};
    /// use std::sync::Arc;
    ///
    /// let locker = Arc::new(EntityLocker::new());
    /// let guard = locker.lock_owned(4);
    /// std::mem::drop(guard);
    /// assert_eq!(0, locker.num_locked());
    /// ```
    fn lock_owned(self: &Arc<Self>, key: K) -> Self::OwnedGuard;

    /// Attempts to lock a key without blocking.
    ///
    /// Errors
    /// -----
    /// Returns [LockError::WouldBlock] if another thread holds the lock.
    ///
    /// ```
    /// use entitylocker::{EntityLocker, LockError, Locker};
    /// use std::sync::Arc;
    ///
    /// let locker = Arc::new(EntityLocker::new());
    /// let guard = locker.lock(4);
    ///
    /// let other_thread = {
    ///     let locker = Arc::clone(&locker);
    ///     std::thread::spawn(move || locker.try_lock(4).map(|_| ()))
    /// };
    /// assert_eq!(Err(LockError::WouldBlock { key: 4 }), other_thread.join().unwrap());
    /// ```
    fn try_lock(&self, key: K) -> Result<Self::Guard<'_>, LockError<K>>;

    /// Like [Locker::try_lock], but returns an owned guard, see [Locker::lock_owned].
    fn try_lock_owned(self: &Arc<Self>, key: K) -> Result<Self::OwnedGuard, LockError<K>>;

    /// Lock a key, waiting at most `timeout` for it to become available.
    ///
    /// Errors
    /// -----
    /// Returns [LockError::Timeout] if the key couldn't be locked in time. Nothing is left behind for the key in that case.
    ///
    /// ```
    /// use entitylocker::{EntityLocker, Locker};
    /// use std::time::Duration;
    ///
    /// let locker = EntityLocker::new();
    /// let guard = locker.lock_timeout(4, Duration::from_secs(1)).unwrap();
    /// assert_eq!(&4, guard.key());
    /// ```
    fn lock_timeout(&self, key: K, timeout: Duration) -> Result<Self::Guard<'_>, LockError<K>>;

    /// Like [Locker::lock_timeout], but returns an owned guard, see [Locker::lock_owned].
    fn lock_timeout_owned(
        self: &Arc<Self>,
        key: K,
        timeout: Duration,
    ) -> Result<Self::OwnedGuard, LockError<K>>;

    /// Lock a key, waiting until it becomes available, `timeout` (if given) passes or `cancellation` is cancelled.
    ///
    /// Errors
    /// -----
    /// - Returns [LockError::Cancelled] if the token is cancelled before the key is locked.
    ///   A thread that already holds the key still re-enters it, even with a cancelled token.
    /// - Returns [LockError::Timeout] if there is a timeout and it passes before the key is locked.
    fn lock_cancellable(
        &self,
        key: K,
        timeout: Option<Duration>,
        cancellation: &CancellationToken,
    ) -> Result<Self::Guard<'_>, LockError<K>>;

    /// Run `action` while holding the lock for `key`, blocking until the key is available.
    /// The lock is released when `action` returns or panics.
    ///
    /// ```
    /// use entitylocker::{EntityLocker, Locker};
    ///
    /// let locker = EntityLocker::new();
    /// let doubled = locker.with_lock(7, |id| id * 2);
    /// assert_eq!(14, doubled);
    /// assert_eq!(0, locker.num_locked());
    /// ```
    fn with_lock<R>(&self, key: K, action: impl FnOnce(&K) -> R) -> R {
        let _guard = self.lock(key.clone());
        action(&key)
    }

    /// Run `action` while holding the lock for `key`, waiting at most `timeout` for it.
    /// `action` doesn't run if the lock couldn't be acquired in time.
    ///
    /// Errors
    /// -----
    /// Returns [LockError::Timeout] if the key couldn't be locked in time.
    fn with_lock_timeout<R>(
        &self,
        key: K,
        timeout: Duration,
        action: impl FnOnce(&K) -> R,
    ) -> Result<R, LockError<K>> {
        let _guard = self.lock_timeout(key.clone(), timeout)?;
        Ok(action(&key))
    }

    /// Run `action` while holding the lock for `key`, see [Locker::lock_cancellable] for the waiting behavior.
    /// `action` doesn't run if the lock couldn't be acquired.
    fn with_lock_cancellable<R>(
        &self,
        key: K,
        timeout: Option<Duration>,
        cancellation: &CancellationToken,
        action: impl FnOnce(&K) -> R,
    ) -> Result<R, LockError<K>> {
        let _guard = self.lock_cancellable(key.clone(), timeout, cancellation)?;
        Ok(action(&key))
    }
}

#[derive(Clone, Copy, Debug)]
enum Wait {
    Unbounded,
    NonBlocking,
    Timeout(Duration),
}

impl Wait {
    fn deadline(self) -> Option<Instant> {
        match self {
            Wait::Unbounded => None,
            Wait::NonBlocking => Some(Instant::now()),
            // A timeout too large to represent as an Instant never expires
            Wait::Timeout(timeout) => Instant::now().checked_add(timeout),
        }
    }
}

/// The standard [Locker] implementation. See [Locker] for the API.
///
/// Under the hood, this is a [HashMap](std::collections::HashMap) from keys to reentrant locks, guarded by a
/// [Mutex](std::sync::Mutex) that is only held for map lookups and never while waiting for a key.
pub struct EntityLocker<K>
where
    K: Eq + PartialEq + Hash + Clone + Debug,
{
    config: LockerConfig,
    registry: Registry<K>,
}

impl<K> Default for EntityLocker<K>
where
    K: Eq + PartialEq + Hash + Clone + Debug,
{
    #[inline]
    fn default() -> Self {
        Self::_new(LockerConfig::default())
    }
}

impl<K> Locker<K> for EntityLocker<K>
where
    K: Eq + PartialEq + Hash + Clone + Debug + 'static,
{
    type Guard<'a> = Guard<'a, K, &'a Self>;
    type OwnedGuard = Guard<'static, K, Arc<EntityLocker<K>>>;

    #[inline]
    fn with_config(config: LockerConfig) -> Self {
        Self::_new(config)
    }

    #[inline]
    fn config(&self) -> LockerConfig {
        self.config
    }

    #[inline]
    fn num_locked(&self) -> usize {
        self.registry.len()
    }

    #[inline]
    fn reservations(&self, key: &K) -> usize {
        self.registry.reservations(key)
    }

    fn is_held_by_current_thread(&self, key: &K) -> bool {
        self.registry
            .lock_for(key)
            .map_or(false, |lock| lock.is_held_by_current_thread())
    }

    fn lock(&self, key: K) -> Self::Guard<'_> {
        Self::_lock(self, key)
    }

    fn lock_owned(self: &Arc<Self>, key: K) -> Self::OwnedGuard {
        Self::_lock(Arc::clone(self), key)
    }

    fn try_lock(&self, key: K) -> Result<Self::Guard<'_>, LockError<K>> {
        Self::_acquire(self, key, Wait::NonBlocking, None)
    }

    fn try_lock_owned(self: &Arc<Self>, key: K) -> Result<Self::OwnedGuard, LockError<K>> {
        Self::_acquire(Arc::clone(self), key, Wait::NonBlocking, None)
    }

    fn lock_timeout(&self, key: K, timeout: Duration) -> Result<Self::Guard<'_>, LockError<K>> {
        Self::_acquire(self, key, Wait::Timeout(timeout), None)
    }

    fn lock_timeout_owned(
        self: &Arc<Self>,
        key: K,
        timeout: Duration,
    ) -> Result<Self::OwnedGuard, LockError<K>> {
        Self::_acquire(Arc::clone(self), key, Wait::Timeout(timeout), None)
    }

    fn lock_cancellable(
        &self,
        key: K,
        timeout: Option<Duration>,
        cancellation: &CancellationToken,
    ) -> Result<Self::Guard<'_>, LockError<K>> {
        let wait = timeout.map_or(Wait::Unbounded, Wait::Timeout);
        Self::_acquire(self, key, wait, Some(cancellation))
    }
}

impl<K> EntityLocker<K>
where
    K: Eq + PartialEq + Hash + Clone + Debug,
{
    fn _new(config: LockerConfig) -> Self {
        Self {
            config,
            registry: Registry::new(config.fairness),
        }
    }

    fn _lock<'a, S: 'a + Deref<Target = Self>>(this: S, key: K) -> Guard<'a, K, S> {
        let held = {
            let reservation = this.registry.reserve(&key);
            // Now we have a reservation and an Arc::clone of the lock for this key, and the registry mutex is already
            // unlocked so other threads can access the hash map.
            // The following blocks until the lock for this key is acquired.
            let held = OwningHandle::new_with_fn(
                Arc::clone(reservation.lock()),
                |lock: *const ReentrantLock| {
                    let lock: &ReentrantLock = unsafe { &*lock };
                    lock.lock()
                },
            );
            reservation.commit();
            held
        };
        Guard::new(this, key, held)
    }

    fn _acquire<'a, S: 'a + Deref<Target = Self>>(
        this: S,
        key: K,
        wait: Wait,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Guard<'a, K, S>, LockError<K>> {
        let deadline = wait.deadline();
        let acquired: Result<OwnedHeldLock<'a>, Interrupted> = {
            let reservation = this.registry.reserve(&key);
            // Registering fails only for an already cancelled token, which acquire() checks itself
            // after allowing re-entry.
            let registration =
                cancellation.and_then(|token| token.register(reservation.lock()));
            // If anything below fails or panics, dropping the reservation gives it back.
            // The lock itself is only unlocked by a guard, so a failed attempt never unlocks.
            let acquired = OwningHandle::try_new(
                Arc::clone(reservation.lock()),
                |lock: *const ReentrantLock| {
                    let lock: &ReentrantLock = unsafe { &*lock };
                    lock.acquire(deadline, cancellation)
                },
            );
            std::mem::drop(registration);
            if acquired.is_ok() {
                reservation.commit();
            }
            acquired
        };

        match (acquired, wait) {
            (Ok(held), _) => Ok(Guard::new(this, key, held)),
            (Err(Interrupted::Cancelled), _) => {
                tracing::debug!(?key, "Waiting for lock was cancelled");
                Err(LockError::Cancelled { key })
            }
            (Err(Interrupted::TimedOut), Wait::Timeout(timeout)) => {
                tracing::debug!(?key, ?timeout, "Timed out waiting for lock");
                Err(LockError::Timeout { key, timeout })
            }
            (Err(Interrupted::TimedOut), Wait::NonBlocking) => Err(LockError::WouldBlock { key }),
            (Err(Interrupted::TimedOut), Wait::Unbounded) => {
                // Wait::Timeout only times out if its deadline was representable
                unreachable!("Waiting without a deadline can't time out")
            }
        }
    }

    pub(crate) fn _unlock(&self, key: &K, held: OwnedHeldLock<'_>) {
        self.registry.release_entry(key);

        // Only now, with the registry mutex unlocked again, release the lock itself and wake up
        // threads waiting for it. They still hold their own reservation, so if the entry was just
        // removed, nobody was waiting.
        std::mem::drop(held);
    }
}
