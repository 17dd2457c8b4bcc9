use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::mutex::ReentrantLock;

/// A token that interrupts threads waiting in [Locker::lock_cancellable](crate::Locker::lock_cancellable)
/// or [Locker::with_lock_cancellable](crate::Locker::with_lock_cancellable).
///
/// Clones share their state, so one clone can be handed to the waiting thread and another one kept
/// to cancel it. Cancelling is permanent. Threads that already hold their lock are not affected.
///
/// ```
/// use entitylocker::{CancellationToken, EntityLocker, LockError, Locker};
///
/// let locker = EntityLocker::new();
/// let token = CancellationToken::new();
/// token.cancel();
///
/// let result = locker.lock_cancellable(3, None, &token);
/// assert!(matches!(result, Err(LockError::Cancelled { key: 3 })));
/// assert_eq!(0, locker.num_locked());
/// ```
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    waiters: Mutex<Waiters>,
}

#[derive(Default)]
struct Waiters {
    next_id: u64,
    locks: Vec<(u64, Weak<ReentrantLock>)>,
}

impl CancellationToken {
    /// Create a token that isn't cancelled yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel all current and future waits using this token
    pub fn cancel(&self) {
        let locks = {
            let mut waiters = self.inner.waiters();
            self.inner.cancelled.store(true, Ordering::SeqCst);
            std::mem::take(&mut waiters.locks)
        };
        for (_, lock) in locks {
            if let Some(lock) = lock.upgrade() {
                lock.wake_all();
            }
        }
    }

    /// Returns true once [CancellationToken::cancel] was called on this token or one of its clones
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Makes [CancellationToken::cancel] wake up threads waiting for `lock`.
    /// Returns [None] if the token is already cancelled.
    pub(crate) fn register(&self, lock: &Arc<ReentrantLock>) -> Option<Registration<'_>> {
        let mut waiters = self.inner.waiters();
        if self.is_cancelled() {
            return None;
        }
        let id = waiters.next_id;
        waiters.next_id += 1;
        waiters.locks.push((id, Arc::downgrade(lock)));
        Some(Registration { token: self, id })
    }
}

impl Inner {
    fn waiters(&self) -> MutexGuard<'_, Waiters> {
        self.waiters
            .lock()
            .expect("The waiter list of a cancellation token is poisoned. This shouldn't happen since no user code runs while it is held")
    }
}

impl Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Unregisters a waiter from its [CancellationToken] when dropped.
pub(crate) struct Registration<'t> {
    token: &'t CancellationToken,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let id = self.id;
        self.token
            .inner
            .waiters()
            .locks
            .retain(|(registered, _)| *registered != id);
    }
}

#[cfg(test)]
mod tests {
    use super::CancellationToken;
    use crate::config::Fairness;
    use crate::mutex::ReentrantLock;
    use std::sync::Arc;

    #[test]
    fn test_clones_share_cancellation() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        assert_eq!("CancellationToken { cancelled: true }", format!("{:?}", clone));
    }

    #[test]
    fn test_register_after_cancel_fails() {
        let token = CancellationToken::new();
        let lock = Arc::new(ReentrantLock::new(Fairness::Barging));
        assert!(token.register(&lock).is_some());
        token.cancel();
        assert!(token.register(&lock).is_none());
    }

    #[test]
    fn test_registration_is_removed_on_drop() {
        let token = CancellationToken::new();
        let lock = Arc::new(ReentrantLock::new(Fairness::Barging));
        let first = token.register(&lock);
        let second = token.register(&lock);
        assert_eq!(2, token.inner.waiters().locks.len());
        std::mem::drop(first);
        assert_eq!(1, token.inner.waiters().locks.len());
        std::mem::drop(second);
        assert!(token.inner.waiters().locks.is_empty());
    }
}
