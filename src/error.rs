use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;

/// Errors that can happen when acquiring a lock with [Locker::lock_timeout](crate::Locker::lock_timeout),
/// [Locker::try_lock](crate::Locker::try_lock), [Locker::lock_cancellable](crate::Locker::lock_cancellable)
/// or one of the callback based variants.
///
/// Whenever one of these errors is returned, the lock was not acquired and the locker is in the same
/// state as if the call had never happened.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LockError<K: Debug> {
    /// The lock could not be acquired within the requested duration.
    #[error("Timed out after {timeout:?} waiting for the lock on {key:?}")]
    Timeout {
        /// Key of the lock we tried to acquire
        key: K,
        /// How long we waited
        timeout: Duration,
    },

    /// The wait was cancelled through a [CancellationToken](crate::CancellationToken) before the lock was acquired.
    #[error("Waiting for the lock on {key:?} was cancelled")]
    Cancelled {
        /// Key of the lock we tried to acquire
        key: K,
    },

    /// The lock is currently held by another thread and we were asked not to wait.
    #[error("The lock on {key:?} is held by another thread")]
    WouldBlock {
        /// Key of the lock we tried to acquire
        key: K,
    },
}

impl<K: Debug> LockError<K> {
    /// The key of the lock that couldn't be acquired
    pub fn key(&self) -> &K {
        match self {
            Self::Timeout { key, .. } | Self::Cancelled { key } | Self::WouldBlock { key } => key,
        }
    }

    /// Returns ownership of the key of the lock that couldn't be acquired
    pub fn into_key(self) -> K {
        match self {
            Self::Timeout { key, .. } | Self::Cancelled { key } | Self::WouldBlock { key } => key,
        }
    }
}
