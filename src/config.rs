/// Decides which waiting thread gets a lock once it becomes available.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Fairness {
    /// Any waiting thread may get the lock, and a thread that just arrived can take it before
    /// threads that have been waiting longer. This has the best throughput.
    #[default]
    Barging,

    /// Waiting threads get the lock in the order they started waiting for it.
    /// Reentrant acquisition by the thread already holding the lock still never waits.
    Fifo,
}

/// Configuration for an [EntityLocker](crate::EntityLocker), see [Locker::with_config](crate::Locker::with_config).
///
/// ```
/// use entitylocker::{EntityLocker, Fairness, Locker, LockerConfig};
///
/// let locker: EntityLocker<u64> = EntityLocker::with_config(LockerConfig {
///     fairness: Fairness::Fifo,
/// });
/// assert_eq!(Fairness::Fifo, locker.config().fairness);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LockerConfig {
    /// Ordering among threads waiting for the same key
    pub fairness: Fairness,
}
