//! This library offers reentrant locks that are locked/unlocked by key, similar to row-level locking in a database.
//! It initially considers all keys as "unlocked", but they can be locked
//! and if a second thread tries to acquire a lock for the same key, it will have to wait.
//! Threads working on different keys never wait for each other.
//!
//! ```
//! use entitylocker::{EntityLocker, Locker};
//!
//! let locker = EntityLocker::new();
//! let guard1 = locker.lock(4);
//! let _guard2 = locker.lock(5);
//!
//! // Locks are reentrant, so locking `4` again on this thread doesn't block
//! let guard3 = locker.lock(4);
//!
//! // After dropping both guards for `4`, other threads can lock it
//! std::mem::drop(guard3);
//! std::mem::drop(guard1);
//! assert_eq!(1, locker.num_locked());
//! ```
//!
//! Critical sections can also be written as closures. The lock is released when the closure returns or panics.
//!
//! ```
//! use entitylocker::{EntityLocker, LockError, Locker};
//! use std::time::Duration;
//!
//! let locker = EntityLocker::new();
//! locker.with_lock(4, |id| println!("Updating row {}", id));
//!
//! let result: Result<(), LockError<u32>> = locker.with_lock_timeout(4, Duration::from_millis(100), |id| {
//!     println!("Updating row {} again", id);
//! });
//! assert!(result.is_ok());
//! ```
//!
//! You can use an arbitrary type as key, as long as that type implements [PartialEq] + [Eq] + [Hash](std::hash::Hash) + [Clone] + [Debug](std::fmt::Debug).
//!
//! Under the hood, an [EntityLocker] is a [HashMap](std::collections::HashMap) of reentrant locks with a reservation count for each key.
//! A key only has an entry while somebody holds or waits for its lock, so the map doesn't grow with the number of keys ever locked.

#![deny(missing_docs)]

mod cancel;
mod config;
mod error;
mod guard;
mod locker;
mod mutex;
mod registry;

pub use cancel::CancellationToken;
pub use config::{Fairness, LockerConfig};
pub use error::LockError;
pub use guard::Guard;
pub use locker::{EntityLocker, Locker};
