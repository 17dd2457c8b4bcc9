use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Instant;

use crate::cancel::CancellationToken;
use crate::config::Fairness;

const POISONED: &str = "The state mutex of an entity lock is poisoned. This shouldn't happen since no user code runs while it is held";

/// Reason why [ReentrantLock::acquire] gave up without getting the lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Interrupted {
    TimedOut,
    Cancelled,
}

#[derive(Default)]
struct State {
    owner: Option<ThreadId>,
    depth: usize,
    // Tickets of waiting threads. Only used with Fairness::Fifo.
    queue: VecDeque<u64>,
    next_ticket: u64,
}

impl State {
    fn enqueue(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.queue.push_back(ticket);
        ticket
    }

    fn is_available_for(&self, ticket: Option<u64>) -> bool {
        self.owner.is_none() && ticket.map_or(true, |ticket| self.queue.front() == Some(&ticket))
    }
}

/// A mutex that the thread holding it can lock again without blocking.
///
/// Each successful acquisition returns a [HeldLock]. The lock is released once every [HeldLock]
/// of the owning thread is dropped.
pub(crate) struct ReentrantLock {
    fairness: Fairness,
    state: Mutex<State>,
    available: Condvar,
}

impl ReentrantLock {
    pub fn new(fairness: Fairness) -> Self {
        Self {
            fairness,
            state: Mutex::new(State::default()),
            available: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect(POISONED)
    }

    /// Blocks until the lock is acquired.
    pub fn lock(&self) -> HeldLock<'_> {
        match self.acquire(None, None) {
            Ok(held) => held,
            Err(reason) => unreachable!("Waiting without deadline and without cancellation token ended with {:?}", reason),
        }
    }

    /// Acquires the lock, giving up once `deadline` has passed or `cancellation` is cancelled.
    /// A deadline in the past makes this a non-blocking attempt.
    pub fn acquire(
        &self,
        deadline: Option<Instant>,
        cancellation: Option<&CancellationToken>,
    ) -> Result<HeldLock<'_>, Interrupted> {
        let me = thread::current().id();
        let mut state = self.state();
        if state.owner == Some(me) {
            state.depth += 1;
            return Ok(HeldLock::new(self));
        }
        // A cancelled token still allows re-entry above, but never a fresh acquisition.
        if cancellation.is_some_and(CancellationToken::is_cancelled) {
            return Err(Interrupted::Cancelled);
        }

        let ticket = match self.fairness {
            Fairness::Barging => None,
            Fairness::Fifo => Some(state.enqueue()),
        };
        loop {
            if state.is_available_for(ticket) {
                if ticket.is_some() {
                    state.queue.pop_front();
                }
                state.owner = Some(me);
                state.depth = 1;
                return Ok(HeldLock::new(self));
            }
            if cancellation.is_some_and(CancellationToken::is_cancelled) {
                return Err(self.abandon(state, ticket, Interrupted::Cancelled));
            }
            state = match deadline {
                None => self.available.wait(state).expect(POISONED),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(self.abandon(state, ticket, Interrupted::TimedOut));
                    }
                    self.available
                        .wait_timeout(state, deadline - now)
                        .expect(POISONED)
                        .0
                }
            };
        }
    }

    fn abandon(
        &self,
        mut state: MutexGuard<'_, State>,
        ticket: Option<u64>,
        reason: Interrupted,
    ) -> Interrupted {
        match ticket {
            Some(ticket) => {
                state.queue.retain(|queued| *queued != ticket);
                // We might have been at the front of the queue while the lock was free.
                self.available.notify_all();
            }
            None => {
                // We might have consumed the wakeup of an unlock. Pass it on.
                if state.owner.is_none() {
                    self.available.notify_one();
                }
            }
        }
        reason
    }

    fn unlock(&self) {
        let mut state = self.state();
        assert_eq!(
            Some(thread::current().id()),
            state.owner,
            "Tried to unlock an entity lock that isn't held by the current thread"
        );
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            match self.fairness {
                Fairness::Barging => self.available.notify_one(),
                // Only the front of the queue may proceed, so everybody has to check
                Fairness::Fifo => self.available.notify_all(),
            }
        }
    }

    /// Wakes up all waiting threads so they re-check their cancellation token.
    pub fn wake_all(&self) {
        let _state = self.state();
        self.available.notify_all();
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.state().owner == Some(thread::current().id())
    }

    #[cfg(test)]
    fn depth(&self) -> usize {
        self.state().depth
    }
}

/// One acquisition of a [ReentrantLock]. Dropping it undoes that acquisition.
///
/// This is `!Send` since only the owning thread may unlock.
#[must_use = "if unused the lock will immediately unlock"]
pub(crate) struct HeldLock<'a> {
    lock: &'a ReentrantLock,
    _not_send: PhantomData<*const ()>,
}

impl<'a> HeldLock<'a> {
    fn new(lock: &'a ReentrantLock) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

impl Deref for HeldLock<'_> {
    type Target = ReentrantLock;

    fn deref(&self) -> &ReentrantLock {
        self.lock
    }
}

impl Drop for HeldLock<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
