//! Binary event flags.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[inline]
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A binary wake signal with set/clear/wait semantics.
///
/// The websocket workers hand work to each other through these instead of
/// busy-waiting: whenever one thread produces work, the consumer unblocks at
/// most once per production.
#[derive(Debug, Default)]
pub(super) struct EventFlag {
    state: Mutex<bool>,
    cond: Condvar,
}

impl EventFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake all waiters.
    pub fn set(&self) {
        *lock(&self.state) = true;
        self.cond.notify_all();
    }

    /// Lower the flag and wake all waiters.
    pub fn clear(&self) {
        *lock(&self.state) = false;
        self.cond.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *lock(&self.state)
    }

    /// Block until the flag is raised.
    pub fn wait_set(&self) {
        let mut state = lock(&self.state);
        while !*state {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the flag is lowered.
    pub fn wait_clear(&self) {
        let mut state = lock(&self.state);
        while *state {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
