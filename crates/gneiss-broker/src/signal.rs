//! Counting semaphore used to wake the dispatch worker.
//!
//! One permit is released per enqueued completion (plus one on shutdown), so
//! the worker sleeps when the inbox is idle instead of spinning.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct Signal {
    permits: Mutex<usize>,
    ready: Condvar,
}

impl Signal {
    pub(crate) fn release(&self) {
        let mut permits = self
            .permits
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *permits += 1;
        drop(permits);
        self.ready.notify_one();
    }

    /// Takes one permit, waiting up to `timeout`. Returns false on timeout.
    pub(crate) fn acquire_timeout(&self, timeout: Duration) -> bool {
        let mut permits = self
            .permits
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *permits == 0 {
            let (guard, _) = self
                .ready
                .wait_timeout(permits, timeout)
                .unwrap_or_else(PoisonError::into_inner);
            permits = guard;
        }
        if *permits > 0 {
            *permits -= 1;
            true
        } else {
            false
        }
    }
}
