//! Bounded completion inbox between notifiers and the dispatch worker.
//!
//! Uses `crossbeam-queue::ArrayQueue` so `notify` stays lock-free and never
//! blocks the thread finishing an operation. When the inbox is full the item
//! comes back to the caller, which drops it with a log line; the waiter on
//! the other end times out instead of hanging.

use crossbeam_queue::ArrayQueue;

use crate::broker::JobCompletion;

/// Result of attempting to push into a full inbox.
#[derive(Debug)]
pub enum PushResult {
    /// Completion was enqueued.
    Ok,
    /// Inbox is full. Returns the completion for the caller to handle.
    Full(JobCompletion),
}

/// Bounded, lock-free queue of job completions.
#[derive(Debug)]
pub struct CompletionInbox {
    inner: ArrayQueue<JobCompletion>,
}

impl CompletionInbox {
    /// Creates an inbox with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "inbox capacity must be positive");
        Self {
            inner: ArrayQueue::new(capacity),
        }
    }

    /// Attempts to enqueue a completion without blocking.
    pub fn try_push(&self, completion: JobCompletion) -> PushResult {
        match self.inner.push(completion) {
            Ok(()) => PushResult::Ok,
            Err(completion) => PushResult::Full(completion),
        }
    }

    /// Dequeues the oldest completion, if any.
    pub fn try_pop(&self) -> Option<JobCompletion> {
        self.inner.pop()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gneiss_types::{JobErrorCode, JobNumber, JobStatus, ObjectId};

    fn completion(job: u64) -> JobCompletion {
        JobCompletion {
            job_number: JobNumber::new(job),
            object_id: ObjectId::new(1),
            status: JobStatus::Ok,
            error_code: JobErrorCode::NoError,
        }
    }

    #[test]
    fn push_pop_preserves_arrival_order() {
        let inbox = CompletionInbox::new(4);
        for job in 1..=3 {
            assert!(matches!(inbox.try_push(completion(job)), PushResult::Ok));
        }
        assert_eq!(inbox.try_pop().map(|c| c.job_number), Some(JobNumber::new(1)));
        assert_eq!(inbox.try_pop().map(|c| c.job_number), Some(JobNumber::new(2)));
        assert_eq!(inbox.try_pop().map(|c| c.job_number), Some(JobNumber::new(3)));
        assert!(inbox.try_pop().is_none());
    }

    #[test]
    fn full_inbox_returns_the_completion() {
        let inbox = CompletionInbox::new(1);
        assert!(matches!(inbox.try_push(completion(1)), PushResult::Ok));
        match inbox.try_push(completion(2)) {
            PushResult::Full(c) => assert_eq!(c.job_number, JobNumber::new(2)),
            PushResult::Ok => panic!("push into full inbox succeeded"),
        }
    }
}
