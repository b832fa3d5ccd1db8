//! The broker proper: waiter registry, dispatch worker, sweep worker.
//!
//! # Locking
//!
//! One mutex covers the pending and waiting sets; every operation under it is
//! O(set size) list work with no I/O. Per-waiter cells have their own lock,
//! always taken after the registry lock, never before.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, warn};

use gneiss_types::{JobErrorCode, JobNumber, JobStatus, ObjectId};

use crate::inbox::{CompletionInbox, PushResult};
use crate::signal::Signal;

// ============================================================================
// Public types
// ============================================================================

/// Terminal outcome of one asynchronous job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobCompletion {
    pub job_number: JobNumber,
    pub object_id: ObjectId,
    pub status: JobStatus,
    pub error_code: JobErrorCode,
}

/// Tuning knobs for the broker workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Capacity of the notify inbox; overflow drops the completion.
    pub inbox_capacity: usize,
    /// Sweep worker tick.
    pub sweep_interval: Duration,
    /// Age-based reclamation runs every this many sweep ticks.
    pub gc_interval_ticks: u32,
    /// Pending completions older than this are reclaimed.
    pub max_pending_age: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 1024,
            sweep_interval: Duration::from_secs(1),
            gc_interval_ticks: 10,
            max_pending_age: Duration::from_secs(300),
        }
    }
}

/// Why `wait_for_job` returned without a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The wait bound elapsed; the underlying operation is unaffected.
    #[error("{0} did not complete within the wait bound")]
    Timeout(JobNumber),
    /// The broker is shutting down; no more completions will be delivered.
    #[error("broker is shutting down")]
    ShuttingDown,
}

impl BrokerError {
    pub fn error_code(self) -> JobErrorCode {
        match self {
            BrokerError::Timeout(_) => JobErrorCode::Timeout,
            BrokerError::ShuttingDown => JobErrorCode::InternalError,
        }
    }
}

/// Point-in-time sizes of the broker's sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerStats {
    pub pending: usize,
    pub waiting: usize,
    pub inbox: usize,
}

// ============================================================================
// Internals
// ============================================================================

/// What a waiter observes in its cell.
#[derive(Debug, Clone, Copy)]
enum WaitResult {
    Delivered(JobCompletion),
    Aborted,
}

/// Per-request release signal: the dispatch worker (or shutdown) fills the
/// slot and wakes the one thread parked on it.
#[derive(Debug, Default)]
struct WaitCell {
    slot: Mutex<Option<WaitResult>>,
    ready: Condvar,
}

impl WaitCell {
    fn deliver(&self, result: WaitResult) {
        let mut slot = lock(&self.slot);
        *slot = Some(result);
        drop(slot);
        self.ready.notify_one();
    }
}

struct WaitEntry {
    job_number: JobNumber,
    cell: Arc<WaitCell>,
}

struct PendingRecord {
    completion: JobCompletion,
    received_at: Instant,
}

#[derive(Default)]
struct Registry {
    /// Completions nobody has asked for yet, in arrival order.
    pending: VecDeque<PendingRecord>,
    /// Outstanding `wait_for_job` calls, in registration order.
    waiting: Vec<WaitEntry>,
    /// Jobs whose completion was already handed to a waiter; a later
    /// completion with the same number is a dead duplicate.
    delivered: HashMap<JobNumber, Instant>,
    shutting_down: bool,
}

struct Shared {
    config: BrokerConfig,
    inbox: CompletionInbox,
    registry: Mutex<Registry>,
    work: Signal,
    stop: AtomicBool,
    /// Wakes the sweep worker early on shutdown.
    stop_gate: Mutex<bool>,
    stop_ready: Condvar,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Broker
// ============================================================================

/// Broker handle. Owns the dispatch and sweep workers; dropping it shuts
/// both down.
pub struct JobBroker {
    shared: Arc<Shared>,
    handles: Vec<Option<thread::JoinHandle<()>>>,
}

impl JobBroker {
    /// Starts the broker with its two worker threads.
    ///
    /// # Panics
    ///
    /// Panics if worker threads cannot be spawned.
    pub fn start(config: BrokerConfig) -> Self {
        let shared = Arc::new(Shared {
            inbox: CompletionInbox::new(config.inbox_capacity),
            config,
            registry: Mutex::new(Registry::default()),
            work: Signal::default(),
            stop: AtomicBool::new(false),
            stop_gate: Mutex::new(false),
            stop_ready: Condvar::new(),
        });

        let dispatch = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("gneiss-broker-dispatch".into())
                .spawn(move || dispatch_loop(&shared))
                .expect("failed to spawn dispatch worker")
        };
        let sweep = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("gneiss-broker-sweep".into())
                .spawn(move || sweep_loop(&shared))
                .expect("failed to spawn sweep worker")
        };

        Self {
            shared,
            handles: vec![Some(dispatch), Some(sweep)],
        }
    }

    /// Delivers a job completion. Never blocks; a full inbox drops the
    /// completion and the eventual waiter times out instead.
    pub fn notify(&self, completion: JobCompletion) {
        if self.shared.stop.load(Ordering::Acquire) {
            warn!(job = %completion.job_number, "completion after shutdown, dropping");
            return;
        }
        match self.shared.inbox.try_push(completion) {
            PushResult::Ok => self.shared.work.release(),
            PushResult::Full(completion) => {
                error!(
                    job = %completion.job_number,
                    object = %completion.object_id,
                    "notify inbox full, dropping completion"
                );
            }
        }
    }

    /// Blocks until the job's completion arrives, the timeout elapses, or
    /// the broker shuts down.
    ///
    /// The completion may have arrived before the call: the pending set is
    /// checked first, consuming the oldest record for the job number.
    pub fn wait_for_job(
        &self,
        job_number: JobNumber,
        timeout: Duration,
    ) -> Result<JobCompletion, BrokerError> {
        let cell = {
            let mut registry = lock(&self.shared.registry);
            if registry.shutting_down {
                return Err(BrokerError::ShuttingDown);
            }
            let pos = registry
                .pending
                .iter()
                .position(|r| r.completion.job_number == job_number);
            if let Some(record) = pos.and_then(|pos| registry.pending.remove(pos)) {
                registry.delivered.insert(job_number, Instant::now());
                return Ok(record.completion);
            }
            let cell = Arc::new(WaitCell::default());
            registry.waiting.push(WaitEntry {
                job_number,
                cell: Arc::clone(&cell),
            });
            cell
        };

        let deadline = Instant::now() + timeout;
        let mut slot = lock(&cell.slot);
        while slot.is_none() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = cell
                .ready
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
        if let Some(result) = slot.take() {
            return finish_wait(result);
        }
        drop(slot);

        // Timed out. Deregister, then re-check once: the dispatch worker may
        // have claimed the entry between the deadline and the lock below.
        let mut registry = lock(&self.shared.registry);
        registry
            .waiting
            .retain(|entry| !Arc::ptr_eq(&entry.cell, &cell));
        drop(registry);

        let mut slot = lock(&cell.slot);
        match slot.take() {
            Some(result) => finish_wait(result),
            None => Err(BrokerError::Timeout(job_number)),
        }
    }

    /// Current set sizes; for observability and tests.
    pub fn stats(&self) -> BrokerStats {
        let registry = lock(&self.shared.registry);
        BrokerStats {
            pending: registry.pending.len(),
            waiting: registry.waiting.len(),
            inbox: self.shared.inbox.len(),
        }
    }

    /// Stops both workers and releases every parked waiter with
    /// [`BrokerError::ShuttingDown`]. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.shared.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut registry = lock(&self.shared.registry);
            registry.shutting_down = true;
            for entry in registry.waiting.drain(..) {
                error!(job = %entry.job_number, "waiter still parked at shutdown, releasing");
                entry.cell.deliver(WaitResult::Aborted);
            }
        }
        // Kick both workers out of their waits.
        self.shared.work.release();
        {
            let mut gate = lock(&self.shared.stop_gate);
            *gate = true;
        }
        self.shared.stop_ready.notify_all();

        for handle in &mut self.handles {
            if let Some(handle) = handle.take() {
                if handle.join().is_err() {
                    error!("broker worker panicked during shutdown");
                }
            }
        }
    }
}

impl Drop for JobBroker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn finish_wait(result: WaitResult) -> Result<JobCompletion, BrokerError> {
    match result {
        WaitResult::Delivered(completion) => Ok(completion),
        WaitResult::Aborted => Err(BrokerError::ShuttingDown),
    }
}

// ============================================================================
// Workers
// ============================================================================

const DISPATCH_IDLE_WAIT: Duration = Duration::from_millis(100);

fn dispatch_loop(shared: &Shared) {
    while !shared.stop.load(Ordering::Acquire) {
        shared.work.acquire_timeout(DISPATCH_IDLE_WAIT);
        while let Some(completion) = shared.inbox.try_pop() {
            dispatch_one(shared, completion);
        }
    }
    // Final drain so completions racing shutdown land in pending rather
    // than vanishing silently.
    while let Some(completion) = shared.inbox.try_pop() {
        dispatch_one(shared, completion);
    }
}

fn dispatch_one(shared: &Shared, completion: JobCompletion) {
    let mut registry = lock(&shared.registry);
    if let Some(pos) = registry
        .waiting
        .iter()
        .position(|entry| entry.job_number == completion.job_number)
    {
        let entry = registry.waiting.remove(pos);
        registry
            .delivered
            .insert(completion.job_number, Instant::now());
        drop(registry);
        entry.cell.deliver(WaitResult::Delivered(completion));
    } else {
        registry.pending.push_back(PendingRecord {
            completion,
            received_at: Instant::now(),
        });
    }
}

fn sweep_loop(shared: &Shared) {
    let mut ticks: u32 = 0;
    loop {
        {
            let gate = lock(&shared.stop_gate);
            let (gate, _) = shared
                .stop_ready
                .wait_timeout(gate, shared.config.sweep_interval)
                .unwrap_or_else(PoisonError::into_inner);
            if *gate {
                return;
            }
        }
        ticks = ticks.wrapping_add(1);

        let mut registry = lock(&shared.registry);

        // Duplicates of an already-delivered job are dead on arrival.
        let before = registry.pending.len();
        let delivered = std::mem::take(&mut registry.delivered);
        registry
            .pending
            .retain(|r| !delivered.contains_key(&r.completion.job_number));
        registry.delivered = delivered;
        let dropped = before - registry.pending.len();
        if dropped > 0 {
            debug!(count = dropped, "swept duplicate completions");
        }

        if ticks % shared.config.gc_interval_ticks == 0 {
            let now = Instant::now();
            let max_age = shared.config.max_pending_age;
            let before = registry.pending.len();
            registry
                .pending
                .retain(|r| now.duration_since(r.received_at) < max_age);
            let expired = before - registry.pending.len();
            if expired > 0 {
                debug!(count = expired, "swept expired completions");
            }
            registry
                .delivered
                .retain(|_, at| now.duration_since(*at) < max_age);
        }
    }
}
