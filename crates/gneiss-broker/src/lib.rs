//! # gneiss-broker: Job completion notification broker
//!
//! Asynchronous control-plane operations (swaps, copies) complete on threads
//! that must never block; the callers that care about the outcome often block
//! for minutes. The broker decouples the two: the state machine fires
//! [`JobBroker::notify`] without blocking, and any caller observes the result
//! with [`JobBroker::wait_for_job`] under a bounded timeout, whichever side
//! arrives first.
//!
//! # Design
//!
//! - `notify` pushes into a bounded lock-free inbox; a full inbox drops the
//!   event with an error log rather than blocking the notifier
//! - One dispatch worker drains the inbox and matches completions against
//!   registered waiters, oldest waiter first
//! - One sweep worker reclaims completions nobody waited for: duplicates on
//!   every pass, aged-out records on a slower cadence
//! - A `wait_for_job` caller always gets an answer within its bound: the
//!   completion, `Timeout`, or `ShuttingDown`

pub mod broker;
pub mod inbox;
mod signal;

pub use broker::{BrokerConfig, BrokerError, BrokerStats, JobBroker, JobCompletion};
pub use inbox::{CompletionInbox, PushResult};
