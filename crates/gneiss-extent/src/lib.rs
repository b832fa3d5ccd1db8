//! # gneiss-extent: Virtual extent state machine
//!
//! A virtual extent pairs two downstream device connections ("edges") behind
//! one logical extent and keeps the extent available while a drive fails,
//! degrades, or is proactively replaced. This crate is the pure, deterministic
//! core of that behavior: it receives edge/transport events, swap requests,
//! and scheduler passes, and produces state changes plus effects for the
//! runtime to execute.
//!
//! ## Key Principles
//!
//! - **No IO**: metadata writes are emitted as effects and their completion is
//!   fed back as inputs, so the sequencing of a multi-phase transition lives
//!   in one place
//! - **No clocks**: re-evaluation delays are effects; the runtime schedules
//! - **No locks**: the owning runtime serializes access per extent
//!
//! ## Architecture
//!
//! - [`state`]: extent state, edges, persisted flags, in-flight transitions
//! - [`health`]: downstream health evaluation from edge path states
//! - [`checkpoint`]: parent-visible checkpoint queries (both rule sets)
//! - [`effects`]: effects for the runtime to execute
//! - [`kernel`]: the `apply` function that ties it all together

pub mod checkpoint;
pub mod effects;
pub mod health;
pub mod kernel;
pub mod state;

#[cfg(test)]
mod tests;

pub use checkpoint::{checkpoint_for_extent, checkpoint_for_parent_group};
pub use effects::Effect;
pub use health::{PathStateCounters, evaluate_health};
pub use kernel::{EvalContext, ExtentError, Input, apply, pending_phase_write};
pub use state::{Edge, ExtentFlags, ExtentRecord, ExtentState, Transition};
