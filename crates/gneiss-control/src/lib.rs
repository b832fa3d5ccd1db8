//! # gneiss-control: Control plane runtime
//!
//! Owns the live extents, executes the effects the pure kernel emits, and
//! fronts the operator-facing job API:
//!
//! - [`plane::ControlPlane`]: per-extent event dispatch and effect execution
//! - [`store::MetadataStore`]: persistence seam for the non-paged records
//! - [`conditions::ConditionSink`]: scheduler-condition seam toward the
//!   redundancy engine
//! - [`error::ControlError`]: request error taxonomy with retryability
//!
//! The kernel stays pure; everything that touches a clock, a thread, or
//! storage lives here.

pub mod conditions;
pub mod error;
pub mod plane;
pub mod store;

pub use conditions::{ConditionSink, NullConditionSink};
pub use error::ControlError;
pub use plane::ControlPlane;
pub use store::{InMemoryMetadataStore, MetadataStore, RecordUpdate, StoreError};
