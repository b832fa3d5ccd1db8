//! Scheduler-condition seam toward the redundancy engine.
//!
//! The kernel decides which condition to raise; what the condition does is
//! the surrounding engine's business. The null sink just logs, which is
//! enough for tests and for extents whose parent handles conditions itself.

use tracing::info;

use gneiss_types::ObjectId;

/// Receiver for the conditions the health evaluation raises.
pub trait ConditionSink {
    /// Re-evaluate whether rebuild logging should be set or cleared.
    fn evaluate_rebuild_logging(&mut self, object_id: ObjectId);
    /// Mark the swapped-in region needs-rebuild.
    fn mark_needs_rebuild(&mut self, object_id: ObjectId);
    /// Drain client I/O and wait for a permanent path state.
    fn quiesce_io(&mut self, object_id: ObjectId);
    /// No usable edge remains; take the extent offline.
    fn fail_extent(&mut self, object_id: ObjectId);
}

/// Sink that records nothing beyond a log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConditionSink;

impl ConditionSink for NullConditionSink {
    fn evaluate_rebuild_logging(&mut self, object_id: ObjectId) {
        info!(object = %object_id, "condition: evaluate rebuild logging");
    }

    fn mark_needs_rebuild(&mut self, object_id: ObjectId) {
        info!(object = %object_id, "condition: mark needs rebuild");
    }

    fn quiesce_io(&mut self, object_id: ObjectId) {
        info!(object = %object_id, "condition: quiesce io");
    }

    fn fail_extent(&mut self, object_id: ObjectId) {
        info!(object = %object_id, "condition: fail extent");
    }
}
