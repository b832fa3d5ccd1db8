//! Effects produced by the extent kernel.
//!
//! The kernel is pure; every side effect (metadata writes, job completion
//! notifications, scheduler conditions) is represented here and executed by
//! the runtime. `Persist*` effects are asynchronous: the runtime reports the
//! outcome back through `Input::MetadataCommitted` / `Input::MetadataWriteFailed`
//! so the kernel can sequence dependent phases.

use gneiss_types::{
    Checkpoint, ConfigurationMode, EdgeIndex, JobErrorCode, JobNumber, JobStatus, ObjectId,
};

use crate::state::ExtentFlags;

/// Effect for the runtime to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Write one edge's rebuild checkpoint to the metadata record.
    PersistCheckpoint {
        edge: EdgeIndex,
        checkpoint: Checkpoint,
    },
    /// Jump an edge's checkpoint to `End` and clear `edge_swapped` as one
    /// logical update; a reader observing one without the other would treat
    /// the extent as fully degraded or fully healthy.
    PersistCheckpointToEnd { edge: EdgeIndex },
    /// Mark an edge rebuild-logging with its checkpoint reset.
    PersistRebuildLogging {
        edge: EdgeIndex,
        checkpoint: Checkpoint,
    },
    /// Commit the configuration mode flip together with the post-transition
    /// flag cleanup.
    PersistMode {
        mode: ConfigurationMode,
        flags: ExtentFlags,
    },
    /// Write the persisted flag set.
    PersistFlags { flags: ExtentFlags },
    /// Deliver a job completion to the notification broker.
    NotifyJob {
        job_number: JobNumber,
        status: JobStatus,
        error_code: JobErrorCode,
        object_id: ObjectId,
    },
    /// Ask the redundancy engine to re-evaluate rebuild logging.
    EvaluateRebuildLogging,
    /// Ask the redundancy engine to mark the needs-rebuild region.
    MarkNeedsRebuild,
    /// Drain client I/O and wait for a permanent path state.
    QuiesceIo,
    /// No usable edge remains; fail the extent.
    FailExtent,
    /// Re-run the health evaluation after a delay (passive node waiting to
    /// learn whether it owns the extent).
    Reevaluate { after_ms: u64 },
}
