//! Extent state management.
//!
//! The extent owns two edges, a configuration mode, persisted flags, and at
//! most one in-flight transition. State transitions are done by taking
//! ownership and returning a new state; the in-memory image only advances
//! when the corresponding metadata write is observed durable.

use gneiss_types::{
    Checkpoint, ConfigurationMode, CopyRequestType, EdgeIndex, JobNumber, ObjectId,
    PathAttributes, PathState, SwapCommand,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Edge
// ============================================================================

/// One downstream device connection.
///
/// `path_state` and `attributes` are written by the downstream transport and
/// read here; `checkpoint` is owned by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub path_state: PathState,
    pub attributes: PathAttributes,
    pub checkpoint: Checkpoint,
}

impl Default for Edge {
    fn default() -> Self {
        Self {
            path_state: PathState::Invalid,
            attributes: PathAttributes::default(),
            checkpoint: Checkpoint::ZERO,
        }
    }
}

impl Edge {
    pub fn is_enabled(&self) -> bool {
        self.path_state.is_enabled()
    }
}

// ============================================================================
// Persisted Flags
// ============================================================================

/// Boolean flags persisted in the extent's non-paged record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExtentFlags {
    /// The primary drive should be replaced (proactive or permanent).
    pub needs_replacement_drive: bool,
    /// The copy source failed while the copy was in flight.
    pub source_failed: bool,
    /// An edge was swapped in; the parent must treat it as fully degraded
    /// until the checkpoint is finalized.
    pub edge_swapped: bool,
    pub degraded_needs_rebuild: bool,
    /// The parent still has to mark the swapped-in region needs-rebuild.
    pub mark_nr_required: bool,
}

// ============================================================================
// In-flight Transitions
// ============================================================================

/// Why a mirror extent is swapping an edge out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapOutReason {
    /// The destination is fully rebuilt; retire the source.
    CopyComplete,
    /// The destination went end-of-life before the copy finished.
    DestinationUnhealthy,
    /// Operator abort; same transition as an unhealthy destination.
    Aborted,
}

/// Sub-steps of the mirror -> pass-thru transition.
///
/// Each phase is one metadata write; the next phase is only attempted after
/// the previous write is observed durable, so no reader ever sees a
/// half-updated record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapOutPhase {
    /// Force the surviving edge's checkpoint to `End`.
    WriteSurvivorCheckpoint,
    /// Mark the removed edge rebuild-logging at offset 0.
    WriteRemovedLogging,
    /// Flip the configuration mode and clean up request bookkeeping.
    WriteMode,
}

/// Sub-steps of the pass-thru -> mirror transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapInPhase {
    /// Zero the destination's checkpoint so the copy starts from the top.
    WriteDestinationCheckpoint,
    /// Flip the configuration mode to the mirror counterpart.
    WriteMode,
}

/// The single transition an extent may have in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    SwapIn {
        destination: EdgeIndex,
        target_mode: ConfigurationMode,
        phase: SwapInPhase,
    },
    SwapOut {
        survivor: EdgeIndex,
        removed: EdgeIndex,
        target_mode: ConfigurationMode,
        reason: SwapOutReason,
        phase: SwapOutPhase,
    },
    /// Permanent-spare finalize: jump the new primary's checkpoint straight
    /// to `End` and clear `edge_swapped` as one logical update.
    FinalizeSpare { edge: EdgeIndex },
}

// ============================================================================
// Extent State
// ============================================================================

/// In-memory state of one virtual extent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentState {
    pub object_id: ObjectId,
    pub mode: ConfigurationMode,
    pub edges: [Edge; 2],
    pub flags: ExtentFlags,
    pub copy_request: Option<CopyRequestType>,
    /// Edge being attached; `None` when no swap is in flight.
    pub swap_in_edge: Option<EdgeIndex>,
    /// Edge being detached; `None` when no swap is in flight.
    pub swap_out_edge: Option<EdgeIndex>,
    /// Per-disk user-area capacity in blocks; a finite checkpoint past this
    /// offset is rebuilding paged metadata, not user data.
    pub user_capacity: u64,
    /// Paged-metadata chunks still need rebuilding; blocks copy-complete
    /// detection in pass-thru mode.
    pub metadata_rebuild_pending: bool,
    /// Exclusivity: a copy/swap request is logically in flight; a new swap
    /// must not start while set.
    pub swap_in_progress: bool,
    /// Idempotence guard: the copy-complete swap-out fires at most once.
    pub optimal_complete_copy: bool,
    pub transition: Option<Transition>,
    /// Job to notify when the in-flight swap/copy reaches a terminal state.
    pub swap_job: Option<JobNumber>,
    /// Command that started the in-flight swap.
    pub swap_command: Option<SwapCommand>,
}

impl ExtentState {
    pub fn new(object_id: ObjectId, user_capacity: u64) -> Self {
        Self {
            object_id,
            mode: ConfigurationMode::Unknown,
            edges: [Edge::default(), Edge::default()],
            flags: ExtentFlags::default(),
            copy_request: None,
            swap_in_edge: None,
            swap_out_edge: None,
            user_capacity,
            metadata_rebuild_pending: false,
            swap_in_progress: false,
            optimal_complete_copy: false,
            transition: None,
            swap_job: None,
            swap_command: None,
        }
    }

    pub fn edge(&self, index: EdgeIndex) -> &Edge {
        &self.edges[index.as_usize()]
    }

    pub fn edge_mut(&mut self, index: EdgeIndex) -> &mut Edge {
        &mut self.edges[index.as_usize()]
    }

    /// True when the in-flight copy has finished.
    ///
    /// In mirror mode the copy is complete once the destination checkpoint
    /// reads `End` and the destination is not itself marked rebuild-logging.
    /// In pass-thru mode a finite checkpoint exactly at the user-area
    /// capacity (with no paged-metadata rebuild outstanding) means the copy
    /// finished and the checkpoint still needs advancing to `End`; a
    /// checkpoint already at `End` means no copy was in progress at all.
    pub fn is_copy_complete(&self) -> bool {
        if let Some(destination) = self.mode.destination_edge() {
            let edge = self.edge(destination);
            edge.checkpoint.is_end() && !edge.attributes.rebuild_logging
        } else if let Some(primary) = self.mode.primary_edge() {
            match self.edge(primary).checkpoint {
                Checkpoint::End => false,
                Checkpoint::At(blocks) => {
                    !self.metadata_rebuild_pending && blocks == self.user_capacity
                }
            }
        } else {
            false
        }
    }

    /// The destination edge carries neither end-of-life nor drive-fault.
    pub fn is_destination_healthy(&self) -> bool {
        match self.mode.destination_edge() {
            Some(destination) => self.edge(destination).attributes.is_healthy(),
            None => true,
        }
    }

    /// Projection of the state that is persisted in the metadata record.
    pub fn record(&self) -> ExtentRecord {
        ExtentRecord {
            mode: self.mode,
            flags: self.flags,
            checkpoints: [self.edges[0].checkpoint, self.edges[1].checkpoint],
            rebuild_logging: [
                self.edges[0].attributes.rebuild_logging,
                self.edges[1].attributes.rebuild_logging,
            ],
        }
    }
}

// ============================================================================
// Persisted Record
// ============================================================================

/// The non-paged metadata record for one extent.
///
/// The persistence layer provides read-after-write consistency; the state
/// machine only advances its in-memory image once a write of this record is
/// observed complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentRecord {
    pub mode: ConfigurationMode,
    pub flags: ExtentFlags,
    pub checkpoints: [Checkpoint; 2],
    pub rebuild_logging: [bool; 2],
}
