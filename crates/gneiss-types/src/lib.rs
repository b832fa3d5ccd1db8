//! # gneiss-types: Core types for the Gneiss control plane
//!
//! This crate contains shared types used across the Gneiss system:
//! - Entity IDs ([`ObjectId`], [`JobNumber`])
//! - Edge topology ([`EdgeIndex`], [`PathState`], [`PathAttributes`])
//! - Rebuild progress ([`Checkpoint`])
//! - Extent configuration ([`ConfigurationMode`], [`DownstreamHealth`])
//! - Swap/copy requests ([`SwapCommand`], [`CopyRequestType`])
//! - Parent checkpoint queries ([`CheckpointQuery`])
//! - Job completion ([`JobStatus`], [`JobErrorCode`])

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

// ============================================================================
// Entity IDs - All Copy (cheap 8-byte values)
// ============================================================================

/// Unique identifier for a control-plane object (extent, device, group).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Sentinel for "no object".
    pub const INVALID: ObjectId = ObjectId(u64::MAX);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ObjectId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<ObjectId> for u64 {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

/// Opaque handle identifying one asynchronous long-running operation.
///
/// Job numbers are allocated monotonically and must not be reused while an
/// operation is in flight; the broker relies on external uniqueness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobNumber(u64);

impl JobNumber {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl Display for JobNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

impl From<u64> for JobNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<JobNumber> for u64 {
    fn from(id: JobNumber) -> Self {
        id.0
    }
}

// ============================================================================
// Edge Topology
// ============================================================================

/// Index of a downstream edge of a virtual extent. Exactly two exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeIndex {
    First,
    Second,
}

impl EdgeIndex {
    /// The opposite edge index.
    pub fn other(self) -> EdgeIndex {
        match self {
            EdgeIndex::First => EdgeIndex::Second,
            EdgeIndex::Second => EdgeIndex::First,
        }
    }

    pub fn as_usize(self) -> usize {
        match self {
            EdgeIndex::First => 0,
            EdgeIndex::Second => 1,
        }
    }

    /// Converts a raw wire/CLI index, rejecting anything but 0 or 1.
    pub fn from_raw(raw: u32) -> Option<EdgeIndex> {
        match raw {
            0 => Some(EdgeIndex::First),
            1 => Some(EdgeIndex::Second),
            _ => None,
        }
    }
}

impl Display for EdgeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_usize())
    }
}

/// State of the path to a downstream device, owned by the transport layer.
///
/// The state machine only reads these; the downstream transport writes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PathState {
    /// No device attached at this index.
    #[default]
    Invalid,
    /// Device attached and servicing I/O.
    Enabled,
    /// Device attached but transiently not servicing I/O.
    Disabled,
    /// Device attached and permanently failed.
    Broken,
}

impl PathState {
    pub fn is_enabled(self) -> bool {
        self == PathState::Enabled
    }
}

/// Per-edge attribute flags reported by the downstream transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PathAttributes {
    /// Drive is predicted to fail and should be proactively replaced.
    pub end_of_life: bool,
    /// Drive has faulted and must be replaced.
    pub drive_fault: bool,
    /// Writes to this edge are not being mirrored; region needs rebuild.
    pub rebuild_logging: bool,
    pub degraded: bool,
    pub degraded_needs_rebuild: bool,
    pub client_ignore_offset: bool,
}

impl PathAttributes {
    /// An edge is healthy for copy purposes when it carries neither an
    /// end-of-life warning nor a drive fault.
    pub fn is_healthy(self) -> bool {
        !self.end_of_life && !self.drive_fault
    }
}

// ============================================================================
// Rebuild Checkpoint
// ============================================================================

/// Block offset up to which an edge's data is known consistent.
///
/// `End` is the "fully rebuilt / no gap" sentinel and compares greater than
/// every finite offset (the derived `Ord` relies on variant order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Checkpoint {
    /// Consistent up to (but not including) this block offset.
    At(u64),
    /// Fully consistent.
    End,
}

impl Checkpoint {
    /// Nothing rebuilt yet.
    pub const ZERO: Checkpoint = Checkpoint::At(0);

    pub fn is_end(self) -> bool {
        self == Checkpoint::End
    }

    pub fn is_zero(self) -> bool {
        self == Checkpoint::ZERO
    }
}

impl Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checkpoint::At(blocks) => write!(f, "{blocks}"),
            Checkpoint::End => write!(f, "end"),
        }
    }
}

// ============================================================================
// Extent Configuration
// ============================================================================

/// Which edge(s) of a virtual extent are authoritative.
///
/// In pass-thru mode exactly one edge carries client I/O; in mirror mode both
/// edges are live, with the named edge as the copy source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConfigurationMode {
    /// Mode not yet committed (extent just instantiated).
    #[default]
    Unknown,
    /// Single live device on the first edge.
    PassThruFirst,
    /// Single live device on the second edge.
    PassThruSecond,
    /// Mirrored copy; first edge is the source, second the destination.
    MirrorFirst,
    /// Mirrored copy; second edge is the source, first the destination.
    MirrorSecond,
}

impl ConfigurationMode {
    pub fn is_pass_thru(self) -> bool {
        matches!(
            self,
            ConfigurationMode::PassThruFirst | ConfigurationMode::PassThruSecond
        )
    }

    pub fn is_mirror(self) -> bool {
        matches!(
            self,
            ConfigurationMode::MirrorFirst | ConfigurationMode::MirrorSecond
        )
    }

    /// The authoritative edge in pass-thru mode.
    pub fn primary_edge(self) -> Option<EdgeIndex> {
        match self {
            ConfigurationMode::PassThruFirst => Some(EdgeIndex::First),
            ConfigurationMode::PassThruSecond => Some(EdgeIndex::Second),
            _ => None,
        }
    }

    /// The copy source edge in mirror mode.
    pub fn source_edge(self) -> Option<EdgeIndex> {
        match self {
            ConfigurationMode::MirrorFirst => Some(EdgeIndex::First),
            ConfigurationMode::MirrorSecond => Some(EdgeIndex::Second),
            _ => None,
        }
    }

    /// The copy destination edge in mirror mode.
    pub fn destination_edge(self) -> Option<EdgeIndex> {
        self.source_edge().map(EdgeIndex::other)
    }

    /// The mirror mode that keeps `source` as the copy source.
    pub fn mirror_with_source(source: EdgeIndex) -> ConfigurationMode {
        match source {
            EdgeIndex::First => ConfigurationMode::MirrorFirst,
            EdgeIndex::Second => ConfigurationMode::MirrorSecond,
        }
    }

    /// The pass-thru mode with `primary` as the sole live edge.
    pub fn pass_thru_with_primary(primary: EdgeIndex) -> ConfigurationMode {
        match primary {
            EdgeIndex::First => ConfigurationMode::PassThruFirst,
            EdgeIndex::Second => ConfigurationMode::PassThruSecond,
        }
    }
}

/// Aggregate health of an extent's downstream edges.
///
/// Each level maps to a scheduler condition: advance copy logic, evaluate
/// rebuild logging, quiesce and wait, or fail the extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownstreamHealth {
    /// Both edges enabled and trustworthy (mirror mode only).
    Optimal,
    /// At least one usable edge.
    Degraded,
    /// Transiently unusable; wait for a permanent state.
    Disabled,
    /// No usable edge.
    Broken,
}

// ============================================================================
// Swap / Copy Requests
// ============================================================================

/// Operator- or policy-initiated replacement command against an extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapCommand {
    /// Replace a dead primary in place; no copy, full rebuild by the parent.
    PermanentSpare,
    /// Preemptively copy off a drive showing early failure signs.
    ProactiveCopy,
    /// User-requested copy to a specific replacement drive.
    UserCopy,
    /// Abort an in-flight copy, swapping out the destination.
    AbortCopy,
}

impl Display for SwapCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwapCommand::PermanentSpare => "permanent-spare",
            SwapCommand::ProactiveCopy => "proactive-copy",
            SwapCommand::UserCopy => "user-copy",
            SwapCommand::AbortCopy => "abort-copy",
        };
        write!(f, "{name}")
    }
}

/// Kind of copy currently in progress on an extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopyRequestType {
    Proactive,
    UserInitiated,
}

// ============================================================================
// Parent Checkpoint Queries
// ============================================================================

/// Why the surrounding redundancy engine is asking for a checkpoint.
///
/// The answer differs between the two purposes, so the query kind is part of
/// the request rather than two near-duplicate entry points per caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointQuery {
    /// Deciding whether rebuild logging can be cleared for a position.
    ClearRebuildLogging,
    /// Deciding which region to mark needs-rebuild.
    MarkNeedsRebuild,
}

// ============================================================================
// Job Completion
// ============================================================================

/// Generic success/failure of an asynchronous job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Ok,
    Failed,
}

/// Error taxonomy for job requests and completions.
///
/// The non-terminal codes tell automatic retry logic outside the core that
/// resubmitting the whole request later is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobErrorCode {
    NoError,
    /// Malformed input; rejected synchronously, no job created.
    InvalidRequest,
    /// Non-terminal: the extent is not ready yet.
    NotReady,
    /// Non-terminal: the extent is degraded right now.
    Degraded,
    /// Non-terminal: no edge is usable right now.
    Broken,
    /// Non-terminal: another copy/swap is already in flight.
    CopyInProgress,
    /// Terminal for this job instance: a swap/copy precondition failed.
    ValidationFailed,
    /// The wait bound elapsed; the underlying operation is unaffected.
    Timeout,
    /// Allocation failure, unexpected state, or persistence I/O failure.
    InternalError,
}

impl JobErrorCode {
    /// True for codes where the caller may safely resubmit the request.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            JobErrorCode::NotReady
                | JobErrorCode::Degraded
                | JobErrorCode::Broken
                | JobErrorCode::CopyInProgress
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_end_compares_greater_than_any_offset() {
        assert!(Checkpoint::End > Checkpoint::At(u64::MAX - 1));
        assert!(Checkpoint::At(7) > Checkpoint::ZERO);
        assert!(Checkpoint::ZERO < Checkpoint::End);
    }

    #[test]
    fn edge_index_round_trips_raw_values() {
        assert_eq!(EdgeIndex::from_raw(0), Some(EdgeIndex::First));
        assert_eq!(EdgeIndex::from_raw(1), Some(EdgeIndex::Second));
        assert_eq!(EdgeIndex::from_raw(2), None);
        assert_eq!(EdgeIndex::First.other(), EdgeIndex::Second);
        assert_eq!(EdgeIndex::Second.other(), EdgeIndex::First);
    }

    #[test]
    fn mirror_mode_keeps_source_and_destination_opposed() {
        for source in [EdgeIndex::First, EdgeIndex::Second] {
            let mode = ConfigurationMode::mirror_with_source(source);
            assert_eq!(mode.source_edge(), Some(source));
            assert_eq!(mode.destination_edge(), Some(source.other()));
            assert!(mode.is_mirror());
            assert!(!mode.is_pass_thru());
        }
    }

    #[test]
    fn pass_thru_mode_has_no_copy_roles() {
        let mode = ConfigurationMode::pass_thru_with_primary(EdgeIndex::Second);
        assert_eq!(mode.primary_edge(), Some(EdgeIndex::Second));
        assert_eq!(mode.source_edge(), None);
        assert_eq!(mode.destination_edge(), None);
    }

    #[test]
    fn retryable_codes_exclude_terminal_errors() {
        assert!(JobErrorCode::NotReady.is_retryable());
        assert!(JobErrorCode::CopyInProgress.is_retryable());
        assert!(!JobErrorCode::ValidationFailed.is_retryable());
        assert!(!JobErrorCode::Timeout.is_retryable());
        assert!(!JobErrorCode::InvalidRequest.is_retryable());
    }

    #[test]
    fn serde_round_trips_persisted_enums() {
        let mode = ConfigurationMode::MirrorSecond;
        let json = serde_json::to_string(&mode).expect("serialize");
        let back: ConfigurationMode = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, mode);

        let ckpt = Checkpoint::At(0x5000);
        let json = serde_json::to_string(&ckpt).expect("serialize");
        let back: Checkpoint = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, ckpt);
    }
}
