//! Downstream health evaluation.
//!
//! Health is derived from path-state counters over both edges, with one
//! adjustment: an edge that is electrically enabled but still marked
//! rebuild-logging (while the copy is incomplete) is not yet trustworthy for
//! reads and counts as broken.

use gneiss_types::{ConfigurationMode, DownstreamHealth, EdgeIndex, PathState};

use crate::state::ExtentState;

/// Counts of edges by effective path state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PathStateCounters {
    pub enabled: u32,
    pub disabled: u32,
    pub broken: u32,
    pub invalid: u32,
}

/// Counts both edges by path state, reclassifying an enabled-but-logging edge
/// as broken when the extent is in mirror mode and the copy is incomplete.
///
/// Pass-thru mode skips the reclassification: only one edge is meaningful and
/// its logging state is the parent's concern, not a health input.
pub fn edge_health_counters(state: &ExtentState) -> PathStateCounters {
    let mut counters = PathStateCounters::default();
    let copy_complete = state.is_copy_complete();

    for index in [EdgeIndex::First, EdgeIndex::Second] {
        let edge = state.edge(index);
        match edge.path_state {
            PathState::Enabled => {
                if state.mode.is_mirror() && !copy_complete && edge.attributes.rebuild_logging {
                    counters.broken += 1;
                } else {
                    counters.enabled += 1;
                }
            }
            PathState::Disabled => counters.disabled += 1,
            PathState::Broken => counters.broken += 1,
            PathState::Invalid => counters.invalid += 1,
        }
    }

    counters
}

/// True when the authoritative edge for the current mode is not enabled.
pub fn is_primary_edge_broken(state: &ExtentState) -> bool {
    let primary = match state.mode {
        ConfigurationMode::PassThruFirst | ConfigurationMode::MirrorFirst => EdgeIndex::First,
        ConfigurationMode::PassThruSecond | ConfigurationMode::MirrorSecond => EdgeIndex::Second,
        ConfigurationMode::Unknown => return true,
    };
    !state.edge(primary).is_enabled()
}

/// Evaluates the aggregate downstream health of the extent.
///
/// Mirror mode: `Optimal` with both edges enabled, `Degraded` with one,
/// `Disabled` when the only attached edge is transiently down, else `Broken`.
///
/// Pass-thru mode is never `Optimal`: one live edge is `Degraded` (or
/// `Broken` if the primary itself is the dead one), a merely-disabled edge is
/// `Disabled`, everything else `Broken`.
pub fn evaluate_health(state: &ExtentState) -> DownstreamHealth {
    let counters = edge_health_counters(state);

    match state.mode {
        ConfigurationMode::MirrorFirst | ConfigurationMode::MirrorSecond => {
            if counters.enabled == 2 {
                DownstreamHealth::Optimal
            } else if counters.enabled > 0 {
                DownstreamHealth::Degraded
            } else if counters.disabled > 0 {
                DownstreamHealth::Disabled
            } else {
                DownstreamHealth::Broken
            }
        }
        ConfigurationMode::PassThruFirst | ConfigurationMode::PassThruSecond => {
            if counters.enabled > 0 {
                if is_primary_edge_broken(state) {
                    DownstreamHealth::Broken
                } else {
                    DownstreamHealth::Degraded
                }
            } else if counters.disabled > 0 {
                DownstreamHealth::Disabled
            } else {
                DownstreamHealth::Broken
            }
        }
        ConfigurationMode::Unknown => DownstreamHealth::Broken,
    }
}
