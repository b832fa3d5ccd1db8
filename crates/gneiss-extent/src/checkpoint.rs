//! Parent-visible checkpoint queries.
//!
//! The surrounding redundancy engine asks the extent for an effective
//! checkpoint for two distinct purposes (clear rebuild-logging vs. mark
//! needs-rebuild), and the answer also depends on who is asking: the extent's
//! own redundancy engine or the outer group class wrapping it. The two rule
//! sets are similar but deliberately kept separate; collapsing them in either
//! direction would silently under- or over-rebuild data.

use gneiss_types::{Checkpoint, CheckpointQuery, ConfigurationMode, EdgeIndex};

use crate::kernel::ExtentError;
use crate::state::ExtentState;

/// Checkpoint as seen by the extent's own redundancy engine.
///
/// Pass-thru: mark-NR queries are rejected (nothing to mark with a single
/// live edge). After a source failure, a clear-logging query against an
/// enabled primary returns `End` so the caller clears logging and moves on.
/// Otherwise the primary's checkpoint is returned, except that a swapped-in
/// edge already reading `End` reports 0 to force a full rebuild.
///
/// Mirror: clear-logging returns the requested edge's checkpoint once the
/// copy is complete (so the completed side gets its logging cleared) and the
/// source checkpoint before that; mark-NR always returns the destination
/// checkpoint so the copy region is what gets marked.
pub fn checkpoint_for_extent(
    state: &ExtentState,
    edge_index: EdgeIndex,
    query: CheckpointQuery,
) -> Result<Checkpoint, ExtentError> {
    match state.mode {
        ConfigurationMode::PassThruFirst | ConfigurationMode::PassThruSecond => {
            let primary = match state.mode {
                ConfigurationMode::PassThruFirst => EdgeIndex::First,
                _ => EdgeIndex::Second,
            };

            if query == CheckpointQuery::MarkNeedsRebuild {
                return Err(ExtentError::QueryUnsupported {
                    mode: state.mode,
                    query,
                });
            }

            // Cleanup after a failed source: let the caller clear logging.
            if state.flags.source_failed && state.edge(primary).is_enabled() {
                return Ok(Checkpoint::End);
            }

            let checkpoint = state.edge(primary).checkpoint;
            if state.flags.edge_swapped && checkpoint.is_end() {
                // Swapped-in device: force a full rebuild of the position.
                return Ok(Checkpoint::ZERO);
            }
            Ok(checkpoint)
        }

        ConfigurationMode::MirrorFirst | ConfigurationMode::MirrorSecond => {
            let source = match state.mode {
                ConfigurationMode::MirrorFirst => EdgeIndex::First,
                _ => EdgeIndex::Second,
            };
            match query {
                CheckpointQuery::ClearRebuildLogging => {
                    if state.is_copy_complete() {
                        Ok(state.edge(edge_index).checkpoint)
                    } else {
                        Ok(state.edge(source).checkpoint)
                    }
                }
                CheckpointQuery::MarkNeedsRebuild => Ok(state.edge(source.other()).checkpoint),
            }
        }

        ConfigurationMode::Unknown => Err(ExtentError::ModeUnknown),
    }
}

/// Checkpoint as seen by the outer group class wrapping the extent.
///
/// Used to judge the relative health of the position. Three answers exist:
/// 0 (completely degraded or swapped), `End` (fully rebuilt), or a finite
/// offset (the copy source failed mid-copy).
///
/// Pass-thru: a finite checkpoint within the user area is reported as-is; a
/// finite checkpoint past the user area means paged metadata is still
/// rebuilding and reports 0, as does a swapped edge reading `End`.
///
/// Mirror: mark-NR returns the destination checkpoint only when the source
/// previously failed (so the parent does not re-mark the source); clear-
/// logging returns the destination checkpoint once the copy is complete. In
/// all other cases the source checkpoint is returned.
pub fn checkpoint_for_parent_group(
    state: &ExtentState,
    query: CheckpointQuery,
) -> Result<Checkpoint, ExtentError> {
    match state.mode {
        ConfigurationMode::PassThruFirst | ConfigurationMode::PassThruSecond => {
            let primary = match state.mode {
                ConfigurationMode::PassThruFirst => EdgeIndex::First,
                _ => EdgeIndex::Second,
            };
            let checkpoint = state.edge(primary).checkpoint;
            match checkpoint {
                Checkpoint::At(blocks) if blocks <= state.user_capacity => Ok(checkpoint),
                // Past the user area: paged metadata not rebuilt yet.
                Checkpoint::At(_) => Ok(Checkpoint::ZERO),
                Checkpoint::End if state.flags.edge_swapped => Ok(Checkpoint::ZERO),
                Checkpoint::End => Ok(Checkpoint::End),
            }
        }

        ConfigurationMode::MirrorFirst | ConfigurationMode::MirrorSecond => {
            let source = match state.mode {
                ConfigurationMode::MirrorFirst => EdgeIndex::First,
                _ => EdgeIndex::Second,
            };
            let destination = source.other();
            match query {
                CheckpointQuery::MarkNeedsRebuild => {
                    if state.flags.source_failed {
                        Ok(state.edge(destination).checkpoint)
                    } else {
                        Ok(state.edge(source).checkpoint)
                    }
                }
                CheckpointQuery::ClearRebuildLogging => {
                    if state.is_copy_complete() {
                        Ok(state.edge(destination).checkpoint)
                    } else {
                        Ok(state.edge(source).checkpoint)
                    }
                }
            }
        }

        ConfigurationMode::Unknown => Err(ExtentError::ModeUnknown),
    }
}
