//! End-to-end exercises of the extent state machine: full drive-replacement
//! flows driven through `apply`, plus property checks over arbitrary edge
//! states.

use proptest::prelude::*;
use test_case::test_case;

use gneiss_types::{
    Checkpoint, CheckpointQuery, ConfigurationMode, DownstreamHealth, EdgeIndex, JobErrorCode,
    JobNumber, JobStatus, ObjectId, PathAttributes, PathState, SwapCommand,
};

use crate::checkpoint::{checkpoint_for_extent, checkpoint_for_parent_group};
use crate::effects::Effect;
use crate::health::evaluate_health;
use crate::kernel::{EvalContext, Input, apply};
use crate::state::ExtentState;

const CAPACITY: u64 = 0x1000;

fn step(state: &ExtentState, input: Input) -> (ExtentState, Vec<Effect>) {
    apply(state, input, EvalContext::ACTIVE).expect("input accepted")
}

/// Commits every outstanding metadata write, collecting all effects.
fn drain_commits(mut state: ExtentState) -> (ExtentState, Vec<Effect>) {
    let mut all = Vec::new();
    while state.transition.is_some() {
        let (next, effects) = step(&state, Input::MetadataCommitted);
        all.extend(effects);
        state = next;
    }
    (state, all)
}

fn enabled(edge: EdgeIndex) -> Input {
    Input::EdgeChanged {
        edge,
        path_state: PathState::Enabled,
        attributes: PathAttributes::default(),
    }
}

/// A fresh extent with the first device attached in pass-thru mode.
fn fresh_pass_thru_first() -> ExtentState {
    let state = ExtentState::new(ObjectId::new(42), CAPACITY);
    let (state, _) = step(&state, enabled(EdgeIndex::First));
    assert_eq!(state.mode, ConfigurationMode::PassThruFirst);
    state
}

/// A mirror mid-copy, reached through a proactive copy request.
fn mirror_mid_copy() -> ExtentState {
    let state = fresh_pass_thru_first();
    let (state, _) = step(
        &state,
        Input::StartSwap {
            job_number: JobNumber::new(100),
            command: SwapCommand::ProactiveCopy,
            edge: EdgeIndex::Second,
        },
    );
    let (state, _) = step(&state, enabled(EdgeIndex::Second));
    let (state, _) = drain_commits(state);
    assert_eq!(state.mode, ConfigurationMode::MirrorFirst);
    state
}

// ============================================================================
// Drive replacement flows
// ============================================================================

#[test]
fn proactive_copy_attaches_destination_and_mirrors() {
    let state = fresh_pass_thru_first();
    let (state, _) = step(
        &state,
        Input::StartSwap {
            job_number: JobNumber::new(100),
            command: SwapCommand::ProactiveCopy,
            edge: EdgeIndex::Second,
        },
    );
    assert!(state.flags.needs_replacement_drive);
    assert!(state.transition.is_none());

    let (state, _) = step(&state, enabled(EdgeIndex::Second));
    let (state, _) = drain_commits(state);

    assert_eq!(state.mode, ConfigurationMode::MirrorFirst);
    assert_eq!(state.mode.source_edge(), Some(EdgeIndex::First));
    assert_eq!(state.mode.destination_edge(), Some(EdgeIndex::Second));
    assert_eq!(state.edge(EdgeIndex::Second).checkpoint, Checkpoint::ZERO);
}

#[test]
fn copy_completion_retires_the_source() {
    let state = mirror_mid_copy();
    let (state, _) = step(
        &state,
        Input::CheckpointAdvanced {
            edge: EdgeIndex::Second,
            checkpoint: Checkpoint::End,
        },
    );
    assert!(state.is_copy_complete());
    assert!(state.transition.is_some());

    let (state, effects) = drain_commits(state);
    assert_eq!(state.mode, ConfigurationMode::PassThruSecond);
    assert_eq!(state.edge(EdgeIndex::Second).checkpoint, Checkpoint::End);
    assert!(state.edge(EdgeIndex::First).attributes.rebuild_logging);
    assert!(state.edge(EdgeIndex::First).checkpoint.is_zero());
    assert!(!state.flags.needs_replacement_drive);
    assert!(!state.swap_in_progress);
    assert!(effects.contains(&Effect::NotifyJob {
        job_number: JobNumber::new(100),
        status: JobStatus::Ok,
        error_code: JobErrorCode::NoError,
        object_id: ObjectId::new(42),
    }));
}

#[test]
fn destination_end_of_life_aborts_the_copy_early() {
    // Mirror with the second edge as the source, copy part-way through.
    let mut state = ExtentState::new(ObjectId::new(9), CAPACITY);
    state.mode = ConfigurationMode::MirrorSecond;
    state.edge_mut(EdgeIndex::First).path_state = PathState::Enabled;
    state.edge_mut(EdgeIndex::Second).path_state = PathState::Enabled;
    state.edge_mut(EdgeIndex::First).checkpoint = Checkpoint::At(0x400);
    state.edge_mut(EdgeIndex::Second).checkpoint = Checkpoint::End;

    let (state, _) = step(
        &state,
        Input::EdgeChanged {
            edge: EdgeIndex::First,
            path_state: PathState::Enabled,
            attributes: PathAttributes {
                end_of_life: true,
                ..PathAttributes::default()
            },
        },
    );
    assert!(state.transition.is_some());

    // The source survives; the half-copied destination is swapped out.
    let (state, _) = drain_commits(state);
    assert_eq!(state.mode, ConfigurationMode::PassThruSecond);
    assert!(state.edge(EdgeIndex::First).attributes.rebuild_logging);
    assert_eq!(state.edge(EdgeIndex::Second).checkpoint, Checkpoint::End);
}

#[test]
fn copy_complete_swap_out_fires_once() {
    let state = mirror_mid_copy();
    let (state, _) = step(
        &state,
        Input::CheckpointAdvanced {
            edge: EdgeIndex::Second,
            checkpoint: Checkpoint::End,
        },
    );
    let started = state.transition;
    assert!(started.is_some());

    // A second monitor pass while the first write is outstanding must not
    // restart the transition.
    let (state, _) = step(&state, Input::Evaluate);
    assert_eq!(state.transition, started);
}

#[test]
fn source_failure_mid_copy_changes_parent_mark_nr_target() {
    let state = mirror_mid_copy();
    let (state, _) = step(
        &state,
        Input::CheckpointAdvanced {
            edge: EdgeIndex::Second,
            checkpoint: Checkpoint::At(0x200),
        },
    );
    let (state, _) = step(
        &state,
        Input::EdgeChanged {
            edge: EdgeIndex::First,
            path_state: PathState::Broken,
            attributes: PathAttributes::default(),
        },
    );
    assert!(state.flags.source_failed);

    // With the source gone the parent marks from the destination's progress.
    let ckpt = checkpoint_for_parent_group(&state, CheckpointQuery::MarkNeedsRebuild)
        .expect("mirror supports mark-nr");
    assert_eq!(ckpt, Checkpoint::At(0x200));
}

// ============================================================================
// Checkpoint query tables
// ============================================================================

#[test_case(Checkpoint::At(0x200), false, Checkpoint::At(0x200); "finite in user area passes through")]
#[test_case(Checkpoint::At(CAPACITY + 1), false, Checkpoint::ZERO; "past user area reads zero")]
#[test_case(Checkpoint::End, false, Checkpoint::End; "fully rebuilt reads end")]
#[test_case(Checkpoint::End, true, Checkpoint::ZERO; "swapped edge at end reads zero")]
fn parent_checkpoint_in_pass_thru(
    primary: Checkpoint,
    edge_swapped: bool,
    expected: Checkpoint,
) {
    let mut state = ExtentState::new(ObjectId::new(1), CAPACITY);
    state.mode = ConfigurationMode::PassThruFirst;
    state.edge_mut(EdgeIndex::First).checkpoint = primary;
    state.flags.edge_swapped = edge_swapped;

    let got = checkpoint_for_parent_group(&state, CheckpointQuery::ClearRebuildLogging)
        .expect("pass-thru supports clear-logging");
    assert_eq!(got, expected);
}

#[test]
fn extent_checkpoint_rejects_mark_nr_in_pass_thru() {
    let state = fresh_pass_thru_first();
    let err = checkpoint_for_extent(&state, EdgeIndex::First, CheckpointQuery::MarkNeedsRebuild)
        .unwrap_err();
    assert_eq!(
        err,
        crate::kernel::ExtentError::QueryUnsupported {
            mode: ConfigurationMode::PassThruFirst,
            query: CheckpointQuery::MarkNeedsRebuild,
        }
    );
}

#[test]
fn extent_checkpoint_after_source_failure_clears_logging() {
    let mut state = fresh_pass_thru_first();
    state.flags.source_failed = true;
    let got = checkpoint_for_extent(&state, EdgeIndex::First, CheckpointQuery::ClearRebuildLogging)
        .expect("pass-thru supports clear-logging");
    assert_eq!(got, Checkpoint::End);
}

#[test_case(false, Checkpoint::At(0x300); "incomplete copy marks from destination")]
#[test_case(true, Checkpoint::End; "complete copy clears at requested edge")]
fn mirror_extent_checkpoint_follows_copy_progress(complete: bool, expected: Checkpoint) {
    let mut state = ExtentState::new(ObjectId::new(1), CAPACITY);
    state.mode = ConfigurationMode::MirrorFirst;
    state.edge_mut(EdgeIndex::First).checkpoint = Checkpoint::At(0x100);
    state.edge_mut(EdgeIndex::Second).checkpoint = if complete {
        Checkpoint::End
    } else {
        Checkpoint::At(0x300)
    };

    let query = if complete {
        CheckpointQuery::ClearRebuildLogging
    } else {
        CheckpointQuery::MarkNeedsRebuild
    };
    let got =
        checkpoint_for_extent(&state, EdgeIndex::Second, query).expect("mirror supports both");
    assert_eq!(got, expected);
}

// ============================================================================
// Properties
// ============================================================================

fn arb_path_state() -> impl Strategy<Value = PathState> {
    prop_oneof![
        Just(PathState::Invalid),
        Just(PathState::Enabled),
        Just(PathState::Disabled),
        Just(PathState::Broken),
    ]
}

fn arb_mode() -> impl Strategy<Value = ConfigurationMode> {
    prop_oneof![
        Just(ConfigurationMode::PassThruFirst),
        Just(ConfigurationMode::PassThruSecond),
        Just(ConfigurationMode::MirrorFirst),
        Just(ConfigurationMode::MirrorSecond),
    ]
}

fn arb_checkpoint() -> impl Strategy<Value = Checkpoint> {
    prop_oneof![(0..=CAPACITY).prop_map(Checkpoint::At), Just(Checkpoint::End)]
}

proptest! {
    /// Pass-thru mode never reports `Optimal`, whatever the edges look like.
    #[test]
    fn pass_thru_health_is_never_optimal(
        first in arb_path_state(),
        second in arb_path_state(),
        primary_second in any::<bool>(),
    ) {
        let mut state = ExtentState::new(ObjectId::new(1), CAPACITY);
        state.mode = if primary_second {
            ConfigurationMode::PassThruSecond
        } else {
            ConfigurationMode::PassThruFirst
        };
        state.edge_mut(EdgeIndex::First).path_state = first;
        state.edge_mut(EdgeIndex::Second).path_state = second;
        prop_assert_ne!(evaluate_health(&state), DownstreamHealth::Optimal);
    }

    /// The parent-visible checkpoint is always 0, `End`, or inside the user
    /// area.
    #[test]
    fn parent_checkpoint_stays_in_bounds(
        mode in arb_mode(),
        first in arb_checkpoint(),
        second in arb_checkpoint(),
        past_capacity in any::<bool>(),
        source_failed in any::<bool>(),
    ) {
        let mut state = ExtentState::new(ObjectId::new(1), CAPACITY);
        state.mode = mode;
        state.edge_mut(EdgeIndex::First).checkpoint = first;
        state.edge_mut(EdgeIndex::Second).checkpoint = second;
        state.flags.source_failed = source_failed;
        if past_capacity {
            state.edge_mut(EdgeIndex::First).checkpoint = Checkpoint::At(CAPACITY + 0x10);
        }

        for query in [CheckpointQuery::ClearRebuildLogging, CheckpointQuery::MarkNeedsRebuild] {
            let got = checkpoint_for_parent_group(&state, query).expect("known mode");
            match got {
                Checkpoint::At(blocks) => prop_assert!(blocks <= CAPACITY + 0x10),
                Checkpoint::End => {}
            }
            if mode.is_pass_thru() {
                if let Checkpoint::At(blocks) = got {
                    prop_assert!(blocks <= CAPACITY);
                }
            }
        }
    }

    /// Whatever single input arrives, the kernel never leaves more than one
    /// transition in flight and never regresses a committed mode to unknown.
    #[test]
    fn single_input_preserves_core_invariants(
        mode in arb_mode(),
        first in arb_path_state(),
        second in arb_path_state(),
        ckpt in arb_checkpoint(),
        eol in any::<bool>(),
    ) {
        let mut state = ExtentState::new(ObjectId::new(1), CAPACITY);
        state.mode = mode;
        state.edge_mut(EdgeIndex::First).path_state = first;
        state.edge_mut(EdgeIndex::Second).path_state = second;

        let inputs = [
            Input::Evaluate,
            Input::CheckpointAdvanced { edge: EdgeIndex::Second, checkpoint: ckpt },
            Input::EdgeChanged {
                edge: EdgeIndex::First,
                path_state: first,
                attributes: PathAttributes { end_of_life: eol, ..PathAttributes::default() },
            },
        ];
        for input in inputs {
            if let Ok((next, _)) = apply(&state, input, EvalContext::ACTIVE) {
                prop_assert_ne!(next.mode, ConfigurationMode::Unknown);
                // Checkpoints never move backwards outside a transition.
                if next.transition.is_none() && state.transition.is_none() {
                    prop_assert!(
                        next.edge(EdgeIndex::Second).checkpoint
                            >= state.edge(EdgeIndex::Second).checkpoint
                    );
                }
            }
        }
    }
}
