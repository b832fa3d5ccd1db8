//! The extent state machine kernel.
//!
//! `apply` is the single entry point: it consumes the current state plus one
//! input and returns the successor state and the effects the runtime must
//! execute. Multi-phase transitions (swap-in, swap-out, spare finalize) only
//! advance the in-memory image when the runtime reports the corresponding
//! metadata write durable via [`Input::MetadataCommitted`], so a crash between
//! phases resumes from the persisted record rather than a half-applied one.

use thiserror::Error;

use gneiss_types::{
    Checkpoint, CheckpointQuery, ConfigurationMode, CopyRequestType, DownstreamHealth, EdgeIndex,
    JobErrorCode, JobNumber, JobStatus, PathAttributes, PathState, SwapCommand,
};

use crate::effects::Effect;
use crate::health::evaluate_health;
use crate::state::{ExtentFlags, ExtentState, SwapInPhase, SwapOutPhase, SwapOutReason, Transition};

/// Delay before a passive node without a live peer re-checks ownership.
pub const REEVALUATE_DELAY_MS: u64 = 1000;

// ============================================================================
// Errors
// ============================================================================

/// Rejection of an input; the state is unchanged when one is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExtentError {
    #[error("a swap or copy is already in progress")]
    SwapInProgress,
    #[error("configuration mode is not yet committed")]
    ModeUnknown,
    #[error("{command} is not valid in mode {mode:?}")]
    ModeMismatch {
        mode: ConfigurationMode,
        command: SwapCommand,
    },
    #[error("{command} may not target edge {requested}")]
    WrongSwapEdge {
        command: SwapCommand,
        requested: EdgeIndex,
    },
    #[error("checkpoint query {query:?} is not supported in mode {mode:?}")]
    QueryUnsupported {
        mode: ConfigurationMode,
        query: CheckpointQuery,
    },
    #[error("no transition is in flight")]
    NoTransition,
}

// ============================================================================
// Inputs
// ============================================================================

/// Who is evaluating: only the active node initiates transitions, and a
/// passive node with no live peer must keep re-checking until ownership is
/// settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalContext {
    pub is_active: bool,
    pub peer_alive: bool,
}

impl EvalContext {
    pub const ACTIVE: EvalContext = EvalContext {
        is_active: true,
        peer_alive: false,
    };
}

/// One event for the kernel to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// The downstream transport reported a new path state or attributes.
    EdgeChanged {
        edge: EdgeIndex,
        path_state: PathState,
        attributes: PathAttributes,
    },
    /// The copy/rebuild engine advanced an edge's checkpoint.
    CheckpointAdvanced {
        edge: EdgeIndex,
        checkpoint: Checkpoint,
    },
    /// An operator or sparing policy requested a swap.
    StartSwap {
        job_number: JobNumber,
        command: SwapCommand,
        edge: EdgeIndex,
    },
    /// The parent finished marking the swapped-in region needs-rebuild.
    MarkNeedsRebuildDone,
    /// Periodic monitor pass.
    Evaluate,
    /// The metadata write for the in-flight transition phase is durable.
    MetadataCommitted,
    /// The metadata write for the in-flight transition phase failed; the
    /// kernel re-emits the same phase so the runtime can retry.
    MetadataWriteFailed,
}

// ============================================================================
// Kernel
// ============================================================================

/// Applies one input, returning the successor state and effects to execute.
///
/// Inputs are validated before anything is touched: on `Err` the caller's
/// state is still the current one.
pub fn apply(
    state: &ExtentState,
    input: Input,
    ctx: EvalContext,
) -> Result<(ExtentState, Vec<Effect>), ExtentError> {
    let mut state = state.clone();
    let mut effects = Vec::new();

    match input {
        Input::EdgeChanged {
            edge,
            path_state,
            attributes,
        } => {
            state.edge_mut(edge).path_state = path_state;
            state.edge_mut(edge).attributes = attributes;

            // First attached device decides the initial pass-thru mode.
            if state.mode == ConfigurationMode::Unknown && path_state.is_enabled() {
                state.mode = ConfigurationMode::pass_thru_with_primary(edge);
                effects.push(Effect::PersistMode {
                    mode: state.mode,
                    flags: state.flags,
                });
                return Ok((state, effects));
            }

            // Losing the source mid-copy changes the cleanup rules later on.
            if let Some(source) = state.mode.source_edge() {
                if source == edge
                    && path_state == PathState::Broken
                    && !state.is_copy_complete()
                    && !state.flags.source_failed
                {
                    state.flags.source_failed = true;
                    effects.push(Effect::PersistFlags { flags: state.flags });
                }
            }

            // A pending copy request whose destination just came up starts
            // the mirror transition.
            if state.transition.is_none()
                && state.copy_request.is_some()
                && state.swap_in_edge == Some(edge)
                && path_state.is_enabled()
                && state.mode.is_pass_thru()
            {
                begin_swap_in(&mut state, &mut effects);
                return Ok((state, effects));
            }

            evaluate_pass(&mut state, ctx, &mut effects);
            Ok((state, effects))
        }

        Input::CheckpointAdvanced { edge, checkpoint } => {
            // Checkpoints only move forward; a stale report is dropped.
            if checkpoint > state.edge(edge).checkpoint {
                state.edge_mut(edge).checkpoint = checkpoint;
            }
            evaluate_pass(&mut state, ctx, &mut effects);
            Ok((state, effects))
        }

        Input::StartSwap {
            job_number,
            command,
            edge,
        } => {
            start_swap(&mut state, job_number, command, edge, &mut effects)?;
            Ok((state, effects))
        }

        Input::MarkNeedsRebuildDone => {
            if !state.flags.mark_nr_required || state.transition.is_some() {
                return Err(ExtentError::NoTransition);
            }
            let Some(edge) = state.swap_in_edge else {
                return Err(ExtentError::NoTransition);
            };
            state.transition = Some(Transition::FinalizeSpare { edge });
            effects.push(Effect::PersistCheckpointToEnd { edge });
            Ok((state, effects))
        }

        Input::Evaluate => {
            if let Some(transition) = state.transition {
                // Monitor pass while a phase write is outstanding: re-issue
                // it, the persistence layer deduplicates.
                effects.push(phase_effect(&state, transition));
            } else {
                evaluate_pass(&mut state, ctx, &mut effects);
            }
            Ok((state, effects))
        }

        Input::MetadataCommitted => {
            let Some(transition) = state.transition else {
                return Err(ExtentError::NoTransition);
            };
            advance_transition(&mut state, transition, &mut effects);
            Ok((state, effects))
        }

        Input::MetadataWriteFailed => {
            let Some(transition) = state.transition else {
                return Err(ExtentError::NoTransition);
            };
            effects.push(phase_effect(&state, transition));
            Ok((state, effects))
        }
    }
}

// ============================================================================
// Health-driven evaluation
// ============================================================================

fn evaluate_pass(state: &mut ExtentState, ctx: EvalContext, effects: &mut Vec<Effect>) {
    if state.transition.is_some() {
        return;
    }

    let health = evaluate_health(state);

    // A passive node with no live peer cannot tell whether it is about to
    // become the owner; keep re-checking instead of acting.
    if matches!(
        health,
        DownstreamHealth::Optimal | DownstreamHealth::Degraded
    ) && !ctx.is_active
        && !ctx.peer_alive
    {
        effects.push(Effect::Reevaluate {
            after_ms: REEVALUATE_DELAY_MS,
        });
        return;
    }

    match health {
        DownstreamHealth::Optimal => {
            if !ctx.is_active {
                return;
            }
            if state.is_copy_complete() && !state.optimal_complete_copy {
                // Fires at most once per copy; the swap-out owns the rest.
                state.optimal_complete_copy = true;
                if state.flags.needs_replacement_drive {
                    state.flags.needs_replacement_drive = false;
                    effects.push(Effect::PersistFlags { flags: state.flags });
                }
                begin_swap_out(state, SwapOutReason::CopyComplete, effects);
            } else if !state.is_copy_complete() && !state.is_destination_healthy() {
                begin_swap_out(state, SwapOutReason::DestinationUnhealthy, effects);
            }
        }
        DownstreamHealth::Degraded => {
            effects.push(Effect::EvaluateRebuildLogging);
        }
        DownstreamHealth::Disabled => {
            effects.push(Effect::QuiesceIo);
        }
        DownstreamHealth::Broken => {
            effects.push(Effect::FailExtent);
        }
    }
}

// ============================================================================
// Swap request validation and setup
// ============================================================================

fn start_swap(
    state: &mut ExtentState,
    job_number: JobNumber,
    command: SwapCommand,
    edge: EdgeIndex,
    effects: &mut Vec<Effect>,
) -> Result<(), ExtentError> {
    if state.transition.is_some() {
        return Err(ExtentError::SwapInProgress);
    }
    if state.mode == ConfigurationMode::Unknown {
        return Err(ExtentError::ModeUnknown);
    }

    match command {
        SwapCommand::PermanentSpare => {
            if state.swap_in_progress {
                return Err(ExtentError::SwapInProgress);
            }
            let Some(primary) = state.mode.primary_edge() else {
                return Err(ExtentError::ModeMismatch {
                    mode: state.mode,
                    command,
                });
            };
            if edge != primary {
                return Err(ExtentError::WrongSwapEdge {
                    command,
                    requested: edge,
                });
            }
            state.swap_in_progress = true;
            state.swap_job = Some(job_number);
            state.swap_command = Some(command);
            state.swap_in_edge = Some(edge);
            state.flags.edge_swapped = true;
            state.flags.mark_nr_required = true;
            effects.push(Effect::PersistFlags { flags: state.flags });
            effects.push(Effect::MarkNeedsRebuild);
        }

        SwapCommand::ProactiveCopy | SwapCommand::UserCopy => {
            if state.swap_in_progress {
                return Err(ExtentError::SwapInProgress);
            }
            let Some(primary) = state.mode.primary_edge() else {
                return Err(ExtentError::ModeMismatch {
                    mode: state.mode,
                    command,
                });
            };
            if edge != primary.other() {
                return Err(ExtentError::WrongSwapEdge {
                    command,
                    requested: edge,
                });
            }
            state.swap_in_progress = true;
            state.swap_job = Some(job_number);
            state.swap_command = Some(command);
            state.swap_in_edge = Some(edge);
            state.copy_request = Some(match command {
                SwapCommand::ProactiveCopy => CopyRequestType::Proactive,
                _ => CopyRequestType::UserInitiated,
            });
            state.flags.needs_replacement_drive = true;
            effects.push(Effect::PersistFlags { flags: state.flags });
            // The destination may already be attached; otherwise the
            // transition starts when its edge comes up.
            if state.edge(edge).is_enabled() {
                begin_swap_in(state, effects);
            }
        }

        SwapCommand::AbortCopy => {
            if !state.mode.is_mirror() {
                return Err(ExtentError::ModeMismatch {
                    mode: state.mode,
                    command,
                });
            }
            // The copy job that is being aborted terminates now; its waiter
            // should not sit out the swap-out phases.
            if let Some(copy_job) = state.swap_job.take() {
                effects.push(Effect::NotifyJob {
                    job_number: copy_job,
                    status: JobStatus::Failed,
                    error_code: JobErrorCode::ValidationFailed,
                    object_id: state.object_id,
                });
            }
            state.swap_in_progress = true;
            state.swap_job = Some(job_number);
            state.swap_command = Some(command);
            begin_swap_out(state, SwapOutReason::Aborted, effects);
        }
    }

    Ok(())
}

fn begin_swap_in(state: &mut ExtentState, effects: &mut Vec<Effect>) {
    let Some(destination) = state.swap_in_edge else {
        return;
    };
    let source = destination.other();
    state.transition = Some(Transition::SwapIn {
        destination,
        target_mode: ConfigurationMode::mirror_with_source(source),
        phase: SwapInPhase::WriteDestinationCheckpoint,
    });
    effects.push(Effect::PersistCheckpoint {
        edge: destination,
        checkpoint: Checkpoint::ZERO,
    });
}

fn begin_swap_out(state: &mut ExtentState, reason: SwapOutReason, effects: &mut Vec<Effect>) {
    let Some(source) = state.mode.source_edge() else {
        return;
    };
    // Copy complete retires the source; otherwise the destination goes.
    let (survivor, removed) = match reason {
        SwapOutReason::CopyComplete => (source.other(), source),
        SwapOutReason::DestinationUnhealthy | SwapOutReason::Aborted => (source, source.other()),
    };
    state.swap_out_edge = Some(removed);
    state.transition = Some(Transition::SwapOut {
        survivor,
        removed,
        target_mode: ConfigurationMode::pass_thru_with_primary(survivor),
        reason,
        phase: SwapOutPhase::WriteSurvivorCheckpoint,
    });
    effects.push(Effect::PersistCheckpoint {
        edge: survivor,
        checkpoint: Checkpoint::End,
    });
}

// ============================================================================
// Transition phase advancement
// ============================================================================

/// The metadata write the in-flight transition is waiting on, if any.
///
/// The runtime uses this to tell the phase write apart from incidental
/// persists emitted by unrelated inputs arriving mid-transition; only the
/// phase write's completion may be acknowledged as `MetadataCommitted`.
pub fn pending_phase_write(state: &ExtentState) -> Option<Effect> {
    state.transition.map(|transition| phase_effect(state, transition))
}

/// The metadata write belonging to the current phase of `transition`.
fn phase_effect(state: &ExtentState, transition: Transition) -> Effect {
    match transition {
        Transition::SwapIn {
            destination,
            target_mode,
            phase,
        } => match phase {
            SwapInPhase::WriteDestinationCheckpoint => Effect::PersistCheckpoint {
                edge: destination,
                checkpoint: Checkpoint::ZERO,
            },
            SwapInPhase::WriteMode => Effect::PersistMode {
                mode: target_mode,
                flags: state.flags,
            },
        },
        Transition::SwapOut {
            survivor,
            removed,
            target_mode,
            reason,
            phase,
        } => match phase {
            SwapOutPhase::WriteSurvivorCheckpoint => Effect::PersistCheckpoint {
                edge: survivor,
                checkpoint: Checkpoint::End,
            },
            SwapOutPhase::WriteRemovedLogging => Effect::PersistRebuildLogging {
                edge: removed,
                checkpoint: Checkpoint::ZERO,
            },
            SwapOutPhase::WriteMode => Effect::PersistMode {
                mode: target_mode,
                flags: swap_out_flags(state.flags, reason),
            },
        },
        Transition::FinalizeSpare { edge } => Effect::PersistCheckpointToEnd { edge },
    }
}

/// Flag cleanup committed together with the swap-out mode flip.
fn swap_out_flags(mut flags: ExtentFlags, reason: SwapOutReason) -> ExtentFlags {
    if reason == SwapOutReason::CopyComplete {
        // The drive that needed replacing is gone with the source.
        flags.needs_replacement_drive = false;
    }
    flags
}

fn advance_transition(state: &mut ExtentState, transition: Transition, effects: &mut Vec<Effect>) {
    match transition {
        Transition::SwapIn {
            destination,
            target_mode,
            phase,
        } => match phase {
            SwapInPhase::WriteDestinationCheckpoint => {
                state.edge_mut(destination).checkpoint = Checkpoint::ZERO;
                state.transition = Some(Transition::SwapIn {
                    destination,
                    target_mode,
                    phase: SwapInPhase::WriteMode,
                });
                effects.push(Effect::PersistMode {
                    mode: target_mode,
                    flags: state.flags,
                });
            }
            SwapInPhase::WriteMode => {
                state.mode = target_mode;
                state.transition = None;
            }
        },

        Transition::SwapOut {
            survivor,
            removed,
            target_mode,
            reason,
            phase,
        } => match phase {
            SwapOutPhase::WriteSurvivorCheckpoint => {
                state.edge_mut(survivor).checkpoint = Checkpoint::End;
                state.transition = Some(Transition::SwapOut {
                    survivor,
                    removed,
                    target_mode,
                    reason,
                    phase: SwapOutPhase::WriteRemovedLogging,
                });
                effects.push(Effect::PersistRebuildLogging {
                    edge: removed,
                    checkpoint: Checkpoint::ZERO,
                });
            }
            SwapOutPhase::WriteRemovedLogging => {
                let edge = state.edge_mut(removed);
                edge.attributes.rebuild_logging = true;
                edge.checkpoint = Checkpoint::ZERO;
                state.transition = Some(Transition::SwapOut {
                    survivor,
                    removed,
                    target_mode,
                    reason,
                    phase: SwapOutPhase::WriteMode,
                });
                effects.push(Effect::PersistMode {
                    mode: target_mode,
                    flags: swap_out_flags(state.flags, reason),
                });
            }
            SwapOutPhase::WriteMode => {
                state.mode = target_mode;
                state.flags = swap_out_flags(state.flags, reason);
                state.transition = None;
                finish_swap(
                    state,
                    match reason {
                        SwapOutReason::CopyComplete | SwapOutReason::Aborted => {
                            (JobStatus::Ok, JobErrorCode::NoError)
                        }
                        SwapOutReason::DestinationUnhealthy => {
                            (JobStatus::Failed, JobErrorCode::ValidationFailed)
                        }
                    },
                    effects,
                );
            }
        },

        Transition::FinalizeSpare { edge } => {
            state.edge_mut(edge).checkpoint = Checkpoint::End;
            state.flags.edge_swapped = false;
            state.flags.mark_nr_required = false;
            state.transition = None;
            finish_swap(state, (JobStatus::Ok, JobErrorCode::NoError), effects);
        }
    }
}

/// Clears per-swap bookkeeping and notifies the owning job, if any.
fn finish_swap(
    state: &mut ExtentState,
    (status, error_code): (JobStatus, JobErrorCode),
    effects: &mut Vec<Effect>,
) {
    state.copy_request = None;
    state.swap_in_edge = None;
    state.swap_out_edge = None;
    state.swap_in_progress = false;
    state.optimal_complete_copy = false;
    state.swap_command = None;
    if let Some(job_number) = state.swap_job.take() {
        effects.push(Effect::NotifyJob {
            job_number,
            status,
            error_code,
            object_id: state.object_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gneiss_types::ObjectId;

    fn pass_thru_first() -> ExtentState {
        let mut state = ExtentState::new(ObjectId::new(7), 0x1000);
        state.mode = ConfigurationMode::PassThruFirst;
        state.edge_mut(EdgeIndex::First).path_state = PathState::Enabled;
        state
    }

    fn step(state: &ExtentState, input: Input) -> (ExtentState, Vec<Effect>) {
        apply(state, input, EvalContext::ACTIVE).expect("input accepted")
    }

    #[test]
    fn first_enabled_edge_sets_initial_mode() {
        let state = ExtentState::new(ObjectId::new(1), 0x1000);
        let (state, effects) = step(
            &state,
            Input::EdgeChanged {
                edge: EdgeIndex::Second,
                path_state: PathState::Enabled,
                attributes: PathAttributes::default(),
            },
        );
        assert_eq!(state.mode, ConfigurationMode::PassThruSecond);
        assert_eq!(
            effects,
            vec![Effect::PersistMode {
                mode: ConfigurationMode::PassThruSecond,
                flags: ExtentFlags::default(),
            }]
        );
    }

    #[test]
    fn copy_request_waits_for_destination_then_swaps_in() {
        let state = pass_thru_first();
        let (state, effects) = step(
            &state,
            Input::StartSwap {
                job_number: JobNumber::new(11),
                command: SwapCommand::ProactiveCopy,
                edge: EdgeIndex::Second,
            },
        );
        // Destination not attached yet: only the flag write happens.
        assert!(state.transition.is_none());
        assert!(state.flags.needs_replacement_drive);
        assert_eq!(effects.len(), 1);

        let (state, effects) = step(
            &state,
            Input::EdgeChanged {
                edge: EdgeIndex::Second,
                path_state: PathState::Enabled,
                attributes: PathAttributes::default(),
            },
        );
        assert!(matches!(
            state.transition,
            Some(Transition::SwapIn {
                destination: EdgeIndex::Second,
                target_mode: ConfigurationMode::MirrorFirst,
                phase: SwapInPhase::WriteDestinationCheckpoint,
            })
        ));
        assert_eq!(
            effects,
            vec![Effect::PersistCheckpoint {
                edge: EdgeIndex::Second,
                checkpoint: Checkpoint::ZERO,
            }]
        );

        // Mode only flips after both writes are durable.
        let (state, effects) = step(&state, Input::MetadataCommitted);
        assert_eq!(state.mode, ConfigurationMode::PassThruFirst);
        assert_eq!(
            effects,
            vec![Effect::PersistMode {
                mode: ConfigurationMode::MirrorFirst,
                flags: state.flags,
            }]
        );
        let (state, _) = step(&state, Input::MetadataCommitted);
        assert_eq!(state.mode, ConfigurationMode::MirrorFirst);
        assert!(state.transition.is_none());
        assert_eq!(state.edge(EdgeIndex::Second).checkpoint, Checkpoint::ZERO);
    }

    #[test]
    fn second_swap_rejected_while_one_in_flight() {
        let state = pass_thru_first();
        let (state, _) = step(
            &state,
            Input::StartSwap {
                job_number: JobNumber::new(1),
                command: SwapCommand::UserCopy,
                edge: EdgeIndex::Second,
            },
        );
        let err = apply(
            &state,
            Input::StartSwap {
                job_number: JobNumber::new(2),
                command: SwapCommand::ProactiveCopy,
                edge: EdgeIndex::Second,
            },
            EvalContext::ACTIVE,
        )
        .unwrap_err();
        assert_eq!(err, ExtentError::SwapInProgress);
    }

    #[test]
    fn copy_targeting_primary_edge_is_rejected() {
        let err = apply(
            &pass_thru_first(),
            Input::StartSwap {
                job_number: JobNumber::new(1),
                command: SwapCommand::UserCopy,
                edge: EdgeIndex::First,
            },
            EvalContext::ACTIVE,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ExtentError::WrongSwapEdge {
                command: SwapCommand::UserCopy,
                requested: EdgeIndex::First,
            }
        );
    }

    #[test]
    fn write_failure_replays_the_same_phase() {
        let mut state = pass_thru_first();
        state.edge_mut(EdgeIndex::Second).path_state = PathState::Enabled;
        let (state, first_effects) = step(
            &state,
            Input::StartSwap {
                job_number: JobNumber::new(5),
                command: SwapCommand::UserCopy,
                edge: EdgeIndex::Second,
            },
        );
        let (state, retry_effects) = step(&state, Input::MetadataWriteFailed);
        assert_eq!(retry_effects, vec![first_effects[1].clone()]);
        assert!(matches!(
            state.transition,
            Some(Transition::SwapIn {
                phase: SwapInPhase::WriteDestinationCheckpoint,
                ..
            })
        ));
    }

    #[test]
    fn passive_node_without_peer_defers() {
        let state = pass_thru_first();
        let ctx = EvalContext {
            is_active: false,
            peer_alive: false,
        };
        let (_, effects) = apply(&state, Input::Evaluate, ctx).expect("evaluate");
        assert_eq!(
            effects,
            vec![Effect::Reevaluate {
                after_ms: REEVALUATE_DELAY_MS,
            }]
        );
    }

    #[test]
    fn passive_node_with_live_peer_still_raises_conditions() {
        // Only the re-evaluation deferral is gated on passive-and-peer-dead;
        // health conditions are raised whichever node evaluates.
        let state = pass_thru_first();
        let ctx = EvalContext {
            is_active: false,
            peer_alive: true,
        };
        let (_, effects) = apply(&state, Input::Evaluate, ctx).expect("evaluate");
        assert_eq!(effects, vec![Effect::EvaluateRebuildLogging]);
    }

    #[test]
    fn passive_node_never_starts_the_copy_complete_swap_out() {
        let mut state = pass_thru_first();
        state.mode = ConfigurationMode::MirrorFirst;
        state.edge_mut(EdgeIndex::Second).path_state = PathState::Enabled;
        state.edge_mut(EdgeIndex::Second).checkpoint = Checkpoint::End;
        let ctx = EvalContext {
            is_active: false,
            peer_alive: true,
        };
        let (state, effects) = apply(&state, Input::Evaluate, ctx).expect("evaluate");
        assert!(state.transition.is_none());
        assert!(effects.is_empty());
    }

    #[test]
    fn broken_extent_fails_and_disabled_quiesces() {
        let mut state = pass_thru_first();
        state.edge_mut(EdgeIndex::First).path_state = PathState::Broken;
        let (state, effects) = step(&state, Input::Evaluate);
        assert_eq!(effects, vec![Effect::FailExtent]);

        let mut state = state;
        state.edge_mut(EdgeIndex::First).path_state = PathState::Disabled;
        let (_, effects) = step(&state, Input::Evaluate);
        assert_eq!(effects, vec![Effect::QuiesceIo]);
    }

    #[test]
    fn source_failure_mid_copy_sets_flag_once() {
        let mut state = pass_thru_first();
        state.mode = ConfigurationMode::MirrorFirst;
        state.edge_mut(EdgeIndex::Second).path_state = PathState::Enabled;
        let (state, effects) = step(
            &state,
            Input::EdgeChanged {
                edge: EdgeIndex::First,
                path_state: PathState::Broken,
                attributes: PathAttributes::default(),
            },
        );
        assert!(state.flags.source_failed);
        assert!(effects.contains(&Effect::PersistFlags { flags: state.flags }));

        let (state, effects) = step(
            &state,
            Input::EdgeChanged {
                edge: EdgeIndex::First,
                path_state: PathState::Broken,
                attributes: PathAttributes::default(),
            },
        );
        assert!(state.flags.source_failed);
        assert!(!effects.iter().any(|e| matches!(e, Effect::PersistFlags { .. })));
    }

    #[test]
    fn stale_checkpoint_report_is_ignored() {
        let mut state = pass_thru_first();
        state.edge_mut(EdgeIndex::First).checkpoint = Checkpoint::At(0x800);
        let (state, _) = step(
            &state,
            Input::CheckpointAdvanced {
                edge: EdgeIndex::First,
                checkpoint: Checkpoint::At(0x400),
            },
        );
        assert_eq!(state.edge(EdgeIndex::First).checkpoint, Checkpoint::At(0x800));
    }

    #[test]
    fn permanent_spare_finalizes_through_mark_nr() {
        let state = pass_thru_first();
        let (state, effects) = step(
            &state,
            Input::StartSwap {
                job_number: JobNumber::new(3),
                command: SwapCommand::PermanentSpare,
                edge: EdgeIndex::First,
            },
        );
        assert!(state.flags.edge_swapped);
        assert!(state.flags.mark_nr_required);
        assert!(effects.contains(&Effect::MarkNeedsRebuild));

        let (state, effects) = step(&state, Input::MarkNeedsRebuildDone);
        assert_eq!(
            effects,
            vec![Effect::PersistCheckpointToEnd {
                edge: EdgeIndex::First,
            }]
        );

        let (state, effects) = step(&state, Input::MetadataCommitted);
        assert_eq!(state.edge(EdgeIndex::First).checkpoint, Checkpoint::End);
        assert!(!state.flags.edge_swapped);
        assert!(!state.flags.mark_nr_required);
        assert!(!state.swap_in_progress);
        assert_eq!(
            effects,
            vec![Effect::NotifyJob {
                job_number: JobNumber::new(3),
                status: JobStatus::Ok,
                error_code: JobErrorCode::NoError,
                object_id: ObjectId::new(7),
            }]
        );
    }

    #[test]
    fn abort_copy_fails_the_copy_job_and_swaps_out_the_destination() {
        // Mirror established by a user copy.
        let mut state = pass_thru_first();
        state.mode = ConfigurationMode::MirrorFirst;
        state.edge_mut(EdgeIndex::Second).path_state = PathState::Enabled;
        state.swap_in_progress = true;
        state.swap_job = Some(JobNumber::new(20));
        state.copy_request = Some(CopyRequestType::UserInitiated);

        let (state, effects) = step(
            &state,
            Input::StartSwap {
                job_number: JobNumber::new(21),
                command: SwapCommand::AbortCopy,
                edge: EdgeIndex::Second,
            },
        );
        assert_eq!(
            effects[0],
            Effect::NotifyJob {
                job_number: JobNumber::new(20),
                status: JobStatus::Failed,
                error_code: JobErrorCode::ValidationFailed,
                object_id: ObjectId::new(7),
            }
        );
        assert!(matches!(
            state.transition,
            Some(Transition::SwapOut {
                survivor: EdgeIndex::First,
                removed: EdgeIndex::Second,
                target_mode: ConfigurationMode::PassThruFirst,
                reason: SwapOutReason::Aborted,
                phase: SwapOutPhase::WriteSurvivorCheckpoint,
            })
        ));

        // Drive the three phases to completion.
        let (state, _) = step(&state, Input::MetadataCommitted);
        let (state, _) = step(&state, Input::MetadataCommitted);
        let (state, effects) = step(&state, Input::MetadataCommitted);
        assert_eq!(state.mode, ConfigurationMode::PassThruFirst);
        assert_eq!(
            effects,
            vec![Effect::NotifyJob {
                job_number: JobNumber::new(21),
                status: JobStatus::Ok,
                error_code: JobErrorCode::NoError,
                object_id: ObjectId::new(7),
            }]
        );
    }
}
