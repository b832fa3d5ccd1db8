//! Per-extent event dispatch and effect execution.
//!
//! The plane owns the live extent states and runs the loop the kernel cannot:
//! apply an input, execute the emitted effects, and feed metadata write
//! completions back in until the extent settles. Persist effects are applied
//! synchronously against the [`MetadataStore`]; a failed write is logged and
//! left for the next evaluation pass, which re-emits the same phase.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tracing::{info, warn};

use gneiss_broker::{BrokerConfig, JobBroker, JobCompletion};
use gneiss_config::GneissConfig;
use gneiss_extent::{
    Effect, EvalContext, ExtentState, Input, apply, checkpoint_for_extent,
    checkpoint_for_parent_group, evaluate_health, pending_phase_write,
};
use gneiss_types::{
    Checkpoint, CheckpointQuery, DownstreamHealth, EdgeIndex, JobNumber, ObjectId, PathAttributes,
    PathState, SwapCommand,
};

use crate::conditions::ConditionSink;
use crate::error::{ControlError, from_extent};
use crate::store::{MetadataStore, RecordUpdate};

/// Control plane for a set of virtual extents.
///
/// Single-threaded by design: the owning scheduler serializes calls, matching
/// the kernel's one-writer model. Only the broker runs its own threads.
pub struct ControlPlane<S: MetadataStore, C: ConditionSink> {
    config: GneissConfig,
    store: S,
    conditions: C,
    broker: JobBroker,
    extents: HashMap<ObjectId, ExtentState>,
    next_job: u64,
    is_active: bool,
    peer_alive: bool,
}

impl<S: MetadataStore, C: ConditionSink> ControlPlane<S, C> {
    /// Builds the plane and starts the broker workers.
    pub fn new(config: GneissConfig, store: S, conditions: C) -> Self {
        let broker = JobBroker::start(BrokerConfig {
            inbox_capacity: config.broker.inbox_capacity,
            sweep_interval: Duration::from_millis(config.broker.sweep_interval_ms),
            gc_interval_ticks: config.broker.gc_interval_ticks,
            max_pending_age: Duration::from_secs(config.broker.max_pending_age_secs),
        });
        Self {
            config,
            store,
            conditions,
            broker,
            extents: HashMap::new(),
            next_job: 1,
            is_active: true,
            peer_alive: false,
        }
    }

    /// Sets whether this node is the active processing side and whether the
    /// peer node is alive.
    pub fn set_role(&mut self, is_active: bool, peer_alive: bool) {
        self.is_active = is_active;
        self.peer_alive = peer_alive;
    }

    /// Registers an extent, hydrating from its persisted record if one
    /// exists.
    pub fn register_extent(
        &mut self,
        object_id: ObjectId,
        user_capacity: u64,
    ) -> Result<(), ControlError> {
        let mut state = ExtentState::new(object_id, user_capacity);
        if let Some(record) = self.store.read(object_id)? {
            state.mode = record.mode;
            state.flags = record.flags;
            for edge in [EdgeIndex::First, EdgeIndex::Second] {
                let slot = state.edge_mut(edge);
                slot.checkpoint = record.checkpoints[edge.as_usize()];
                slot.attributes.rebuild_logging = record.rebuild_logging[edge.as_usize()];
            }
            info!(object = %object_id, mode = ?state.mode, "extent hydrated from record");
        }
        self.extents.insert(object_id, state);
        Ok(())
    }

    pub fn extent(&self, object_id: ObjectId) -> Option<&ExtentState> {
        self.extents.get(&object_id)
    }

    // ------------------------------------------------------------------
    // Event entry points
    // ------------------------------------------------------------------

    /// Downstream transport reported an edge path change.
    pub fn edge_changed(
        &mut self,
        object_id: ObjectId,
        edge: EdgeIndex,
        path_state: PathState,
        attributes: PathAttributes,
    ) -> Result<Option<Duration>, ControlError> {
        self.dispatch(
            object_id,
            Input::EdgeChanged {
                edge,
                path_state,
                attributes,
            },
        )
    }

    /// The copy/rebuild engine advanced a checkpoint.
    pub fn checkpoint_advanced(
        &mut self,
        object_id: ObjectId,
        edge: EdgeIndex,
        checkpoint: Checkpoint,
    ) -> Result<Option<Duration>, ControlError> {
        self.dispatch(object_id, Input::CheckpointAdvanced { edge, checkpoint })
    }

    /// Periodic monitor pass for one extent. Returns a re-evaluation delay
    /// when the extent asked to be polled again.
    pub fn evaluate(&mut self, object_id: ObjectId) -> Result<Option<Duration>, ControlError> {
        self.dispatch(object_id, Input::Evaluate)
    }

    /// The parent finished the needs-rebuild marking a permanent spare asked
    /// for.
    pub fn mark_needs_rebuild_done(
        &mut self,
        object_id: ObjectId,
    ) -> Result<Option<Duration>, ControlError> {
        self.dispatch(object_id, Input::MarkNeedsRebuildDone)
    }

    // ------------------------------------------------------------------
    // Job API
    // ------------------------------------------------------------------

    /// Validates and starts a swap request, returning the job number to wait
    /// on.
    ///
    /// `edge_index` is the raw wire index; anything but 0 or 1 is rejected.
    /// A user copy names the replacement drive it targets in `spare_id`; for
    /// the other commands the sparing policy picks and `spare_id` is `None`.
    pub fn begin_swap(
        &mut self,
        object_id: ObjectId,
        command: SwapCommand,
        edge_index: u32,
        spare_id: Option<ObjectId>,
        confirm: bool,
    ) -> Result<JobNumber, ControlError> {
        let Some(edge) = EdgeIndex::from_raw(edge_index) else {
            return Err(ControlError::InvalidRequest("edge index must be 0 or 1"));
        };
        if self.config.jobs.confirmation_required && !confirm {
            return Err(ControlError::InvalidRequest(
                "swap request requires confirmation",
            ));
        }
        if command == SwapCommand::UserCopy && spare_id.is_none() {
            return Err(ControlError::InvalidRequest(
                "user copy requires a replacement drive",
            ));
        }
        let state = self
            .extents
            .get(&object_id)
            .ok_or(ControlError::UnknownExtent(object_id))?;

        if matches!(command, SwapCommand::ProactiveCopy | SwapCommand::UserCopy) {
            // A copy needs a working source; a spare request does not.
            match evaluate_health(state) {
                DownstreamHealth::Broken => return Err(ControlError::Broken(object_id)),
                DownstreamHealth::Disabled => return Err(ControlError::NotReady(object_id)),
                DownstreamHealth::Optimal | DownstreamHealth::Degraded => {}
            }
            if let Some(primary) = state.mode.primary_edge() {
                if !state.edge(primary).is_enabled() {
                    return Err(ControlError::Degraded(object_id));
                }
            }
            if state.edge(edge).is_enabled() && !state.edge(edge).attributes.is_healthy() {
                return Err(ControlError::ValidationFailed(
                    "destination drive is unhealthy",
                ));
            }
        }

        let job_number = JobNumber::new(self.next_job);
        self.next_job += 1;
        self.dispatch(
            object_id,
            Input::StartSwap {
                job_number,
                command,
                edge,
            },
        )?;
        info!(
            object = %object_id,
            job = %job_number,
            %command,
            spare = ?spare_id,
            "swap request accepted"
        );
        Ok(job_number)
    }

    /// Blocks until the job completes or the bound elapses.
    ///
    /// `timeout_ms` defaults to the configured wait timeout and is clamped
    /// into the configured range either way.
    pub fn wait_for_job(
        &self,
        job_number: JobNumber,
        timeout_ms: Option<u64>,
    ) -> Result<JobCompletion, ControlError> {
        let jobs = &self.config.jobs;
        let requested = timeout_ms.unwrap_or(jobs.default_wait_timeout_secs * 1000);
        let clamped = requested.clamp(
            jobs.min_wait_timeout_secs * 1000,
            jobs.max_wait_timeout_secs * 1000,
        );
        Ok(self
            .broker
            .wait_for_job(job_number, Duration::from_millis(clamped))?)
    }

    // ------------------------------------------------------------------
    // Checkpoint queries
    // ------------------------------------------------------------------

    /// Effective checkpoint as seen by the extent's own redundancy engine.
    pub fn extent_checkpoint(
        &self,
        object_id: ObjectId,
        edge: EdgeIndex,
        query: CheckpointQuery,
    ) -> Result<Checkpoint, ControlError> {
        let state = self
            .extents
            .get(&object_id)
            .ok_or(ControlError::UnknownExtent(object_id))?;
        checkpoint_for_extent(state, edge, query).map_err(|err| from_extent(err, object_id))
    }

    /// Effective checkpoint as seen by the outer group wrapping the extent.
    pub fn parent_checkpoint(
        &self,
        object_id: ObjectId,
        query: CheckpointQuery,
    ) -> Result<Checkpoint, ControlError> {
        let state = self
            .extents
            .get(&object_id)
            .ok_or(ControlError::UnknownExtent(object_id))?;
        checkpoint_for_parent_group(state, query).map_err(|err| from_extent(err, object_id))
    }

    /// Stops the broker workers. Called by `Drop` as well.
    pub fn shutdown(&mut self) {
        self.broker.shutdown();
    }

    // ------------------------------------------------------------------
    // Dispatch loop
    // ------------------------------------------------------------------

    fn eval_context(&self) -> EvalContext {
        EvalContext {
            is_active: self.is_active,
            peer_alive: self.peer_alive,
        }
    }

    /// Applies one input and runs its effects, feeding metadata commit
    /// acknowledgements back in until the extent has no more synchronous
    /// work.
    fn dispatch(
        &mut self,
        object_id: ObjectId,
        input: Input,
    ) -> Result<Option<Duration>, ControlError> {
        let ctx = self.eval_context();
        let mut queue = VecDeque::from([input]);
        let mut hint = None;

        while let Some(input) = queue.pop_front() {
            let state = self
                .extents
                .get(&object_id)
                .ok_or(ControlError::UnknownExtent(object_id))?;
            let (next, effects) =
                apply(state, input, ctx).map_err(|err| from_extent(err, object_id))?;
            if let Some(slot) = self.extents.get_mut(&object_id) {
                *slot = next;
            }

            let mut last_persist: Option<(Effect, bool)> = None;
            for effect in effects {
                let update = match &effect {
                    Effect::PersistCheckpoint { edge, checkpoint } => {
                        Some(RecordUpdate::Checkpoint {
                            edge: *edge,
                            checkpoint: *checkpoint,
                        })
                    }
                    Effect::PersistCheckpointToEnd { edge } => {
                        Some(RecordUpdate::CheckpointToEnd { edge: *edge })
                    }
                    Effect::PersistRebuildLogging { edge, checkpoint } => {
                        Some(RecordUpdate::RebuildLogging {
                            edge: *edge,
                            checkpoint: *checkpoint,
                        })
                    }
                    Effect::PersistMode { mode, flags } => Some(RecordUpdate::Mode {
                        mode: *mode,
                        flags: *flags,
                    }),
                    Effect::PersistFlags { flags } => {
                        Some(RecordUpdate::Flags { flags: *flags })
                    }
                    _ => None,
                };
                if let Some(update) = update {
                    let ok = self.persist(object_id, update);
                    last_persist = Some((effect, ok));
                    continue;
                }
                match effect {
                    Effect::NotifyJob {
                        job_number,
                        status,
                        error_code,
                        object_id,
                    } => {
                        self.broker.notify(JobCompletion {
                            job_number,
                            object_id,
                            status,
                            error_code,
                        });
                    }
                    Effect::EvaluateRebuildLogging => {
                        self.conditions.evaluate_rebuild_logging(object_id);
                    }
                    Effect::MarkNeedsRebuild => self.conditions.mark_needs_rebuild(object_id),
                    Effect::QuiesceIo => self.conditions.quiesce_io(object_id),
                    Effect::FailExtent => self.conditions.fail_extent(object_id),
                    Effect::Reevaluate { after_ms } => {
                        hint = Some(Duration::from_millis(after_ms));
                    }
                    _ => {}
                }
            }

            // Only the completed phase write of an in-flight transition may
            // be acknowledged; incidental persists must not advance it.
            let expected = self.extents.get(&object_id).and_then(pending_phase_write);
            if let (Some(expected), Some((effect, true))) = (expected, last_persist) {
                if effect == expected {
                    queue.push_back(Input::MetadataCommitted);
                }
            }
        }

        Ok(hint)
    }

    fn persist(&mut self, object_id: ObjectId, update: RecordUpdate) -> bool {
        match self.store.write(object_id, update) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    object = %object_id,
                    error = %err,
                    "metadata write failed; retrying on next pass"
                );
                false
            }
        }
    }
}

impl<S: MetadataStore, C: ConditionSink> Drop for ControlPlane<S, C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
