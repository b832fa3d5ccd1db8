//! Persistence seam for the non-paged extent records.
//!
//! The kernel emits persist effects against the record, not bytes; the store
//! applies them read-modify-write and is assumed read-after-write consistent.
//! The in-memory implementation backs tests and single-node operation, with
//! write-failure injection to exercise the retry path.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use gneiss_extent::{ExtentFlags, ExtentRecord};
use gneiss_types::{Checkpoint, ConfigurationMode, EdgeIndex, ObjectId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("write to extent {0} record failed")]
    WriteFailed(ObjectId),
    #[error("no record for extent {0}")]
    NotFound(ObjectId),
}

/// One field-group update to an extent's persisted record.
///
/// Groups match the kernel's persist effects exactly: every update is applied
/// atomically with respect to readers, so no observer sees a half-updated
/// record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordUpdate {
    Checkpoint {
        edge: EdgeIndex,
        checkpoint: Checkpoint,
    },
    /// Checkpoint jump to `End` plus the swap-bookkeeping flag clears, as one
    /// update.
    CheckpointToEnd { edge: EdgeIndex },
    RebuildLogging {
        edge: EdgeIndex,
        checkpoint: Checkpoint,
    },
    Mode {
        mode: ConfigurationMode,
        flags: ExtentFlags,
    },
    Flags { flags: ExtentFlags },
}

/// Storage for the per-extent non-paged records.
pub trait MetadataStore {
    fn read(&self, object_id: ObjectId) -> Result<Option<ExtentRecord>, StoreError>;
    fn write(&mut self, object_id: ObjectId, update: RecordUpdate) -> Result<(), StoreError>;
}

/// In-memory store with write-failure injection.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: HashMap<ObjectId, ExtentRecord>,
    fail_next: u32,
    writes: u64,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` writes fail with [`StoreError::WriteFailed`].
    pub fn fail_next_writes(&mut self, count: u32) {
        self.fail_next = count;
    }

    /// Total successful writes; for asserting on persistence traffic.
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    pub fn insert(&mut self, object_id: ObjectId, record: ExtentRecord) {
        self.records.insert(object_id, record);
    }

    fn record_mut(&mut self, object_id: ObjectId) -> &mut ExtentRecord {
        self.records.entry(object_id).or_insert_with(|| ExtentRecord {
            mode: ConfigurationMode::Unknown,
            flags: ExtentFlags::default(),
            checkpoints: [Checkpoint::ZERO, Checkpoint::ZERO],
            rebuild_logging: [false, false],
        })
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn read(&self, object_id: ObjectId) -> Result<Option<ExtentRecord>, StoreError> {
        Ok(self.records.get(&object_id).copied())
    }

    fn write(&mut self, object_id: ObjectId, update: RecordUpdate) -> Result<(), StoreError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(StoreError::WriteFailed(object_id));
        }
        let record = self.record_mut(object_id);
        match update {
            RecordUpdate::Checkpoint { edge, checkpoint } => {
                record.checkpoints[edge.as_usize()] = checkpoint;
            }
            RecordUpdate::CheckpointToEnd { edge } => {
                record.checkpoints[edge.as_usize()] = Checkpoint::End;
                record.flags.edge_swapped = false;
                record.flags.mark_nr_required = false;
            }
            RecordUpdate::RebuildLogging { edge, checkpoint } => {
                record.rebuild_logging[edge.as_usize()] = true;
                record.checkpoints[edge.as_usize()] = checkpoint;
            }
            RecordUpdate::Mode { mode, flags } => {
                record.mode = mode;
                record.flags = flags;
            }
            RecordUpdate::Flags { flags } => {
                record.flags = flags;
            }
        }
        self.writes += 1;
        debug!(object = %object_id, ?update, "record updated");
        Ok(())
    }
}
