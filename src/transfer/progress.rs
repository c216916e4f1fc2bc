//! Transfer progress reporting
//!
//! The reactor thread publishes per-session transfer progress and a monitor
//! thread drains it with [`ProgressReporter::snapshot`]. The list lock only
//! guards appends and removals. Record fields are atomics written by the
//! reactor alone, so a snapshot may pair a fresh position with a stale size.

use log::debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::client::SessionId;

/// Direction of a transfer, seen from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sending,
    Receiving,
}

/// Live record shared between the producing session and the reporter.
#[derive(Debug)]
pub struct TransferRecord {
    session_id: SessionId,
    name: String,
    sending: AtomicBool,
    size: AtomicU64,
    position: AtomicU64,
    ended: AtomicBool,
    pending_removal: AtomicBool,
}

impl TransferRecord {
    fn new(session_id: SessionId, name: &str, direction: Direction) -> Self {
        Self {
            session_id,
            name: name.to_string(),
            sending: AtomicBool::new(direction == Direction::Sending),
            size: AtomicU64::new(0),
            position: AtomicU64::new(0),
            ended: AtomicBool::new(false),
            pending_removal: AtomicBool::new(false),
        }
    }

    fn direction(&self) -> Direction {
        if self.sending.load(Ordering::Relaxed) {
            Direction::Sending
        } else {
            Direction::Receiving
        }
    }
}

/// Owned copy of one record, handed to the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStatus {
    pub session_id: SessionId,
    pub name: String,
    pub direction: Direction,
    pub size: u64,
    pub position: u64,
    pub ended: bool,
}

impl TransferStatus {
    /// Percentage done, when the total size is known.
    pub fn percent(&self) -> Option<u64> {
        (self.size > 0).then(|| self.position.saturating_mul(100) / self.size)
    }
}

/// Handle a session keeps to its current record.
pub type ProgressHandle = Option<Arc<TransferRecord>>;

/// Insertion-ordered list of transfer records.
#[derive(Debug, Default)]
pub struct ProgressReporter {
    records: Mutex<Vec<Arc<TransferRecord>>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the state of a running transfer.
    ///
    /// Appends a record on the first call of a transfer, then only updates
    /// the record's fields.
    pub fn publish(
        &self,
        handle: &mut ProgressHandle,
        session_id: SessionId,
        name: &str,
        direction: Direction,
        position: u64,
        size: u64,
    ) {
        let stale = handle
            .as_ref()
            .is_none_or(|r| r.pending_removal.load(Ordering::Acquire) || r.name != name);

        if stale {
            if let Some(old) = handle.take() {
                old.ended.store(true, Ordering::Release);
            }
            let record = Arc::new(TransferRecord::new(session_id, name, direction));
            self.lock().push(Arc::clone(&record));
            debug!("Tracking transfer of {} for session {}", name, session_id);
            *handle = Some(record);
        }

        if let Some(record) = handle.as_ref() {
            record
                .sending
                .store(direction == Direction::Sending, Ordering::Relaxed);
            record.size.store(size, Ordering::Relaxed);
            record.position.store(position, Ordering::Relaxed);
        }
    }

    /// Mark the transfer behind `handle` as ended. The record stays listed
    /// until a snapshot has reported it.
    pub fn finish(&self, handle: &mut ProgressHandle) {
        if let Some(record) = handle.take() {
            record.ended.store(true, Ordering::Release);
        }
    }

    /// Copy every record into an owned list.
    ///
    /// Ended records are reported here once and unlinked in the same pass.
    pub fn snapshot(&self) -> Vec<TransferStatus> {
        let mut records = self.lock();
        let mut statuses = Vec::with_capacity(records.len());

        records.retain(|record| {
            let ended = record.ended.load(Ordering::Acquire);
            statuses.push(TransferStatus {
                session_id: record.session_id,
                name: record.name.clone(),
                direction: record.direction(),
                size: record.size.load(Ordering::Relaxed),
                position: record.position.load(Ordering::Relaxed),
                ended,
            });
            if ended {
                record.pending_removal.store(true, Ordering::Release);
            }
            !ended
        });

        statuses
    }

    /// Number of records currently listed
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<TransferRecord>>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}
