//! Media Batch Store
//!
//! The user's working set of selected media. Entries keep insertion order and
//! are unique by `source_ref`. Every effective mutation is announced to
//! subscribers as a [`BatchEvent`].

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

use crate::{MediaEntry, SourceRef};

/// Capacity of the event channel; slow subscribers observe `Lagged`
const EVENT_CAPACITY: usize = 64;

/// Result of appending entries to the batch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOutcome {
    /// Entries appended
    pub added: usize,
    /// Entries rejected because their `source_ref` was already present
    pub duplicates: usize,
}

/// Batch change notification
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchEvent {
    /// Entries appended, in order
    Added(Vec<MediaEntry>),
    /// One entry removed
    Removed(SourceRef),
    /// Batch emptied
    Cleared,
}

/// Ordered, de-duplicated collection of selected media
pub struct MediaBatch {
    entries: Vec<MediaEntry>,
    keys: HashSet<SourceRef>,
    event_tx: broadcast::Sender<BatchEvent>,
}

impl MediaBatch {
    /// Creates an empty batch
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: Vec::new(),
            keys: HashSet::new(),
            event_tx,
        }
    }

    /// Appends entries whose `source_ref` is not present yet.
    ///
    /// Input order is preserved; repeats inside `entries` count as duplicates.
    pub fn add(&mut self, entries: impl IntoIterator<Item = MediaEntry>) -> AddOutcome {
        let mut outcome = AddOutcome::default();
        let mut appended = Vec::new();

        for entry in entries {
            if self.keys.contains(&entry.source_ref) {
                outcome.duplicates += 1;
                continue;
            }
            self.keys.insert(entry.source_ref.clone());
            self.entries.push(entry.clone());
            appended.push(entry);
            outcome.added += 1;
        }

        if outcome.duplicates > 0 {
            tracing::debug!("Rejected {} duplicate media entries", outcome.duplicates);
        }
        if !appended.is_empty() {
            self.notify(BatchEvent::Added(appended));
        }

        outcome
    }

    /// Removes the entry with `source_ref`. Returns whether one was removed.
    pub fn remove(&mut self, source_ref: &str) -> bool {
        if !self.keys.remove(source_ref) {
            return false;
        }
        self.entries.retain(|e| e.source_ref != source_ref);
        self.notify(BatchEvent::Removed(source_ref.to_string()));
        true
    }

    /// Empties the batch
    pub fn clear(&mut self) {
        let had_entries = !self.entries.is_empty();
        self.entries.clear();
        self.keys.clear();
        if had_entries {
            self.notify(BatchEvent::Cleared);
        }
    }

    /// Read-only view of the entries in insertion order.
    ///
    /// The iterator borrows the batch and can be recreated at will.
    pub fn list(&self) -> impl ExactSizeIterator<Item = &MediaEntry> + Clone + '_ {
        self.entries.iter()
    }

    /// Owned copy of the current entries
    pub fn snapshot(&self) -> Vec<MediaEntry> {
        self.entries.clone()
    }

    /// Entry a conversion targets
    pub fn primary(&self) -> Option<&MediaEntry> {
        self.entries.first()
    }

    /// Checks whether `source_ref` is in the batch
    pub fn contains(&self, source_ref: &str) -> bool {
        self.keys.contains(source_ref)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks if the batch is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Subscribes to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.event_tx.subscribe()
    }

    fn notify(&self, event: BatchEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

impl Default for MediaBatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Batch shared between the shell and the job controller.
pub type SharedMediaBatch = Arc<RwLock<MediaBatch>>;

/// Create a new shared batch.
pub fn create_media_batch() -> SharedMediaBatch {
    Arc::new(RwLock::new(MediaBatch::new()))
}
