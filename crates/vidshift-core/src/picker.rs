//! Media Picker
//!
//! Turns the result of a pick into batch additions. The picker itself is a
//! platform concern; only its result shape lives here.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::batch::{AddOutcome, MediaBatch};
use crate::fs::file_uri;
use crate::{CoreError, CoreResult, MediaEntry};

const PICKER_PERMISSION_MESSAGE: &str = "we need media library permissions to make this work";

/// Permission state reported alongside a pick
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PickerPermission {
    Granted,
    Denied,
}

/// What the user picked
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PickerSelection {
    /// Picker dismissed without a choice
    Cancelled,
    Picked(Vec<MediaEntry>),
}

/// Result of one picker invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PickerResult {
    pub permission: PickerPermission,
    pub selection: PickerSelection,
}

impl PickerResult {
    pub fn picked(entries: Vec<MediaEntry>) -> Self {
        Self {
            permission: PickerPermission::Granted,
            selection: PickerSelection::Picked(entries),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            permission: PickerPermission::Granted,
            selection: PickerSelection::Cancelled,
        }
    }

    pub fn denied() -> Self {
        Self {
            permission: PickerPermission::Denied,
            selection: PickerSelection::Cancelled,
        }
    }
}

/// Adds a pick to `batch`.
///
/// A denied permission is an error and leaves the batch alone; a cancelled
/// pick adds nothing.
pub fn ingest_pick(batch: &mut MediaBatch, result: PickerResult) -> CoreResult<AddOutcome> {
    if result.permission == PickerPermission::Denied {
        tracing::warn!("Media picker permission denied");
        return Err(CoreError::PermissionDenied(PICKER_PERMISSION_MESSAGE.to_string()));
    }

    match result.selection {
        PickerSelection::Cancelled => {
            tracing::debug!("Media pick cancelled");
            Ok(AddOutcome::default())
        }
        PickerSelection::Picked(entries) => {
            let outcome = batch.add(entries);
            tracing::info!(
                "Picked {} new file(s), {} already added",
                outcome.added,
                outcome.duplicates
            );
            Ok(outcome)
        }
    }
}

/// Picker backed by paths given on the command line
#[derive(Clone, Debug, Default)]
pub struct PathPicker {
    paths: Vec<PathBuf>,
}

impl PathPicker {
    pub fn new(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Resolves the paths into entries. No paths counts as a cancelled pick.
    pub fn pick(&self) -> CoreResult<PickerResult> {
        if self.paths.is_empty() {
            return Ok(PickerResult::cancelled());
        }

        let entries = self
            .paths
            .iter()
            .map(|path| path_entry(path))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(PickerResult::picked(entries))
    }
}

fn path_entry(path: &Path) -> CoreResult<MediaEntry> {
    let absolute = std::path::absolute(path)?;
    let entry = MediaEntry::new(file_uri(&absolute));
    Ok(match absolute.file_name() {
        Some(name) => entry.with_display_name(name.to_string_lossy()),
        None => entry,
    })
}
