//! Export Module
//!
//! Hands a finished artifact to the user: saved into a gallery album behind a
//! permission gate, or passed to the share mechanism with no gate at all.
//! Export never changes the job it came from.

mod local;

pub use local::*;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::jobs::ConversionJob;
use crate::settings::{AppSettings, ExportTarget};
use crate::{CoreError, CoreResult};

// =============================================================================
// Storage Capability
// =============================================================================

/// Outcome of a media-library permission request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionStatus {
    Granted,
    /// Asking again may succeed
    Denied,
    /// Only the system settings can change this
    DeniedPermanently,
}

/// Platform storage seam
#[async_trait]
pub trait StorageExporter: Send + Sync {
    /// Asks for write access to the media library
    async fn request_permission(&self) -> PermissionStatus;

    /// Saves `artifact` into `album`, creating the album if absent.
    /// Returns where the artifact landed.
    async fn persist_to_album(&self, artifact: &Path, album: &str) -> std::io::Result<PathBuf>;

    /// Hands `artifact` to the share mechanism
    async fn share_artifact(&self, artifact: &Path) -> std::io::Result<PathBuf>;
}

/// Where an exported artifact ended up
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "path", rename_all = "camelCase")]
pub enum ExportDestination {
    Album(PathBuf),
    Shared(PathBuf),
}

impl ExportDestination {
    pub fn path(&self) -> &Path {
        match self {
            ExportDestination::Album(path) | ExportDestination::Shared(path) => path,
        }
    }
}

// =============================================================================
// Export Coordinator
// =============================================================================

const LIBRARY_PERMISSION_MESSAGE: &str = "we need media library permissions to save the video";

/// Applies the export policy of the current platform
pub struct ExportCoordinator {
    exporter: Arc<dyn StorageExporter>,
    target: ExportTarget,
    album_name: String,
}

impl ExportCoordinator {
    pub fn new(
        exporter: Arc<dyn StorageExporter>,
        target: ExportTarget,
        album_name: impl Into<String>,
    ) -> Self {
        Self {
            exporter,
            target,
            album_name: album_name.into(),
        }
    }

    pub fn from_settings(exporter: Arc<dyn StorageExporter>, settings: &AppSettings) -> Self {
        Self::new(
            exporter,
            settings.export.target(),
            settings.storage.album_name.clone(),
        )
    }

    pub fn target(&self) -> ExportTarget {
        self.target
    }

    /// Exports the artifact of a succeeded job
    pub async fn export_job(&self, job: &ConversionJob) -> CoreResult<ExportDestination> {
        let artifact = job.artifact().ok_or_else(|| {
            CoreError::NoArtifact(format!("job {} has not succeeded", job.id))
        })?;
        self.export_artifact(artifact).await
    }

    /// Exports `artifact` to the configured target.
    ///
    /// Gallery: `Denied` gives `PermissionDenied`, `DeniedPermanently` gives
    /// `PermissionDeniedPermanently`. Share: no permission request.
    pub async fn export_artifact(&self, artifact: &Path) -> CoreResult<ExportDestination> {
        ensure_readable(artifact).await?;

        match self.target {
            ExportTarget::Share => {
                let shared = self
                    .exporter
                    .share_artifact(artifact)
                    .await
                    .map_err(|e| CoreError::export(artifact, e))?;
                tracing::info!("Shared {} via {}", artifact.display(), shared.display());
                Ok(ExportDestination::Shared(shared))
            }
            ExportTarget::Gallery => {
                match self.exporter.request_permission().await {
                    PermissionStatus::Granted => {}
                    PermissionStatus::Denied => {
                        tracing::warn!("Media library permission denied");
                        return Err(CoreError::PermissionDenied(
                            LIBRARY_PERMISSION_MESSAGE.to_string(),
                        ));
                    }
                    PermissionStatus::DeniedPermanently => {
                        tracing::warn!("Media library permission permanently denied");
                        return Err(CoreError::PermissionDeniedPermanently(
                            LIBRARY_PERMISSION_MESSAGE.to_string(),
                        ));
                    }
                }

                let saved = self
                    .exporter
                    .persist_to_album(artifact, &self.album_name)
                    .await
                    .map_err(|e| CoreError::export(artifact, e))?;
                tracing::info!("Saved {} to album {}", saved.display(), self.album_name);
                Ok(ExportDestination::Album(saved))
            }
        }
    }
}

async fn ensure_readable(artifact: &Path) -> CoreResult<()> {
    let metadata = tokio::fs::metadata(artifact)
        .await
        .map_err(|e| CoreError::export(artifact, e))?;
    if !metadata.is_file() {
        return Err(CoreError::export(
            artifact,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }
    tokio::fs::File::open(artifact)
        .await
        .map_err(|e| CoreError::export(artifact, e))?;
    Ok(())
}
