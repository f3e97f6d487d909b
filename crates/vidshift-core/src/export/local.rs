//! Local filesystem storage
//!
//! Desktop stand-in for a media library: albums are directories under a
//! gallery root and sharing copies the artifact into an outbox directory.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{PermissionStatus, StorageExporter};
use crate::naming::{now_millis, split_name_and_extension, unique_output_name, unique_path_in};
use crate::settings::StorageSettings;

/// Stores artifacts on the local filesystem
#[derive(Clone, Debug)]
pub struct LocalStorageExporter {
    gallery_root: PathBuf,
    share_dir: PathBuf,
}

impl LocalStorageExporter {
    pub fn new(gallery_root: impl Into<PathBuf>, share_dir: impl Into<PathBuf>) -> Self {
        Self {
            gallery_root: gallery_root.into(),
            share_dir: share_dir.into(),
        }
    }

    pub fn from_settings(storage: &StorageSettings) -> Self {
        Self::new(storage.gallery_root.clone(), storage.share_dir.clone())
    }

    pub fn gallery_root(&self) -> &Path {
        &self.gallery_root
    }

    /// Directory backing `album`
    pub fn album_dir(&self, album: &str) -> PathBuf {
        // Album names come from settings; keep them inside the root.
        let name = sanitize_album(album.trim());
        if name.is_empty() {
            self.gallery_root.clone()
        } else {
            self.gallery_root.join(name)
        }
    }
}

#[async_trait]
impl StorageExporter for LocalStorageExporter {
    async fn request_permission(&self) -> PermissionStatus {
        if let Err(e) = tokio::fs::create_dir_all(&self.gallery_root).await {
            tracing::warn!(
                "Cannot create gallery root {}: {}",
                self.gallery_root.display(),
                e
            );
            return match e.kind() {
                io::ErrorKind::PermissionDenied => PermissionStatus::DeniedPermanently,
                _ => PermissionStatus::Denied,
            };
        }

        match tokio::fs::metadata(&self.gallery_root).await {
            Ok(meta) if meta.permissions().readonly() => PermissionStatus::DeniedPermanently,
            Ok(meta) if meta.is_dir() => PermissionStatus::Granted,
            Ok(_) => PermissionStatus::DeniedPermanently,
            Err(_) => PermissionStatus::Denied,
        }
    }

    async fn persist_to_album(&self, artifact: &Path, album: &str) -> io::Result<PathBuf> {
        let album_dir = self.album_dir(album);
        tokio::fs::create_dir_all(&album_dir).await?;
        copy_into(artifact, &album_dir).await
    }

    async fn share_artifact(&self, artifact: &Path) -> io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.share_dir).await?;
        copy_into(artifact, &self.share_dir).await
    }
}

fn sanitize_album(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

/// Copies `artifact` into `dir`, keeping its name unless that is taken.
async fn copy_into(artifact: &Path, dir: &Path) -> io::Result<PathBuf> {
    let file_name = artifact.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", artifact.display()),
        )
    })?;

    let mut dest = dir.join(file_name);
    if tokio::fs::try_exists(&dest).await? {
        let parts = split_name_and_extension(&file_name.to_string_lossy());
        dest = unique_path_in(dir, now_millis(), |ts| {
            unique_output_name(&parts.name, parts.extension.as_deref(), ts)
        })
        .await?;
    }

    tokio::fs::copy(artifact, &dest).await?;
    Ok(dest)
}
