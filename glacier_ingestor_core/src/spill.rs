//! Local copies of buffers that could not be uploaded.
//!
//! Spill files are complete snapshot files named
//! `{stream}_{unix_millis}_{seq:06}.parquet`. They are written to a temporary
//! name first and renamed, so a crash never leaves a truncated spill file
//! behind.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::Utc;
use glacier_resources::SNAPSHOT_EXTENSION;
use snafu::ResultExt;
use tracing::{debug, warn};

use crate::{
    error::{Result, SpillSnafu},
    manager::SealedBuffer,
    snapshot_file::{CUTOVER_SEQ_METADATA_KEY, STREAM_METADATA_KEY, SnapshotFile},
};

const TEMPORARY_EXTENSION: &str = "tmp";

#[derive(Debug, Clone)]
pub struct SpillDirectory {
    root: PathBuf,
}

impl SpillDirectory {
    /// Opens the directory, creating it if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();

        tokio::fs::create_dir_all(&root).await.context(SpillSnafu {
            message: format!("failed to create {}", root.display()),
        })?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes the sealed buffer to a new spill file.
    pub async fn spill(&self, sealed: &SealedBuffer) -> Result<PathBuf> {
        let file = SnapshotFile::new(
            sealed.buffer.schema().clone(),
            sealed.buffer.batches().to_vec(),
        )
        .with_metadata(STREAM_METADATA_KEY, sealed.stream.as_str())
        .with_metadata(CUTOVER_SEQ_METADATA_KEY, sealed.seq.to_string());
        let data = file.encode()?;

        let name = format!(
            "{}_{}_{:06}",
            sealed.stream,
            Utc::now().timestamp_millis(),
            sealed.seq
        );
        let temporary = self.root.join(format!("{name}.{TEMPORARY_EXTENSION}"));
        let path = self.root.join(format!("{name}.{SNAPSHOT_EXTENSION}"));

        tokio::fs::write(&temporary, &data)
            .await
            .context(SpillSnafu {
                message: format!("failed to write {}", temporary.display()),
            })?;
        tokio::fs::rename(&temporary, &path)
            .await
            .context(SpillSnafu {
                message: format!("failed to rename {}", temporary.display()),
            })?;

        debug!(path = %path.display(), rows = file.row_count(), "Buffer spilled");

        Ok(path)
    }

    /// Lists the spill files, oldest first.
    pub async fn list(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.root).await.context(SpillSnafu {
            message: format!("failed to list {}", self.root.display()),
        })?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.context(SpillSnafu {
            message: format!("failed to list {}", self.root.display()),
        })? {
            let path = entry.path();
            match path.extension().and_then(|ext| ext.to_str()) {
                Some(SNAPSHOT_EXTENSION) => paths.push(path),
                Some(TEMPORARY_EXTENSION) => {
                    warn!(path = %path.display(), "Ignoring incomplete spill file");
                }
                _ => {}
            }
        }

        paths.sort();
        Ok(paths)
    }

    pub async fn read(&self, path: &Path) -> Result<SnapshotFile> {
        let data = tokio::fs::read(path).await.context(SpillSnafu {
            message: format!("failed to read {}", path.display()),
        })?;

        SnapshotFile::decode(Bytes::from(data))
    }

    pub async fn remove(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path).await.context(SpillSnafu {
            message: format!("failed to remove {}", path.display()),
        })
    }
}
