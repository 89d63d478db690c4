//! Persisted sequence numbers that make redelivered goal states a no-op.

use crate::error::SequenceError;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SequenceError + '_ {
    move |source| SequenceError::Io {
        path: path.display().to_string(),
        source,
    }
}

async fn read_stored(path: &Path) -> Result<Option<i64>, SequenceError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path)(e)),
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<i64>()
        .map(Some)
        .map_err(|_| SequenceError::Corrupt {
            path: path.display().to_string(),
            value: trimmed.to_string(),
        })
}

async fn persist(path: &Path, sequence_number: i64) -> Result<(), SequenceError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err(path))?;
    }
    let tmp = path.with_extension("seqnum.tmp");
    tokio::fs::write(&tmp, sequence_number.to_string())
        .await
        .map_err(io_err(path))?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err(path))
}

/// Returns `true` when `requested` is not newer than the stored value. A
/// newer value is persisted before returning `false`; a skip never writes.
pub async fn should_skip(storage_path: &Path, requested: i64) -> Result<bool, SequenceError> {
    if let Some(stored) = read_stored(storage_path).await?
        && requested <= stored
    {
        return Ok(true);
    }
    persist(storage_path, requested).await?;
    Ok(false)
}

/// Per-extension sequence files under one state directory. Check-and-store is
/// serialized so concurrent workers cannot interleave a read with a write.
pub struct SequenceGuard {
    state_dir: PathBuf,
    lock: Mutex<()>,
}

impl SequenceGuard {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, extension_name: &str) -> PathBuf {
        let file: String = extension_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.state_dir.join(format!("{file}.seqnum"))
    }

    pub async fn should_skip(
        &self,
        extension_name: &str,
        requested: i64,
    ) -> Result<bool, SequenceError> {
        let _held = self.lock.lock().await;
        should_skip(&self.path_for(extension_name), requested).await
    }

    pub async fn last_applied(&self, extension_name: &str) -> Result<Option<i64>, SequenceError> {
        read_stored(&self.path_for(extension_name)).await
    }

    /// Read-only form of [`Self::should_skip`]: nothing is persisted.
    pub async fn is_applied(
        &self,
        extension_name: &str,
        requested: i64,
    ) -> Result<bool, SequenceError> {
        Ok(self
            .last_applied(extension_name)
            .await?
            .is_some_and(|stored| requested <= stored))
    }

    /// Every stored sequence number, keyed by file stem and sorted by name.
    /// A missing state directory holds nothing.
    pub async fn applied(&self) -> Result<Vec<(String, i64)>, SequenceError> {
        let mut dir = match tokio::fs::read_dir(&self.state_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.state_dir)(e)),
        };

        let mut applied = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(io_err(&self.state_dir))? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("seqnum") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if let Some(seq) = read_stored(&path).await? {
                applied.push((stem.to_string(), seq));
            }
        }
        applied.sort();
        Ok(applied)
    }
}
