//! File-backed checkpoint store
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<run_id>/checkpoints/00000000-<checkpoint_id>.json
//! <root>/<run_id>/checkpoints/00000001-<checkpoint_id>.json
//! <root>/<run_id>/writes/<checkpoint_id>.json
//! ```
//!
//! The sequence prefix keeps `list` in save order. Files are written to a
//! temporary name and renamed into place, so a crash never leaves a half
//! written snapshot under a real name.

use crate::{
    checkpoint::{Checkpoint, CheckpointId, PendingWrite},
    error::{CheckpointError, Result},
    serializer::{JsonSerializer, SerializerProtocol},
    traits::CheckpointSaver,
};
use async_trait::async_trait;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// Checkpoint store persisting one file per checkpoint
#[derive(Debug)]
pub struct FileCheckpointSaver<S: SerializerProtocol = JsonSerializer> {
    root: PathBuf,
    serializer: S,
    // Serializes sequence allocation and pending-write read-modify-write cycles
    write_lock: Mutex<()>,
}

impl FileCheckpointSaver<JsonSerializer> {
    /// Create a JSON store rooted at `root`, creating the directory if needed
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        Self::with_serializer(root, JsonSerializer::new()).await
    }
}

impl<S: SerializerProtocol> FileCheckpointSaver<S> {
    pub async fn with_serializer(root: impl AsRef<Path>, serializer: S) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            serializer,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, run_id: &str) -> Result<PathBuf> {
        let invalid = run_id.is_empty()
            || run_id.starts_with('.')
            || run_id.contains(|c: char| c == '/' || c == '\\')
            || run_id.contains("..");
        if invalid {
            return Err(CheckpointError::Storage(format!("invalid run id for file store: {run_id:?}")));
        }
        Ok(self.root.join(run_id))
    }

    fn checkpoints_dir(&self, run_id: &str) -> Result<PathBuf> {
        Ok(self.run_dir(run_id)?.join("checkpoints"))
    }

    fn writes_path(&self, run_id: &str, checkpoint_id: &str) -> Result<PathBuf> {
        Ok(self
            .run_dir(run_id)?
            .join("writes")
            .join(format!("{checkpoint_id}.{}", self.serializer.extension())))
    }

    /// Stored checkpoint files of a run as `(file name, checkpoint id)`, in save order
    async fn entries(&self, run_id: &str) -> Result<Vec<(String, CheckpointId)>> {
        let dir = self.checkpoints_dir(run_id)?;
        let mut reader = match fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let suffix = format!(".{}", self.serializer.extension());
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = name.strip_suffix(&suffix) else {
                continue;
            };
            if let Some((seq, id)) = stem.split_once('-') {
                if seq.len() == 8 && seq.bytes().all(|b| b.is_ascii_digit()) {
                    entries.push((name.clone(), id.to_string()));
                }
            }
        }
        entries.sort();
        Ok(entries)
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_writes(&self, run_id: &str, checkpoint_id: &str) -> Result<Vec<PendingWrite>> {
        let path = self.writes_path(run_id, checkpoint_id)?;
        match fs::read(&path).await {
            Ok(bytes) => self
                .serializer
                .loads(&bytes)
                .map_err(|e| CheckpointError::corruption(checkpoint_id, format!("pending writes: {e}"))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl<S: SerializerProtocol> CheckpointSaver for FileCheckpointSaver<S> {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<CheckpointId> {
        let _guard = self.write_lock.lock().await;
        let entries = self.entries(&checkpoint.run_id).await?;
        if entries.iter().any(|(_, id)| *id == checkpoint.id) {
            return Err(CheckpointError::Storage(format!(
                "checkpoint {} already exists for run {}",
                checkpoint.id, checkpoint.run_id
            )));
        }

        let file_name = format!(
            "{:08}-{}.{}",
            entries.len(),
            checkpoint.id,
            self.serializer.extension()
        );
        let path = self.checkpoints_dir(&checkpoint.run_id)?.join(file_name);
        let bytes = self.serializer.dumps(checkpoint)?;
        Self::write_atomic(&path, &bytes).await?;

        tracing::debug!(
            run_id = %checkpoint.run_id,
            checkpoint_id = %checkpoint.id,
            step = checkpoint.step,
            path = %path.display(),
            "Wrote checkpoint file"
        );
        Ok(checkpoint.id.clone())
    }

    async fn get(&self, run_id: &str, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
        let entries = self.entries(run_id).await?;
        let Some((name, _)) = entries.into_iter().find(|(_, id)| id == checkpoint_id) else {
            return Ok(None);
        };

        let bytes = fs::read(self.checkpoints_dir(run_id)?.join(name)).await?;
        let mut checkpoint: Checkpoint = self
            .serializer
            .loads(&bytes)
            .map_err(|e| CheckpointError::corruption(checkpoint_id, e.to_string()))?;

        if checkpoint.id != checkpoint_id || checkpoint.run_id != run_id {
            return Err(CheckpointError::corruption(
                checkpoint_id,
                format!("file holds checkpoint {}/{}", checkpoint.run_id, checkpoint.id),
            ));
        }
        checkpoint.validate()?;
        checkpoint.pending_writes = self.read_writes(run_id, checkpoint_id).await?;
        Ok(Some(checkpoint))
    }

    async fn list(&self, run_id: &str) -> Result<Vec<CheckpointId>> {
        Ok(self.entries(run_id).await?.into_iter().map(|(_, id)| id).collect())
    }

    async fn put_writes(
        &self,
        run_id: &str,
        checkpoint_id: &str,
        task_id: &str,
        writes: Vec<(String, Value)>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if !self.entries(run_id).await?.iter().any(|(_, id)| id == checkpoint_id) {
            return Err(CheckpointError::NotFound(format!("{run_id}/{checkpoint_id}")));
        }

        let mut logged = self.read_writes(run_id, checkpoint_id).await?;
        logged.retain(|w| w.task_id != task_id);
        logged.extend(
            writes
                .into_iter()
                .map(|(channel, value)| PendingWrite::new(task_id, channel, value)),
        );

        let bytes = self.serializer.dumps(&logged)?;
        Self::write_atomic(&self.writes_path(run_id, checkpoint_id)?, &bytes).await
    }

    async fn get_writes(&self, run_id: &str, checkpoint_id: &str) -> Result<Vec<PendingWrite>> {
        self.read_writes(run_id, checkpoint_id).await
    }

    async fn delete_run(&self, run_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match fs::remove_dir_all(self.run_dir(run_id)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
