use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::CascadeError;

/// Durable key-value blobs. The cache serializes itself whole on every
/// mutation and does not care where the bytes end up.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn save_blob(&self, id: &str, data: &str) -> Result<(), CascadeError>;

    /// `Ok(None)` when nothing was ever saved under `id`.
    async fn load_blob(&self, id: &str) -> Result<Option<String>, CascadeError>;
}

/// One `<id>.json` file per blob under a directory.
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        let name: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn save_blob(&self, id: &str, data: &str) -> Result<(), CascadeError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CascadeError::Store(format!("create {}: {e}", self.dir.display())))?;
        let path = self.path_for(id);
        // Temp name carries the PID so concurrent processes never share one.
        let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
        tokio::fs::write(&tmp, data.as_bytes())
            .await
            .map_err(|e| CascadeError::Store(format!("write {}: {e}", tmp.display())))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CascadeError::Store(format!("rename {}: {e}", path.display())));
        }
        Ok(())
    }

    async fn load_blob(&self, id: &str) -> Result<Option<String>, CascadeError> {
        let path = self.path_for(id);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CascadeError::Store(format!("read {}: {e}", path.display()))),
        }
    }
}

/// In-process store for tests and ephemeral runs. Counts saves.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, String>>,
    saves: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn raw(&self, id: &str) -> Option<String> {
        self.blobs.lock().ok()?.get(id).cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn save_blob(&self, id: &str, data: &str) -> Result<(), CascadeError> {
        self.blobs
            .lock()
            .map_err(|_| CascadeError::Store("memory store poisoned".to_string()))?
            .insert(id.to_string(), data.to_string());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_blob(&self, id: &str) -> Result<Option<String>, CascadeError> {
        Ok(self
            .blobs
            .lock()
            .map_err(|_| CascadeError::Store("memory store poisoned".to_string()))?
            .get(id)
            .cloned())
    }
}
