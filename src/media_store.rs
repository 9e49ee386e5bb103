use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
    #[error("Stored object not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Blob storage for uploaded photos and generated collages.
///
/// Keys are relative, `/`-separated paths such as `photos/3/ab12.jpg`.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn save(&self, key: &str, data: &[u8]) -> StoreResult<()>;
    async fn load(&self, key: &str) -> StoreResult<Vec<u8>>;
    /// Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

pub type SharedStore = Arc<dyn MediaStore>;

pub fn photo_key(album_id: i64, name: &str) -> String {
    format!("photos/{}/{}", album_id, name)
}

pub fn collage_key(album_id: i64, name: &str) -> String {
    format!("collages/{}/{}", album_id, name)
}

/// Rejects empty, absolute and parent-escaping keys.
pub fn validate_key(key: &str) -> StoreResult<()> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && !key.contains('\\')
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct FsMediaStore {
    root: PathBuf,
}

impl FsMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn save(&self, key: &str, data: &[u8]) -> StoreResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write to a temp file first so readers never see a partial object
        let mut temp_path = path.clone().into_os_string();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);
        tokio::fs::write(&temp_path, data).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!("Stored {} ({} bytes)", key, data.len());
        Ok(())
    }

    async fn load(&self, key: &str) -> StoreResult<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store, handy for tests and throwaway instances.
#[derive(Debug, Clone, Default)]
pub struct MemoryMediaStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .lock()
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false)
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.objects
            .lock()
            .map_err(|_| StoreError::Io(std::io::Error::other("Failed to acquire store lock")))
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn save(&self, key: &str, data: &[u8]) -> StoreResult<()> {
        validate_key(key)?;
        self.lock()?.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn load(&self, key: &str) -> StoreResult<Vec<u8>> {
        validate_key(key)?;
        self.lock()?
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        validate_key(key)?;
        self.lock()?.remove(key);
        Ok(())
    }
}
