use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use super::{ImageStore, StoreError, StoreResult, StoredImage};
use crate::model::ImageKind;

/// Images as plain files under a root directory. The key is the relative
/// path; the content type is recovered from the key's extension.
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        FsImageStore { root: root.into() }
    }

    /// Keys are relative paths of normal components only.
    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StoreError::Backend(format!("rejected image key {:?}", key)));
        }
        Ok(self.root.join(relative))
    }
}

impl ImageStore for FsImageStore {
    fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> StoreResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| StoreError::Backend(format!("create {:?}: {}", parent, err)))?;
        }
        fs::write(&path, bytes).map_err(|err| StoreError::Backend(format!("write {:?}: {}", path, err)))
    }

    fn get(&self, key: &str) -> StoreResult<Option<StoredImage>> {
        let path = self.path_for(key)?;
        let content_type = match ImageKind::from_key(key) {
            Some(kind) => kind.content_type().to_string(),
            None => return Ok(None),
        };
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(StoredImage { bytes, content_type })),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Backend(format!("read {:?}: {}", path, err))),
        }
    }
}

#[derive(Default)]
pub struct MemoryImageStore {
    images: RwLock<HashMap<String, StoredImage>>,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageStore for MemoryImageStore {
    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> StoreResult<()> {
        let mut images = self
            .images
            .write()
            .map_err(|_| StoreError::Backend("image store lock poisoned".to_string()))?;
        images.insert(
            key.to_string(),
            StoredImage { bytes: bytes.to_vec(), content_type: content_type.to_string() },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> StoreResult<Option<StoredImage>> {
        let images = self
            .images
            .read()
            .map_err(|_| StoreError::Backend("image store lock poisoned".to_string()))?;
        Ok(images.get(key).cloned())
    }
}
