//! Object-store collaborator.
//!
//! Locations are relative keys such as `tender/district/<uuid>.xlsx`.
//! [`FsObjectStore`] maps them under a root directory.

use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use log::debug;

use crate::error::ObjectStoreError;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_stream(&self, location: &str) -> Result<Vec<u8>, ObjectStoreError>;

    async fn put_stream(&self, bytes: &[u8], location: &str) -> Result<(), ObjectStoreError>;
}

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, location: &str) -> Result<PathBuf, ObjectStoreError> {
        let key = Path::new(location);
        let mut parts = 0usize;
        for component in key.components() {
            match component {
                Component::Normal(_) => parts += 1,
                Component::CurDir => {}
                _ => return Err(ObjectStoreError::InvalidLocation),
            }
        }
        if parts == 0 {
            return Err(ObjectStoreError::InvalidLocation);
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get_stream(&self, location: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let path = self.resolve(location)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!("Read {} byte(s) from {}", bytes.len(), path.display());
                Ok(bytes)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Err(ObjectStoreError::NotFound),
            Err(err) => Err(err.into()),
        }
    }

    async fn put_stream(&self, bytes: &[u8], location: &str) -> Result<(), ObjectStoreError> {
        let path = self.resolve(location)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        debug!("Stored {} byte(s) at {}", bytes.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_under_nested_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store
            .put_stream(b"payload", "tender/district/a.xlsx")
            .await
            .unwrap();
        let bytes = store.get_stream("tender/district/a.xlsx").await.unwrap();
        assert_eq!(bytes, b"payload");
        assert!(dir.path().join("tender/district/a.xlsx").is_file());
    }

    #[tokio::test]
    async fn missing_objects_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let err = store.get_stream("tender/tender/none.dbf").await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::NotFound));
    }

    #[tokio::test]
    async fn keys_cannot_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        for location in ["../secret.xlsx", "/etc/passwd", "a/../../b.dbf", ""] {
            let err = store.get_stream(location).await.unwrap_err();
            assert!(matches!(err, ObjectStoreError::InvalidLocation), "{location}");
        }
    }
}
