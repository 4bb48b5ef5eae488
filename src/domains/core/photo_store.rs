use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io;
use std::path::PathBuf;
use tokio::fs;

use crate::errors::{DomainError, DomainResult};

/// Where captured photo bytes live until they are uploaded and purged.
#[async_trait]
pub trait PhotoStore: Send + Sync {
    /// Persist bytes under `key`, returning the stored size.
    async fn write(&self, key: &str, data: &[u8]) -> DomainResult<u64>;

    async fn read(&self, key: &str) -> DomainResult<Vec<u8>>;

    /// Removing a key that is already gone is not an error.
    async fn delete(&self, key: &str) -> DomainResult<()>;
}

/// Hex encoded SHA-256 of the photo bytes, sent alongside uploads.
pub fn content_digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Flat directory store on the local filesystem
pub struct LocalPhotoStore {
    base_path: PathBuf,
}

impl LocalPhotoStore {
    /// Creates the store, making sure the base directory exists.
    pub fn new(base_path: impl Into<PathBuf>) -> io::Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    fn sanitize_key(key: &str) -> DomainResult<&str> {
        if key.is_empty() || key.contains('/') || key.contains('\\') || key == "." || key == ".." {
            Err(DomainError::File(format!("Invalid photo key: {}", key)))
        } else {
            Ok(key)
        }
    }

    fn path_for(&self, key: &str) -> DomainResult<PathBuf> {
        Ok(self.base_path.join(Self::sanitize_key(key)?))
    }
}

#[async_trait]
impl PhotoStore for LocalPhotoStore {
    async fn write(&self, key: &str, data: &[u8]) -> DomainResult<u64> {
        let path = self.path_for(key)?;
        fs::write(&path, data)
            .await
            .map_err(|e| DomainError::File(format!("Failed to write photo {}: {}", key, e)))?;
        Ok(data.len() as u64)
    }

    async fn read(&self, key: &str) -> DomainResult<Vec<u8>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(DomainError::EntityNotFound("photo_bytes".to_string(), key.to_string()))
            }
            Err(e) => Err(DomainError::File(format!("Failed to read photo {}: {}", key, e))),
        }
    }

    async fn delete(&self, key: &str) -> DomainResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DomainError::File(format!("Failed to delete photo {}: {}", key, e))),
        }
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory store for tests
    #[derive(Default)]
    pub struct MemoryPhotoStore {
        pub files: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl PhotoStore for MemoryPhotoStore {
        async fn write(&self, key: &str, data: &[u8]) -> DomainResult<u64> {
            self.files.lock().unwrap().insert(key.to_string(), data.to_vec());
            Ok(data.len() as u64)
        }

        async fn read(&self, key: &str) -> DomainResult<Vec<u8>> {
            self.files
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| DomainError::EntityNotFound("photo_bytes".to_string(), key.to_string()))
        }

        async fn delete(&self, key: &str) -> DomainResult<()> {
            self.files.lock().unwrap().remove(key);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalPhotoStore::new(dir.path()).unwrap();

        assert_eq!(store.write("p1.jpg", b"jpegbytes").await.unwrap(), 9);
        assert_eq!(store.read("p1.jpg").await.unwrap(), b"jpegbytes");

        store.delete("p1.jpg").await.unwrap();
        store.delete("p1.jpg").await.unwrap();
        assert!(matches!(
            store.read("p1.jpg").await,
            Err(DomainError::EntityNotFound(_, _))
        ));
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalPhotoStore::new(dir.path()).unwrap();
        assert!(store.write("../escape", b"x").await.is_err());
        assert!(store.read("..").await.is_err());
    }

    #[test]
    fn test_content_digest() {
        assert_eq!(
            content_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
