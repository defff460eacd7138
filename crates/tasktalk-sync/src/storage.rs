use anyhow::{Result, bail};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

/// Object storage for uploaded files (profile images).
///
/// Each object lives at `{storage_dir}/{key}`; keys are `/`-separated paths
/// such as `profileImages/<uid>`. Objects are served under `public_url`.
pub struct ObjectStorage {
    dir: PathBuf,
    public_url: String,
}

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    pub sha256: String,
}

impl ObjectStorage {
    pub async fn new(dir: PathBuf, public_url: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Object storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_url: public_url.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for a key. Rejects anything that could escape the storage root.
    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let valid_segment = |s: &str| {
            !s.is_empty()
                && s != "."
                && s != ".."
                && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        if key.is_empty() || !key.split('/').all(valid_segment) {
            bail!("Invalid object key: {:?}", key);
        }
        Ok(self.dir.join(key))
    }

    /// Writes (or replaces) an object. The data lands under a temp name
    /// first so readers never see a partial file.
    pub async fn put(&self, key: &str, data: &[u8]) -> Result<StoredObject> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut hasher = Sha256::new();
        hasher.update(data);
        let sha256 = hex::encode(hasher.finalize());

        let tmp = path.with_extension("upload");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &path).await?;

        info!("Stored object {} ({} bytes)", key, data.len());
        Ok(StoredObject {
            key: key.to_string(),
            size: data.len() as u64,
            sha256,
        })
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(key)?;
        Ok(fs::read(&path).await?)
    }

    /// Public download URL. The digest suffix changes whenever the object
    /// is replaced, so cached copies of an old avatar are not reused.
    pub fn download_url(&self, object: &StoredObject) -> String {
        format!(
            "{}/{}?v={}",
            self.public_url.trim_end_matches('/'),
            object.key,
            &object.sha256[..12]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scratch_dir;

    #[tokio::test]
    async fn put_replaces_and_changes_url() {
        let storage = ObjectStorage::new(scratch_dir("storage"), "http://cdn.test/files/")
            .await
            .unwrap();

        let first = storage.put("profileImages/u1", b"one").await.unwrap();
        let second = storage.put("profileImages/u1", b"two!").await.unwrap();
        assert_eq!(second.size, 4);
        assert_eq!(storage.read("profileImages/u1").await.unwrap(), b"two!");

        let url = storage.download_url(&second);
        assert!(url.starts_with("http://cdn.test/files/profileImages/u1?v="));
        assert_ne!(url, storage.download_url(&first));
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let storage = ObjectStorage::new(scratch_dir("storage"), "http://cdn.test")
            .await
            .unwrap();
        for key in ["", "../etc/passwd", "a//b", "/abs", "a/./b", "sp ace"] {
            assert!(storage.put(key, b"x").await.is_err(), "accepted {:?}", key);
        }
    }
}
