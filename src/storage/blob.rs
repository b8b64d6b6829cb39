use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Filesystem-backed object store for incident photos. Keys are slash
/// separated (`incidents/<installation>/<incident>/<name>`) and map directly
/// to paths under the root directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub async fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn object_path(&self, key: &str) -> PathBuf {
        // Keys are server-generated; components never contain path traversal.
        self.root.join(key)
    }

    /// Write an object. The write goes to a temp file first and is renamed
    /// into place so readers never observe a partial object.
    pub async fn put(&self, key: &str, data: &[u8]) -> std::io::Result<()> {
        let path = self.object_path(key);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        let res = async {
            file.write_all(data).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp, &path).await
        }
        .await;

        if res.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        res
    }

    /// Fetch an object's bytes; `None` when the key does not exist.
    pub async fn get(&self, key: &str) -> std::io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.object_path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[allow(dead_code)]
    pub fn root(&self) -> &Path {
        &self.root
    }
}
