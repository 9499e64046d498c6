//! Where received files land.

use std::path::{Path, PathBuf};

use schat_protocol::MAX_CHUNK_SIZE;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

const FALLBACK_NAME: &str = "unnamed";

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("cannot create {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("connection failed mid-payload: {0}")]
    Source(#[source] std::io::Error),

    #[error("connection ended {remaining} bytes before the payload did")]
    Truncated { remaining: u64 },
}

impl DownloadError {
    /// True when the connection itself is no longer usable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Source(_) | Self::Truncated { .. })
    }
}

/// Files for one user, saved under a single directory.
#[derive(Debug, Clone)]
pub struct DownloadStore {
    root: PathBuf,
}

impl DownloadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Where `file_name` would be stored. Directory parts are dropped, so a
    /// sender cannot write outside the store.
    pub fn path_for(&self, file_name: &str) -> PathBuf {
        let name = Path::new(file_name)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .unwrap_or(FALLBACK_NAME);
        self.root.join(name)
    }

    /// Persist the next `len` bytes of `source` as `file_name`.
    ///
    /// Exactly `len` bytes are consumed even when the file cannot be
    /// written, so the caller's stream stays on a frame boundary.
    pub async fn save<R>(
        &self,
        file_name: &str,
        source: &mut R,
        len: u64,
    ) -> Result<PathBuf, DownloadError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let path = self.path_for(file_name);
        let mut sink = self.create(&path).await.map(|file| (path, file));

        let mut buf = vec![0u8; MAX_CHUNK_SIZE];
        let mut remaining = len;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = source
                .read(&mut buf[..want])
                .await
                .map_err(DownloadError::Source)?;
            if n == 0 {
                return Err(DownloadError::Truncated { remaining });
            }
            if let Ok((path, file)) = &mut sink {
                if let Err(e) = file.write_all(&buf[..n]).await {
                    sink = Err(DownloadError::Write {
                        path: path.clone(),
                        source: e,
                    });
                }
            }
            remaining -= n as u64;
        }

        let (path, mut file) = sink?;
        file.flush()
            .await
            .map_err(|source| DownloadError::Write {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    async fn create(&self, path: &Path) -> Result<File, DownloadError> {
        let create_err = |source: std::io::Error| DownloadError::Create {
            path: path.to_path_buf(),
            source,
        };
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(create_err)?;
        File::create(path).await.map_err(create_err)
    }
}
