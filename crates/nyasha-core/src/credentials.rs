use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

/// Opaque credential blob owned by the transport.
///
/// The core never looks inside; it only loads it before connecting and saves
/// every update the transport emits.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(pub serde_json::Value);

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<Option<Credentials>>;

    /// Durably persist `creds`. Returns only after the write is complete.
    async fn save(&self, creds: &Credentials) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct CredentialsFile {
    saved_at: String,
    credentials: Credentials,
}

/// Stores credentials as `<dir>/creds.json`.
#[derive(Clone, Debug)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    const FILE_NAME: &'static str = "creds.json";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(Self::FILE_NAME)
    }

    fn err(&self, reason: impl std::fmt::Display) -> Error {
        Error::Credentials {
            path: self.path(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<Credentials>> {
        let path = self.path();
        let txt = match tokio::fs::read_to_string(&path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.err(e)),
        };
        if txt.trim().is_empty() {
            return Ok(None);
        }
        let file: CredentialsFile = serde_json::from_str(&txt).map_err(|e| self.err(e))?;
        Ok(Some(file.credentials))
    }

    async fn save(&self, creds: &Credentials) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| self.err(e))?;

        let body = serde_json::to_vec_pretty(&CredentialsFile {
            saved_at: Utc::now().to_rfc3339(),
            credentials: creds.clone(),
        })?;

        // Write to a sibling temp file, fsync, then rename over the real file.
        let path = self.path();
        let tmp = self.dir.join(format!(".{}.tmp", Self::FILE_NAME));
        {
            use tokio::io::AsyncWriteExt;
            let mut f = tokio::fs::File::create(&tmp)
                .await
                .map_err(|e| self.err(e))?;
            f.write_all(&body).await.map_err(|e| self.err(e))?;
            f.sync_all().await.map_err(|e| self.err(e))?;
        }
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| self.err(e))?;
        Ok(())
    }
}
