//! Access token persistence
//!
//! The access token and device identifier live under fixed keys. The refresh
//! token never passes through here: it stays in the HTTP-only cookie held by
//! the shared cookie jar.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use crate::types::{ClientError, Result};

/// Storage key of the access token
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Storage key of the device identifier
pub const DEVICE_ID_KEY: &str = "deviceId";

/// Client-side persistent storage for session credentials.
///
/// At most one access token is held; `set_access_token` replaces it.
pub trait TokenStore: Send + Sync {
    fn access_token(&self) -> Option<String>;
    fn set_access_token(&self, token: &str) -> Result<()>;
    fn clear_access_token(&self) -> Result<()>;
    fn device_id(&self) -> Option<String>;
    fn set_device_id(&self, device_id: &str) -> Result<()>;
}

/// Stored document, keyed the same way on disk and in memory
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
struct StoredCredentials {
    #[serde(rename = "accessToken", default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(rename = "deviceId", default, skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
}

/// In-memory token store
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    inner: RwLock<StoredCredentials>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with an access token
    pub fn with_access_token(token: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(StoredCredentials {
                access_token: Some(token.into()),
                device_id: None,
            }),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn access_token(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .access_token
            .clone()
    }

    fn set_access_token(&self, token: &str) -> Result<()> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .access_token = Some(token.to_string());
        Ok(())
    }

    fn clear_access_token(&self) -> Result<()> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .access_token = None;
        Ok(())
    }

    fn device_id(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .device_id
            .clone()
    }

    fn set_device_id(&self, device_id: &str) -> Result<()> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .device_id = Some(device_id.to_string());
        Ok(())
    }
}

/// JSON file token store.
///
/// Reads are served from a cached copy; every write rewrites the whole
/// document through a temp file and rename.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    cached: RwLock<StoredCredentials>,
}

impl FileTokenStore {
    /// Open (or lazily create) the store at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cached = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => StoredCredentials::default(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoredCredentials::default(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), has_token = cached.access_token.is_some(), "Token store opened");

        Ok(Self {
            path,
            cached: RwLock::new(cached),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, apply: impl FnOnce(&mut StoredCredentials)) -> Result<()> {
        let mut guard = self.cached.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        apply(&mut next);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&next)?)?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            ClientError::Storage(format!(
                "Failed to replace {}: {}",
                self.path.display(),
                e
            ))
        })?;

        *guard = next;
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn access_token(&self) -> Option<String> {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .access_token
            .clone()
    }

    fn set_access_token(&self, token: &str) -> Result<()> {
        self.update(|c| c.access_token = Some(token.to_string()))
    }

    fn clear_access_token(&self) -> Result<()> {
        self.update(|c| c.access_token = None)
    }

    fn device_id(&self) -> Option<String> {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .device_id
            .clone()
    }

    fn set_device_id(&self, device_id: &str) -> Result<()> {
        self.update(|c| c.device_id = Some(device_id.to_string()))
    }
}
