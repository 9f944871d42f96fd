//! Live ACL snapshot with reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{load_config, Config, ConfigError};

/// Owns the current [`Config`] and swaps it atomically on reload.
///
/// Readers take an `Arc` snapshot and never hold the lock across an await.
pub struct AclStore {
    path: PathBuf,
    current: RwLock<Arc<Config>>,
}

impl AclStore {
    /// Load `path` and start serving it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = load_config(&path)?;
        Ok(Self::with_config(path, config))
    }

    /// Serve an already-parsed config; `reload` will read `path`.
    pub fn with_config(path: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Arc<Config> {
        self.current.read().clone()
    }

    /// Re-read the file. On error the previous snapshot stays in place.
    pub fn reload(&self) -> Result<Arc<Config>, ConfigError> {
        let config = Arc::new(load_config(&self.path)?);
        *self.current.write() = config.clone();
        tracing::info!(
            path = %self.path.display(),
            orgs = config.orgs.len(),
            users = config.users.len(),
            "acl reloaded"
        );
        Ok(config)
    }
}
