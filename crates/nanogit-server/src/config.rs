//! YAML configuration: server settings plus the org/team/user ACL.

use std::borrow::Cow;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use nanogit_ssh::constants::{DEFAULT_KEYGEN_TYPE, DEFAULT_SSH_HOST, DEFAULT_SSH_PORT};

pub const DEFAULT_CONFIG_PATH: &str = "config.yml";
pub const DEFAULT_PRIVATE_KEY_PATH: &str = "key.rsa";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot deserialize config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("org id {0:?} is declared more than once")]
    DuplicateOrg(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub orgs: Vec<Org>,
    pub users: Vec<User>,
    /// Directory relative paths resolve against: the config file's parent.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub data_root: String,
    pub host: String,
    pub port: u16,
    pub private_key_path: String,
    pub keygen: KeygenSection,
    /// Directory holding `git-upload-pack` and friends. Unset means `$PATH`.
    pub git_exec_path: Option<String>,
    /// Env names forwarded from `env` requests to git subprocesses.
    pub accept_env: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            data_root: String::new(),
            host: DEFAULT_SSH_HOST.to_string(),
            port: DEFAULT_SSH_PORT,
            private_key_path: DEFAULT_PRIVATE_KEY_PATH.to_string(),
            keygen: KeygenSection::default(),
            git_exec_path: None,
            accept_env: vec!["GIT_PROTOCOL".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeygenSection {
    #[serde(rename = "type")]
    pub key_type: String,
    pub passphrase: String,
}

impl Default for KeygenSection {
    fn default() -> Self {
        Self {
            key_type: DEFAULT_KEYGEN_TYPE.to_string(),
            passphrase: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Org {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub teams: Vec<Team>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Team {
    pub name: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub name: String,
    #[serde(default)]
    pub ssh_keys: Vec<PubKey>,
    #[serde(default)]
    pub orgs: Vec<Membership>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PubKey {
    #[serde(rename = "type", default)]
    pub key_type: String,
    /// Authorized-key text: `<algorithm> <base64>`.
    pub val: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Membership {
    pub id: String,
    #[serde(default)]
    pub teams: Vec<String>,
}

/// Read and validate the config file at `path`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Config::from_yaml(&text, path)
}

impl Config {
    /// Parse `text` as if it had been read from `origin`.
    pub fn from_yaml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.base_dir = origin
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for org in &self.orgs {
            if !seen.insert(org.id.as_str()) {
                return Err(ConfigError::DuplicateOrg(org.id.clone()));
            }
        }
        Ok(())
    }

    /// The user owning `key` (authorized-key text, compared exactly).
    pub fn lookup_user_by_key(&self, key: &str) -> Option<&User> {
        self.users
            .iter()
            .find(|user| user.ssh_keys.iter().any(|k| k.val.trim() == key))
    }

    pub fn lookup_org_by_id(&self, id: &str) -> Option<&Org> {
        self.orgs.iter().find(|org| org.id == id)
    }

    /// Expand `~` and anchor relative paths at the config file's directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let expanded: Cow<'_, str> = shellexpand::tilde(path);
        let path = Path::new(expanded.as_ref());
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// `None` when `server.data_root` is empty.
    pub fn data_root(&self) -> Option<PathBuf> {
        let root = self.server.data_root.trim();
        (!root.is_empty()).then(|| self.resolve_path(root))
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.resolve_path(&self.server.private_key_path)
    }

    /// Program to run for a git service, honouring `git_exec_path`.
    pub fn git_program(&self, name: &str) -> PathBuf {
        match self.server.git_exec_path.as_deref().filter(|p| !p.is_empty()) {
            Some(dir) => self.resolve_path(dir).join(name),
            None => PathBuf::from(name),
        }
    }

    pub fn accepts_env(&self, name: &str) -> bool {
        self.server.accept_env.iter().any(|n| n == name)
    }
}
