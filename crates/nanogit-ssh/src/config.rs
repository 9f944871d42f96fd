//! Server configuration.
//!
//! [`ServerConfig`] is immutable once built; [`ServerConfigBuilder::build`]
//! is the validation step and fails fast when a required collaborator is
//! missing.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::keys::PrivateKey;

use crate::command::{CommandHandler, CommandTable};
use crate::constants::{DEFAULT_KEYGEN_TYPE, DEFAULT_SSH_HOST, DEFAULT_SSH_PORT};
use crate::error::ConfigError;
use crate::identity::PublicKeyVerifier;

/// Parameters for generating a missing host key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeygenConfig {
    /// `ssh-keygen -t` value.
    pub key_type: String,
    /// Empty means no passphrase.
    pub passphrase: String,
}

impl Default for KeygenConfig {
    fn default() -> Self {
        Self {
            key_type: DEFAULT_KEYGEN_TYPE.to_string(),
            passphrase: String::new(),
        }
    }
}

/// Validated SSH server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    host: String,
    port: u16,
    private_key_path: PathBuf,
    keygen: KeygenConfig,
    host_key: Option<PrivateKey>,
    verifier: Arc<dyn PublicKeyVerifier>,
    commands: Arc<CommandTable>,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, ready for `TcpListener::bind`.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn private_key_path(&self) -> &Path {
        &self.private_key_path
    }

    pub fn keygen(&self) -> &KeygenConfig {
        &self.keygen
    }

    /// A host key supplied in memory, bypassing the key file.
    pub fn host_key(&self) -> Option<&PrivateKey> {
        self.host_key.as_ref()
    }

    pub fn verifier(&self) -> &Arc<dyn PublicKeyVerifier> {
        &self.verifier
    }

    pub fn commands(&self) -> &Arc<CommandTable> {
        &self.commands
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut commands: Vec<&String> = self.commands.keys().collect();
        commands.sort();
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("private_key_path", &self.private_key_path)
            .field("keygen_type", &self.keygen.key_type)
            .field("commands", &commands)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct ServerConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    private_key_path: Option<PathBuf>,
    keygen: KeygenConfig,
    host_key: Option<PrivateKey>,
    verifier: Option<Arc<dyn PublicKeyVerifier>>,
    commands: CommandTable,
}

impl ServerConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn private_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_path = Some(path.into());
        self
    }

    pub fn keygen(mut self, keygen: KeygenConfig) -> Self {
        self.keygen = keygen;
        self
    }

    /// Use this key instead of reading `private_key_path`.
    pub fn host_key(mut self, key: PrivateKey) -> Self {
        self.host_key = Some(key);
        self
    }

    pub fn public_key_verifier(mut self, verifier: Arc<dyn PublicKeyVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Register `handler` for exec requests naming `name`.
    pub fn command(mut self, name: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Self {
        self.commands.insert(name.into(), handler);
        self
    }

    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        let verifier = self.verifier.ok_or(ConfigError::MissingPublicKeyVerifier)?;
        if self.commands.is_empty() {
            return Err(ConfigError::MissingCommandHandlers);
        }
        let private_key_path = self
            .private_key_path
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::EmptyPrivateKeyPath)?;

        let mut keygen = self.keygen;
        if keygen.key_type.is_empty() {
            keygen.key_type = DEFAULT_KEYGEN_TYPE.to_string();
        }
        let host = self
            .host
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_SSH_HOST.to_string());

        Ok(ServerConfig {
            host,
            port: self.port.unwrap_or(DEFAULT_SSH_PORT),
            private_key_path,
            keygen,
            host_key: self.host_key,
            verifier,
            commands: Arc::new(self.commands),
        })
    }
}
