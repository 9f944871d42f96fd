//! Error types for the SSH engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building or starting the server.
///
/// All of these are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No public-key verifier was registered.
    #[error("no public key verifier in server config")]
    MissingPublicKeyVerifier,

    /// No command handler was registered.
    #[error("no command handlers in server config")]
    MissingCommandHandlers,

    /// The private key path is empty.
    #[error("empty private key path in server config")]
    EmptyPrivateKeyPath,

    /// `ssh-keygen` failed or could not be started.
    #[error("failed to generate host key {path}: {reason}")]
    KeyGeneration { path: PathBuf, reason: String },

    /// The host key file exists but could not be decoded.
    #[error("failed to load host key {path}: {source}")]
    HostKey {
        path: PathBuf,
        #[source]
        source: russh::keys::Error,
    },

    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Returned by a [`PublicKeyVerifier`](crate::PublicKeyVerifier) when no
/// configured user owns the presented key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown public key: {fingerprint}")]
pub struct UnknownKey {
    pub fingerprint: String,
}

/// Error reported by a [`CommandHandler`](crate::CommandHandler).
///
/// Handlers own their error taxonomy; the engine only logs the message and
/// fails the request. `kind` is a short stable label used in log fields.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct CommandError {
    pub kind: &'static str,
    pub message: String,
}

impl CommandError {
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Per-request failures caught at the channel boundary.
///
/// None of these end the session: they are logged and turned into a failed
/// (or silently acknowledged) request.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// An `env` request that does not carry exactly one name and one value.
    #[error("invalid env arguments: {0:?}")]
    InvalidEnvArgs(String),

    /// The handler refused the command.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Stream acquisition or process start failed.
    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// Channel already ran its command.
    #[error("channel already executed a command")]
    AlreadyExecuted,
}
