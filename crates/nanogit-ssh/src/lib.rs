//! SSH transport engine for git hosting.
//!
//! Accepts SSH connections, maps client public keys to identities through a
//! [`PublicKeyVerifier`], and serves `exec` requests by looking the command
//! up in a table of [`CommandHandler`]s and piping the resulting process over
//! the channel.

pub mod channel;
pub mod command;
pub mod config;
pub mod constants;
pub mod error;
pub mod host_key;
pub mod identity;
pub mod process;
pub mod server;
pub mod session;
pub mod sink;

pub use command::{CommandHandler, CommandSpec, ExecContext, Invocation, parse_command};
pub use config::{KeygenConfig, ServerConfig, ServerConfigBuilder};
pub use error::{ChannelError, CommandError, ConfigError, UnknownKey};
pub use identity::{ConnectionMeta, Identity, PublicKeyVerifier, authorized_key_text, fingerprint};
pub use server::{BoundServer, GitSshServer};
