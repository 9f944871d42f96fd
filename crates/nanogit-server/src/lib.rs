//! nanogit: git hosting over SSH.
//!
//! Users, their public keys and their org/team memberships come from a YAML
//! file ([`config`]). Connections authenticate with a configured key
//! ([`KeyringVerifier`]); `git-upload-pack`, `git-upload-archive` and
//! `git-receive-pack` requests are authorized per org ([`auth`]) and served
//! from `<data_root>/<org>/<repo>` ([`repo_path`]).

use std::sync::Arc;

use nanogit_ssh::{KeygenConfig, ServerConfig, ServerConfigBuilder};

pub mod acl;
pub mod auth;
pub mod config;
pub mod error;
pub mod git;
pub mod logging;
pub mod repo_path;

pub use acl::AclStore;
pub use auth::{authorize, Access, AllowAll, Permission, RepoPolicy};
pub use error::GitError;
pub use git::{GitCommand, GitService, KeyringVerifier};

/// SSH server settings from the current ACL snapshot, with the key verifier
/// and all three git services registered. Callers may still override
/// host, port or host key before `build()`.
pub fn ssh_server_builder(acl: &Arc<AclStore>, policy: Arc<dyn RepoPolicy>) -> ServerConfigBuilder {
    let config = acl.snapshot();
    let mut builder = ServerConfig::builder()
        .host(config.server.host.clone())
        .port(config.server.port)
        .private_key_path(config.private_key_path())
        .keygen(KeygenConfig {
            key_type: config.server.keygen.key_type.clone(),
            passphrase: config.server.keygen.passphrase.clone(),
        })
        .public_key_verifier(Arc::new(KeyringVerifier::new(acl.clone())));

    for service in GitService::ALL {
        builder = builder.command(
            service.command_name(),
            Arc::new(GitCommand::new(service, acl.clone(), policy.clone())),
        );
    }
    builder
}
