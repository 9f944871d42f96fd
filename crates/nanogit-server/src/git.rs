//! Git transport commands and the key verifier backed by the ACL.

use std::sync::Arc;

use russh::keys::PublicKey;

use nanogit_ssh::{
    authorized_key_text, fingerprint, CommandError, CommandHandler, CommandSpec, ConnectionMeta,
    ExecContext, Identity, PublicKeyVerifier, UnknownKey,
};

use crate::acl::AclStore;
use crate::auth::{authorize, RepoPolicy};
use crate::error::GitError;
use crate::repo_path::{clean_path, split_path, RepoLocator};

/// The git services reachable over SSH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GitService {
    UploadPack,
    UploadArchive,
    ReceivePack,
}

impl GitService {
    pub const ALL: [GitService; 3] = [
        GitService::UploadPack,
        GitService::UploadArchive,
        GitService::ReceivePack,
    ];

    /// The exec command name, which is also the program name.
    pub fn command_name(self) -> &'static str {
        match self {
            GitService::UploadPack => "git-upload-pack",
            GitService::UploadArchive => "git-upload-archive",
            GitService::ReceivePack => "git-receive-pack",
        }
    }

    /// Pushing needs write on top of read.
    pub fn needs_write(self) -> bool {
        matches!(self, GitService::ReceivePack)
    }
}

/// Handler for one [`GitService`].
pub struct GitCommand {
    service: GitService,
    acl: Arc<AclStore>,
    policy: Arc<dyn RepoPolicy>,
}

impl GitCommand {
    pub fn new(service: GitService, acl: Arc<AclStore>, policy: Arc<dyn RepoPolicy>) -> Self {
        Self {
            service,
            acl,
            policy,
        }
    }

    /// Path check, then authorization, then filesystem lookup.
    pub fn plan(&self, ctx: ExecContext<'_>) -> Result<CommandSpec, GitError> {
        let config = self.acl.snapshot();
        let (org, repo) = split_path(&clean_path(ctx.args))?;

        let access = authorize(&config, self.policy.as_ref(), ctx.identity.as_str(), &org, &repo);
        tracing::debug!(
            identity = %ctx.identity,
            org = %org,
            repo = %repo,
            read = access.read,
            write = access.write,
            "access evaluated"
        );
        access
            .require(self.service.needs_write())
            .map_err(GitError::Unauthorized)?;

        let repo_dir = RepoLocator::from_config(&config)?.resolve(&org, &repo)?;

        let mut spec =
            CommandSpec::new(config.git_program(self.service.command_name())).arg(repo_dir);
        for (name, value) in ctx.env {
            if config.accepts_env(name) {
                spec = spec.env(name.clone(), value.clone());
            } else {
                tracing::debug!(name = %name, "env not forwarded to git");
            }
        }
        Ok(spec)
    }
}

impl CommandHandler for GitCommand {
    fn prepare(&self, ctx: ExecContext<'_>) -> Result<CommandSpec, CommandError> {
        self.plan(ctx).map_err(CommandError::from)
    }
}

/// Accepts keys listed under some user's `ssh_keys`. The identity is the
/// key's authorized-key text.
pub struct KeyringVerifier {
    acl: Arc<AclStore>,
}

impl KeyringVerifier {
    pub fn new(acl: Arc<AclStore>) -> Self {
        Self { acl }
    }
}

impl PublicKeyVerifier for KeyringVerifier {
    fn verify(&self, meta: ConnectionMeta<'_>, key: &PublicKey) -> Result<Identity, UnknownKey> {
        let unknown = || UnknownKey {
            fingerprint: fingerprint(key),
        };
        let text = authorized_key_text(key).ok_or_else(unknown)?;

        let config = self.acl.snapshot();
        match config.lookup_user_by_key(&text) {
            Some(user) => {
                tracing::debug!(user = %user.name, peer = ?meta.peer_addr, "key belongs to user");
                Ok(Identity::new(text))
            }
            None => Err(unknown()),
        }
    }
}
