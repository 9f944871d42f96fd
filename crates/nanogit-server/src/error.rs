use std::path::PathBuf;

use thiserror::Error;

use nanogit_ssh::CommandError;

use crate::auth::Permission;

/// Why a git command was refused.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("a path should be orgname/reponame, got: {0}")]
    PathFormat(String),

    #[error("unauthorized {0} access")]
    Unauthorized(Permission),

    #[error("repository path does not exist or is not a directory: {}", .0.display())]
    RepoNotFound(PathBuf),

    #[error("data root in configuration file is empty")]
    DataRootUnset,
}

impl GitError {
    pub fn kind(&self) -> &'static str {
        match self {
            GitError::PathFormat(_) => "path_format",
            GitError::Unauthorized(_) => "unauthorized",
            GitError::RepoNotFound(_) => "repo_not_found",
            GitError::DataRootUnset => "data_root_unset",
        }
    }
}

impl From<GitError> for CommandError {
    fn from(err: GitError) -> Self {
        CommandError::new(err.kind(), err.to_string())
    }
}
