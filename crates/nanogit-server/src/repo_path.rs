//! Mapping `org/repo` arguments onto repository directories.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::GitError;

/// Drop every `'` left over from client-side quoting.
pub fn clean_path(path: &str) -> String {
    path.replace('\'', "")
}

/// Split `org/repo` into lower-cased segments. Anything past the second
/// segment is ignored.
pub fn split_path(path: &str) -> Result<(String, String), GitError> {
    let mut segments = path.split('/');
    match (segments.next(), segments.next()) {
        (Some(org), Some(repo)) => Ok((org.to_lowercase(), repo.to_lowercase())),
        _ => Err(GitError::PathFormat(path.to_string())),
    }
}

/// Finds repository directories under the configured data root.
#[derive(Debug, Clone)]
pub struct RepoLocator {
    data_root: PathBuf,
}

impl RepoLocator {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, GitError> {
        config
            .data_root()
            .map(Self::new)
            .ok_or(GitError::DataRootUnset)
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// The directory of `org/repo`. Both segments must be plain names, and
    /// the org directory and the repo directory must both exist and be
    /// directories.
    pub fn resolve(&self, org: &str, repo: &str) -> Result<PathBuf, GitError> {
        let org_dir = self.data_root.join(org);
        if !is_plain_segment(org) || !org_dir.is_dir() {
            return Err(GitError::RepoNotFound(org_dir));
        }
        let repo_dir = org_dir.join(repo);
        if !is_plain_segment(repo) || !repo_dir.is_dir() {
            return Err(GitError::RepoNotFound(repo_dir));
        }
        Ok(repo_dir)
    }
}

/// A single directory name that stays where it is joined: not empty, not a
/// dot segment, no separators.
fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\'])
}
