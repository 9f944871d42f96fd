//! Org/team access decisions.
//!
//! Default deny. For the requested org, the user's memberships are walked in
//! order and the first team name that exists in the org decides the rights;
//! overlapping teams are never merged. The result is then intersected with a
//! [`RepoPolicy`], which can only narrow what the org grants.

use std::fmt;

use crate::config::Config;

/// Rights of one identity on one repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Access {
    pub read: bool,
    pub write: bool,
}

impl Access {
    pub const NONE: Access = Access {
        read: false,
        write: false,
    };
    pub const FULL: Access = Access {
        read: true,
        write: true,
    };

    pub fn intersect(self, other: Access) -> Access {
        Access {
            read: self.read && other.read,
            write: self.write && other.write,
        }
    }

    /// Read is always required; write only when `write` is set.
    pub fn require(self, write: bool) -> Result<(), Permission> {
        if !self.read {
            return Err(Permission::Read);
        }
        if write && !self.write {
            return Err(Permission::Write);
        }
        Ok(())
    }
}

/// The right that was missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Read,
    Write,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Read => f.write_str("read"),
            Permission::Write => f.write_str("write"),
        }
    }
}

/// Per-repository rules layered under the org decision.
pub trait RepoPolicy: Send + Sync {
    fn access(&self, identity: &str, org: &str, repo: &str) -> Access;
}

/// No per-repository rules yet: everything the org grants stands.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl RepoPolicy for AllowAll {
    fn access(&self, _identity: &str, _org: &str, _repo: &str) -> Access {
        Access::FULL
    }
}

/// Org-level rights of `identity` (authorized-key text) in `org`.
pub fn org_access(config: &Config, identity: &str, org: &str) -> Access {
    let Some(org) = config.lookup_org_by_id(org) else {
        tracing::debug!(org, "unknown org");
        return Access::NONE;
    };
    let Some(user) = config.lookup_user_by_key(identity) else {
        tracing::debug!("identity not in config");
        return Access::NONE;
    };

    for membership in user.orgs.iter().filter(|m| m.id == org.id) {
        for team_name in &membership.teams {
            if let Some(team) = org.teams.iter().find(|t| &t.name == team_name) {
                tracing::trace!(user = %user.name, org = %org.id, team = %team.name, "team matched");
                return Access {
                    read: team.read,
                    write: team.write,
                };
            }
        }
    }
    Access::NONE
}

/// Rights of `identity` on `org/repo`, evaluated against `config` as it is now.
pub fn authorize(
    config: &Config,
    policy: &dyn RepoPolicy,
    identity: &str,
    org: &str,
    repo: &str,
) -> Access {
    org_access(config, identity, org).intersect(policy.access(identity, org, repo))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const ALICE: &str = "ssh-ed25519 AAAAalice";
    const BOB: &str = "ssh-ed25519 AAAAbob";
    const CAROL: &str = "ssh-rsa AAAAcarol";

    fn fixture() -> Config {
        let yaml = r#"
orgs:
  - id: acme
    teams:
      - { name: readers, read: true, write: false }
      - { name: writers, read: true, write: true }
      - { name: nobody }
  - id: globex
    teams:
      - { name: writers, read: true, write: true }
users:
  - name: alice
    ssh_keys: [{ type: ssh-ed25519, val: "ssh-ed25519 AAAAalice" }]
    orgs:
      - { id: acme, teams: [readers, writers] }
  - name: bob
    ssh_keys: [{ type: ssh-ed25519, val: "ssh-ed25519 AAAAbob" }]
    orgs:
      - { id: acme, teams: [ghosts, writers, readers] }
      - { id: globex, teams: [readers] }
  - name: carol
    ssh_keys: [{ type: ssh-rsa, val: "ssh-rsa AAAAcarol" }]
    orgs:
      - { id: acme, teams: [nobody, writers] }
"#;
        Config::from_yaml(yaml, Path::new("config.yml")).unwrap()
    }

    struct ReadOnly;

    impl RepoPolicy for ReadOnly {
        fn access(&self, _: &str, _: &str, _: &str) -> Access {
            Access {
                read: true,
                write: false,
            }
        }
    }

    #[test]
    fn first_listed_team_wins() {
        let config = fixture();
        assert_eq!(
            authorize(&config, &AllowAll, ALICE, "acme", "widgets"),
            Access {
                read: true,
                write: false
            }
        );
    }

    #[test]
    fn unknown_team_names_are_skipped() {
        let config = fixture();
        assert_eq!(authorize(&config, &AllowAll, BOB, "acme", "widgets"), Access::FULL);
    }

    #[test]
    fn matching_team_without_rights_still_decides() {
        let config = fixture();
        assert_eq!(authorize(&config, &AllowAll, CAROL, "acme", "widgets"), Access::NONE);
    }

    #[test]
    fn no_matching_team_denies() {
        let config = fixture();
        assert_eq!(authorize(&config, &AllowAll, BOB, "globex", "app"), Access::NONE);
    }

    #[test]
    fn unknown_org_or_identity_denies() {
        let config = fixture();
        assert_eq!(authorize(&config, &AllowAll, ALICE, "initech", "x"), Access::NONE);
        assert_eq!(
            authorize(&config, &AllowAll, "ssh-ed25519 AAAAmallory", "acme", "x"),
            Access::NONE
        );
    }

    #[test]
    fn repo_policy_only_narrows() {
        let config = fixture();
        assert_eq!(
            authorize(&config, &ReadOnly, BOB, "acme", "widgets"),
            Access {
                read: true,
                write: false
            }
        );
        assert_eq!(authorize(&config, &ReadOnly, CAROL, "acme", "widgets"), Access::NONE);
    }

    #[test]
    fn require_reports_missing_right() {
        let read_only = Access {
            read: true,
            write: false,
        };
        assert_eq!(read_only.require(false), Ok(()));
        assert_eq!(read_only.require(true), Err(Permission::Write));
        assert_eq!(Access::NONE.require(false), Err(Permission::Read));
        assert_eq!(Access::NONE.require(true), Err(Permission::Read));
        assert_eq!(Access::FULL.require(true), Ok(()));
    }
}
