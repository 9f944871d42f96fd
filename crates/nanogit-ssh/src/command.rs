//! Exec payload parsing and the command-handler seam.
//!
//! An `exec` payload such as `git-upload-pack 'acme/widgets'` is split into a
//! command name and a raw argument string. The name selects a registered
//! [`CommandHandler`], which decides whether the identity may run it and, if
//! so, describes the process to start as a [`CommandSpec`].

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::error::CommandError;
use crate::identity::Identity;

/// A parsed exec request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Executable name, e.g. `git-upload-pack`.
    pub command: String,
    /// Everything after the first space, with the `'/` quirk collapsed.
    pub args: String,
}

/// Drop anything before the first `git`.
///
/// Some clients prefix the payload with shell quoting artifacts.
pub fn clean_command(payload: &str) -> &str {
    match payload.find("git") {
        Some(i) => &payload[i..],
        None => payload,
    }
}

/// Split a cleaned payload into command name and argument string.
///
/// Returns `None` when there is no space to split on; the caller treats that
/// as "no handler". Only the first `'/` is collapsed to `'`; this is not
/// shell unescaping, the result is only ever used as a literal argument.
pub fn parse_command(payload: &str) -> Option<Invocation> {
    let trimmed = payload.trim_start_matches(['\'', '(', ')']);
    let (command, args) = trimmed.split_once(' ')?;
    Some(Invocation {
        command: command.to_string(),
        args: args.replacen("'/", "'", 1),
    })
}

/// The process an authorized command should start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((name.into(), value.into()));
        self
    }
}

/// Everything a handler gets to decide on one exec request.
#[derive(Debug, Clone, Copy)]
pub struct ExecContext<'a> {
    pub identity: &'a Identity,
    /// The cleaned payload, before splitting.
    pub raw_command: &'a str,
    pub args: &'a str,
    /// Environment set by `env` requests earlier on this channel.
    pub env: &'a HashMap<String, String>,
}

/// A registered command.
///
/// Authorization happens inside `prepare`, synchronously on the channel task,
/// so no process is ever started for a refused command.
pub trait CommandHandler: Send + Sync {
    fn prepare(&self, ctx: ExecContext<'_>) -> Result<CommandSpec, CommandError>;
}

/// Immutable name → handler table.
pub type CommandTable = HashMap<String, std::sync::Arc<dyn CommandHandler>>;
