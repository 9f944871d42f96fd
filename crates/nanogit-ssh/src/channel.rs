//! Per-channel request multiplexer.
//!
//! One [`Multiplexer`] runs per accepted session channel, on its own task. It
//! consumes [`ChannelEvent`]s strictly in arrival order:
//!
//! ```text
//! Idle ──env──▶ Idle
//!   │ ──other──▶ Idle
//!   └──exec──▶ Running ──process exits──▶ Closed
//!         │                ▲
//!         └─refused / no handler──────────┘
//! ```
//!
//! Only `exec` is answered from here. Replies to `env`, `pty-req`, `shell`
//! and `subsystem` are sent by the connection handler as each request
//! arrives, since russh tracks a single `want_reply` flag per channel and a
//! late reply would land in the slot of the next request.
//!
//! While `Running`, the multiplexer writes inbound data to the child's stdin
//! and a separate tracked task pumps the child's output back. Every path into
//! `Closed` sends exit-status, EOF and close, except when the client closed
//! the channel first.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::task::JoinHandle;

use crate::command::{clean_command, parse_command, CommandTable, ExecContext};
use crate::constants::{EXIT_STATUS_FAILURE, EXIT_STATUS_SUCCESS};
use crate::error::ChannelError;
use crate::identity::Identity;
use crate::process::{self, RunningProcess};
use crate::sink::ChannelSink;

/// A protocol request received on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequest {
    Env { name: String, value: String },
    Exec { command: Vec<u8> },
    /// `pty-req`, `shell`, `subsystem` and anything else we do not serve.
    Other { kind: &'static str },
}

/// Everything the multiplexer reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Request(ChannelRequest),
    Data(Vec<u8>),
    Eof,
    Closed,
}

/// Inbound side of a channel. `None` means the channel is gone.
pub trait ChannelSource: Send {
    fn next_event(&mut self) -> impl Future<Output = Option<ChannelEvent>> + Send;
}

/// Normalize an `env` request into a name/value pair.
///
/// NUL bytes are stripped from both fields and leading `\x04` control bytes
/// from the name. The request must then carry exactly one non-empty name and
/// one value: an `=` in the name, or a `\v` field separator anywhere, makes it
/// invalid.
pub fn decode_env(name: &str, value: &str) -> Result<(String, String), ChannelError> {
    let name: String = name.chars().filter(|c| *c != '\0').collect();
    let name = name.trim_start_matches('\x04').to_string();
    let value: String = value.chars().filter(|c| *c != '\0').collect();

    if name.is_empty() || name.contains('=') || name.contains('\x0b') || value.contains('\x0b') {
        return Err(ChannelError::InvalidEnvArgs(format!("{name}={value}")));
    }
    Ok((name, value))
}

enum ExecOutcome {
    Started(RunningProcess),
    NoHandler(String),
    Refused(ChannelError),
}

/// Drives one session channel from first request to close.
pub struct Multiplexer<S: ChannelSink> {
    identity: Identity,
    commands: Arc<CommandTable>,
    sink: S,
    env: HashMap<String, String>,
}

impl<S: ChannelSink> Multiplexer<S> {
    pub fn new(identity: Identity, commands: Arc<CommandTable>, sink: S) -> Self {
        Self {
            identity,
            commands,
            sink,
            env: HashMap::new(),
        }
    }

    /// Run until the channel closes or its command finishes.
    pub async fn run<R: ChannelSource>(mut self, mut source: R) {
        loop {
            let Some(event) = source.next_event().await else {
                tracing::debug!("channel gone while idle");
                return;
            };
            match event {
                ChannelEvent::Request(ChannelRequest::Env { name, value }) => {
                    self.handle_env(&name, &value)
                }
                ChannelEvent::Request(ChannelRequest::Exec { command }) => {
                    if let Some(process) = self.handle_exec(&command).await {
                        self.drive(process, source).await;
                    }
                    return;
                }
                ChannelEvent::Request(ChannelRequest::Other { kind }) => {
                    tracing::debug!(kind, "ignoring unsupported channel request");
                }
                ChannelEvent::Data(bytes) => {
                    tracing::trace!(len = bytes.len(), "discarding data received before exec");
                }
                ChannelEvent::Eof => tracing::trace!("client eof before exec"),
                ChannelEvent::Closed => {
                    tracing::debug!("channel closed while idle");
                    return;
                }
            }
        }
    }

    fn handle_env(&mut self, name: &str, value: &str) {
        match decode_env(name, value) {
            Ok((name, value)) => {
                tracing::debug!(name = %name, value = %value, "env request");
                self.env.insert(name, value);
            }
            Err(e) => tracing::warn!(error = %e, "env request skipped"),
        }
    }

    /// Parse, authorize and start. Returns the process when one is running.
    async fn handle_exec(&mut self, payload: &[u8]) -> Option<RunningProcess> {
        match self.prepare_exec(payload) {
            ExecOutcome::Started(process) => {
                self.reply(true).await;
                Some(process)
            }
            ExecOutcome::NoHandler(command) => {
                tracing::info!(command = %command, "no handler for command, nothing to run");
                self.reply(true).await;
                self.finish(EXIT_STATUS_SUCCESS).await;
                None
            }
            ExecOutcome::Refused(e) => {
                match &e {
                    ChannelError::Command(cmd) => {
                        tracing::warn!(kind = cmd.kind, error = %cmd, "command refused")
                    }
                    other => tracing::error!(error = %other, "command failed to start"),
                }
                self.reply(false).await;
                self.finish(EXIT_STATUS_FAILURE).await;
                None
            }
        }
    }

    fn prepare_exec(&self, payload: &[u8]) -> ExecOutcome {
        let text = String::from_utf8_lossy(payload);
        let cleaned = clean_command(&text);
        let Some(invocation) = parse_command(cleaned) else {
            return ExecOutcome::NoHandler(cleaned.to_string());
        };
        let Some(handler) = self.commands.get(&invocation.command) else {
            return ExecOutcome::NoHandler(invocation.command);
        };

        tracing::info!(
            identity = %self.identity,
            command = %invocation.command,
            args = %invocation.args,
            "exec request"
        );
        let ctx = ExecContext {
            identity: &self.identity,
            raw_command: cleaned,
            args: &invocation.args,
            env: &self.env,
        };
        let spec = match handler.prepare(ctx) {
            Ok(spec) => spec,
            Err(e) => return ExecOutcome::Refused(e.into()),
        };
        match process::spawn(&spec) {
            Ok(process) => ExecOutcome::Started(process),
            Err(e) => ExecOutcome::Refused(e),
        }
    }

    /// Pipe a running process until it exits or the client goes away.
    async fn drive<R: ChannelSource>(self, process: RunningProcess, mut source: R) {
        let (stdin, output) = process.split();
        let mut stdin: Option<ChildStdin> = Some(stdin);
        let mut pump: JoinHandle<u32> = tokio::spawn(process::pump_output(self.sink.clone(), output));

        loop {
            tokio::select! {
                joined = &mut pump => {
                    let status = match joined {
                        Ok(status) => status,
                        Err(e) => {
                            tracing::error!(error = %e, "output task failed");
                            EXIT_STATUS_FAILURE
                        }
                    };
                    self.finish(status).await;
                    return;
                }
                event = source.next_event() => match event {
                    Some(ChannelEvent::Data(bytes)) => {
                        let failed = match stdin.as_mut() {
                            Some(writer) => writer.write_all(&bytes).await.err(),
                            None => None,
                        };
                        if let Some(e) = failed {
                            tracing::debug!(error = %e, "process stdin closed");
                            stdin = None;
                        }
                    }
                    Some(ChannelEvent::Eof) => {
                        tracing::trace!("client eof, closing process stdin");
                        stdin = None;
                    }
                    Some(ChannelEvent::Request(ChannelRequest::Exec { .. })) => {
                        tracing::warn!(error = %ChannelError::AlreadyExecuted, "second exec refused");
                        self.reply(false).await;
                    }
                    Some(ChannelEvent::Request(ChannelRequest::Env { .. })) => {
                        tracing::debug!("env request after exec has no effect");
                    }
                    Some(ChannelEvent::Request(ChannelRequest::Other { kind })) => {
                        tracing::debug!(kind, "ignoring unsupported channel request");
                    }
                    Some(ChannelEvent::Closed) | None => {
                        tracing::info!("channel closed before command finished, stopping process");
                        // Dropping the child inside the aborted task kills it.
                        pump.abort();
                        return;
                    }
                }
            }
        }
    }

    /// Answer an `exec`. The sink drops the reply if the client did not ask.
    async fn reply(&self, ok: bool) {
        let sent = if ok {
            self.sink.success().await
        } else {
            self.sink.failure().await
        };
        if sent.is_err() {
            tracing::debug!("could not reply, channel already gone");
        }
    }

    /// Send exit-status, then EOF, then close.
    async fn finish(&self, status: u32) {
        if self.sink.exit_status(status).await.is_err() {
            tracing::debug!(status, "could not send exit status");
        }
        let _ = self.sink.eof().await;
        let _ = self.sink.close().await;
    }
}
