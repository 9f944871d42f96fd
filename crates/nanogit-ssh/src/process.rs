//! Subprocess lifecycle for authorized commands.
//!
//! [`spawn`] starts a [`CommandSpec`] with all three standard streams piped.
//! The returned [`RunningProcess`] is split by the channel task: it keeps the
//! stdin half and hands the output half to [`pump_output`], which runs as its
//! own task.

use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::command::CommandSpec;
use crate::constants::{EXIT_STATUS_FAILURE, PIPE_BUFFER_SIZE};
use crate::error::ChannelError;
use crate::sink::ChannelSink;

/// A started subprocess with its three pipes.
#[derive(Debug)]
pub struct RunningProcess {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// The half of a process that produces output.
#[derive(Debug)]
pub struct ProcessOutput {
    pub child: Child,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

impl RunningProcess {
    pub fn split(self) -> (ChildStdin, ProcessOutput) {
        let RunningProcess {
            child,
            stdin,
            stdout,
            stderr,
        } = self;
        (
            stdin,
            ProcessOutput {
                child,
                stdout,
                stderr,
            },
        )
    }
}

/// Start `spec` with piped stdio.
///
/// Never goes through a shell. The child is killed if it is dropped, so a
/// failed pipe acquisition after spawn leaves nothing behind.
pub fn spawn(spec: &CommandSpec) -> Result<RunningProcess, ChannelError> {
    let program = spec.program.display().to_string();
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| ChannelError::Spawn {
        program: program.clone(),
        reason: e.to_string(),
    })?;

    let missing = |stream: &str| ChannelError::Spawn {
        program: program.clone(),
        reason: format!("{stream} pipe unavailable"),
    };
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

    tracing::debug!(program = %program, pid = ?child.id(), "process started");
    Ok(RunningProcess {
        child,
        stdin,
        stdout,
        stderr,
    })
}

/// Copy stdout to the channel, then stderr to the stderr stream, then reap.
///
/// Output is drained completely before stderr is read; git transport
/// commands do not depend on the two being interleaved. Returns the exit
/// status to report upstream.
pub async fn pump_output<S: ChannelSink>(sink: S, output: ProcessOutput) -> u32 {
    let ProcessOutput {
        mut child,
        stdout,
        stderr,
    } = output;

    if let Err(e) = copy_to_sink(stdout, &sink, false).await {
        tracing::debug!(error = %e, "stdout copy stopped early");
    }
    if let Err(e) = copy_to_sink(stderr, &sink, true).await {
        tracing::debug!(error = %e, "stderr copy stopped early");
    }

    match child.wait().await {
        Ok(status) => {
            let code = exit_code(status);
            tracing::debug!(exit_code = code, "process exited");
            code
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to reap process");
            EXIT_STATUS_FAILURE
        }
    }
}

async fn copy_to_sink<R, S>(mut reader: R, sink: &S, stderr: bool) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    S: ChannelSink,
{
    let mut buf = vec![0u8; PIPE_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        let sent = if stderr {
            sink.stderr(&buf[..n]).await
        } else {
            sink.data(&buf[..n]).await
        };
        if sent.is_err() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "channel closed while sending output",
            ));
        }
        total += n as u64;
    }
}

/// Map a process exit status onto the SSH `exit-status` value.
///
/// Signal-terminated processes report `128 + signal`, like a shell would.
pub fn exit_code(status: ExitStatus) -> u32 {
    if let Some(code) = status.code() {
        return u32::try_from(code).unwrap_or(EXIT_STATUS_FAILURE);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal as u32;
        }
    }
    EXIT_STATUS_FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::testing::RecordingSink;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn spawn_missing_program_is_spawn_error() {
        let spec = CommandSpec::new("/nonexistent/nanogit-test-binary");
        match spawn(&spec) {
            Err(ChannelError::Spawn { program, .. }) => {
                assert_eq!(program, "/nonexistent/nanogit-test-binary")
            }
            other => panic!("expected spawn error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pump_sends_stdout_before_stderr() {
        let spec = CommandSpec::new("sh")
            .arg("-c")
            .arg("echo err >&2; cat; exit 3");
        let (mut stdin, output) = spawn(&spec).unwrap().split();
        stdin.write_all(b"hello").await.unwrap();
        drop(stdin);

        let sink = RecordingSink::default();
        let code = pump_output(sink.clone(), output).await;
        assert_eq!(code, 3);
        assert_eq!(sink.stdout(), b"hello");
        assert_eq!(sink.stderr_bytes(), b"err\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spec_env_reaches_process() {
        let spec = CommandSpec::new("sh")
            .arg("-c")
            .arg("printf %s \"$GIT_PROTOCOL\"")
            .env("GIT_PROTOCOL", "version=2");
        let (stdin, output) = spawn(&spec).unwrap().split();
        drop(stdin);

        let sink = RecordingSink::default();
        assert_eq!(pump_output(sink.clone(), output).await, 0);
        assert_eq!(sink.stdout(), b"version=2");
    }

    #[cfg(unix)]
    #[test]
    fn exit_code_maps_signals() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(ExitStatus::from_raw(2 << 8)), 2);
        // Raw wait status 9 == killed by SIGKILL.
        assert_eq!(exit_code(ExitStatus::from_raw(9)), 137);
    }
}
