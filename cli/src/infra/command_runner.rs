//! Infrastructure implementation of the `CommandRunner` port.
//!
//! `TokioCommandRunner` is the production implementation that uses tokio
//! for async process execution with guaranteed timeout and kill.

use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;

use crate::application::ports::CommandRunner;

/// Default timeout for local helper commands (`ssh-keygen`, `oci`, ...).
pub const DEFAULT_CMD_TIMEOUT: Duration = Duration::from_secs(30);

/// Production `CommandRunner`.
///
/// A child that outlives its deadline is killed before the error is
/// returned.
pub struct TokioCommandRunner {
    timeout: Duration,
}

impl TokioCommandRunner {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run with the terminal attached (stdin/stdout/stderr inherited) and
    /// no timeout. Used for interactive sessions.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned.
    pub async fn run_interactive(&self, program: &str, args: &[&str]) -> Result<ExitStatus> {
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;
        child
            .wait()
            .await
            .with_context(|| format!("waiting for {program}"))
    }

    async fn execute(
        &self,
        program: &str,
        args: &[&str],
        input: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<Output> {
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;

        let stdin_pipe = child.stdin.take();
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let collect = async {
            let (status, (), stdout, stderr) = tokio::join!(
                child.wait(),
                feed(stdin_pipe, input),
                drain(stdout_pipe),
                drain(stderr_pipe),
            );
            Ok::<_, anyhow::Error>(Output {
                status: status.with_context(|| format!("waiting for {program}"))?,
                stdout,
                stderr,
            })
        };

        let outcome = tokio::time::timeout(timeout, collect).await;
        if let Ok(output) = outcome {
            return output;
        }
        let _ = child.kill().await;
        anyhow::bail!("{program} timed out after {}s", timeout.as_secs())
    }
}

/// Write `input` to the child's stdin and close it. A child that exits early
/// closes the pipe; its exit status reports the failure.
async fn feed(pipe: Option<ChildStdin>, input: Option<&[u8]>) {
    if let (Some(mut stdin), Some(bytes)) = (pipe, input) {
        let _ = stdin.write_all(bytes).await;
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = pipe {
        let _ = reader.read_to_end(&mut buf).await;
    }
    buf
}

impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        self.run_with_timeout(program, args, self.timeout).await
    }

    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Output> {
        self.execute(program, args, None, timeout).await
    }

    async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin: &[u8],
        timeout: Duration,
    ) -> Result<Output> {
        self.execute(program, args, Some(stdin), timeout).await
    }
}
