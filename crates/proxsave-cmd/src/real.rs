//! Real process execution via `tokio::process::Command`, lifted to
//! async with cancellation and a streaming variant.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{Child, Command};

use crate::{CommandRunner, Invocation, RunContext, RunError, RunOutput};

const STDERR_TAIL_LIMIT: usize = 4096;

#[derive(Debug, Default, Clone, Copy)]
pub struct RealRunner;

impl RealRunner {
    pub fn new() -> Self {
        Self
    }

    fn build(invocation: &Invocation) -> Command {
        let mut cmd = Command::new(&invocation.name);
        cmd.args(&invocation.args);
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }

    fn spawn(invocation: &Invocation) -> Result<Child, RunError> {
        Self::build(invocation).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RunError::NotFound(invocation.name.clone())
            } else {
                RunError::Io(e)
            }
        })
    }
}

/// Wait for `child` to exit, reacting to `ctx` cancellation by sending
/// SIGTERM and escalating to a hard kill once the grace period elapses.
async fn wait_with_cancellation(
    mut child: Child,
    ctx: &RunContext,
    name: &str,
) -> Result<std::process::ExitStatus, RunError> {
    tokio::select! {
        status = child.wait() => Ok(status?),
        _ = ctx.cancel.cancelled() => {
            terminate(&mut child);
            match tokio::time::timeout(ctx.grace, child.wait()).await {
                Ok(status) => {
                    let _ = status?;
                    Err(RunError::Cancelled(name.to_string()))
                }
                Err(_) => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    Err(RunError::TimedOut(name.to_string()))
                }
            }
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.len() > STDERR_TAIL_LIMIT {
        trimmed[trimmed.len() - STDERR_TAIL_LIMIT..].to_string()
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl CommandRunner for RealRunner {
    async fn run(&self, ctx: &RunContext, invocation: &Invocation) -> Result<RunOutput, RunError> {
        tracing::debug!(cmd = %ctx_log(invocation), "running command");

        let mut child = Self::spawn(invocation)?;
        let mut stdout = child.stdout.take().expect("piped stdout");
        let mut stderr = child.stderr.take().expect("piped stderr");
        drop(child.stdin.take());

        let name = invocation.name.clone();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            use tokio::io::AsyncReadExt as _;
            let _ = stdout.read_to_end(&mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            use tokio::io::AsyncReadExt as _;
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        let status = wait_with_cancellation(child, ctx, &name).await?;

        let mut combined = stdout_task.await.unwrap_or_default();
        let stderr_bytes = stderr_task.await.unwrap_or_default();
        combined.extend_from_slice(&stderr_bytes);

        if !status.success() {
            return Err(RunError::NonZeroExit {
                name,
                exit_code: status.code(),
                stderr_tail: stderr_tail(&stderr_bytes),
            });
        }

        Ok(RunOutput {
            bytes: combined,
            exit_code: status.code(),
            success: true,
        })
    }

    async fn run_stream(
        &self,
        ctx: &RunContext,
        invocation: &Invocation,
        stdin: Option<Vec<u8>>,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, RunError> {
        tracing::debug!(cmd = %ctx_log(invocation), "streaming command");

        let mut child = Self::spawn(invocation)?;
        let stdout = child.stdout.take().expect("piped stdout");
        let mut child_stdin = child.stdin.take();

        if let Some(data) = stdin {
            if let Some(mut sink) = child_stdin.take() {
                tokio::spawn(async move {
                    let _ = sink.write_all(&data).await;
                    let _ = sink.shutdown().await;
                });
            }
        } else {
            drop(child_stdin.take());
        }

        let ctx = ctx.clone();
        let name = invocation.name.clone();
        tokio::spawn(async move {
            let _ = wait_with_cancellation(child, &ctx, &name).await;
        });

        Ok(Box::new(stdout))
    }
}

fn ctx_log(invocation: &Invocation) -> String {
    invocation.redaction.format_for_log(&invocation.name, &invocation.args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Invocation;

    #[tokio::test]
    async fn run_captures_combined_stdout_and_exit_status() {
        let runner = RealRunner::new();
        let ctx = RunContext::new();
        let invocation = Invocation::new("sh", vec!["-c".into(), "echo hello".into()]);

        let out = runner.run(&ctx, &invocation).await.unwrap();
        assert!(out.success);
        assert_eq!(String::from_utf8_lossy(&out.bytes).trim(), "hello");
    }

    #[tokio::test]
    async fn run_reports_non_zero_exit_with_stderr_tail() {
        let runner = RealRunner::new();
        let ctx = RunContext::new();
        let invocation = Invocation::new(
            "sh",
            vec!["-c".into(), "echo boom 1>&2; exit 3".into()],
        );

        let err = runner.run(&ctx, &invocation).await.unwrap_err();
        match err {
            RunError::NonZeroExit { exit_code, stderr_tail,.. } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr_tail, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_reports_not_found_for_missing_binary() {
        let runner = RealRunner::new();
        let ctx = RunContext::new();
        let invocation = Invocation::new("proxsave-definitely-missing-binary", vec![]);

        let err = runner.run(&ctx, &invocation).await.unwrap_err();
        assert!(matches!(err, RunError::NotFound(_)));
    }

    #[tokio::test]
    async fn run_stream_delivers_stdout_incrementally() {
        let runner = RealRunner::new();
        let ctx = RunContext::new();
        let invocation = Invocation::new("sh", vec!["-c".into(), "cat".into()]);

        let mut stream = runner
            .run_stream(&ctx, &invocation, Some(b"streamed-data".to_vec()))
            .await
            .unwrap();

        use tokio::io::AsyncReadExt as _;
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"streamed-data");
    }
}
