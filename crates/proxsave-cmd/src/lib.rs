//! The only escape hatch to the host: every decompressor, external apply
//! tool, and remote-object-store client invocation goes through here.
//! Built on `tokio::process::Command`'s `Command::new(...).output()`
//! pattern, generalized to async cancellation and streaming.

pub mod fake;
pub mod policy;
pub mod real;

use std::collections::HashMap;
use std::time::Duration;

pub use policy::RedactionPolicy;

use async_trait::async_trait;
use tokio::io::AsyncRead;

/// A single external-process invocation's inputs, independent of how it is
/// eventually run. `redaction` never reaches subprocess argv; it only
/// governs what `tracing` sees.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub name: String,
    pub args: Vec<String>,
    pub redaction: RedactionPolicy,
    pub env: HashMap<String, String>,
}

impl Invocation {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
            redaction: RedactionPolicy::none(),
            env: HashMap::new(),
        }
    }

    pub fn with_redaction(mut self, redaction: RedactionPolicy) -> Self {
        self.redaction = redaction;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Cancellation handle plus the grace period `run`/`run_stream` honor
/// before escalating from a terminate signal to a hard kill").
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel: tokio_util::sync::CancellationToken,
    grace: Duration,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            cancel: tokio_util::sync::CancellationToken::new(),
            grace: Duration::from_secs(5),
        }
    }

    pub fn with_grace(grace: Duration) -> Self {
        Self {
            cancel: tokio_util::sync::CancellationToken::new(),
            grace,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            grace: self.grace,
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Combined stdout+stderr plus the process exit status.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub bytes: Vec<u8>,
    pub exit_code: Option<i32>,
    pub success: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("command not found: {0}")]
    NotFound(String),
    #[error("command timed out after grace period: {0}")]
    TimedOut(String),
    #[error("command cancelled: {0}")]
    Cancelled(String),
    #[error("command failed: {name} (exit {exit_code:?}): {stderr_tail}")]
    NonZeroExit {
        name: String,
        exit_code: Option<i32>,
        stderr_tail: String,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Abstraction over process execution. A single process-wide
/// handle is normally injected (`real::RealRunner`); tests inject a fake
/// that records invocations without touching the host.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, ctx: &RunContext, invocation: &Invocation) -> Result<RunOutput, RunError>;

    async fn run_stream(
        &self,
        ctx: &RunContext,
        invocation: &Invocation,
        stdin: Option<Vec<u8>>,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, RunError>;
}
