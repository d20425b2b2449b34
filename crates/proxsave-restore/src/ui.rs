//! The executor's only dependency on an interactive frontend. Every
//! prompt takes the ambient `RunContext` and must return
//! `UserAbortedError` rather than silently defaulting when the context is
//! cancelled or a timeout elapses; a timeout counts as "No/cancel".
//!
//! `proxsave-cli` supplies the terminal implementation; `FakeUi` below is
//! a scripted stand-in for tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use proxsave_cmd::RunContext;
use proxsave_core::error::{UserAbortReason, UserAbortedError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathDecision {
    Overwrite,
    New(PathBuf),
    Cancel,
}

/// A cloneable handle a background task uses to post progress lines; the
/// UI side drains the paired receiver while the task runs.
#[derive(Clone)]
pub struct ProgressReporter(tokio::sync::mpsc::UnboundedSender<String>);

impl ProgressReporter {
    pub fn report(&self, message: impl Into<String>) {
        let _ = self.0.send(message.into());
    }
}

pub fn progress_channel() -> (ProgressReporter, tokio::sync::mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    (ProgressReporter(tx), rx)
}

#[async_trait]
pub trait WorkflowUi: Send + Sync {
    async fn select_backup_source(&self, ctx: &RunContext, options: &[String]) -> Result<usize, UserAbortedError>;

    async fn select_backup_candidate(&self, ctx: &RunContext, candidates: &[String]) -> Result<usize, UserAbortedError>;

    async fn prompt_destination_dir(&self, ctx: &RunContext, default: &Path) -> Result<PathBuf, UserAbortedError>;

    async fn resolve_existing_path(
        &self,
        ctx: &RunContext,
        path: &Path,
        description: &str,
        previous_failure: Option<&str>,
    ) -> Result<PathDecision, UserAbortedError>;

    async fn prompt_decrypt_secret(
        &self,
        ctx: &RunContext,
        display_name: &str,
        previous_error: Option<&str>,
    ) -> Result<String, UserAbortedError>;

    #[allow(clippy::too_many_arguments)]
    async fn confirm_action(
        &self,
        ctx: &RunContext,
        title: &str,
        message: &str,
        ok_label: &str,
        cancel_label: &str,
        timeout: Duration,
        default_ok: bool,
    ) -> Result<bool, UserAbortedError>;

    fn show_message(&self, message: &str);
    fn show_error(&self, message: &str);

    /// Drives a progress display while `task` runs to completion in the
    /// background; exits once `task` resolves. `progress_rx` is the
    /// receiving half of a channel whose `ProgressReporter` the caller
    /// already handed to the spawned task.
    async fn run_task(
        &self,
        title: &str,
        initial_message: &str,
        progress_rx: tokio::sync::mpsc::UnboundedReceiver<String>,
        task: tokio::task::JoinHandle<anyhow::Result<()>>,
    ) -> anyhow::Result<()>;
}

fn aborted_if_cancelled(ctx: &RunContext) -> Result<(), UserAbortedError> {
    if ctx.is_cancelled() {
        return Err(UserAbortedError::new(UserAbortReason::ContextDone));
    }
    Ok(())
}

/// A scripted `WorkflowUi` for tests: every prompt pulls its next answer
/// off a fixed queue (or an abort if the queue runs dry / ctx is already
/// cancelled).
#[derive(Default)]
pub struct FakeUi {
    indices: std::sync::Mutex<std::collections::VecDeque<usize>>,
    paths: std::sync::Mutex<std::collections::VecDeque<PathBuf>>,
    decisions: std::sync::Mutex<std::collections::VecDeque<PathDecision>>,
    secrets: std::sync::Mutex<std::collections::VecDeque<String>>,
    confirms: std::sync::Mutex<std::collections::VecDeque<bool>>,
    pub messages: std::sync::Mutex<Vec<String>>,
    pub errors: std::sync::Mutex<Vec<String>>,
}

impl FakeUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_index(&self, idx: usize) -> &Self {
        self.indices.lock().unwrap().push_back(idx);
        self
    }

    pub fn push_path(&self, path: impl Into<PathBuf>) -> &Self {
        self.paths.lock().unwrap().push_back(path.into());
        self
    }

    pub fn push_decision(&self, decision: PathDecision) -> &Self {
        self.decisions.lock().unwrap().push_back(decision);
        self
    }

    pub fn push_secret(&self, secret: impl Into<String>) -> &Self {
        self.secrets.lock().unwrap().push_back(secret.into());
        self
    }

    pub fn push_confirm(&self, ok: bool) -> &Self {
        self.confirms.lock().unwrap().push_back(ok);
        self
    }
}

#[async_trait]
impl WorkflowUi for FakeUi {
    async fn select_backup_source(&self, ctx: &RunContext, _options: &[String]) -> Result<usize, UserAbortedError> {
        aborted_if_cancelled(ctx)?;
        self.indices
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| UserAbortedError::new(UserAbortReason::Cancelled))
    }

    async fn select_backup_candidate(&self, ctx: &RunContext, _candidates: &[String]) -> Result<usize, UserAbortedError> {
        aborted_if_cancelled(ctx)?;
        self.indices
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| UserAbortedError::new(UserAbortReason::Cancelled))
    }

    async fn prompt_destination_dir(&self, ctx: &RunContext, default: &Path) -> Result<PathBuf, UserAbortedError> {
        aborted_if_cancelled(ctx)?;
        Ok(self.paths.lock().unwrap().pop_front().unwrap_or_else(|| default.to_path_buf()))
    }

    async fn resolve_existing_path(
        &self,
        ctx: &RunContext,
        _path: &Path,
        _description: &str,
        _previous_failure: Option<&str>,
    ) -> Result<PathDecision, UserAbortedError> {
        aborted_if_cancelled(ctx)?;
        Ok(self.decisions.lock().unwrap().pop_front().unwrap_or(PathDecision::Cancel))
    }

    async fn prompt_decrypt_secret(
        &self,
        ctx: &RunContext,
        _display_name: &str,
        _previous_error: Option<&str>,
    ) -> Result<String, UserAbortedError> {
        aborted_if_cancelled(ctx)?;
        self.secrets
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| UserAbortedError::new(UserAbortReason::Cancelled))
    }

    async fn confirm_action(
        &self,
        ctx: &RunContext,
        _title: &str,
        _message: &str,
        _ok_label: &str,
        _cancel_label: &str,
        _timeout: Duration,
        default_ok: bool,
    ) -> Result<bool, UserAbortedError> {
        aborted_if_cancelled(ctx)?;
        Ok(self.confirms.lock().unwrap().pop_front().unwrap_or(default_ok))
    }

    fn show_message(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }

    fn show_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }

    async fn run_task(
        &self,
        _title: &str,
        _initial_message: &str,
        mut progress_rx: tokio::sync::mpsc::UnboundedReceiver<String>,
        task: tokio::task::JoinHandle<anyhow::Result<()>>,
    ) -> anyhow::Result<()> {
        // Drain progress silently; tests only care about the final result.
        while progress_rx.recv().await.is_some() {}
        task.await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_ui_replays_scripted_answers_in_order() {
        let ui = FakeUi::new();
        ui.push_index(1).push_index(0);
        let ctx = RunContext::new();

        assert_eq!(ui.select_backup_source(&ctx, &[]).await.unwrap(), 1);
        assert_eq!(ui.select_backup_candidate(&ctx, &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_queue_surfaces_as_user_aborted() {
        let ui = FakeUi::new();
        let ctx = RunContext::new();
        let err = ui.select_backup_source(&ctx, &[]).await.unwrap_err();
        assert_eq!(err.reason, UserAbortReason::Cancelled);
    }

    #[tokio::test]
    async fn cancelled_context_always_aborts_regardless_of_queue() {
        let ui = FakeUi::new();
        ui.push_confirm(true);
        let ctx = RunContext::new();
        ctx.cancel();
        let err = ui.confirm_action(&ctx, "t", "m", "ok", "no", Duration::from_secs(1), true)
            .await
            .unwrap_err();
        assert_eq!(err.reason, UserAbortReason::ContextDone);
    }

    #[tokio::test]
    async fn run_task_returns_the_spawned_tasks_result() {
        let ui = FakeUi::new();
        let (reporter, rx) = progress_channel();
        let handle = tokio::spawn(async move {
            reporter.report("working");
            Ok(())
        });
        ui.run_task("title", "starting", rx, handle).await.unwrap();
    }
}
