//! The terminal `WorkflowUi`: every prompt is a blocking `dialoguer`
//! widget, run on a blocking task so it doesn't stall the async runtime.
//! A countdown confirmation races the prompt against a timer and falls
//! back to the caller's default if nobody answers in time.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use proxsave_cmd::RunContext;
use proxsave_core::error::{UserAbortReason, UserAbortedError};
use proxsave_restore::ui::{PathDecision, WorkflowUi};

pub struct TerminalUi;

impl TerminalUi {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TerminalUi {
    fn default() -> Self {
        Self::new()
    }
}

fn aborted_if_cancelled(ctx: &RunContext) -> Result<(), UserAbortedError> {
    if ctx.is_cancelled() {
        return Err(UserAbortedError::new(UserAbortReason::ContextDone));
    }
    Ok(())
}

async fn run_blocking<F, T>(f: F) -> Result<T, UserAbortedError>
where
    F: FnOnce() -> dialoguer::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) | Err(_) => Err(UserAbortedError::new(UserAbortReason::Cancelled)),
    }
}

#[async_trait]
impl WorkflowUi for TerminalUi {
    async fn select_backup_source(&self, ctx: &RunContext, options: &[String]) -> Result<usize, UserAbortedError> {
        aborted_if_cancelled(ctx)?;
        let options = options.to_vec();
        run_blocking(move || dialoguer::Select::new().with_prompt("Backup source").items(&options).default(0).interact()).await
    }

    async fn select_backup_candidate(&self, ctx: &RunContext, candidates: &[String]) -> Result<usize, UserAbortedError> {
        aborted_if_cancelled(ctx)?;
        let candidates = candidates.to_vec();
        run_blocking(move || dialoguer::Select::new().with_prompt("Backup candidate").items(&candidates).default(0).interact()).await
    }

    async fn prompt_destination_dir(&self, ctx: &RunContext, default: &Path) -> Result<PathBuf, UserAbortedError> {
        aborted_if_cancelled(ctx)?;
        let default_str = default.display().to_string();
        let answer: String = run_blocking(move || {
            dialoguer::Input::new().with_prompt("Destination directory").with_initial_text(&default_str).default(default_str.clone()).interact_text()
        })
        .await?;
        Ok(PathBuf::from(answer))
    }

    async fn resolve_existing_path(
        &self,
        ctx: &RunContext,
        path: &Path,
        description: &str,
        previous_failure: Option<&str>,
    ) -> Result<PathDecision, UserAbortedError> {
        aborted_if_cancelled(ctx)?;
        if let Some(failure) = previous_failure {
            eprintln!("{failure}");
        }
        let prompt = format!("{description} already exists at {}. Overwrite, choose a new path, or cancel?", path.display());
        let items = vec!["Overwrite".to_string(), "Choose a new path".to_string(), "Cancel".to_string()];
        let choice = run_blocking(move || dialoguer::Select::new().with_prompt(prompt).items(&items).default(2).interact()).await?;
        match choice {
            0 => Ok(PathDecision::Overwrite),
            1 => {
                let answer: String = run_blocking(|| dialoguer::Input::new().with_prompt("New path").interact_text()).await?;
                Ok(PathDecision::New(PathBuf::from(answer)))
            }
            _ => Ok(PathDecision::Cancel),
        }
    }

    async fn prompt_decrypt_secret(&self, ctx: &RunContext, display_name: &str, previous_error: Option<&str>) -> Result<String, UserAbortedError> {
        aborted_if_cancelled(ctx)?;
        if let Some(err) = previous_error {
            eprintln!("{err}");
        }
        let prompt = format!("Passphrase or identity for {display_name}");
        run_blocking(move || dialoguer::Password::new().with_prompt(prompt).interact()).await
    }

    async fn confirm_action(
        &self,
        ctx: &RunContext,
        title: &str,
        message: &str,
        ok_label: &str,
        cancel_label: &str,
        timeout: Duration,
        default_ok: bool,
    ) -> Result<bool, UserAbortedError> {
        aborted_if_cancelled(ctx)?;
        println!("{title}\n{message}");
        let prompt = format!("{ok_label} / {cancel_label} (defaults to {} after {}s)", if default_ok { ok_label } else { cancel_label }, timeout.as_secs());
        let handle = tokio::task::spawn_blocking(move || dialoguer::Confirm::new().with_prompt(prompt).default(default_ok).interact());

        tokio::select! {
            result = handle => match result {
                Ok(Ok(value)) => Ok(value),
                _ => Ok(default_ok),
            },
            _ = tokio::time::sleep(timeout) => {
                println!("(timed out, defaulting to {})", if default_ok { ok_label } else { cancel_label });
                Ok(default_ok)
            }
        }
    }

    fn show_message(&self, message: &str) {
        println!("{message}");
    }

    fn show_error(&self, message: &str) {
        eprintln!("error: {message}");
    }

    async fn run_task(
        &self,
        title: &str,
        initial_message: &str,
        mut progress_rx: tokio::sync::mpsc::UnboundedReceiver<String>,
        task: tokio::task::JoinHandle<anyhow::Result<()>>,
    ) -> anyhow::Result<()> {
        println!("{title}: {initial_message}");
        while let Some(line) = progress_rx.recv().await {
            println!("  {line}");
        }
        task.await?
    }
}
