//! A fake command runner used by tests: records invocations instead of
//! touching the host, and returns scripted responses keyed by command
//! name.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::{CommandRunner, Invocation, RunContext, RunError, RunOutput};

#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub output: Result<RunOutput, FakeRunError>,
}

#[derive(Debug, Clone)]
pub enum FakeRunError {
    NotFound,
    NonZeroExit { exit_code: Option<i32>, stderr_tail: String },
}

impl From<FakeRunError> for RunError {
    fn from(value: FakeRunError) -> Self {
        match value {
            FakeRunError::NotFound => RunError::NotFound("fake".to_string()),
            FakeRunError::NonZeroExit { exit_code, stderr_tail } => RunError::NonZeroExit {
                name: "fake".to_string(),
                exit_code,
                stderr_tail,
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeRunner {
    responses: Mutex<std::collections::HashMap<String, VecDeque<ScriptedResponse>>>,
    calls: Mutex<Vec<Invocation>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, command: impl Into<String>, response: ScriptedResponse) {
        self.responses
            .lock()
            .unwrap()
            .entry(command.into())
            .or_default()
            .push_back(response);
    }

    pub fn script_success(&self, command: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.script(
            command,
            ScriptedResponse {
                output: Ok(RunOutput {
                    bytes: bytes.into(),
                    exit_code: Some(0),
                    success: true,
                }),
            },
        );
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, _ctx: &RunContext, invocation: &Invocation) -> Result<RunOutput, RunError> {
        self.calls.lock().unwrap().push(invocation.clone());

        let mut responses = self.responses.lock().unwrap();
        let queue = responses
            .get_mut(&invocation.name)
            .ok_or_else(|| RunError::NotFound(invocation.name.clone()))?;
        let scripted = queue
            .pop_front()
            .ok_or_else(|| RunError::NotFound(invocation.name.clone()))?;
        scripted.output.map_err(Into::into)
    }

    async fn run_stream(
        &self,
        ctx: &RunContext,
        invocation: &Invocation,
        _stdin: Option<Vec<u8>>,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, RunError> {
        let output = self.run(ctx, invocation).await?;
        Ok(Box::new(std::io::Cursor::new(output.bytes)))
    }
}
