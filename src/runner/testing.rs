//! Scripted stand-ins for the LLM and the script runtime.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::codegen::ScriptRuntime;
use super::error::{Result, TaskError};
use super::HandlerContext;
use crate::shared::inference::{self, CompletionRequest, InferenceError, LanguageModel};
use crate::shared::process::ProcessRunner;
use crate::shared::Workspace;

/// Handler context rooted at `dir` with a public prefix of `/data/`.
pub fn context(dir: &Path, model: Arc<ScriptedModel>) -> HandlerContext {
    HandlerContext {
        workspace: Workspace::new(dir),
        model,
        http: reqwest::Client::new(),
        processes: ProcessRunner::new(Duration::from_secs(10)),
        public_prefix: "/data/".to_string(),
    }
}

pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
    failing: bool,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
            failing: false,
        })
    }

    /// Every call fails with a timeout.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            failing: true,
        })
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> inference::Result<String> {
        self.requests.lock().unwrap().push(request);
        if self.failing {
            return Err(InferenceError::Timeout);
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| InferenceError::Malformed("no scripted reply left".to_string()))
    }

    async fn transcribe(&self, file_name: &str, audio: Vec<u8>) -> inference::Result<String> {
        if self.failing {
            return Err(InferenceError::Timeout);
        }
        Ok(format!("transcript of {file_name} ({} bytes)", audio.len()))
    }
}

/// Rejects chosen sources at check time and replays queued exit codes, writing
/// the queued text into the output file the way a real run would.
pub struct ScriptedRuntime {
    rejected: Mutex<HashMap<String, String>>,
    exits: Mutex<VecDeque<(i32, String)>>,
    executions: Mutex<usize>,
}

impl ScriptedRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rejected: Mutex::new(HashMap::new()),
            exits: Mutex::new(VecDeque::new()),
            executions: Mutex::new(0),
        })
    }

    pub fn reject_source(&self, source: &str, error: &str) {
        self.rejected
            .lock()
            .unwrap()
            .insert(source.to_string(), error.to_string());
    }

    pub fn push_exit(&self, code: i32, output: &str) {
        self.exits.lock().unwrap().push_back((code, output.to_string()));
    }

    pub fn executions(&self) -> usize {
        *self.executions.lock().unwrap()
    }
}

#[async_trait]
impl ScriptRuntime for ScriptedRuntime {
    async fn check(&self, source: &str, _cwd: &Path) -> Result<()> {
        match self.rejected.lock().unwrap().get(source) {
            Some(error) => Err(TaskError::Validation(error.clone())),
            None => Ok(()),
        }
    }

    async fn execute(&self, _script: &Path, output: &Path, _cwd: &Path) -> Result<i32> {
        *self.executions.lock().unwrap() += 1;
        let (code, text) = self
            .exits
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((0, String::new()));
        std::fs::write(output, text)?;
        Ok(code)
    }
}

/// Creates a SQLite database at `path` and runs `statements` against it.
pub async fn sqlite_fixture(path: &Path, statements: &[&str]) {
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    for statement in statements {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }
    pool.close().await;
}

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn serve(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}
