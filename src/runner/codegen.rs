use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::error::{Result, TaskError};
use super::params::to_workspace_relative;
use crate::shared::inference::{strip_code_fence, ChatMessage, CompletionRequest, LanguageModel};
use crate::shared::process::{args, ProcessRunner};
use crate::shared::Workspace;

pub const MAX_ATTEMPTS: usize = 3;
pub const SCRIPT_FILE: &str = "llm_task.py";
pub const DEFAULT_OUTPUT_FILE: &str = "output.txt";
const READ_ONLY_SIGNATURE: &str = "Read-only file system";

static QUOTED_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["']([^"'\s]+)["']"#).expect("valid path literal regex"));

const SYSTEM_PROMPT: &str = "You are an automated agent that writes a single Python script to \
complete the user's task.
- The script must be syntactically valid Python 3 and PEP 8 compliant.
- Read inputs from and write every output file to the data directory given below. \
Create directories before using them.
- Name output files after what they contain (for example `sorted_logs.txt`, not `output.txt`) \
and write them explicitly; print the output file path at the end.
- When parsing dates, accept multiple formats (YYYY-MM-DD, DD/MM/YYYY, MM-DD-YYYY, ...); \
python-dateutil is available as a dependency.
- Never delete files or directories.
- List every third-party module the script imports in `python_dependencies`.";

/// What the model returns for each attempt.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedScript {
    #[serde(default)]
    pub python_dependencies: Vec<Dependency>,
    pub python_code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Dependency {
    pub module: String,
}

impl GeneratedScript {
    /// Parses a structured reply, falling back to a fenced or raw code block.
    pub fn from_reply(reply: &str) -> Self {
        match serde_json::from_str::<GeneratedScript>(reply.trim()) {
            Ok(script) => script,
            Err(_) => GeneratedScript {
                python_dependencies: Vec::new(),
                python_code: strip_code_fence(reply, "python"),
            },
        }
    }

    /// Source with PEP 723 inline metadata so `uv run` installs the dependencies.
    pub fn runnable_source(&self) -> String {
        let deps: Vec<String> = self
            .python_dependencies
            .iter()
            .map(|d| d.module.trim())
            .filter(|m| !m.is_empty())
            .map(|m| format!("{m:?}"))
            .collect();
        if deps.is_empty() {
            return self.python_code.clone();
        }
        format!(
            "# /// script\n# dependencies = [{}]\n# ///\n{}",
            deps.join(", "),
            self.python_code
        )
    }
}

fn response_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "required": ["python_dependencies", "python_code"],
        "properties": {
            "python_code": {
                "type": "string",
                "description": "Python code to perform the task."
            },
            "python_dependencies": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "module": {"type": "string", "description": "Name of the Python module."}
                    },
                    "required": ["module"],
                    "additionalProperties": false
                }
            }
        }
    })
}

/// Syntax-checks and executes generated scripts.
#[async_trait]
pub trait ScriptRuntime: Send + Sync {
    /// Parses `source` without running it. `Err(Validation)` on a syntax error.
    async fn check(&self, source: &str, cwd: &Path) -> Result<()>;

    /// Runs the script with stdout and stderr redirected into `output`.
    /// Returns the exit code.
    async fn execute(&self, script: &Path, output: &Path, cwd: &Path) -> Result<i32>;
}

/// `python3` for syntax checks, `uv run` for execution.
pub struct PythonRuntime {
    processes: ProcessRunner,
}

impl PythonRuntime {
    pub fn new(processes: ProcessRunner) -> Self {
        Self { processes }
    }
}

const AST_CHECK: &str = "import ast, sys\nast.parse(sys.stdin.read(), '<generated>')";

#[async_trait]
impl ScriptRuntime for PythonRuntime {
    async fn check(&self, source: &str, cwd: &Path) -> Result<()> {
        let out = self
            .processes
            .run("python3", &args(["-c", AST_CHECK]), cwd, Some(source))
            .await?;
        if out.success() {
            Ok(())
        } else {
            let detail = out.stderr.lines().rev().take(6).collect::<Vec<_>>();
            let detail = detail.into_iter().rev().collect::<Vec<_>>().join("\n");
            Err(TaskError::Validation(detail))
        }
    }

    async fn execute(&self, script: &Path, output: &Path, cwd: &Path) -> Result<i32> {
        let script = script.to_string_lossy().to_string();
        Ok(self
            .processes
            .run_to_file("uv", &args(["run", script.as_str()]), cwd, output)
            .await?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Succeeded,
    Failed,
}

impl Serialize for GenerationStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(match self {
            GenerationStatus::Succeeded => "Success",
            GenerationStatus::Failed => "Failed after 3 attempts",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub script_file: Option<String>,
    pub output_file: Option<String>,
    pub execution_status: GenerationStatus,
    pub attempts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Finds the first quoted path literal that points into the working
/// directory (by its absolute root or the public prefix) and returns it
/// relative to the root.
pub fn extract_output_file(source: &str, root: &Path, public_prefix: &str) -> Option<String> {
    let root = root.to_string_lossy();
    let root_prefix = format!("{}/", root.trim_end_matches('/'));
    QUOTED_PATH_RE
        .captures_iter(source)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .find_map(|literal| {
            let inside = literal.starts_with(&root_prefix)
                || literal.starts_with(public_prefix)
                || literal.starts_with("/data/")
                || literal.starts_with("data/");
            if !inside || literal.ends_with('/') || literal.contains("..") {
                return None;
            }
            let relative = literal
                .strip_prefix(&root_prefix)
                .map(str::to_string)
                .unwrap_or_else(|| to_workspace_relative(literal, public_prefix));
            (!relative.is_empty()).then_some(relative)
        })
}

pub struct CodeGenerator {
    model: Arc<dyn LanguageModel>,
    runtime: Arc<dyn ScriptRuntime>,
    workspace: Workspace,
    public_prefix: String,
}

impl CodeGenerator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        runtime: Arc<dyn ScriptRuntime>,
        workspace: Workspace,
        public_prefix: &str,
    ) -> Self {
        Self {
            model,
            runtime,
            workspace,
            public_prefix: public_prefix.to_string(),
        }
    }

    fn build_messages(&self, task: &str, feedback: Option<&str>, read_only: bool) -> Vec<ChatMessage> {
        let mut messages = vec![
            ChatMessage::user(task),
            ChatMessage::system(format!(
                "{SYSTEM_PROMPT}\nData directory: {}",
                self.workspace.root().display()
            )),
        ];
        if let Some(feedback) = feedback {
            messages.push(ChatMessage::user(format!(
                "Previous attempt failed:\n{feedback}\nFix and retry."
            )));
        }
        if read_only {
            messages.push(ChatMessage::user(format!(
                "Modify the script to write to the writable directory '{}' instead of '{}'.",
                self.workspace.root().display(),
                self.public_prefix.trim_end_matches('/')
            )));
        }
        messages
    }

    /// Asks the model for a script, validates it, runs it, and feeds any
    /// failure back into the next prompt. Gives up after `MAX_ATTEMPTS`.
    pub async fn generate_and_run(&self, task: &str) -> GenerationReport {
        let mut feedback: Option<String> = None;
        let mut read_only = false;
        let mut script_file: Option<String> = None;
        let mut output_file: Option<String> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            info!(attempt, max = MAX_ATTEMPTS, "code generation attempt");

            match self.attempt(task, feedback.as_deref(), read_only).await {
                Ok(Attempt::Succeeded { script, output }) => {
                    info!(attempt, output = %output, "generated script succeeded");
                    return GenerationReport {
                        script_file: Some(script),
                        output_file: Some(output),
                        execution_status: GenerationStatus::Succeeded,
                        attempts: attempt,
                        last_error: None,
                    };
                }
                Ok(Attempt::Failed { script, output, error }) => {
                    warn!(attempt, "generated script failed, retrying");
                    read_only = error.contains(READ_ONLY_SIGNATURE);
                    script_file = Some(script);
                    output_file = Some(output);
                    feedback = Some(error);
                }
                Err(TaskError::Validation(detail)) => {
                    warn!(attempt, %detail, "generated script did not parse");
                    read_only = false;
                    feedback = Some(format!("Syntax error in generated code: {detail}"));
                }
                Err(err) => {
                    warn!(attempt, error = %err, "code generation attempt failed");
                    read_only = false;
                    feedback = Some(err.to_string());
                }
            }
        }

        GenerationReport {
            script_file,
            output_file,
            execution_status: GenerationStatus::Failed,
            attempts: MAX_ATTEMPTS,
            last_error: feedback,
        }
    }

    async fn attempt(&self, task: &str, feedback: Option<&str>, read_only: bool) -> Result<Attempt> {
        let request = CompletionRequest::new(self.build_messages(task, feedback, read_only))
            .with_schema("task_runner", response_schema());
        let reply = self.model.complete(request).await?;
        let script = GeneratedScript::from_reply(&reply);
        if script.python_code.trim().is_empty() {
            return Err(TaskError::Validation("model returned no code".to_string()));
        }

        let root = self.workspace.root();
        self.runtime.check(&script.python_code, root).await?;

        let script_path = self
            .workspace
            .write(SCRIPT_FILE, script.runnable_source())
            .await?;
        let output = extract_output_file(&script.python_code, root, &self.public_prefix)
            .unwrap_or_else(|| DEFAULT_OUTPUT_FILE.to_string());
        let output_path = self.workspace.resolve(&output)?;
        if let Some(parent) = output_path.parent() {
            self.workspace
                .create_dir(&parent.to_string_lossy())
                .await?;
        }

        let exit_code = self.runtime.execute(&script_path, &output_path, root).await?;
        let script = display(&script_path);
        let output = display(&output_path);
        if exit_code == 0 {
            return Ok(Attempt::Succeeded { script, output });
        }

        let error = match tokio::fs::read_to_string(&output_path).await {
            Ok(text) if !text.trim().is_empty() => text,
            _ => format!("Execution failed with exit code {exit_code}, but no error log was generated."),
        };
        Ok(Attempt::Failed { script, output, error })
    }
}

enum Attempt {
    Succeeded { script: String, output: String },
    Failed { script: String, output: String, error: String },
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
