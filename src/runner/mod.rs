// Task routing and execution
pub mod classifier;
pub mod codegen;
pub mod datagen;
pub mod error;
pub mod handlers;
pub mod params;

#[cfg(test)]
pub mod testing;

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::shared::inference::LanguageModel;
use crate::shared::process::ProcessRunner;
use crate::shared::Workspace;
use classifier::{Classifier, HandlerName, Intent};
use codegen::{CodeGenerator, GenerationReport, GenerationStatus, ScriptRuntime};
pub use error::{Result, TaskError};

/// Everything a handler may touch. Handlers get file access only through
/// `workspace`.
#[derive(Clone)]
pub struct HandlerContext {
    pub workspace: Workspace,
    pub model: Arc<dyn LanguageModel>,
    pub http: reqwest::Client,
    pub processes: ProcessRunner,
    pub public_prefix: String,
}

impl HandlerContext {
    /// The input file named in the task (by extension), else `default`.
    pub fn input_file(&self, task: &str, extensions: &[&str], default: &str) -> String {
        params::first_file_ref(task, extensions, &self.public_prefix)
            .unwrap_or_else(|| default.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<HandlerName>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationReport>,
}

pub struct TaskRunner {
    ctx: HandlerContext,
    classifier: Classifier,
    codegen: CodeGenerator,
    user_email: Option<String>,
    codegen_fallback: bool,
}

impl TaskRunner {
    pub fn new(
        ctx: HandlerContext,
        runtime: Arc<dyn ScriptRuntime>,
        user_email: Option<String>,
        codegen_fallback: bool,
    ) -> Self {
        let classifier = Classifier::new(ctx.model.clone());
        let codegen = CodeGenerator::new(
            ctx.model.clone(),
            runtime,
            ctx.workspace.clone(),
            &ctx.public_prefix,
        );
        Self {
            ctx,
            classifier,
            codegen,
            user_email,
            codegen_fallback,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.ctx.workspace
    }

    pub async fn run(&self, task: &str) -> Result<TaskOutcome> {
        let task = task.trim();
        if task.is_empty() {
            return Err(TaskError::InvalidArgument("task must not be empty".to_string()));
        }

        if datagen::is_bootstrap(task) {
            info!("running datagen bootstrap");
            let message = datagen::run(&self.ctx, task, self.user_email.as_deref()).await?;
            return Ok(TaskOutcome {
                message,
                handler: None,
                generation: None,
            });
        }

        match self.classifier.classify(task).await? {
            Intent::Handler(handler, source) => {
                info!(%handler, ?source, "dispatching task");
                let message = self.dispatch(handler, task).await?;
                info!(%handler, "task completed");
                Ok(TaskOutcome {
                    message,
                    handler: Some(handler),
                    generation: None,
                })
            }
            Intent::Unresolved if self.codegen_fallback => {
                info!("no handler matched, generating a script");
                let report = self.codegen.generate_and_run(task).await;
                let message = match report.execution_status {
                    GenerationStatus::Succeeded => "Generated script executed successfully",
                    GenerationStatus::Failed => "Generated script failed",
                };
                Ok(TaskOutcome {
                    message: message.to_string(),
                    handler: None,
                    generation: Some(report),
                })
            }
            Intent::Unresolved => Err(TaskError::Unresolved(format!(
                "no handler matches '{task}'"
            ))),
        }
    }

    async fn dispatch(&self, handler: HandlerName, task: &str) -> Result<String> {
        let ctx = &self.ctx;
        match handler {
            HandlerName::FormatMarkdown => handlers::format_markdown::run(ctx, task).await,
            HandlerName::CountWeekdays => handlers::weekdays::run(ctx, task).await,
            HandlerName::SortContacts => handlers::contacts::run(ctx, task).await,
            HandlerName::RecentLogs => handlers::logs::run(ctx, task).await,
            HandlerName::ExtractEmail => handlers::email::run(ctx, task).await,
            HandlerName::ExtractCreditCard => handlers::credit_card::run(ctx, task).await,
            HandlerName::TicketSales => handlers::ticket_sales::run(ctx, task).await,
            HandlerName::FetchApi => handlers::fetch_api::run(ctx, task).await,
            HandlerName::GitCommit => handlers::git::run(ctx, task).await,
            HandlerName::RunSql => handlers::sql::run(ctx, task).await,
            HandlerName::ScrapeWebsite => handlers::scrape::run(ctx, task).await,
            HandlerName::ResizeImage => handlers::image::run(ctx, task).await,
            HandlerName::TranscribeAudio => handlers::audio::run(ctx, task).await,
            HandlerName::MarkdownToHtml => handlers::markdown::run(ctx, task).await,
            HandlerName::FilterCsv => handlers::csv_filter::run(ctx, task).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::{context, ScriptedModel, ScriptedRuntime};

    #[tokio::test]
    async fn dispatches_keyword_match_to_handler() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("contacts.json"),
            r#"[{"first_name":"A","last_name":"Zed"},{"first_name":"B","last_name":"Ann"}]"#,
        )
        .unwrap();
        let runner = TaskRunner::new(
            context(dir.path(), ScriptedModel::new(Vec::<String>::new())),
            ScriptedRuntime::new(),
            None,
            true,
        );

        let outcome = runner.run("Sort contacts by last name").await.unwrap();

        assert_eq!(outcome.handler, Some(HandlerName::SortContacts));
        assert!(dir.path().join("contacts-sorted.json").exists());
    }

    #[tokio::test]
    async fn unresolved_without_fallback_is_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TaskRunner::new(
            context(dir.path(), ScriptedModel::new(["none"])),
            ScriptedRuntime::new(),
            None,
            false,
        );

        let err = runner.run("Compose a sonnet").await.unwrap_err();

        assert!(matches!(err, TaskError::Unresolved(_)));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn unresolved_with_fallback_generates_code() {
        let dir = tempfile::tempdir().unwrap();
        let code = serde_json::json!({"python_dependencies": [], "python_code": "print(1)"});
        let model = ScriptedModel::new(["none".to_string(), code.to_string()]);
        let runtime = ScriptedRuntime::new();
        runtime.push_exit(0, "1\n");
        let runner = TaskRunner::new(context(dir.path(), model), runtime, None, true);

        let outcome = runner.run("Compose a sonnet").await.unwrap();

        let report = outcome.generation.unwrap();
        assert_eq!(report.execution_status, GenerationStatus::Succeeded);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("output.txt")).unwrap(),
            "1\n"
        );
    }

    #[tokio::test]
    async fn empty_task_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TaskRunner::new(
            context(dir.path(), ScriptedModel::new(Vec::<String>::new())),
            ScriptedRuntime::new(),
            None,
            true,
        );
        assert!(matches!(
            runner.run("   ").await,
            Err(TaskError::InvalidArgument(_))
        ));
    }

    #[test]
    fn outcome_flattens_generation_report() {
        let outcome = TaskOutcome {
            message: "done".to_string(),
            handler: None,
            generation: Some(GenerationReport {
                script_file: Some("/app/data/llm_task.py".to_string()),
                output_file: None,
                execution_status: GenerationStatus::Succeeded,
                attempts: 1,
                last_error: None,
            }),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["message"], "done");
        assert_eq!(value["execution_status"], "Success");
        assert_eq!(value["script_file"], "/app/data/llm_task.py");
        assert!(value.get("handler").is_none());
    }
}
