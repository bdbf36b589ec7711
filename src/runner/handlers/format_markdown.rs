use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::runner::error::{Result, TaskError};
use crate::runner::HandlerContext;
use crate::shared::process::args;

const INPUT: &str = "format.md";
pub const DEFAULT_PRETTIER_VERSION: &str = "3.4.2";

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"prettier@(\d+\.\d+\.\d+)").expect("valid prettier version regex"));

pub fn prettier_version(task: &str) -> &str {
    VERSION_RE
        .captures(task)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(DEFAULT_PRETTIER_VERSION)
}

pub async fn run(ctx: &HandlerContext, task: &str) -> Result<String> {
    let input = ctx.input_file(task, &["md", "markdown"], INPUT);
    let path = ctx.workspace.require(&input).await?;
    let version = prettier_version(task);
    let package = format!("prettier@{version}");
    let path = path.to_string_lossy().to_string();

    let out = ctx
        .processes
        .run(
            "npx",
            &args(["--yes", package.as_str(), "--write", path.as_str()]),
            ctx.workspace.root(),
            None,
        )
        .await?;
    if !out.success() {
        return Err(TaskError::Upstream(format!(
            "prettier exited with {}: {}",
            out.exit_code,
            out.combined()
        )));
    }

    info!(handler = "format_markdown", %input, %version, output = %input, "formatted markdown");
    Ok(format!("Formatted {input} in place with {package}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::{context, ScriptedModel};

    #[test]
    fn version_from_task_or_default() {
        assert_eq!(prettier_version("Format /data/format.md with prettier@2.8.8"), "2.8.8");
        assert_eq!(prettier_version("Format the markdown"), DEFAULT_PRETTIER_VERSION);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), ScriptedModel::new(Vec::<String>::new()));
        assert!(matches!(
            run(&ctx, "Format /data/format.md with prettier").await,
            Err(TaskError::NotFound(_))
        ));
    }
}
