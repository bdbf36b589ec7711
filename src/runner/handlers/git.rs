use std::path::Path;

use chrono::Utc;
use tracing::info;
use url::Url;

use crate::runner::error::{Result, TaskError};
use crate::runner::params;
use crate::runner::HandlerContext;
use crate::shared::process::args;

const REPOS_DIR: &str = "repos";
const LOG_FILE: &str = "TASK_LOG.md";
const DEFAULT_MESSAGE: &str = "Update task log";
const AUTHOR_NAME: &str = "taskdesk";
const AUTHOR_EMAIL: &str = "taskdesk@localhost";

/// Last path segment of the repository URL without `.git`.
pub fn repo_name(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()?
        .trim_end_matches(".git")
        .to_string();
    let valid = !segment.is_empty()
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    valid.then_some(segment)
}

/// First quoted string in the task, else a fixed message.
pub fn commit_message(task: &str) -> String {
    params::quoted(task)
        .into_iter()
        .find(|q| !q.trim().is_empty() && !q.contains("://"))
        .unwrap_or_else(|| DEFAULT_MESSAGE.to_string())
}

async fn git(ctx: &HandlerContext, cwd: &Path, git_args: &[&str]) -> Result<String> {
    let mut full = vec![
        "-c".to_string(),
        format!("user.name={AUTHOR_NAME}"),
        "-c".to_string(),
        format!("user.email={AUTHOR_EMAIL}"),
    ];
    full.extend(args(git_args.iter().copied()));
    let out = ctx.processes.run("git", &full, cwd, None).await?;
    if !out.success() {
        return Err(TaskError::Upstream(format!(
            "git {} failed: {}",
            git_args.first().copied().unwrap_or_default(),
            out.combined()
        )));
    }
    Ok(out.stdout)
}

pub async fn run(ctx: &HandlerContext, task: &str) -> Result<String> {
    let url = params::first_url(task).ok_or_else(|| {
        TaskError::InvalidArgument("task does not contain a repository URL".to_string())
    })?;
    let name = repo_name(&url).ok_or_else(|| {
        TaskError::InvalidArgument(format!("cannot derive a repository name from {url}"))
    })?;
    let relative = format!("{REPOS_DIR}/{name}");

    if ctx.workspace.exists(&format!("{relative}/.git")).await {
        info!(%relative, "repository already cloned");
    } else {
        ctx.workspace.create_dir(REPOS_DIR).await?;
        let parent = ctx.workspace.resolve(REPOS_DIR)?;
        git(ctx, &parent, &["clone", url.as_str(), name.as_str()]).await?;
    }
    let repo = ctx.workspace.resolve(&relative)?;

    let entry = format!("- {}: {}\n", Utc::now().to_rfc3339(), task.trim());
    ctx.workspace
        .append(&format!("{relative}/{LOG_FILE}"), entry)
        .await?;

    let message = commit_message(task);
    git(ctx, &repo, &["add", LOG_FILE]).await?;
    git(ctx, &repo, &["commit", "-m", message.as_str()]).await?;

    let pushed = params::has_word(task, &["push"]);
    if pushed {
        git(ctx, &repo, &["push"]).await?;
    }

    info!(handler = "git_commit", %url, %relative, pushed, "committed task log");
    Ok(format!(
        "Committed {LOG_FILE} in {relative} with message '{message}'{}",
        if pushed { " and pushed" } else { "" }
    ))
}
