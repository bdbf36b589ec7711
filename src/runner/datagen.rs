//! Bootstrap path: download a data-generation script and run it once.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use super::error::{Result, TaskError};
use super::params;
use super::HandlerContext;
use crate::shared::process::args;

const SCRIPT_FILE: &str = "datagen.py";
const LOG_FILE: &str = "execution.log";

static URL_WITH_EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(https?://\S+)\s+with\s+(\S+@\S+?)[.,;]?(?:\s|$)").expect("valid datagen regex")
});

pub fn is_bootstrap(task: &str) -> bool {
    task.contains("datagen.py") && task.contains("https://")
}

/// Pulls `(script_url, email)` out of `"... <url> with <email> ..."`, falling
/// back to `default_email` when the task names only the URL.
pub fn parse_invocation(task: &str, default_email: Option<&str>) -> Result<(String, String)> {
    if let Some(caps) = URL_WITH_EMAIL_RE.captures(task) {
        return Ok((caps[1].to_string(), caps[2].to_string()));
    }
    match (params::first_url(task), default_email) {
        (Some(url), Some(email)) => Ok((url, email.to_string())),
        _ => Err(TaskError::InvalidArgument(
            "expected '<script url> with <email>'".to_string(),
        )),
    }
}

pub async fn run(ctx: &HandlerContext, task: &str, default_email: Option<&str>) -> Result<String> {
    let (url, email) = parse_invocation(task, default_email)?;
    info!(%url, "downloading datagen script");

    let resp = ctx.http.get(&url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(TaskError::Upstream(format!(
            "failed to download {url}: HTTP {status}"
        )));
    }
    let body = resp.bytes().await?;
    let script = ctx.workspace.write(SCRIPT_FILE, &body).await?;
    let log = ctx.workspace.resolve(LOG_FILE)?;

    let root = ctx.workspace.root().to_string_lossy().to_string();
    let script = script.to_string_lossy().to_string();
    let exit_code = ctx
        .processes
        .run_to_file(
            "uv",
            &args(["run", script.as_str(), email.as_str(), "--root", root.as_str()]),
            ctx.workspace.root(),
            &log,
        )
        .await?;

    if exit_code != 0 {
        return Err(TaskError::Upstream(format!(
            "datagen script exited with {exit_code}; see {}",
            log.display()
        )));
    }
    Ok(format!(
        "Script executed successfully, log written to {}",
        log.display()
    ))
}
