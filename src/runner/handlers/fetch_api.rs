use serde_json::Value;
use tracing::info;

use crate::runner::error::{Result, TaskError};
use crate::runner::params;
use crate::runner::HandlerContext;

const JSON_OUTPUT: &str = "api-response.json";
const TEXT_OUTPUT: &str = "api-response.txt";

/// Pretty JSON when the body parses as JSON, else the raw text.
pub fn render_body(body: &str) -> (&'static str, String) {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => (JSON_OUTPUT, pretty),
            Err(_) => (TEXT_OUTPUT, body.to_string()),
        },
        Err(_) => (TEXT_OUTPUT, body.to_string()),
    }
}

pub async fn run(ctx: &HandlerContext, task: &str) -> Result<String> {
    let url = params::first_url(task)
        .ok_or_else(|| TaskError::InvalidArgument("task does not contain a URL".to_string()))?;

    let resp = ctx.http.get(&url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(TaskError::Upstream(format!("GET {url} returned HTTP {status}")));
    }
    let body = resp.text().await?;

    let (output, contents) = render_body(&body);
    ctx.workspace.write(output, &contents).await?;

    info!(handler = "fetch_api", %url, status = status.as_u16(), bytes = body.len(), output, "saved API response");
    Ok(format!("Fetched {url} and saved the response to {output}"))
}
