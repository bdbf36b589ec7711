use tracing::info;

use crate::runner::error::Result;
use crate::runner::params;
use crate::runner::HandlerContext;
use crate::shared::workspace::FileEntry;

const LOG_DIR: &str = "logs";
const OUTPUT: &str = "logs-recent.txt";
const MAX_FILES: usize = 10;

/// Newest first unless `oldest_first`; equal timestamps fall back to name.
pub fn order_entries(entries: &mut [FileEntry], oldest_first: bool) {
    entries.sort_by(|a, b| {
        let by_time = if oldest_first {
            a.modified.cmp(&b.modified)
        } else {
            b.modified.cmp(&a.modified)
        };
        by_time.then_with(|| a.relative.cmp(&b.relative))
    });
}

pub async fn run(ctx: &HandlerContext, task: &str) -> Result<String> {
    let oldest_first = params::has_word(task, &["old", "oldest", "earliest"]);

    let mut entries = ctx.workspace.list_files(LOG_DIR, ".log").await?;
    order_entries(&mut entries, oldest_first);
    entries.truncate(MAX_FILES);

    let mut lines = Vec::with_capacity(entries.len());
    for entry in &entries {
        let text = ctx.workspace.read_to_string(&entry.relative).await?;
        lines.push(text.lines().next().unwrap_or_default().to_string());
    }

    let mut body = lines.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    ctx.workspace.write(OUTPUT, body).await?;

    info!(handler = "recent_logs", files = entries.len(), oldest_first, output = OUTPUT, "collected log lines");
    Ok(format!(
        "Wrote the first line of {} {} log files to {OUTPUT}",
        entries.len(),
        if oldest_first { "oldest" } else { "most recent" }
    ))
}
