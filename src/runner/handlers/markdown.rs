use pulldown_cmark::{html, Options, Parser};
use tracing::info;

use crate::runner::error::Result;
use crate::runner::HandlerContext;

const INPUT: &str = "document.md";
const OUTPUT: &str = "document.html";

pub fn render_html(markdown: &str) -> String {
    let options = Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_FOOTNOTES;
    let parser = Parser::new_ext(markdown, options);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

pub async fn run(ctx: &HandlerContext, task: &str) -> Result<String> {
    let input = ctx.input_file(task, &["md", "markdown"], INPUT);
    let markdown = ctx.workspace.read_to_string(&input).await?;
    let rendered = render_html(&markdown);
    ctx.workspace.write(OUTPUT, &rendered).await?;

    info!(handler = "markdown_to_html", %input, output = OUTPUT, "rendered markdown");
    Ok(format!("Converted {input} to {OUTPUT}"))
}
