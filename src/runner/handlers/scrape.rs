use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::info;
use url::Url;

use crate::runner::error::{Result, TaskError};
use crate::runner::params;
use crate::runner::HandlerContext;

const OUTPUT: &str = "scraped-text.txt";

static HEADINGS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1, h2, h3, h4, h5, h6").expect("valid heading selector"));
static LINKS: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("valid link selector"));

const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "head", "template"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeMode {
    Headings,
    Links,
    /// A CSS selector quoted in the task.
    Custom(String),
    Text,
}

pub fn mode(task: &str) -> ScrapeMode {
    if params::has_word(task, &["selector", "css"]) {
        if let Some(sel) = params::quoted(task)
            .into_iter()
            .find(|q| Selector::parse(q).is_ok())
        {
            return ScrapeMode::Custom(sel);
        }
    }
    if params::has_word(task, &["heading", "headings", "headline", "headlines", "titles"]) {
        ScrapeMode::Headings
    } else if params::has_word(task, &["link", "links", "href", "hrefs", "hyperlinks"]) {
        ScrapeMode::Links
    } else {
        ScrapeMode::Text
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn visible_text(doc: &Html) -> Vec<String> {
    doc.root_element()
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|e| HIDDEN_ELEMENTS.contains(&e.name()))
            });
            let line = collapse(text);
            (!hidden && !line.is_empty()).then_some(line)
        })
        .collect()
}

/// One line per extracted item.
pub fn extract(html: &str, base: &Url, mode: &ScrapeMode) -> Result<Vec<String>> {
    let doc = Html::parse_document(html);
    let lines = match mode {
        ScrapeMode::Headings => doc
            .select(&HEADINGS)
            .map(|h| collapse(&h.text().collect::<String>()))
            .filter(|s| !s.is_empty())
            .collect(),
        ScrapeMode::Links => doc
            .select(&LINKS)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| base.join(href).ok())
            .map(|u| u.to_string())
            .collect(),
        ScrapeMode::Custom(css) => {
            let selector = Selector::parse(css)
                .map_err(|e| TaskError::InvalidArgument(format!("bad selector '{css}': {e:?}")))?;
            doc.select(&selector)
                .map(|el| collapse(&el.text().collect::<String>()))
                .filter(|s| !s.is_empty())
                .collect()
        }
        ScrapeMode::Text => visible_text(&doc),
    };
    Ok(lines)
}

pub async fn run(ctx: &HandlerContext, task: &str) -> Result<String> {
    let url = params::first_url(task)
        .ok_or_else(|| TaskError::InvalidArgument("task does not contain a URL".to_string()))?;
    let base = Url::parse(&url).map_err(|e| TaskError::InvalidArgument(format!("bad URL {url}: {e}")))?;

    let resp = ctx.http.get(base.clone()).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(TaskError::Upstream(format!("GET {url} returned HTTP {status}")));
    }
    let html = resp.text().await?;

    let mode = mode(task);
    let lines = extract(&html, &base, &mode)?;
    let mut body = lines.join("\n");
    body.push('\n');
    ctx.workspace.write(OUTPUT, body).await?;

    info!(handler = "scrape_website", %url, ?mode, items = lines.len(), output = OUTPUT, "scraped page");
    Ok(format!("Scraped {} items from {url} into {OUTPUT}", lines.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::{context, serve, ScriptedModel};
    use axum::{response::Html as HtmlResponse, routing::get, Router};

    const PAGE: &str = r#"<html><head><title>T</title><style>p{}</style></head>
        <body><h1>Top  story</h1><p class="lead">Hello <b>world</b></p>
        <script>var x = 1;</script><a href="/about">About</a><h2>More</h2></body></html>"#;

    fn base() -> Url {
        Url::parse("https://news.example.com/index.html").unwrap()
    }

    #[test]
    fn mode_from_keywords() {
        assert_eq!(mode("Scrape the headings from https://x.io"), ScrapeMode::Headings);
        assert_eq!(mode("List the links on https://x.io"), ScrapeMode::Links);
        assert_eq!(
            mode("Scrape https://x.io using css selector 'p.lead'"),
            ScrapeMode::Custom("p.lead".to_string())
        );
        assert_eq!(mode("Scrape https://x.io"), ScrapeMode::Text);
    }

    #[test]
    fn extracts_each_mode() {
        assert_eq!(
            extract(PAGE, &base(), &ScrapeMode::Headings).unwrap(),
            vec!["Top story", "More"]
        );
        assert_eq!(
            extract(PAGE, &base(), &ScrapeMode::Links).unwrap(),
            vec!["https://news.example.com/about"]
        );
        assert_eq!(
            extract(PAGE, &base(), &ScrapeMode::Custom("p.lead".into())).unwrap(),
            vec!["Hello world"]
        );
        let text = extract(PAGE, &base(), &ScrapeMode::Text).unwrap();
        assert!(text.contains(&"Top story".to_string()));
        assert!(!text.iter().any(|l| l.contains("var x") || l == "T"));
    }

    #[tokio::test]
    async fn writes_scraped_headings() {
        let base = serve(Router::new().route("/", get(|| async { HtmlResponse(PAGE) }))).await;
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), ScriptedModel::new(Vec::<String>::new()));

        run(&ctx, &format!("Scrape headings from {base}/")).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join(OUTPUT)).unwrap(),
            "Top story\nMore\n"
        );
    }
}
