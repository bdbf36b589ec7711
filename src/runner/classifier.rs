use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::error::Result;
use crate::shared::inference::{ChatMessage, CompletionRequest, LanguageModel};

/// Every task kind the service knows how to run without generating code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerName {
    FormatMarkdown,
    CountWeekdays,
    SortContacts,
    RecentLogs,
    ExtractEmail,
    ExtractCreditCard,
    TicketSales,
    FetchApi,
    GitCommit,
    RunSql,
    ScrapeWebsite,
    ResizeImage,
    TranscribeAudio,
    MarkdownToHtml,
    FilterCsv,
}

impl HandlerName {
    pub const ALL: [HandlerName; 15] = [
        HandlerName::FormatMarkdown,
        HandlerName::CountWeekdays,
        HandlerName::SortContacts,
        HandlerName::RecentLogs,
        HandlerName::ExtractEmail,
        HandlerName::ExtractCreditCard,
        HandlerName::TicketSales,
        HandlerName::FetchApi,
        HandlerName::GitCommit,
        HandlerName::RunSql,
        HandlerName::ScrapeWebsite,
        HandlerName::ResizeImage,
        HandlerName::TranscribeAudio,
        HandlerName::MarkdownToHtml,
        HandlerName::FilterCsv,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerName::FormatMarkdown => "format_markdown",
            HandlerName::CountWeekdays => "count_weekdays",
            HandlerName::SortContacts => "sort_contacts",
            HandlerName::RecentLogs => "recent_logs",
            HandlerName::ExtractEmail => "extract_email",
            HandlerName::ExtractCreditCard => "extract_credit_card",
            HandlerName::TicketSales => "ticket_sales",
            HandlerName::FetchApi => "fetch_api",
            HandlerName::GitCommit => "git_commit",
            HandlerName::RunSql => "run_sql",
            HandlerName::ScrapeWebsite => "scrape_website",
            HandlerName::ResizeImage => "resize_image",
            HandlerName::TranscribeAudio => "transcribe_audio",
            HandlerName::MarkdownToHtml => "markdown_to_html",
            HandlerName::FilterCsv => "filter_csv",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            HandlerName::FormatMarkdown => "format a markdown file in place with prettier",
            HandlerName::CountWeekdays => "count dates in a file falling on a given weekday",
            HandlerName::SortContacts => "sort a JSON list of contacts by name fields",
            HandlerName::RecentLogs => "collect first lines of the most recent (or oldest) log files",
            HandlerName::ExtractEmail => "extract sender, recipient or subject from an email message",
            HandlerName::ExtractCreditCard => "read a credit card number or expiry from an image",
            HandlerName::TicketSales => "sum ticket sales per ticket type from a database",
            HandlerName::FetchApi => "fetch data from an HTTP API and save it",
            HandlerName::GitCommit => "clone a git repository and commit a change",
            HandlerName::RunSql => "run a SQL query against a SQLite database",
            HandlerName::ScrapeWebsite => "extract text, headings or links from a web page",
            HandlerName::ResizeImage => "resize or compress an image",
            HandlerName::TranscribeAudio => "transcribe an audio file to text",
            HandlerName::MarkdownToHtml => "convert a markdown file to HTML",
            HandlerName::FilterCsv => "filter rows of a CSV file and return JSON",
        }
    }
}

impl fmt::Display for HandlerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HandlerName {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        HandlerName::ALL
            .iter()
            .copied()
            .find(|h| h.as_str() == s)
            .ok_or(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Keyword,
    Model,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Handler(HandlerName, MatchSource),
    Unresolved,
}

/// A rule matches when every group has at least one keyword contained in the
/// lower-cased task.
pub struct KeywordRule {
    pub handler: HandlerName,
    pub groups: &'static [&'static [&'static str]],
}

const WEEKDAY_HINTS: &[&str] = &[
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday", "weekday",
];

/// Classification priority. Earlier rules win when a task matches several,
/// so a task mentioning both ticket sales and a credit card is ticket sales.
pub static KEYWORD_RULES: &[KeywordRule] = &[
    KeywordRule {
        handler: HandlerName::TicketSales,
        groups: &[&["ticket"], &["sales", "sold", "revenue"]],
    },
    KeywordRule {
        handler: HandlerName::ExtractCreditCard,
        groups: &[&["credit card", "card number", "credit_card"]],
    },
    KeywordRule {
        handler: HandlerName::RecentLogs,
        groups: &[&["recent", "latest", "newest", "oldest", "old "], &["log"]],
    },
    KeywordRule {
        handler: HandlerName::CountWeekdays,
        groups: &[&["count", "how many", "number of"], WEEKDAY_HINTS],
    },
    KeywordRule {
        handler: HandlerName::SortContacts,
        groups: &[&["sort", "order"], &["contact"]],
    },
    KeywordRule {
        handler: HandlerName::ExtractEmail,
        groups: &[&["email"], &["sender", "recipient", "subject", "extract"]],
    },
    KeywordRule {
        handler: HandlerName::FormatMarkdown,
        groups: &[&["prettier", "format"], &[".md", "markdown"]],
    },
    KeywordRule {
        handler: HandlerName::MarkdownToHtml,
        groups: &[&[".md", "markdown"], &["html"]],
    },
    KeywordRule {
        handler: HandlerName::FilterCsv,
        groups: &[&["csv"], &["filter", "where", "rows with"]],
    },
    KeywordRule {
        handler: HandlerName::RunSql,
        groups: &[&["sql", "sqlite", "select "]],
    },
    KeywordRule {
        handler: HandlerName::GitCommit,
        groups: &[&["git", "repo"], &["clone", "commit"]],
    },
    KeywordRule {
        handler: HandlerName::ScrapeWebsite,
        groups: &[&["scrape", "crawl"]],
    },
    KeywordRule {
        handler: HandlerName::ResizeImage,
        groups: &[
            &["image", ".png", ".jpg", ".jpeg", ".webp", "photo"],
            &["resize", "compress", "scale", "shrink"],
        ],
    },
    KeywordRule {
        handler: HandlerName::TranscribeAudio,
        groups: &[&["transcribe", "transcription"]],
    },
    KeywordRule {
        handler: HandlerName::FetchApi,
        groups: &[&["api", "endpoint"], &["fetch", "get ", "call", "download"]],
    },
];

/// Keyword matching only; no model involved.
pub fn match_keywords(task: &str) -> Option<HandlerName> {
    let lower = format!("{} ", task.to_lowercase());
    KEYWORD_RULES
        .iter()
        .find(|rule| {
            rule.groups
                .iter()
                .all(|group| group.iter().any(|kw| lower.contains(kw)))
        })
        .map(|rule| rule.handler)
}

pub fn classification_prompt() -> String {
    let mut prompt = String::from(
        "You route automation tasks to handlers. Reply with exactly one handler name \
         from the list below and nothing else. If none fits, reply with `none`.\n\n",
    );
    for handler in HandlerName::ALL {
        prompt.push_str(&format!("- {}: {}\n", handler.as_str(), handler.description()));
    }
    prompt
}

/// Normalizes a model reply into a handler name, if it names one.
pub fn parse_model_reply(reply: &str) -> Option<HandlerName> {
    let cleaned: String = reply
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    cleaned.parse().ok()
}

pub struct Classifier {
    model: Arc<dyn LanguageModel>,
}

impl Classifier {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn classify(&self, task: &str) -> Result<Intent> {
        if let Some(handler) = match_keywords(task) {
            debug!(%handler, "task matched keyword rule");
            return Ok(Intent::Handler(handler, MatchSource::Keyword));
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(classification_prompt()),
            ChatMessage::user(task),
        ]);
        let reply = self.model.complete(request).await?;

        match parse_model_reply(&reply) {
            Some(handler) => {
                info!(%handler, "task classified by model");
                Ok(Intent::Handler(handler, MatchSource::Model))
            }
            None => {
                info!(reply = %reply.trim(), "model reply did not name a handler");
                Ok(Intent::Unresolved)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::ScriptedModel;

    #[test]
    fn names_round_trip() {
        for handler in HandlerName::ALL {
            assert_eq!(handler.as_str().parse::<HandlerName>(), Ok(handler));
        }
        assert!("delete_everything".parse::<HandlerName>().is_err());
    }

    #[test]
    fn keyword_rules_cover_common_phrasings() {
        let cases = [
            ("What is the total sales of Gold tickets?", HandlerName::TicketSales),
            ("Sort contacts by last name descending", HandlerName::SortContacts),
            ("Write the first line of the 10 most recent .log files", HandlerName::RecentLogs),
            ("How many Wednesdays are in /data/dates.txt?", HandlerName::CountWeekdays),
            ("Extract the sender's email address from email.txt", HandlerName::ExtractEmail),
            ("Extract the credit card number from the image", HandlerName::ExtractCreditCard),
            ("Format /data/format.md with prettier@3.4.2", HandlerName::FormatMarkdown),
            ("Convert document.md to HTML", HandlerName::MarkdownToHtml),
            ("Filter data.csv where city = Paris", HandlerName::FilterCsv),
            ("Run this SQL on sales.db: SELECT 1", HandlerName::RunSql),
            ("Clone https://github.com/a/b.git and commit", HandlerName::GitCommit),
            ("Scrape https://example.com for headings", HandlerName::ScrapeWebsite),
            ("Resize image.png to 100x100", HandlerName::ResizeImage),
            ("Transcribe audio.mp3", HandlerName::TranscribeAudio),
            ("Fetch data from the API at https://x.io/items", HandlerName::FetchApi),
        ];
        for (task, expected) in cases {
            assert_eq!(match_keywords(task), Some(expected), "task: {task}");
        }
    }

    #[test]
    fn priority_order_breaks_ties() {
        let task = "Compare credit card spend with ticket sales for Gold";
        assert_eq!(match_keywords(task), Some(HandlerName::TicketSales));
    }

    #[test]
    fn format_precedes_html_conversion() {
        let task = "Format the markdown with prettier before we render html";
        assert_eq!(match_keywords(task), Some(HandlerName::FormatMarkdown));
    }

    #[test]
    fn model_reply_is_normalized() {
        assert_eq!(parse_model_reply("  `Sort_Contacts`.\n"), Some(HandlerName::SortContacts));
        assert_eq!(parse_model_reply("none"), None);
        assert_eq!(parse_model_reply("I think sort_contacts"), None);
    }

    #[test]
    fn prompt_lists_every_handler() {
        let prompt = classification_prompt();
        for handler in HandlerName::ALL {
            assert!(prompt.contains(handler.as_str()));
        }
    }

    #[tokio::test]
    async fn falls_back_to_model() {
        let model = ScriptedModel::new(["transcribe_audio"]);
        let classifier = Classifier::new(model.clone());
        let intent = classifier
            .classify("Turn the voice memo into words")
            .await
            .unwrap();
        assert_eq!(
            intent,
            Intent::Handler(HandlerName::TranscribeAudio, MatchSource::Model)
        );
        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].messages[0].content.contains("transcribe_audio"));
    }

    #[tokio::test]
    async fn keyword_match_skips_model() {
        let model = ScriptedModel::new(Vec::<String>::new());
        let classifier = Classifier::new(model.clone());
        let intent = classifier.classify("Sort the contacts").await.unwrap();
        assert_eq!(intent, Intent::Handler(HandlerName::SortContacts, MatchSource::Keyword));
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn unknown_model_reply_is_unresolved() {
        let model = ScriptedModel::new(["launch_rocket"]);
        let classifier = Classifier::new(model);
        let intent = classifier.classify("Write me a poem").await.unwrap();
        assert_eq!(intent, Intent::Unresolved);
    }
}
