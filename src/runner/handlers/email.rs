use serde_json::{json, Map, Value};
use tracing::info;

use crate::runner::error::{Result, TaskError};
use crate::runner::params;
use crate::runner::HandlerContext;
use crate::shared::inference::{ChatMessage, CompletionRequest};

const INPUT: &str = "email.txt";
const OUTPUT: &str = "email-sender.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailField {
    SenderEmail,
    SenderName,
    RecipientEmail,
    Subject,
    Date,
}

impl EmailField {
    pub const ALL: [EmailField; 5] = [
        EmailField::SenderEmail,
        EmailField::SenderName,
        EmailField::RecipientEmail,
        EmailField::Subject,
        EmailField::Date,
    ];

    pub fn key(self) -> &'static str {
        match self {
            EmailField::SenderEmail => "sender_email",
            EmailField::SenderName => "sender_name",
            EmailField::RecipientEmail => "recipient_email",
            EmailField::Subject => "subject",
            EmailField::Date => "date",
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            EmailField::SenderEmail => &[
                "sender's email",
                "sender email",
                "sender’s email",
                "from address",
            ],
            EmailField::SenderName => &["sender's name", "sender name", "sender’s name", "who sent"],
            EmailField::RecipientEmail => &["recipient", "receiver", "to address"],
            EmailField::Subject => &["subject"],
            EmailField::Date => &["date", "sent on", "timestamp"],
        }
    }
}

/// Fields whose keywords appear in the task. A bare "email address" with no
/// other field named means the sender's; every field when nothing matches.
pub fn select_fields(task: &str) -> Vec<EmailField> {
    let lower = task.to_lowercase();
    let selected: Vec<EmailField> = EmailField::ALL
        .into_iter()
        .filter(|f| params::contains_any(&lower, f.keywords()))
        .collect();
    if !selected.is_empty() {
        selected
    } else if lower.contains("email address") {
        vec![EmailField::SenderEmail]
    } else {
        EmailField::ALL.to_vec()
    }
}

fn schema(fields: &[EmailField]) -> Value {
    let properties: Map<String, Value> = fields
        .iter()
        .map(|f| (f.key().to_string(), json!({ "type": "string" })))
        .collect();
    let required: Vec<&str> = fields.iter().map(|f| f.key()).collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

/// `key: value` lines in field order. Fields the model left out are skipped.
pub fn render(fields: &[EmailField], extracted: &Value) -> String {
    fields
        .iter()
        .filter_map(|f| {
            extracted
                .get(f.key())
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| format!("{}: {v}\n", f.key()))
        })
        .collect()
}

pub async fn run(ctx: &HandlerContext, task: &str) -> Result<String> {
    let input = ctx.input_file(task, &["txt", "eml"], INPUT);
    let message = ctx.workspace.read_to_string(&input).await?;
    let fields = select_fields(task);

    let names: Vec<&str> = fields.iter().map(|f| f.key()).collect();
    let request = CompletionRequest::new(vec![
        ChatMessage::system(format!(
            "Extract the following fields from the email message: {}. \
             Return each value exactly as it appears. Use an empty string when a field is absent.",
            names.join(", ")
        )),
        ChatMessage::user(message),
    ])
    .with_schema("email_fields", schema(&fields));

    let reply = ctx.model.complete(request).await?;
    let extracted: Value = serde_json::from_str(reply.trim())
        .map_err(|e| TaskError::Upstream(format!("model returned malformed fields: {e}")))?;

    let body = render(&fields, &extracted);
    if body.is_empty() {
        return Err(TaskError::Upstream(
            "model found none of the requested email fields".to_string(),
        ));
    }
    ctx.workspace.write(OUTPUT, &body).await?;

    info!(handler = "extract_email", fields = ?names, output = OUTPUT, "extracted email fields");
    Ok(format!("Extracted {} to {OUTPUT}", names.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::{context, ScriptedModel};

    #[test]
    fn field_selection_by_keyword() {
        assert_eq!(
            select_fields("Extract the sender's email address from email.txt"),
            vec![EmailField::SenderEmail]
        );
        assert_eq!(
            select_fields("Extract the recipient's email address from email.txt"),
            vec![EmailField::RecipientEmail]
        );
        assert_eq!(
            select_fields("Find the email address in /data/email.txt"),
            vec![EmailField::SenderEmail]
        );
        assert_eq!(
            select_fields("Get the subject and date of the email"),
            vec![EmailField::Subject, EmailField::Date]
        );
        assert_eq!(select_fields("Parse the email"), EmailField::ALL.to_vec());
    }

    #[test]
    fn schema_lists_only_selected_fields() {
        let s = schema(&[EmailField::Subject]);
        assert_eq!(s["required"], json!(["subject"]));
        assert!(s["properties"].get("date").is_none());
    }

    #[tokio::test]
    async fn writes_labeled_lines_for_selected_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("email.txt"),
            "From: Jo <jo@example.com>\nTo: me@example.com\nSubject: hi\n\nbody",
        )
        .unwrap();
        let model = ScriptedModel::new([r#"{"sender_email": "jo@example.com"}"#]);
        let ctx = context(dir.path(), model.clone());

        run(&ctx, "Extract the sender's email address").await.unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join(OUTPUT)).unwrap(),
            "sender_email: jo@example.com\n"
        );
        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        let schema = &requests[0].schema.as_ref().unwrap().schema;
        assert_eq!(schema["required"], json!(["sender_email"]));
    }

    #[tokio::test]
    async fn empty_extraction_is_upstream_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("email.txt"), "nothing useful").unwrap();
        let ctx = context(dir.path(), ScriptedModel::new([r#"{"subject": ""}"#]));
        assert!(matches!(
            run(&ctx, "what is the subject").await,
            Err(TaskError::Upstream(_))
        ));
    }
}
