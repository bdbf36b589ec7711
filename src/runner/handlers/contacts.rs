use std::cmp::Ordering;

use serde_json::Value;
use tracing::info;

use crate::runner::error::{Result, TaskError};
use crate::runner::params;
use crate::runner::HandlerContext;

const INPUT: &str = "contacts.json";
const OUTPUT: &str = "contacts-sorted.json";

const KEY_KEYWORDS: &[(&str, &str)] = &[
    ("first", "first_name"),
    ("last", "last_name"),
    ("email", "email"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortPlan {
    /// Highest priority first.
    pub keys: Vec<&'static str>,
    pub descending: bool,
}

/// Keys in the order the task mentions them; last then first name when the
/// task names none.
pub fn plan(task: &str) -> SortPlan {
    let lower = task.to_lowercase();
    let mut found: Vec<(usize, &'static str)> = KEY_KEYWORDS
        .iter()
        .filter_map(|(kw, key)| lower.find(kw).map(|pos| (pos, *key)))
        .collect();
    found.sort_by_key(|(pos, _)| *pos);

    let keys = if found.is_empty() {
        vec!["last_name", "first_name"]
    } else {
        found.into_iter().map(|(_, key)| key).collect()
    };
    let descending = params::has_word(task, &["desc", "descending", "reverse"]);
    SortPlan { keys, descending }
}

fn sort_value(contact: &Value, key: &str) -> String {
    match contact.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Stable sort applied once per key, lowest priority first, so the primary
/// key's pass decides the final order.
pub fn sort_contacts(contacts: &mut [Value], plan: &SortPlan) {
    for key in plan.keys.iter().rev() {
        contacts.sort_by(|a, b| {
            let ordering = sort_value(a, key).cmp(&sort_value(b, key));
            if plan.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }
}

fn is_sorted(contacts: &[Value], plan: &SortPlan) -> bool {
    contacts.windows(2).all(|pair| {
        for key in &plan.keys {
            let mut ordering = sort_value(&pair[0], key).cmp(&sort_value(&pair[1], key));
            if plan.descending {
                ordering = ordering.reverse();
            }
            match ordering {
                Ordering::Less => return true,
                Ordering::Greater => return false,
                Ordering::Equal => continue,
            }
        }
        true
    })
}

pub async fn run(ctx: &HandlerContext, task: &str) -> Result<String> {
    let input = ctx.input_file(task, &["json"], INPUT);
    let raw = ctx.workspace.read_to_string(&input).await?;
    let mut contacts: Vec<Value> = match serde_json::from_str(&raw)? {
        Value::Array(items) => items,
        _ => {
            return Err(TaskError::InvalidArgument(format!(
                "{input} must contain a JSON array of contacts"
            )))
        }
    };

    let plan = plan(task);
    sort_contacts(&mut contacts, &plan);
    debug_assert!(is_sorted(&contacts, &plan));

    let body = serde_json::to_string_pretty(&contacts)?;
    ctx.workspace.write(OUTPUT, body).await?;

    info!(
        handler = "sort_contacts",
        keys = ?plan.keys,
        descending = plan.descending,
        count = contacts.len(),
        output = OUTPUT,
        "sorted contacts"
    );
    Ok(format!(
        "Sorted {} contacts by {}{}; wrote {OUTPUT}",
        contacts.len(),
        plan.keys.join(", "),
        if plan.descending { " (descending)" } else { "" }
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::{context, ScriptedModel};
    use serde_json::json;

    fn last_names(contacts: &[Value]) -> Vec<&str> {
        contacts
            .iter()
            .map(|c| c["last_name"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn plan_follows_mention_order() {
        let p = plan("Sort by first_name, then last_name");
        assert_eq!(p.keys, vec!["first_name", "last_name"]);
        assert!(!p.descending);

        let p = plan("Sort contacts by last name descending");
        assert_eq!(p.keys, vec!["last_name"]);
        assert!(p.descending);

        assert_eq!(plan("Sort the contacts").keys, vec!["last_name", "first_name"]);
    }

    #[test]
    fn descending_last_name() {
        let mut contacts = vec![
            json!({"first_name": "A", "last_name": "Zed"}),
            json!({"first_name": "B", "last_name": "Ann"}),
        ];
        sort_contacts(&mut contacts, &plan("Sort contacts by last name descending"));
        assert_eq!(last_names(&contacts), vec!["Zed", "Ann"]);
    }

    #[test]
    fn multi_key_sort_uses_secondary_key_for_ties() {
        let mut contacts = vec![
            json!({"first_name": "Cy", "last_name": "Doe"}),
            json!({"first_name": "Al", "last_name": "Doe"}),
            json!({"first_name": "Bo", "last_name": "Ames"}),
        ];
        let p = plan("sort by last_name then first_name");
        sort_contacts(&mut contacts, &p);
        let firsts: Vec<&str> = contacts.iter().map(|c| c["first_name"].as_str().unwrap()).collect();
        assert_eq!(firsts, vec!["Bo", "Al", "Cy"]);
        assert!(is_sorted(&contacts, &p));
    }

    #[test]
    fn sorting_is_idempotent() {
        let mut contacts = vec![
            json!({"first_name": "B", "last_name": "Smith"}),
            json!({"first_name": "A", "last_name": "Smith"}),
            json!({"first_name": "C", "last_name": "Jones"}),
        ];
        let p = plan("sort contacts by last_name, first_name");
        sort_contacts(&mut contacts, &p);
        let once = contacts.clone();
        sort_contacts(&mut contacts, &p);
        assert_eq!(once, contacts);
    }

    #[tokio::test]
    async fn writes_sorted_file_preserving_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("contacts.json"),
            r#"[{"first_name":"A","last_name":"Zed","email":"a@x.io"},{"first_name":"B","last_name":"Ann","email":"b@x.io"}]"#,
        )
        .unwrap();
        let ctx = context(dir.path(), ScriptedModel::new(Vec::<String>::new()));

        run(&ctx, "Sort contacts by last name descending").await.unwrap();

        let out = std::fs::read_to_string(dir.path().join(OUTPUT)).unwrap();
        let sorted: Vec<Value> = serde_json::from_str(&out).unwrap();
        assert_eq!(last_names(&sorted), vec!["Zed", "Ann"]);
        assert_eq!(sorted[0]["email"], "a@x.io");
        let keys: Vec<&String> = sorted[0].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["first_name", "last_name", "email"]);
    }

    #[tokio::test]
    async fn non_array_input_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("contacts.json"), r#"{"a": 1}"#).unwrap();
        let ctx = context(dir.path(), ScriptedModel::new(Vec::<String>::new()));
        assert!(matches!(
            run(&ctx, "sort contacts").await,
            Err(TaskError::InvalidArgument(_))
        ));
    }
}
