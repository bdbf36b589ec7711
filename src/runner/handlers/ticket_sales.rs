use sqlx::Row;
use tracing::info;

use super::{format_number, open_sqlite};
use crate::runner::error::{Result, TaskError};
use crate::runner::params;
use crate::runner::HandlerContext;

const INPUT: &str = "ticket-sales.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SalesScope {
    /// Lower-cased, trimmed types in order of first mention.
    Types(Vec<String>),
    All,
}

/// Every ticket type named in the task, else every row when the task asks
/// for a total. A type contained in a longer named type is not counted on
/// its own ("gold" inside "rose gold").
pub fn scope(task: &str, types: &[String]) -> Option<SalesScope> {
    let lower = task.to_lowercase();
    let mut named: Vec<(usize, String)> = Vec::new();
    for t in types.iter().map(|t| t.trim().to_lowercase()) {
        if t.is_empty() || named.iter().any(|(_, n)| *n == t) {
            continue;
        }
        if let Some(pos) = lower.find(t.as_str()) {
            named.push((pos, t));
        }
    }
    let longer: Vec<String> = named.iter().map(|(_, n)| n.clone()).collect();
    named.retain(|(_, t)| !longer.iter().any(|l| l.len() > t.len() && l.contains(t.as_str())));
    named.sort_by_key(|(pos, _)| *pos);

    if !named.is_empty() {
        return Some(SalesScope::Types(named.into_iter().map(|(_, t)| t).collect()));
    }
    params::has_word(task, &["total", "all", "overall"]).then_some(SalesScope::All)
}

fn output_name(ticket_type: Option<&str>) -> String {
    match ticket_type {
        Some(t) => format!("ticket-sales-{}.txt", t.replace(char::is_whitespace, "-")),
        None => "ticket-sales-total.txt".to_string(),
    }
}

pub async fn run(ctx: &HandlerContext, task: &str) -> Result<String> {
    let input = ctx.input_file(task, &["db", "sqlite", "sqlite3"], INPUT);
    let path = ctx.workspace.require(&input).await?;
    let pool = open_sqlite(&path).await?;

    let types: Vec<String> = sqlx::query("SELECT DISTINCT type FROM tickets")
        .fetch_all(&pool)
        .await?
        .iter()
        .filter_map(|row| row.try_get::<String, _>("type").ok())
        .collect();

    let scope = scope(task, &types).ok_or_else(|| {
        TaskError::InvalidArgument(format!(
            "task names none of the ticket types ({}) and does not ask for a total",
            types.join(", ")
        ))
    })?;

    let mut totals: Vec<(String, String)> = Vec::new();
    match &scope {
        SalesScope::Types(named) => {
            for t in named {
                let total = sqlx::query_scalar::<_, f64>(
                    "SELECT TOTAL(units * price) FROM tickets WHERE LOWER(TRIM(type)) = ?",
                )
                .bind(t.as_str())
                .fetch_one(&pool)
                .await?;
                totals.push((output_name(Some(t)), format_number(total)));
            }
        }
        SalesScope::All => {
            let total = sqlx::query_scalar::<_, f64>("SELECT TOTAL(units * price) FROM tickets")
                .fetch_one(&pool)
                .await?;
            totals.push((output_name(None), format_number(total)));
        }
    }
    pool.close().await;

    for (output, value) in &totals {
        ctx.workspace.write(output, value).await?;
        info!(handler = "ticket_sales", %output, total = %value, "summed ticket sales");
    }

    let written = totals
        .iter()
        .map(|(output, value)| format!("{value} to {output}"))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("Wrote total sales: {written}"))
}
