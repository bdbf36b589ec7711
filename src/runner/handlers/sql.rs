use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tracing::info;

use super::open_sqlite;
use crate::runner::error::{Result, TaskError};
use crate::runner::params;
use crate::runner::HandlerContext;

const INPUT: &str = "database.db";
const OUTPUT: &str = "sql-result.json";

static FENCED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:sql)?\s*(.+?)```").expect("valid fenced sql regex"));
static BACKTICK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`([^`]+)`").expect("valid backtick regex"));
static CLAUSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\b((?:WITH\s+\w+\s+AS\s*\(|SELECT\b).+)$").expect("valid sql clause regex"));

fn looks_like_query(s: &str) -> bool {
    let upper = s.trim_start().to_uppercase();
    upper.starts_with("SELECT") || upper.starts_with("WITH")
}

/// The query in a fenced block, backticks or quotes, else the trailing
/// `SELECT`/`WITH` clause of the task.
pub fn extract_query(task: &str) -> Option<String> {
    let quoted = FENCED_RE
        .captures(task)
        .map(|c| c[1].to_string())
        .into_iter()
        .chain(BACKTICK_RE.captures_iter(task).map(|c| c[1].to_string()))
        .chain(params::quoted(task))
        .find(|q| looks_like_query(q));

    quoted
        .or_else(|| CLAUSE_RE.captures(task).map(|c| c[1].to_string()))
        .map(|q| q.trim().trim_end_matches([';', '.']).trim().to_string())
        .filter(|q| !q.is_empty())
}

fn column_value(row: &SqliteRow, index: usize) -> Result<Value> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let kind = raw.type_info().name().to_string();
    let value = match kind.as_str() {
        "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
        "REAL" | "NUMERIC" => Value::from(row.try_get_unchecked::<f64, _>(index)?),
        "BLOB" => Value::from(BASE64_STANDARD.encode(row.try_get_unchecked::<Vec<u8>, _>(index)?)),
        _ => Value::from(row.try_get_unchecked::<String, _>(index)?),
    };
    Ok(value)
}

pub fn row_to_json(row: &SqliteRow) -> Result<Value> {
    let mut object = Map::new();
    for column in row.columns() {
        object.insert(column.name().to_string(), column_value(row, column.ordinal())?);
    }
    Ok(Value::Object(object))
}

pub async fn run(ctx: &HandlerContext, task: &str) -> Result<String> {
    let query = extract_query(task)
        .ok_or_else(|| TaskError::InvalidArgument("task does not contain a SELECT query".to_string()))?;
    let input = ctx.input_file(task, &["db", "sqlite", "sqlite3"], INPUT);
    let path = ctx.workspace.require(&input).await?;

    let pool = open_sqlite(&path).await?;
    let rows = sqlx::query(&query).fetch_all(&pool).await;
    pool.close().await;
    let rows = rows.map_err(|e| match e {
        sqlx::Error::Database(db) => TaskError::InvalidArgument(format!("query failed: {db}")),
        other => TaskError::from(other),
    })?;

    let values = rows.iter().map(row_to_json).collect::<Result<Vec<_>>>()?;
    ctx.workspace
        .write(OUTPUT, serde_json::to_string_pretty(&values)?)
        .await?;

    info!(handler = "run_sql", %input, rows = values.len(), output = OUTPUT, "query executed");
    Ok(format!("Query returned {} rows; wrote {OUTPUT}", values.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::{context, sqlite_fixture, ScriptedModel};

    #[test]
    fn query_extraction_sources() {
        assert_eq!(
            extract_query("Run ```sql\nSELECT * FROM t;\n``` on app.db").as_deref(),
            Some("SELECT * FROM t")
        );
        assert_eq!(
            extract_query("Run `select name from users` on app.db").as_deref(),
            Some("select name from users")
        );
        assert_eq!(
            extract_query("On app.db run SELECT COUNT(*) FROM users WHERE age > 3.").as_deref(),
            Some("SELECT COUNT(*) FROM users WHERE age > 3")
        );
        assert_eq!(
            extract_query("Query app.db with SELECT 1").as_deref(),
            Some("SELECT 1")
        );
        assert_eq!(extract_query("Run the usual query"), None);
    }

    #[tokio::test]
    async fn rows_become_json_objects() {
        let dir = tempfile::tempdir().unwrap();
        sqlite_fixture(
            &dir.path().join("app.db"),
            &[
                "CREATE TABLE users (id INTEGER, name TEXT, score REAL, avatar BLOB)",
                "INSERT INTO users VALUES (1, 'ann', 2.5, X'0102'), (2, 'bob', NULL, NULL)",
            ],
        )
        .await;
        let ctx = context(dir.path(), ScriptedModel::new(Vec::<String>::new()));

        run(&ctx, "Run `SELECT id, name, score, avatar FROM users ORDER BY id` on /data/app.db")
            .await
            .unwrap();

        let out: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(OUTPUT)).unwrap()).unwrap();
        assert_eq!(out[0]["id"], 1);
        assert_eq!(out[0]["name"], "ann");
        assert_eq!(out[0]["score"], 2.5);
        assert_eq!(out[0]["avatar"], "AQI=");
        assert_eq!(out[1]["score"], Value::Null);
    }

    #[tokio::test]
    async fn writes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        sqlite_fixture(&dir.path().join("app.db"), &["CREATE TABLE t (x INTEGER)"]).await;
        let ctx = context(dir.path(), ScriptedModel::new(Vec::<String>::new()));

        let err = run(&ctx, "Run `WITH a AS (SELECT 1) INSERT INTO t SELECT * FROM a` on app.db")
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidArgument(_)));
    }
}
