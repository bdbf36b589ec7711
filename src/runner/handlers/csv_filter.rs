use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::info;

use crate::runner::error::{Result, TaskError};
use crate::runner::HandlerContext;

const INPUT: &str = "data.csv";
const OUTPUT: &str = "filtered-data.json";

static CONDITION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\b(?:where|whose|with|if)\s+("[^"]+"|'[^']+'|\w+)\s*(==|!=|>=|<=|=|>|<|is\s+not\b|is\b|equals\b|contains\b)\s*("[^"]*"|'[^']*'|\S+)"#,
    )
    .expect("valid condition regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

impl Op {
    fn parse(token: &str) -> Option<Op> {
        let normalized = token.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        match normalized.as_str() {
            "=" | "==" | "is" | "equals" => Some(Op::Eq),
            "!=" | "is not" => Some(Op::NotEq),
            ">" => Some(Op::Gt),
            ">=" => Some(Op::Ge),
            "<" => Some(Op::Lt),
            "<=" => Some(Op::Le),
            "contains" => Some(Op::Contains),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub op: Op,
    pub value: String,
}

fn unquote(s: &str) -> &str {
    s.trim_matches(|c| c == '"' || c == '\'')
}

pub fn parse_condition(task: &str) -> Option<Condition> {
    let caps = CONDITION_RE.captures(task)?;
    let op = Op::parse(&caps[2])?;
    let raw_value = &caps[3];
    let value = if raw_value.starts_with(['"', '\'']) {
        unquote(raw_value)
    } else {
        raw_value.trim_end_matches(['.', ',', ';', '?', '!'])
    };
    Some(Condition {
        column: unquote(&caps[1]).to_string(),
        op,
        value: value.to_string(),
    })
}

impl Condition {
    /// Numeric comparison when both sides parse as numbers, else
    /// case-insensitive text comparison.
    pub fn matches(&self, cell: &str) -> bool {
        let cell = cell.trim();
        if let (Ok(a), Ok(b)) = (cell.parse::<f64>(), self.value.parse::<f64>()) {
            return match self.op {
                Op::Eq => a == b,
                Op::NotEq => a != b,
                Op::Gt => a > b,
                Op::Ge => a >= b,
                Op::Lt => a < b,
                Op::Le => a <= b,
                Op::Contains => cell.contains(self.value.as_str()),
            };
        }
        let a = cell.to_lowercase();
        let b = self.value.to_lowercase();
        match self.op {
            Op::Eq => a == b,
            Op::NotEq => a != b,
            Op::Gt => a > b,
            Op::Ge => a >= b,
            Op::Lt => a < b,
            Op::Le => a <= b,
            Op::Contains => a.contains(&b),
        }
    }
}

/// Matching rows as JSON objects keyed by header.
pub fn filter_rows(data: &str, condition: &Condition) -> Result<Vec<Value>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(data.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| TaskError::InvalidArgument(format!("cannot read CSV header: {e}")))?
        .clone();
    let index = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(&condition.column))
        .ok_or_else(|| {
            TaskError::InvalidArgument(format!(
                "unknown column '{}'; columns are {}",
                condition.column,
                headers.iter().collect::<Vec<_>>().join(", ")
            ))
        })?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| TaskError::InvalidArgument(format!("bad CSV row: {e}")))?;
        if !condition.matches(record.get(index).unwrap_or_default()) {
            continue;
        }
        let object: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), Value::from(v)))
            .collect();
        rows.push(Value::Object(object));
    }
    Ok(rows)
}

pub async fn run(ctx: &HandlerContext, task: &str) -> Result<String> {
    let condition = parse_condition(task).ok_or_else(|| {
        TaskError::InvalidArgument("task must give a condition such as 'where city = Paris'".to_string())
    })?;
    let input = ctx.input_file(task, &["csv"], INPUT);
    let data = ctx.workspace.read_to_string(&input).await?;

    let rows = filter_rows(&data, &condition)?;
    ctx.workspace
        .write(OUTPUT, serde_json::to_string_pretty(&rows)?)
        .await?;

    info!(handler = "filter_csv", %input, column = %condition.column, op = ?condition.op, rows = rows.len(), output = OUTPUT, "filtered csv");
    Ok(format!("{} rows of {input} matched; wrote {OUTPUT}", rows.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::{context, ScriptedModel};

    const DATA: &str = "name,city,age\nAnn,Paris,31\nBob,Berlin,9\nCyd,paris,40\n";

    #[test]
    fn parses_conditions() {
        let c = parse_condition("Filter data.csv where city = Paris").unwrap();
        assert_eq!((c.column.as_str(), c.op, c.value.as_str()), ("city", Op::Eq, "Paris"));

        let c = parse_condition("rows where age >= 30.").unwrap();
        assert_eq!((c.op, c.value.as_str()), (Op::Ge, "30"));

        let c = parse_condition("keep rows where name is not 'Bob'").unwrap();
        assert_eq!((c.op, c.value.as_str()), (Op::NotEq, "Bob"));

        assert!(parse_condition("filter the csv").is_none());
    }

    #[test]
    fn numeric_and_text_comparisons() {
        let rows = filter_rows(DATA, &parse_condition("where age > 10").unwrap()).unwrap();
        assert_eq!(rows.len(), 2);
        // 9 < 10 numerically even though "9" > "10" as text
        let rows = filter_rows(DATA, &parse_condition("where age < 10").unwrap()).unwrap();
        assert_eq!(rows[0]["name"], "Bob");
        let rows = filter_rows(DATA, &parse_condition("where city equals PARIS").unwrap()).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn unknown_column_is_invalid() {
        let err = filter_rows(DATA, &parse_condition("where country = FR").unwrap()).unwrap_err();
        assert!(matches!(err, TaskError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn writes_matching_rows() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("people.csv"), DATA).unwrap();
        let ctx = context(dir.path(), ScriptedModel::new(Vec::<String>::new()));

        run(&ctx, "Filter /data/people.csv where name contains y").await.unwrap();

        let out: Vec<Value> =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(OUTPUT)).unwrap()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["city"], "paris");
        assert_eq!(out[0]["age"], "40");
    }
}
