//! One module per `HandlerName`. Each exposes
//! `run(ctx, task) -> Result<String>`: read inputs from the workspace, write
//! one output file, return a confirmation message.

pub mod audio;
pub mod contacts;
pub mod credit_card;
pub mod csv_filter;
pub mod email;
pub mod fetch_api;
pub mod format_markdown;
pub mod git;
pub mod image;
pub mod logs;
pub mod markdown;
pub mod scrape;
pub mod sql;
pub mod ticket_sales;
pub mod weekdays;

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use super::error::Result;

/// Renders a float without a trailing `.0` when it is integral.
pub(crate) fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Read-only single-connection pool; handlers never write to user databases.
pub(crate) async fn open_sqlite(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::format_number;

    #[test]
    fn integral_numbers_drop_fraction() {
        assert_eq!(format_number(80.0), "80");
        assert_eq!(format_number(12.5), "12.5");
        assert_eq!(format_number(-3.0), "-3");
    }
}
