//! Read-only SQL over a [`Table`]
//!
//! The table is registered as `df` in a polars [`SQLContext`]. Only a single
//! `SELECT` (or `WITH ... SELECT`) statement runs; table functions that read
//! files are refused.

use super::Table;
use anyhow::{Context, Result, bail};
use polars::prelude::*;
use polars::sql::SQLContext;
use regex::Regex;
use std::sync::OnceLock;

/// Name the table is queried under.
pub const TABLE_NAME: &str = "df";

static FILE_FUNCTION: OnceLock<Regex> = OnceLock::new();

/// Run one query against the table and collect the result.
pub fn run_sql(table: &Table, sql: &str) -> Result<DataFrame> {
    let sql = check_read_only(sql)?;
    let mut ctx = SQLContext::new();
    ctx.register(TABLE_NAME, table.frame().clone().lazy());
    let frame = ctx
        .execute(sql)
        .and_then(|plan| plan.collect())
        .context("SQL query failed")?;
    tracing::debug!(rows = frame.height(), columns = frame.width(), "SQL query ran");
    Ok(frame)
}

fn check_read_only(sql: &str) -> Result<&str> {
    let sql = sql.trim().trim_end_matches(';').trim();
    if sql.is_empty() {
        bail!("The query is empty");
    }
    if sql.contains(';') {
        bail!("Run one statement at a time");
    }
    let keyword = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if keyword != "select" && keyword != "with" {
        bail!(
            "Only SELECT queries are allowed, got '{}'",
            keyword.to_ascii_uppercase()
        );
    }
    let file_function = FILE_FUNCTION.get_or_init(|| {
        Regex::new(r"(?i)\bread_(csv|parquet|ipc|json|ndjson|avro|delta)\s*\(").unwrap()
    });
    if file_function.is_match(sql) {
        bail!("Queries can only read the table '{}'", TABLE_NAME);
    }
    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::render_frame;

    fn run(csv: &str, sql: &str) -> String {
        let table = Table::from_csv_str(csv).unwrap();
        render_frame(&run_sql(&table, sql).unwrap(), 50).unwrap()
    }

    const CITIES: &str = "city,temp\nparis,12\nrome,18\nparis,10\n";

    #[test]
    fn counts_rows() {
        assert_eq!(run(CITIES, "SELECT COUNT(*) AS n FROM df"), "n\n3\n");
    }

    #[test]
    fn groups_and_sorts() {
        assert_eq!(
            run(
                CITIES,
                "SELECT city, SUM(temp) AS total FROM df GROUP BY city ORDER BY total DESC;"
            ),
            "city,total\nparis,22\nrome,18\n"
        );
    }

    #[test]
    fn filters_with_where() {
        assert_eq!(
            run(CITIES, "SELECT temp FROM df WHERE city = 'paris' AND temp > 10"),
            "temp\n12\n"
        );
    }

    #[test]
    fn missing_markers_do_not_break_aggregates() {
        assert_eq!(
            run("score\n1\nN/A\n3\n", "SELECT SUM(score) AS total FROM df"),
            "total\n4\n"
        );
        assert_eq!(
            run("v\n1\nnan\n3\n", "SELECT AVG(v) AS mean, COUNT(v) AS n FROM df"),
            "mean,n\n2.0,2\n"
        );
    }

    #[test]
    fn padded_text_stays_distinct() {
        assert_eq!(
            run(
                "fruit\n apple\napple\n",
                "SELECT COUNT(DISTINCT fruit) AS n FROM df"
            ),
            "n\n2\n"
        );
    }

    #[test]
    fn refuses_anything_but_select() {
        let table = Table::from_csv_str(CITIES).unwrap();
        for sql in [
            "DROP TABLE df",
            "SELECT * FROM read_csv('/etc/passwd')",
            "SELECT 1; SELECT 2",
            "   ",
        ] {
            assert!(run_sql(&table, sql).is_err(), "{sql}");
        }
    }

    #[test]
    fn unknown_columns_are_named_in_the_error() {
        let table = Table::from_csv_str(CITIES).unwrap();
        let err = run_sql(&table, "SELECT colour FROM df").unwrap_err();
        assert!(format!("{:#}", err).contains("colour"));
    }
}
