//! In-memory table loaded from an uploaded CSV file
//!
//! The table is a polars [`DataFrame`]. Loading follows the usual dataframe
//! conventions: column types are inferred from every row, the common
//! missing-value markers (`NA`, `N/A`, `null`, `nan`, ...) read as nulls and
//! text cells are kept exactly as written.

pub mod query;

use crate::error::AppError;
use anyhow::Result;
use polars::prelude::*;
use std::borrow::Cow;
use std::collections::HashSet;
use std::io::Cursor;

/// Maximum number of rows any text rendering will include.
pub const MAX_RENDERED_ROWS: usize = 200;

/// Cells that load as missing values.
pub const NA_VALUES: &[&str] = &[
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// Render a float the way a reader expects: integers without a fraction,
/// everything else with up to six significant decimals.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else if n.is_finite() {
        let s = format!("{:.6}", n);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        n.to_string()
    }
}

pub fn is_numeric(dtype: &DataType) -> bool {
    dtype.is_integer() || dtype.is_float()
}

/// Two-dimensional labeled table.
#[derive(Debug, Clone)]
pub struct Table {
    frame: DataFrame,
}

impl Table {
    /// Load an uploaded CSV, retrying with Latin-1 when the bytes are not UTF-8.
    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self, AppError> {
        let text = match std::str::from_utf8(bytes) {
            Ok(text) => Cow::Borrowed(text),
            Err(e) => {
                tracing::warn!(
                    valid_up_to = e.valid_up_to(),
                    "CSV is not valid UTF-8, retrying as Latin-1"
                );
                Cow::Owned(decode_latin1(bytes))
            }
        };
        Self::from_csv_str(&text)
    }

    /// Parse CSV text whose first record is the header row.
    pub fn from_csv_str(text: &str) -> Result<Self, AppError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let names = header_names(text)?;

        let parse_options = CsvParseOptions::default().with_null_values(Some(
            NullValues::AllColumns(NA_VALUES.iter().map(|v| (*v).into()).collect()),
        ));
        let mut frame = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(None)
            .with_parse_options(parse_options)
            .into_reader_with_file_handle(Cursor::new(text.as_bytes().to_vec()))
            .finish()
            .map_err(|e| AppError::decode(format!("Error tokenizing data: {}", e)))?;

        if frame.width() != names.len() {
            return Err(AppError::decode(format!(
                "Expected {} columns from the header, parsed {}",
                names.len(),
                frame.width()
            )));
        }
        frame
            .set_column_names(names.iter().map(String::as_str))
            .map_err(|e| AppError::decode(format!("Invalid column names: {}", e)))?;
        coerce_padded_numbers(&mut frame)
            .map_err(|e| AppError::decode(format!("Failed to type columns: {}", e)))?;

        let table = Self { frame };
        tracing::info!(
            rows = table.n_rows(),
            columns = table.n_cols(),
            "Loaded CSV table"
        );
        Ok(table)
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn n_rows(&self) -> usize {
        self.frame.height()
    }

    pub fn n_cols(&self) -> usize {
        self.frame.width()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.frame
            .get_column_names()
            .into_iter()
            .map(|name| name.as_str())
            .collect()
    }

    /// A column by name, with an error naming the known columns.
    pub fn require_column(&self, name: &str) -> Result<&Column> {
        self.frame.column(name).map_err(|_| {
            anyhow::anyhow!(
                "Unknown column '{}'. Available columns: {}",
                name,
                self.column_names().join(", ")
            )
        })
    }

    /// One line per column with its type, used in the agent's system prompt.
    pub fn schema_summary(&self) -> String {
        let mut out = format!("{} rows x {} columns\n", self.n_rows(), self.n_cols());
        for column in self.frame.get_columns() {
            out.push_str(&format!("- {} ({})\n", column.name(), column.dtype()));
        }
        out
    }

    /// Per-column statistics as plain text.
    pub fn describe(&self) -> String {
        let mut out = format!("rows: {}\ncolumns: {}\n", self.n_rows(), self.n_cols());
        for column in self.frame.get_columns() {
            let series = column.as_materialized_series();
            let name = series.name();
            let dtype = series.dtype();
            let missing = series.null_count();
            if !is_numeric(dtype) {
                let distinct = series.drop_nulls().n_unique().unwrap_or(0);
                out.push_str(&format!(
                    "{}: {}, missing={}, distinct={}\n",
                    name, dtype, missing, distinct
                ));
                continue;
            }
            let stats = (
                series.min::<f64>().ok().flatten(),
                series.max::<f64>().ok().flatten(),
                series.mean(),
                series.median(),
            );
            match stats {
                (Some(min), Some(max), Some(mean), Some(median)) => out.push_str(&format!(
                    "{}: {}, missing={}, min={}, max={}, mean={}, median={}\n",
                    name,
                    dtype,
                    missing,
                    format_number(min),
                    format_number(max),
                    format_number(mean),
                    format_number(median)
                )),
                _ => out.push_str(&format!(
                    "{}: {}, missing={}, no values\n",
                    name, dtype, missing
                )),
            }
        }
        out
    }

    /// `len` rows starting at `offset`, as CSV text with a header.
    pub fn render_rows(&self, offset: usize, len: usize) -> Result<String> {
        let rows = self.frame.slice(offset as i64, len);
        render_frame(&rows, MAX_RENDERED_ROWS)
    }
}

/// Write up to `limit` rows of a frame as CSV text, noting any cut rows.
pub fn render_frame(frame: &DataFrame, limit: usize) -> Result<String> {
    let total = frame.height();
    let mut shown = frame.head(Some(limit.min(MAX_RENDERED_ROWS)));
    let mut buf = Vec::new();
    CsvWriter::new(&mut buf)
        .include_header(true)
        .finish(&mut shown)?;
    let mut out = String::from_utf8(buf)?;
    if total > shown.height() {
        out.push_str(&format!(
            "... showing {} of {} rows\n",
            shown.height(),
            total
        ));
    }
    Ok(out)
}

/// Latin-1 maps every byte to the code point of the same value.
fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn header_names(text: &str) -> Result<Vec<String>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| AppError::decode(format!("Failed to read CSV header: {}", e)))?;
    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        return Err(AppError::decode("No columns to parse from file"));
    }
    Ok(normalize_headers(headers.iter()))
}

/// Empty headers become `Unnamed: <index>`, repeats get a `.<n>` suffix.
fn normalize_headers<'a>(headers: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut names = Vec::new();
    for (idx, header) in headers.enumerate() {
        let base = match header.trim() {
            "" => format!("Unnamed: {}", idx),
            _ => header.to_string(),
        };
        let mut name = base.clone();
        let mut dup = 1;
        while seen.contains(&name) {
            name = format!("{}.{}", base, dup);
            dup += 1;
        }
        seen.insert(name.clone());
        names.push(name);
    }
    names
}

/// Text columns whose cells are numbers with surrounding blanks become numeric.
fn coerce_padded_numbers(frame: &mut DataFrame) -> PolarsResult<()> {
    let replacements: Vec<Series> = frame
        .get_columns()
        .iter()
        .filter(|c| c.dtype() == &DataType::String)
        .filter_map(|c| padded_numbers(c.as_materialized_series()))
        .collect();
    for series in replacements {
        tracing::debug!(column = %series.name(), "Reading padded numbers as numeric");
        frame.with_column(series)?;
    }
    Ok(())
}

fn padded_numbers(series: &Series) -> Option<Series> {
    let strings = series.str().ok()?;
    let mut padded = false;
    let mut all_ints = true;
    let mut ints: Vec<Option<i64>> = Vec::with_capacity(strings.len());
    let mut floats: Vec<Option<f64>> = Vec::with_capacity(strings.len());
    for value in strings.into_iter() {
        let Some(raw) = value else {
            ints.push(None);
            floats.push(None);
            continue;
        };
        let trimmed = raw.trim();
        padded |= trimmed.len() != raw.len();
        floats.push(Some(trimmed.parse::<f64>().ok()?));
        let int = trimmed.parse::<i64>().ok();
        all_ints &= int.is_some();
        ints.push(int);
    }
    if !padded {
        return None;
    }
    let name = series.name().clone();
    Some(if all_ints {
        Series::new(name, ints)
    } else {
        Series::new(name, floats)
    })
}
