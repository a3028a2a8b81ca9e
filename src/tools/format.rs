//! Text rendering of result sets.
//!
//! `execute_sql` returns JSON by default; these renderers back its `table`
//! and `markdown` formats.

use crate::models::{ColumnMetadata, QueryResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use unicode_width::UnicodeWidthStr;

type Row = serde_json::Map<String, JsonValue>;

/// Output format for `execute_sql` results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// ASCII table format (like MySQL CLI)
    Table,
    /// Markdown table format
    Markdown,
}

pub fn format_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render a result in the requested text format; `None` for JSON.
pub fn render(result: &QueryResult, format: OutputFormat) -> Option<String> {
    match format {
        OutputFormat::Json => None,
        OutputFormat::Table if result.committed => Some(format_write_summary(result)),
        OutputFormat::Table => Some(format_as_table(
            &result.columns,
            &result.rows,
            result.truncated,
            result.execution_time_ms,
        )),
        OutputFormat::Markdown if result.committed => {
            Some(format!("*{}*", format_write_summary(result).trim_end()))
        }
        OutputFormat::Markdown => Some(format_as_markdown(
            &result.columns,
            &result.rows,
            result.truncated,
        )),
    }
}

/// `Query OK, N rows affected (0.01 sec)` in the style of the mysql client.
pub fn format_write_summary(result: &QueryResult) -> String {
    let affected = result.rows_affected.unwrap_or(0);
    let noun = if affected == 1 { "row" } else { "rows" };
    format!(
        "Query OK, {} {} affected ({:.2} sec)\n",
        affected,
        noun,
        result.execution_time_ms as f64 / 1000.0
    )
}

pub fn format_as_table(
    columns: &[ColumnMetadata],
    rows: &[Row],
    truncated: bool,
    execution_time_ms: u64,
) -> String {
    if columns.is_empty() {
        return "Empty set\n".to_string();
    }

    let mut widths: Vec<usize> = columns.iter().map(|c| c.name.width()).collect();
    for row in rows {
        for (i, col) in columns.iter().enumerate() {
            if let Some(value) = row.get(&col.name) {
                widths[i] = widths[i].max(format_value(value).width());
            }
        }
    }

    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";

    let mut output = separator.clone();
    for (col, w) in columns.iter().zip(&widths) {
        output.push_str(&format!("| {} ", pad(&col.name, *w, false)));
    }
    output.push_str("|\n");
    output.push_str(&separator);

    for row in rows {
        for (col, w) in columns.iter().zip(&widths) {
            let value = row.get(&col.name).unwrap_or(&JsonValue::Null);
            let right = matches!(value, JsonValue::Number(_));
            output.push_str(&format!("| {} ", pad(&format_value(value), *w, right)));
        }
        output.push_str("|\n");
    }
    output.push_str(&separator);

    let noun = if rows.len() == 1 { "row" } else { "rows" };
    output.push_str(&format!(
        "{} {} in set{} ({:.2} sec)\n",
        rows.len(),
        noun,
        if truncated { ", truncated" } else { "" },
        execution_time_ms as f64 / 1000.0
    ));
    output
}

pub fn format_as_markdown(columns: &[ColumnMetadata], rows: &[Row], truncated: bool) -> String {
    if columns.is_empty() {
        return "*Empty set*".to_string();
    }

    let mut output: String = columns
        .iter()
        .map(|c| format!("| {} ", escape_markdown(&c.name)))
        .collect::<String>()
        + "|\n";
    output.push_str(&(columns.iter().map(|_| "|---").collect::<String>() + "|\n"));

    for row in rows {
        for col in columns {
            let value = row.get(&col.name).unwrap_or(&JsonValue::Null);
            output.push_str(&format!("| {} ", escape_markdown(&format_value(value))));
        }
        output.push_str("|\n");
    }

    output.push_str(&format!("\n*{} rows*", rows.len()));
    if truncated {
        output.push_str(" *(truncated)*");
    }
    output
}

/// Pad by display width; `format!` padding counts chars, which misaligns CJK text.
fn pad(text: &str, width: usize, right_align: bool) -> String {
    let fill = " ".repeat(width.saturating_sub(text.width()));
    if right_align {
        format!("{}{}", fill, text)
    } else {
        format!("{}{}", text, fill)
    }
}

fn escape_markdown(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> (Vec<ColumnMetadata>, Vec<Row>) {
        let columns = vec![
            ColumnMetadata::new("id", "INT", false),
            ColumnMetadata::new("name", "VARCHAR", true),
        ];
        let rows = vec![
            json!({"id": 1, "name": "alice"}).as_object().cloned().unwrap(),
            json!({"id": 22, "name": null}).as_object().cloned().unwrap(),
        ];
        (columns, rows)
    }

    #[test]
    fn test_format_as_table() {
        let (columns, rows) = sample();
        let table = format_as_table(&columns, &rows, false, 1500);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "+----+-------+");
        assert_eq!(lines[1], "| id | name  |");
        assert_eq!(lines[3], "|  1 | alice |");
        assert_eq!(lines[4], "| 22 | NULL  |");
        assert_eq!(lines[6], "2 rows in set (1.50 sec)");
    }

    #[test]
    fn test_format_as_table_aligns_wide_characters() {
        let columns = vec![ColumnMetadata::new("city", "VARCHAR", true)];
        let rows = vec![
            json!({"city": "東京"}).as_object().cloned().unwrap(),
            json!({"city": "Paris"}).as_object().cloned().unwrap(),
        ];
        let table = format_as_table(&columns, &rows, true, 0);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[3], "| 東京  |");
        assert_eq!(lines[4], "| Paris |");
        assert!(table.contains("2 rows in set, truncated"));
    }

    #[test]
    fn test_format_as_markdown() {
        let (columns, rows) = sample();
        let md = format_as_markdown(&columns, &rows, false);
        assert!(md.starts_with("| id | name |\n|---|---|\n"));
        assert!(md.contains("| 1 | alice |"));
        assert!(md.ends_with("*2 rows*"));
    }

    #[test]
    fn test_markdown_escapes_pipes() {
        let columns = vec![ColumnMetadata::new("expr", "VARCHAR", true)];
        let rows = vec![json!({"expr": "a|b"}).as_object().cloned().unwrap()];
        assert!(format_as_markdown(&columns, &rows, false).contains("a\\|b"));
    }

    #[test]
    fn test_empty_result() {
        assert_eq!(format_as_table(&[], &[], false, 0), "Empty set\n");
        assert_eq!(format_as_markdown(&[], &[], false), "*Empty set*");
    }

    #[test]
    fn test_render_write_summary() {
        let result = QueryResult::write_result(1, 7, 20);
        assert_eq!(
            render(&result, OutputFormat::Table).unwrap(),
            "Query OK, 1 row affected (0.02 sec)\n"
        );
        assert!(render(&result, OutputFormat::Json).is_none());
    }
}
