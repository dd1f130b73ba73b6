//! Plain-text table rendering for terminal output.

use std::borrow::Cow;
use std::fmt::Write as _;

use crate::data::RecordSet;

const NULL_CELL: &str = "<null>";

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }
    for width in &mut widths {
        *width = (*width).max(3);
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&rule, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

/// Renders at most `limit` records; nulls are shown as `<null>`.
pub fn render_records(records: &RecordSet, limit: usize) -> String {
    let headers = records.schema().names();
    let rows = records
        .iter()
        .take(limit)
        .map(|record| {
            record
                .values()
                .iter()
                .map(|value| match value {
                    Some(value) => value.as_display(),
                    None => NULL_CELL.to_string(),
                })
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    render_table(&headers, &rows)
}

/// Two-column table of labels and values.
pub fn render_pairs<'a, I, V>(headers: [&str; 2], pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, V)>,
    V: ToString,
{
    let headers = headers.map(str::to_string);
    let rows = pairs
        .into_iter()
        .map(|(label, value)| vec![label.to_string(), value.to_string()])
        .collect::<Vec<_>>();
    render_table(&headers, &rows)
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let mut line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let cell = sanitize_cell(value);
            let padding = width.saturating_sub(display_width(&cell));
            format!("{cell}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join("  ");
    let trimmed = line.trim_end().len();
    line.truncate(trimmed);
    line
}

fn display_width(value: &str) -> usize {
    let mut width = 0usize;
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch == '\u{1b}' {
            // ANSI escape sequence
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
        } else {
            width += 1;
        }
    }
    width
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
