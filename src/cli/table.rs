//! Aligned ASCII table rendering for query results.

use crate::types::{Schema, Value};

/// Renders a result set as a boxed table with a header row and a row-count
/// footer.
pub fn format_table(schema: &Schema, rows: &[Vec<Value>]) -> String {
    let headers: Vec<String> = schema.columns().iter().map(|c| c.name().to_string()).collect();
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(ToString::to_string).collect())
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(String::len).collect();
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            if cell.len() > widths[i] {
                widths[i] = cell.len();
            }
        }
    }

    let mut out = String::new();
    let rule = |out: &mut String| {
        out.push('+');
        for w in &widths {
            out.push_str(&"-".repeat(w + 2));
            out.push('+');
        }
        out.push('\n');
    };
    let line = |out: &mut String, row: &[String]| {
        out.push('|');
        for (cell, w) in row.iter().zip(widths.iter()) {
            out.push(' ');
            out.push_str(cell);
            out.push_str(&" ".repeat(w - cell.len() + 1));
            out.push('|');
        }
        out.push('\n');
    };

    rule(&mut out);
    line(&mut out, &headers);
    rule(&mut out);
    for row in &cells {
        line(&mut out, row);
    }
    rule(&mut out);
    out.push_str(&format!(
        "({} row{})\n",
        rows.len(),
        if rows.len() == 1 { "" } else { "s" }
    ));
    out
}
