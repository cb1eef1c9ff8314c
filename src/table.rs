//! Plain-text tables for terminal output.

use std::fmt::Write as _;

/// Cells wider than this are cut and marked with `…`.
pub const MAX_CELL_WIDTH: usize = 40;

#[derive(Debug, Clone, Default)]
pub struct TextTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TextTable {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render(&self) -> String {
        let headers = self.headers.iter().map(|h| fit(h)).collect::<Vec<_>>();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                (0..headers.len())
                    .map(|idx| row.get(idx).map(|c| fit(c)).unwrap_or_default())
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        let mut widths = headers.iter().map(|h| width(h).max(3)).collect::<Vec<_>>();
        for row in &rows {
            for (slot, cell) in widths.iter_mut().zip(row) {
                *slot = (*slot).max(width(cell));
            }
        }

        let mut out = String::new();
        let _ = writeln!(out, "{}", line(&headers, &widths));
        let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
        let _ = writeln!(out, "{}", line(&rule, &widths));
        for row in &rows {
            let _ = writeln!(out, "{}", line(row, &widths));
        }
        out
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }
}

fn width(value: &str) -> usize {
    value.chars().count()
}

fn fit(value: &str) -> String {
    let flat = value.replace(['\n', '\r', '\t'], " ");
    if width(&flat) <= MAX_CELL_WIDTH {
        return flat;
    }
    let mut cut = flat.chars().take(MAX_CELL_WIDTH - 1).collect::<String>();
    cut.push('…');
    cut
}

fn line(cells: &[String], widths: &[usize]) -> String {
    let mut out = String::new();
    for (idx, (cell, w)) in cells.iter().zip(widths).enumerate() {
        if idx > 0 {
            out.push_str("  ");
        }
        out.push_str(cell);
        out.push_str(&" ".repeat(w.saturating_sub(width(cell))));
    }
    out.trim_end().to_string()
}
