// src/system/render.rs

//! Text rendering of result sets.

use std::fmt::Write as _;

/// Minimum width of a rendered column.
const MIN_COLUMN_WIDTH: usize = 10;

/// One column header of a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderColumn {
    /// Header text.
    pub name: String,
    /// Right-aligned when true.
    pub numeric: bool,
}

/// A fully buffered result set, ready to print.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    /// Column headers.
    pub columns: Vec<RenderColumn>,
    /// Cell text, NULLs already empty.
    pub rows: Vec<Vec<String>>,
}

impl ResultSet {
    /// An empty set with these columns.
    pub fn new(columns: Vec<RenderColumn>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Renders headers, a dash row, every row and the row-count footer.
    pub fn render(&self) -> String {
        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                self.rows
                    .iter()
                    .filter_map(|row| row.get(i))
                    .map(|value| value.chars().count())
                    .fold(column.name.chars().count().max(MIN_COLUMN_WIDTH), usize::max)
            })
            .collect();

        let mut out = String::new();
        let header: Vec<String> = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(column, &width)| align(&column.name, width, column.numeric))
            .collect();
        let _ = writeln!(out, "{}", header.join(" ").trim_end());

        let dashes: Vec<String> = widths.iter().map(|&width| "-".repeat(width)).collect();
        let _ = writeln!(out, "{}", dashes.join(" "));

        for row in &self.rows {
            let cells: Vec<String> = self
                .columns
                .iter()
                .zip(&widths)
                .enumerate()
                .map(|(i, (column, &width))| {
                    align(row.get(i).map_or("", String::as_str), width, column.numeric)
                })
                .collect();
            let _ = writeln!(out, "{}", cells.join(" ").trim_end());
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "{}", rows_affected(self.rows.len()));
        out
    }
}

/// `(1 row affected)` or `(<n> rows affected)`.
pub fn rows_affected(count: usize) -> String {
    if count == 1 {
        "(1 row affected)".to_string()
    } else {
        format!("({} rows affected)", count)
    }
}

fn align(value: &str, width: usize, right: bool) -> String {
    if right {
        format!("{:>width$}", value, width = width)
    } else {
        format!("{:<width$}", value, width = width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, numeric: bool) -> RenderColumn {
        RenderColumn {
            name: name.to_string(),
            numeric,
        }
    }

    #[test]
    fn test_columns_have_minimum_width_and_numeric_right_alignment() {
        let mut set = ResultSet::new(vec![column("id", true), column("name", false)]);
        set.rows.push(vec!["7".to_string(), "ann".to_string()]);

        let rendered = set.render();
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(lines[0], format!("{:>10} {}", "id", "name"));
        assert_eq!(lines[1], format!("{} {}", "-".repeat(10), "-".repeat(10)));
        assert_eq!(lines[2], format!("{:>10} {}", "7", "ann"));
        assert_eq!(lines[4], "(1 row affected)");
    }

    #[test]
    fn test_wide_values_widen_the_column() {
        let mut set = ResultSet::new(vec![column("c", false)]);
        set.rows.push(vec!["a-very-long-value".to_string()]);
        set.rows.push(vec!["x".to_string()]);
        let rendered = set.render();
        assert!(rendered.contains(&"-".repeat(17)));
        assert!(rendered.ends_with("(2 rows affected)\n"));
    }

    #[test]
    fn test_empty_result_uses_plural_footer() {
        let set = ResultSet::new(vec![column("c", false)]);
        assert!(set.render().ends_with("(0 rows affected)\n"));
    }
}
