//! Terminal output for the `tablekit` binary.
use crossterm::{cursor, execute, style, ExecutableCommand};

use std::io::{self, Write};

pub fn echo(s: String) {
    let _ = io::stdout().execute(style::Print(s));
    let _ = io::stdout().flush();
}

/// Prints `s` in red to stderr.
pub fn echo_error(s: String) {
    let _ = execute!(
        io::stderr(),
        style::SetForegroundColor(style::Color::Red),
        style::Print(s),
        style::ResetColor,
        cursor::MoveToColumn(0)
    );
    let _ = io::stderr().flush();
}

pub fn echo_lines(s: String) {
    for l in s.lines() {
        if io::stdout().execute(style::Print(format!("{}\n", l))).is_err() {
            continue;
        }
        let _ = io::stdout().flush();
    }
}

/// Renders rows as a bordered text table sized to the widest cell of each
/// column.
pub fn echo_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, col) in row.iter().enumerate() {
            let len = col.chars().count();
            match widths.get_mut(i) {
                Some(width) => *width = (*width).max(len),
                None => widths.push(len),
            }
        }
    }

    let border = {
        let mut line = String::from("+");
        for width in &widths {
            line.push_str(&"-".repeat(width + 2));
            line.push('+');
        }
        line.push('\n');
        line
    };
    let render = |cells: &[String]| {
        let mut line = String::from("|");
        for (i, width) in widths.iter().enumerate() {
            let cell = cells.get(i).map(String::as_str).unwrap_or("");
            line.push_str(&format!(" {:<width$} |", cell, width = width));
        }
        line.push('\n');
        line
    };

    let mut result = border.clone();
    if !headers.is_empty() {
        result.push_str(&render(headers));
        result.push_str(&border);
    }
    for row in rows {
        result.push_str(&render(row));
    }
    result.push_str(&border);
    result
}

#[macro_export]
macro_rules! echo {
    ($($arg:tt)*) => {
        $crate::console::echo(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! echo_error {
    ($($arg:tt)*) => {
        $crate::console::echo_error(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! echo_lines {
    ($($arg:tt)*) => {
        $crate::console::echo_lines(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_table() {
        let headers = vec!["name".to_string(), "rows".to_string()];
        let rows = vec![vec!["t1".to_string(), "12".to_string()], vec!["orders".to_string()]];
        let expected = "\
+--------+------+
| name   | rows |
+--------+------+
| t1     | 12   |
| orders |      |
+--------+------+
";
        assert_eq!(echo_table(&headers, &rows), expected);
    }
}
