//! Output formatting utilities.

use colored::Colorize;
use ndispatch_core::CapabilityTag;

/// Format a table.
pub fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return String::new();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let join = |cells: Vec<String>| cells.join(" │ ");
    let pad = |cell: &str, width: usize| format!("{:width$}", cell, width = width);

    let mut output = String::new();
    let header = join(headers.iter().zip(&widths).map(|(h, w)| pad(h, *w)).collect());
    output.push_str(&format!("{}\n", header.bright_cyan().bold()));

    let sep: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
    output.push_str(&format!("{}\n", sep.join("─┼─")));

    for row in rows {
        let line = join(row.iter().zip(&widths).map(|(c, w)| pad(c, *w)).collect());
        output.push_str(&format!("{}\n", line));
    }

    output
}

/// Format a key-value list.
pub fn format_kv_list(items: &[(&str, String)]) -> String {
    let max_key_len = items.iter().map(|(k, _)| k.len()).max().unwrap_or(0);

    items
        .iter()
        .map(|(k, v)| {
            format!(
                "  {}: {}",
                format!("{:width$}", k, width = max_key_len).bright_cyan(),
                v
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format a list of tags, least capable first.
pub fn format_tags(tags: &[CapabilityTag]) -> String {
    if tags.is_empty() {
        return "-".to_string();
    }
    tags.iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Format duration.
pub fn format_duration(seconds: f64) -> String {
    if seconds < 0.001 {
        format!("{:.2} µs", seconds * 1_000_000.0)
    } else if seconds < 1.0 {
        format!("{:.2} ms", seconds * 1000.0)
    } else {
        format!("{:.2} s", seconds)
    }
}

/// Print a section header.
pub fn print_section(title: &str) {
    println!("\n{}", title.bright_green().bold());
    println!("{}", "─".repeat(title.len()).bright_green());
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("  {} {}", "✓".bright_green(), message);
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("  {} {}", "✗".bright_red(), message);
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("  {} {}", "⚠".bright_yellow(), message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.000_5), "500.00 µs");
        assert_eq!(format_duration(0.25), "250.00 ms");
        assert_eq!(format_duration(2.0), "2.00 s");
    }

    #[test]
    fn test_format_tags() {
        assert_eq!(format_tags(&[]), "-");
        assert_eq!(
            format_tags(&[CapabilityTag::Default, CapabilityTag::Avx512]),
            "default, avx512"
        );
    }

    #[test]
    fn test_format_table_pads_columns() {
        colored::control::set_override(false);
        let table = format_table(
            &["op", "tags"],
            &[vec!["addr".to_string(), "default".to_string()]],
        );
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "op   │ tags   ");
        assert_eq!(lines[2], "addr │ default");
        assert!(format_table(&["x"], &[]).is_empty());
    }
}
