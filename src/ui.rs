use colored::Colorize;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Tables
// ============================================================================

/// Color a state label the way `ps` and `ls` show it
pub fn state_color(label: &str, text: &str) -> String {
    match label {
        "running" | "up" => text.green().to_string(),
        "paused" | "created" | "restarting" | "suspended" => text.yellow().to_string(),
        "errored" | "failed" => text.red().to_string(),
        _ => text.dimmed().to_string(),
    }
}

/// Lay out rows under headers with space-padded columns
///
/// Widths are measured on the plain text, so color must be applied to the
/// returned cells, not the input.
pub fn layout(headers: &[&str], rows: &[Vec<String>]) -> Vec<Vec<String>> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let pad = |i: usize, cell: &str| {
        let last = i + 1 == widths.len();
        if last {
            cell.to_string()
        } else {
            format!("{:<width$}", cell, width = widths[i])
        }
    };

    let mut out: Vec<Vec<String>> =
        vec![headers.iter().enumerate().map(|(i, h)| pad(i, *h)).collect()];
    for row in rows {
        out.push(row.iter().enumerate().map(|(i, c)| pad(i, c.as_str())).collect());
    }
    out
}

/// Print a table; `state_column` is colored by its value
pub fn table(headers: &[&str], rows: &[Vec<String>], state_column: Option<usize>) {
    let laid_out = layout(headers, rows);
    for (line, cells) in laid_out.iter().enumerate() {
        let rendered: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                if line == 0 {
                    cell.bold().to_string()
                } else if Some(i) == state_column {
                    state_color(rows[line - 1][i].as_str(), cell)
                } else {
                    cell.clone()
                }
            })
            .collect();
        println!("{}", rendered.join("   ").trim_end());
    }
}

/// Shorten an identifier for display, keeping the start
pub fn short_id(id: &str, max_len: usize) -> String {
    id.chars().take(max_len).collect()
}

// ============================================================================
// Tests
// ============================================================================
