use anyhow::Result;
use colored::{Color, Colorize};
use compose::Backend;

use crate::Context;
use crate::cli::LogsArgs;
use crate::ui;

const PREFIX_COLORS: &[Color] = &[
    Color::Cyan,
    Color::Yellow,
    Color::Green,
    Color::Magenta,
    Color::Blue,
];

/// Show logs for the selected services
pub fn run(ctx: &Context, args: LogsArgs) -> Result<()> {
    let project = ctx.project()?;
    let backend = ctx.connect()?;

    let names: Vec<String> = project
        .services(&args.services)?
        .into_iter()
        .map(|s| s.name.clone())
        .collect();

    print_logs(backend.as_ref(), &names, args.tail);
    Ok(())
}

/// Print each machine's log lines with a `name |` prefix
///
/// Missing machines and backends without log support are reported and
/// skipped.
pub fn print_logs(backend: &dyn Backend, names: &[String], tail: Option<usize>) {
    let width = names.iter().map(String::len).max().unwrap_or(0);

    for (i, name) in names.iter().enumerate() {
        let lines = match backend.machines().logs(name) {
            Ok(lines) => lines,
            Err(e) if e.is_not_found() => {
                ui::dim(&format!("{}: no machine", name));
                continue;
            }
            Err(e) => {
                ui::warn(&format!("{}: {}", name, e));
                continue;
            }
        };

        let prefix = format!("{:<width$} |", name, width = width)
            .color(PREFIX_COLORS[i % PREFIX_COLORS.len()])
            .to_string();
        for line in tail_of(&lines, tail) {
            println!("{} {}", prefix, line);
        }
    }
}

fn tail_of(lines: &[String], tail: Option<usize>) -> &[String] {
    match tail {
        Some(n) if n < lines.len() => &lines[lines.len() - n..],
        _ => lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_of() {
        let lines: Vec<String> = ["a", "b", "c"].iter().map(|s| (*s).to_string()).collect();
        assert_eq!(tail_of(&lines, Some(2)), ["b", "c"]);
        assert_eq!(tail_of(&lines, Some(5)).len(), 3);
        assert_eq!(tail_of(&lines, None).len(), 3);
        assert!(tail_of(&lines, Some(0)).is_empty());
    }
}
