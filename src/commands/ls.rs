use anyhow::{Context as AnyhowContext, Result};
use compose::{Selector, summarize};

use crate::Context;
use crate::cli::LsArgs;
use crate::ui;

/// List every project the backend holds machines for
pub fn run(ctx: &Context, args: LsArgs) -> Result<()> {
    let backend = ctx.connect()?;
    let machines = backend
        .machines()
        .list(&Selector::all())
        .with_context(|| format!("Failed to list machines on {} backend", backend.name()))?;

    let projects = summarize(&machines);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&projects)?);
        return Ok(());
    }

    if projects.is_empty() {
        ui::info(&format!("No projects on the {} backend", backend.name()));
        return Ok(());
    }

    let rows: Vec<Vec<String>> = projects
        .iter()
        .map(|p| {
            vec![
                p.name.clone(),
                p.status.label().to_string(),
                format!("{}/{} running", p.running, p.machines),
            ]
        })
        .collect();
    ui::table(&["NAME", "STATUS", "MACHINES"], &rows, Some(1));
    Ok(())
}
