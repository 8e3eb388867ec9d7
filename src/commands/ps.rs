use anyhow::Result;
use compose::{Inventory, Machine, Project, find_orphans};

use crate::Context;
use crate::cli::PsArgs;
use crate::commands::lifecycle::fetch_inventory;
use crate::ui;

/// List the project's machines
pub fn run(ctx: &Context, args: PsArgs) -> Result<()> {
    let project = ctx.project()?;
    let backend = ctx.connect()?;
    let inventory = fetch_inventory(ctx, &project, backend.as_ref())?;

    let machines = select(&project, &inventory, &args.services, args.all)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&machines)?);
        return Ok(());
    }

    if machines.is_empty() {
        ui::info(&format!("No machines for project {}", project.name));
        return Ok(());
    }

    let rows: Vec<Vec<String>> = machines
        .iter()
        .map(|m| {
            vec![
                m.name.clone(),
                m.state.to_string(),
                m.spec.image.clone(),
                ui::short_id(&m.uid, 12),
                m.status.clone().unwrap_or_default(),
            ]
        })
        .collect();
    ui::table(&["NAME", "STATE", "IMAGE", "ID", "STATUS"], &rows, Some(1));

    let status = compose::aggregate(machines.iter().map(|m| m.state));
    println!();
    ui::kv("project", &format!("{} ({})", project.name, status));
    Ok(())
}

/// Machines of the selected services in declaration order, then orphans
fn select<'a>(
    project: &Project,
    inventory: &'a Inventory,
    services: &[String],
    include_orphans: bool,
) -> Result<Vec<&'a Machine>> {
    let mut machines: Vec<&Machine> = project
        .services(services)?
        .into_iter()
        .filter_map(|s| inventory.machine(&s.name))
        .collect();

    if include_orphans && services.is_empty() {
        let orphans = find_orphans(project, inventory);
        machines.extend(
            orphans
                .machine_names()
                .into_iter()
                .filter_map(|name| inventory.machine(name)),
        );
    }
    Ok(machines)
}
