//! up, down, start, stop, pause, unpause

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use compose::{
    Backend, ExecuteOptions, ExecuteSummary, Inventory, Operation, Orphans, Parallelism, Plan,
    PlanOptions, Project, Selector, find_orphans,
};
use dialoguer::Confirm;

use crate::Context;
use crate::cli::{DownArgs, ServiceArgs, UpArgs};
use crate::commands::logs;
use crate::progress::{ConsoleProgress, spinner};
use crate::ui;

/// Bring the project (or some of its services) up
pub fn up(ctx: &Context, args: UpArgs) -> Result<()> {
    let project = ctx.project()?;
    let backend = ctx.connect()?;
    let inventory = fetch_inventory(ctx, &project, backend.as_ref())?;

    let orphans = find_orphans(&project, &inventory);
    warn_orphans(&project, &orphans);

    let jobs = args.jobs.unwrap_or(ctx.config.jobs);
    let options = PlanOptions::scoped(args.services.clone());
    let summary = reconcile(
        ctx,
        &project,
        backend.as_ref(),
        &inventory,
        Operation::Up,
        &options,
        execute_options(ctx, Parallelism::from_jobs(jobs), args.dry_run),
    )?;

    if !args.detach && !args.dry_run && summary.is_some() {
        let attached: Vec<String> = project
            .services(&args.services)?
            .into_iter()
            .filter(|s| s.attach)
            .map(|s| s.name.clone())
            .collect();
        if !attached.is_empty() {
            println!();
            logs::print_logs(backend.as_ref(), &attached, None);
        }
    }

    Ok(())
}

/// Tear the project down
pub fn down(ctx: &Context, args: DownArgs) -> Result<()> {
    let project = ctx.project()?;
    let backend = ctx.connect()?;
    let inventory = fetch_inventory(ctx, &project, backend.as_ref())?;

    let orphans = find_orphans(&project, &inventory);
    let mut remove_orphans = args.remove_orphans && !orphans.is_empty();

    if !args.remove_orphans {
        warn_orphans(&project, &orphans);
    } else if remove_orphans && !args.yes && !args.dry_run {
        ui::warn(&format!(
            "This will remove {} orphaned resource(s): {}",
            orphans.len(),
            orphan_names(&orphans)
        ));
        remove_orphans = Confirm::new()
            .with_prompt("Remove orphans?")
            .default(false)
            .interact()?;
        if !remove_orphans {
            ui::info("Keeping orphaned resources");
        }
    }

    let options = PlanOptions {
        services: args.services,
        remove_orphans,
    };
    // Teardown runs in plan order
    reconcile(
        ctx,
        &project,
        backend.as_ref(),
        &inventory,
        Operation::Down,
        &options,
        execute_options(ctx, Parallelism::Sequential, args.dry_run),
    )?;
    Ok(())
}

/// start, stop, pause or unpause
pub fn run(ctx: &Context, operation: Operation, args: ServiceArgs) -> Result<()> {
    let project = ctx.project()?;
    let backend = ctx.connect()?;
    let inventory = fetch_inventory(ctx, &project, backend.as_ref())?;

    let options = PlanOptions::scoped(args.services);
    reconcile(
        ctx,
        &project,
        backend.as_ref(),
        &inventory,
        operation,
        &options,
        execute_options(ctx, Parallelism::Sequential, args.dry_run),
    )?;
    Ok(())
}

fn execute_options(ctx: &Context, parallelism: Parallelism, dry_run: bool) -> ExecuteOptions {
    ExecuteOptions {
        parallelism,
        visibility: ctx.config.visibility(),
        dry_run,
    }
}

pub(crate) fn fetch_inventory(
    ctx: &Context,
    project: &Project,
    backend: &dyn Backend,
) -> Result<Inventory> {
    let pb = spinner(&format!("Reading {} backend...", backend.name()), ctx.quiet);
    let inventory = Inventory::fetch(backend, &Selector::project(&project.name));
    pb.finish_and_clear();
    inventory.with_context(|| format!("Failed to read inventory for project {}", project.name))
}

/// Plan and run one operation; `None` when there was nothing to do
fn reconcile(
    ctx: &Context,
    project: &Project,
    backend: &dyn Backend,
    inventory: &Inventory,
    operation: Operation,
    options: &PlanOptions,
    execute: ExecuteOptions,
) -> Result<Option<ExecuteSummary>> {
    let plan = compose::plan(project, operation, inventory, options)?;

    if plan.is_empty() {
        if !ctx.quiet {
            ui::info(&format!("Project {} is up to date", project.name.bold()));
        }
        return Ok(None);
    }

    if ctx.verbose > 0 {
        print_plan(&plan);
    }

    if !ctx.quiet {
        println!(
            "{} {} {} ({} actions on {})",
            "→".cyan().bold(),
            capitalize(&operation.to_string()),
            project.name.bold(),
            plan.len(),
            backend.name()
        );
    }

    let mut progress = ConsoleProgress::new(ctx.quiet, execute.dry_run);
    let summary = compose::execute(&plan, backend, &execute, &mut progress, &ctx.cancel)
        .with_context(|| format!("{} failed for project {}", operation, project.name))?;

    if !ctx.quiet {
        if execute.dry_run {
            println!();
            ui::info(&format!(
                "Dry run - {} action(s) planned, no changes made",
                summary.skipped
            ));
        } else {
            ui::success(&format!(
                "{} {}: {} action(s) completed",
                capitalize(&operation.to_string()),
                project.name,
                summary.succeeded
            ));
        }
    }

    Ok(Some(summary))
}

fn print_plan(plan: &Plan) {
    ui::header(&format!("Plan for {} {}", plan.operation(), plan.project()));
    for (index, action) in plan.iter().enumerate() {
        let after = if action.depends_on.is_empty() {
            String::new()
        } else {
            let deps: Vec<String> = action.depends_on.iter().map(|d| format!("#{}", d)).collect();
            format!(" (after {})", deps.join(", "))
        };
        ui::dim(&format!("#{} {}{}", index, action, after));
    }
    println!();
}

fn warn_orphans(project: &Project, orphans: &Orphans) {
    if orphans.is_empty() {
        return;
    }
    ui::warn(&format!(
        "Found orphaned resources for project {}: {}",
        project.name,
        orphan_names(orphans)
    ));
    ui::dim("Run `kcompose down --remove-orphans` to clean them up");
}

fn orphan_names(orphans: &Orphans) -> String {
    orphans
        .machine_names()
        .into_iter()
        .chain(orphans.network_names())
        .collect::<Vec<_>>()
        .join(", ")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compose::{MachineState, MemoryBackend, NetworkSpec, Service};

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("up"), "Up");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_orphan_names_lists_machines_then_networks() {
        let project = Project::new("demo", ".")
            .with_network(NetworkSpec::new("net1"))
            .with_service(Service::new("web", "nginx"));
        let backend = MemoryBackend::new();
        backend.insert_machine("demo", "web", MachineState::Running);
        backend.insert_machine("demo", "old", MachineState::Exited);
        backend.insert_network("demo", "stale");

        let inventory = Inventory::fetch(&backend, &Selector::project("demo")).unwrap();
        let orphans = find_orphans(&project, &inventory);
        assert_eq!(orphan_names(&orphans), "old, stale");
    }
}
