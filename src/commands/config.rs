use anyhow::Result;
use compose::Project;

use crate::Context;
use crate::cli::ConfigArgs;
use crate::paths;
use crate::ui;

/// Validate the compose file and print the resolved project
pub fn run(ctx: &Context, args: ConfigArgs) -> Result<()> {
    let project = ctx.project()?;

    if args.quiet_check {
        return Ok(());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&project)?);
        return Ok(());
    }

    if args.services {
        for service in &project.services {
            println!("{}", service.name);
        }
        return Ok(());
    }

    show_project(&project);
    show_settings(ctx)
}

fn show_project(project: &Project) {
    ui::header(&format!("Project {}", project.name));
    if let Some(file) = &project.spec_file {
        ui::kv("file", &file.display().to_string());
    }
    ui::kv("workdir", &project.workdir.display().to_string());

    println!();
    ui::info("services");
    for service in &project.services {
        let mut line = format!("{} ({})", service.name, service.image);
        if !service.depends_on.is_empty() {
            line.push_str(&format!(" after {}", service.depends_on.join(", ")));
        }
        if !service.networks.is_empty() {
            line.push_str(&format!(" on {}", service.networks.join(", ")));
        }
        ui::dim(&line);
    }

    if !project.networks.is_empty() {
        ui::info("networks");
        for network in &project.networks {
            let mut line = format!("{} ({})", network.name, network.driver);
            if network.external {
                line.push_str(" external");
            }
            if let (Some(gateway), Some(netmask)) = (&network.gateway, &network.netmask) {
                line.push_str(&format!(" gateway {} netmask {}", gateway, netmask));
            }
            ui::dim(&line);
        }
    }

    if !project.volumes.is_empty() {
        ui::info("volumes");
        for volume in &project.volumes {
            ui::dim(&volume.name);
        }
    }
}

fn show_settings(ctx: &Context) -> Result<()> {
    ui::header("Settings");
    ui::kv("config file", &paths::config_file()?.display().to_string());
    ui::kv("backend", ctx.backend_kind().as_str());
    ui::kv("state dir", &ctx.config.state_dir()?.display().to_string());
    println!();
    for line in ctx.config.to_toml()?.lines() {
        ui::dim(line);
    }
    Ok(())
}
