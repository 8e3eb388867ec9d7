use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::config::BackendKind;

#[derive(Parser)]
#[command(name = "kcompose")]
#[command(version)]
#[command(about = "Run compose-style projects of unikernel machines", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Compose file (default: discovered in the working directory)
    #[arg(short, long, env = "KCOMPOSE_FILE", global = true)]
    pub file: Option<PathBuf>,

    /// Project name (default: `name:` in the file, else the directory name)
    #[arg(short, long, env = "KCOMPOSE_PROJECT_NAME", global = true)]
    pub project_name: Option<String>,

    /// Backend to use: memory or local (default from config.toml)
    #[arg(long, env = "KCOMPOSE_BACKEND", global = true)]
    pub backend: Option<BackendKind>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create and start the project's networks and machines
    Up(UpArgs),

    /// Stop and remove the project's machines and networks
    Down(DownArgs),

    /// Start existing machines
    Start(ServiceArgs),

    /// Stop running machines
    Stop(ServiceArgs),

    /// Pause running machines
    Pause(ServiceArgs),

    /// Resume paused machines
    Unpause(ServiceArgs),

    /// List the project's machines
    Ps(PsArgs),

    /// List projects known to the backend
    Ls(LsArgs),

    /// Show machine logs
    Logs(LogsArgs),

    /// Validate the compose file and show the resolved project
    Config(ConfigArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Lifecycle
// ============================================================================

#[derive(Args, Debug, Clone, Default)]
pub struct ServiceArgs {
    /// Services to act on (default: all)
    pub services: Vec<String>,

    /// Show what would change without changing it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct UpArgs {
    /// Services to bring up (default: all)
    pub services: Vec<String>,

    /// Number of actions to run at once (1 = in order)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Don't show output of attached services after starting
    #[arg(short, long)]
    pub detach: bool,

    /// Show what would change without changing it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DownArgs {
    /// Services to tear down (default: all)
    pub services: Vec<String>,

    /// Also remove machines and networks the file no longer declares
    #[arg(long)]
    pub remove_orphans: bool,

    /// Skip the confirmation prompt for removing orphans
    #[arg(short, long)]
    pub yes: bool,

    /// Show what would change without changing it
    #[arg(long)]
    pub dry_run: bool,
}

// ============================================================================
// Inspection
// ============================================================================

#[derive(Args, Debug, Clone, Default)]
pub struct PsArgs {
    /// Services to show (default: all)
    pub services: Vec<String>,

    /// Include orphaned machines
    #[arg(short, long)]
    pub all: bool,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct LsArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct LogsArgs {
    /// Services to show logs for (default: all)
    pub services: Vec<String>,

    /// Only show the last N lines per service
    #[arg(short = 'n', long)]
    pub tail: Option<usize>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Only validate, print nothing on success
    #[arg(long)]
    pub quiet_check: bool,

    /// Print the resolved project as JSON
    #[arg(long)]
    pub json: bool,

    /// List service names, one per line
    #[arg(long)]
    pub services: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_up() {
        let cli = Cli::try_parse_from([
            "kcompose", "-f", "stack.yaml", "--backend", "memory", "up", "-j", "4", "-d", "web",
        ])
        .unwrap();
        assert_eq!(cli.file, Some(PathBuf::from("stack.yaml")));
        assert_eq!(cli.backend, Some(BackendKind::Memory));
        match cli.command {
            Command::Up(args) => {
                assert_eq!(args.services, ["web"]);
                assert_eq!(args.jobs, Some(4));
                assert!(args.detach);
                assert!(!args.dry_run);
            }
            _ => panic!("expected up"),
        }
    }

    #[test]
    fn test_parse_down() {
        let cli =
            Cli::try_parse_from(["kcompose", "down", "--remove-orphans", "-y", "-v"]).unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Command::Down(args) => {
                assert!(args.remove_orphans);
                assert!(args.yes);
                assert!(args.services.is_empty());
            }
            _ => panic!("expected down"),
        }
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(Cli::try_parse_from(["kcompose", "--backend", "qemu", "ps"]).is_err());
    }
}
