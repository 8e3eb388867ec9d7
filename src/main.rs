mod cli;
mod commands;
mod config;
mod loader;
mod local;
mod paths;
mod progress;
mod ui;

use anyhow::{Context as AnyhowContext, Result};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use compose::{Backend, CancelToken, Operation, Project};
use config::{BackendKind, Config};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub file: Option<PathBuf>,
    pub project_name: Option<String>,
    pub backend: Option<BackendKind>,
    pub config: Config,
    pub cancel: CancelToken,
}

impl Context {
    /// Load and validate the project for this invocation
    pub fn project(&self) -> Result<Project> {
        let workdir = std::env::current_dir().context("Could not determine working directory")?;
        let project = loader::load(&workdir, self.file.as_deref(), self.project_name.as_deref())?;
        project.validate()?;
        Ok(project)
    }

    /// Backend chosen by flag, env, or config file
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.unwrap_or(self.config.backend)
    }

    pub fn connect(&self) -> Result<Box<dyn Backend>> {
        self.backend_kind().connect(&self.config.state_dir()?)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    // Ctrl-C stops new actions from starting; running ones finish
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        log::warn!("Could not install Ctrl-C handler: {}", e);
    }

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        file: cli.file,
        project_name: cli.project_name,
        backend: cli.backend,
        config: Config::load()?,
        cancel,
    };

    match cli.command {
        Command::Up(args) => commands::lifecycle::up(&ctx, args),
        Command::Down(args) => commands::lifecycle::down(&ctx, args),
        Command::Start(args) => commands::lifecycle::run(&ctx, Operation::Start, args),
        Command::Stop(args) => commands::lifecycle::run(&ctx, Operation::Stop, args),
        Command::Pause(args) => commands::lifecycle::run(&ctx, Operation::Pause, args),
        Command::Unpause(args) => commands::lifecycle::run(&ctx, Operation::Unpause, args),
        Command::Ps(args) => commands::ps::run(&ctx, args),
        Command::Ls(args) => commands::ls::run(&ctx, args),
        Command::Logs(args) => commands::logs::run(&ctx, args),
        Command::Config(args) => commands::config::run(&ctx, args),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "kcompose", &mut io::stdout());
            Ok(())
        }
    }
}
