mod cli;
mod commands;
mod config;
mod paths;
mod progress;
mod sandbox;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Desired-state document
    pub file: PathBuf,
    pub overlays: Vec<PathBuf>,
    /// Explicit state directory, bypassing config and defaults
    pub state_dir: Option<PathBuf>,
}

fn main() {
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

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        file: cli.file,
        overlays: cli.overlays,
        state_dir: cli.state_dir,
    };

    if let Err(err) = run(&ctx, cli.command) {
        ui::error(&format!("{err:#}"));
        if let Some(category) = err
            .chain()
            .find_map(|e| e.downcast_ref::<provision::Error>())
            .map(provision::Error::category)
        {
            ui::dim(category.advice());
        }
        std::process::exit(1);
    }
}

fn run(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Validate => commands::validate::run(ctx),
        Command::Graph => commands::graph::run(ctx),
        Command::Plan { json } => commands::plan::run(ctx, json),
        Command::Apply(args) => commands::apply::apply(ctx, &args),
        Command::Destroy(args) => commands::apply::destroy(ctx, &args),
        Command::Drift { json } => commands::drift::run(ctx, json),
        Command::Output { name, json } => commands::output::run(ctx, name.as_deref(), json),
        Command::State(cmd) => commands::state::run(ctx, cmd),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "keel", &mut io::stdout());
            Ok(())
        }
    }
}
