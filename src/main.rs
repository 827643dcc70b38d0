mod cli;
mod commands;
mod config;
mod convention;
mod engine;
mod error;
mod package;
mod paths;
mod policy;
mod progress;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;

/// Global context for the application
pub struct Context {
    pub quiet: bool,
}

fn main() {
    let cli = Cli::parse_from(cli::normalize_legacy_args(std::env::args_os()));

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

    if let Err(e) = run(cli) {
        ui::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let ctx = Context { quiet: cli.quiet };
    let deploy_dir = cli.deploy_dir.as_deref();

    match cli.command {
        None => commands::deploy::run(&ctx, deploy_dir, &cli.deploy),
        Some(Command::Deploy(args)) => commands::deploy::run(&ctx, deploy_dir, &args),
        Some(Command::List(args)) => commands::list::run(&ctx, deploy_dir, &args),
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "convey", &mut io::stdout());
            Ok(())
        }
    }
}
