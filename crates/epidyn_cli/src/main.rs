//! epidyn CLI
//!
//! # Commands
//!
//! - `run <model>`: integrate a built-in model (or `--model-file`) and write CSV or a plot
//! - `list`: print the built-in model names
//! - `describe <model>`: print variables and constants with their defaults
//! - `estimate <model> --data <csv> --bounds <toml>`: fit bounded constants to observations
//!
//! Logs go to stderr; stdout carries only CSV when no output path is given.

use clap::Parser;
use std::io;
use std::process::ExitCode;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;
mod commands;
mod error;
mod render;

use cli::{Cli, Commands};
use error::CliExitCode;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help and --version also arrive here.
            let code = if err.use_stderr() {
                CliExitCode::InputError
            } else {
                CliExitCode::Success
            };
            let _ = err.print();
            return code.into();
        }
    };

    // Setup logging based on verbosity
    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(io::stderr)
        .init();

    let outcome = match &cli.command {
        Commands::Run(args) => commands::run(args),
        Commands::List => commands::list(&mut io::stdout().lock()),
        Commands::Describe(source) => commands::describe(source, &mut io::stdout().lock()),
        Commands::Estimate(args) => commands::estimate(args, &mut io::stdout().lock()),
    };

    match outcome {
        Ok(code) => code.into(),
        Err(err) => {
            eprintln!("Error: {err:#}");
            CliExitCode::InputError.into()
        }
    }
}
