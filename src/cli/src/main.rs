//! Stackup CLI - brings a service stack up in dependency order.
//!
//! Provides commands for running the startup sequence, inspecting the
//! dependency graph, and printing the resolved configuration.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use stackup_core::report::exit;
use stackup_core::error::ErrorInfo;
use stackup_core::StackupError;
use std::path::PathBuf;

use commands::{config, graph, up};
use output::OutputFormat;

/// Stackup - dependency-ordered startup and readiness checks
#[derive(Parser)]
#[command(
    name = "stackup",
    version,
    about = "Stackup - dependency-ordered startup and readiness checks",
    long_about = "Waits for each service of a stack to become ready in dependency order, \
                  runs one-shot steps such as schema migrations, and reports the health \
                  of every service.",
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file (default: ./stackup.toml)
    #[arg(short, long, global = true, env = "STACKUP_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the stack up and report its health (default)
    Up(up::UpArgs),

    /// Validate the declaration and print startup stages
    Graph,

    /// Print the resolved configuration with secrets redacted
    Config,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let format = cli.output;
    let config_path = config::resolve_path(cli.config);

    let result = match cli.command.unwrap_or(Commands::Up(up::UpArgs::default())) {
        Commands::Up(args) => up::execute(args, config_path.as_deref(), format).await,
        Commands::Graph => graph::execute(config_path.as_deref(), format),
        Commands::Config => config::execute(config_path.as_deref(), format),
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => report_error(&e, format),
    };

    std::process::exit(code);
}

/// Print an error that aborted the command and pick the exit code.
fn report_error(error: &anyhow::Error, format: OutputFormat) -> i32 {
    output::print_error(&format!("{:#}", error));

    let Some(stackup_error) = error.downcast_ref::<StackupError>() else {
        return exit::FAILURE;
    };

    if format.is_structured() {
        let info = ErrorInfo::from(stackup_error);
        if let Err(e) = output::print_item(&info, format) {
            output::print_error(&format!("{:#}", e));
        }
    }
    stackup_error.exit_code()
}
