//! mariadb-services - Main entry point.

use std::io::IsTerminal;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mariadb_services::{
    bootstrap,
    cli::{Cli, LogFormat, run_command},
    prompt::TerminalPrompter,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let dotenv = bootstrap::load_dotenv(cli.home.as_deref());

    // Logs go to stderr; stdout carries dump output.
    let env_filter = bootstrap::log_filter(cli.log_filter());
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }

    if let Err(e) = dotenv {
        tracing::warn!("{}", e);
    }

    let interactive = std::io::stdin().is_terminal() && std::io::stderr().is_terminal();
    let prompter = Arc::new(TerminalPrompter::new(interactive));

    let code = match run_command(cli, prompter).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };

    // A pending blocking stdin read (shell relay) would hold up runtime shutdown.
    std::process::exit(code);
}
