//! Data commands: shell, dump, backup, restore and backup management.

use crossterm::terminal;

use crate::cli::{Command, Context};
use crate::pipeline::DataPipeline;

/// Raw terminal mode for the lifetime of the guard.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> std::io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Run a data command against the named (or default) service.
pub async fn run_data_command(ctx: &mut Context, command: Command) -> anyhow::Result<()> {
    let name = match &command {
        Command::Shell { name, .. }
        | Command::Dump { name, .. }
        | Command::Backup { name, .. }
        | Command::Restore { name, .. }
        | Command::DeleteBackup { name, .. }
        | Command::Backups { name } => name.clone(),
        other => anyhow::bail!("not a data command: {:?}", other),
    };
    let service = ctx.store.get_service_or_default(name.as_deref())?.clone();
    let runtime = ctx.runtime().await?;
    let pipeline = DataPipeline::new(runtime, &ctx.config);
    let prompter = ctx.prompter.as_ref();

    match command {
        Command::Shell { database, .. } => {
            // Prompt before the terminal goes raw.
            let database = pipeline
                .resolve_database(&service, database, prompter)
                .await?;
            let _raw = if prompter.is_interactive() {
                Some(RawModeGuard::enable()?)
            } else {
                None
            };
            pipeline
                .shell(
                    &service,
                    Some(database),
                    prompter,
                    tokio::io::stdin(),
                    tokio::io::stdout(),
                )
                .await?;
        }
        Command::Dump { database, .. } => {
            pipeline
                .dump(&service, database, prompter, tokio::io::stdout())
                .await?;
        }
        Command::Backup { database, file, .. } => {
            let path = pipeline.backup(&service, database, file, prompter).await?;
            println!("Backup written to {}", path.display());
        }
        Command::Restore { database, file, .. } => {
            let path = pipeline
                .restore(&service, database, file, prompter, tokio::io::stdout())
                .await?;
            println!("Restored {}", path.display());
        }
        Command::DeleteBackup {
            database, file, yes, ..
        } => {
            let path = pipeline
                .delete_backup(&service, database, file, yes, prompter)
                .await?;
            println!("Deleted {}", path.display());
        }
        Command::Backups { .. } => {
            let sets = pipeline.list_backups(&service).await?;
            if sets.is_empty() {
                println!("No backups for service '{}'", service.name());
            }
            for set in sets {
                println!("{}:", set.database);
                for file in set.files {
                    println!("  {}", file);
                }
            }
        }
        _ => {}
    }
    Ok(())
}
