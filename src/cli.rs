//! Command-line surface.
//!
//! Carries over the teacher's `clap`-derive `Commands` enum shape from
//! `src/cli.rs`, replaced with the commands this headless service actually
//! needs: `serve` (the default action) and a `backup` maintenance group that
//! exercises [`crate::backup::BackupManager`] without going through HTTP.

use clap::{Parser, Subcommand};

#[derive(Subcommand)]
pub enum BackupCommand {
    /// Checkpoints the queue database and writes a new backup file.
    Create,
    /// Lists backup files, newest first.
    List,
    /// Restores the database from a backup file and exits for a supervisor restart.
    Restore { file_name: String },
}

#[derive(Subcommand)]
pub enum Commands {
    /// Binds the REST/websocket server. This is the default action when no
    /// subcommand is given.
    Serve,
    /// Backup maintenance, independent of the running server.
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },
}

#[derive(Parser)]
#[command(version, about = "Headless manga download orchestrator")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Option<Commands>,
}
