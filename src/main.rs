#![allow(dead_code)]

use clap::Parser;
use komga_dl_orchestrator::cli::{BackupCommand, CliArgs, Commands};
use komga_dl_orchestrator::config::{build_config_file, OrchestratorConfig, CONFIG_DIR_PATH};
use komga_dl_orchestrator::orchestrator::Orchestrator;
use komga_dl_orchestrator::{api, logger};

fn database_path() -> std::path::PathBuf {
    CONFIG_DIR_PATH.join("queue.sqlite")
}

#[tokio::main(flavor = "multi_thread", worker_threads = 7)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logger::init();

    let cli_args = CliArgs::parse();

    build_config_file()?;
    let config = OrchestratorConfig::get();
    let db_path = database_path();

    match cli_args.command {
        Some(Commands::Backup { command }) => run_backup_command(config, &db_path, command).await,
        Some(Commands::Serve) | None => serve(config, &db_path).await,
    }
}

async fn serve(config: &OrchestratorConfig, db_path: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let orchestrator = Orchestrator::build(config, db_path.to_str().ok_or("non-utf8 database path")?).await?;
    orchestrator.start();

    let port = config.server_port;
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    log::info!("listening on http://{addr}");

    let orchestrator = std::sync::Arc::new(orchestrator);
    let router = api::build_router(orchestrator);

    axum::serve(listener, router).await?;
    Ok(())
}

async fn run_backup_command(
    config: &OrchestratorConfig,
    db_path: &std::path::Path,
    command: BackupCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    let orchestrator = Orchestrator::build(config, db_path.to_str().ok_or("non-utf8 database path")?).await?;

    match command {
        BackupCommand::Create => {
            let created = orchestrator.backup.create_backup(&orchestrator.store)?;
            println!("created {} ({} bytes)", created.file_name, created.size_bytes);
        },
        BackupCommand::List => {
            for backup in orchestrator.backup.list_backups()? {
                println!("{}\t{} bytes", backup.file_name, backup.size_bytes);
            }
        },
        BackupCommand::Restore { file_name } => {
            let outcome = orchestrator.backup.restore_backup(&file_name, &orchestrator.store).await?;
            println!("{}", outcome.message);
        },
    }

    Ok(())
}
