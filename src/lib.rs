pub mod commands;
pub mod core;

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::commands::{Command, Flow};
use crate::core::error::ManagerResult;
use crate::core::state::{default_data_dir, ServerManager, Settings};

/// Operator entry point: `servermanager [data-dir]`.
pub async fn run() -> ManagerResult<()> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,servermanager=debug")),
        )
        .init();

    let data_dir = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_data_dir);
    info!("Server manager starting with data dir {:?}", data_dir);

    let settings = Settings::load_or_init(&data_dir)?;
    tokio::fs::create_dir_all(settings.servers_dir()).await?;
    let manager = ServerManager::new(settings)?;

    println!("{}", commands::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("stdin read failed: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let command = match line.parse::<Command>() {
                    Ok(command) => command,
                    Err(message) => {
                        println!("{message}");
                        continue;
                    }
                };
                match commands::dispatch(&manager, command).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Quit) => break,
                    Err(e) => error!("{}", e),
                }
            }
        }
    }

    info!("Stopping all servers before exit");
    manager.shutdown().await;
    Ok(())
}
