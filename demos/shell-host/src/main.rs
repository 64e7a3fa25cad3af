//! Example host process exposing an interactive shell over a Unix socket.
//!
//! Run with: cargo run -p shell-host [PROJECT_DIR]
//!
//! Then attach from another terminal with: cargo run -p shell-client

use std::{os::unix::process::CommandExt, path::PathBuf, process::Command, sync::Arc};

use anyhow::Context;
use hostshell_core::ShellConfig;
use hostshell_eval::BuiltinEvaluator;
use hostshell_session::{HostExit, ShellServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let project_dir = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .map_or_else(std::env::current_dir, Ok)
        .context("no project directory")?;
    let config = ShellConfig::from_env(project_dir.join("tmp"))?;

    // The host keeps running even when the shell cannot be offered.
    let Some(server) = ShellServer::try_bind(&config, Arc::new(BuiltinEvaluator::new())) else {
        tracing::warn!("Running without an interactive shell; press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        return Ok(());
    };
    let server = server.with_working_dir(&project_dir);
    tracing::info!(socket = %config.socket_path.display(), "Shell listening");

    let handle = server.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if let Err(e) = handle.shutdown().await {
                tracing::error!(error = %e, "Shutdown failed");
            }
        }
    });

    match server.serve().await? {
        HostExit::Shutdown => Ok(()),
        HostExit::Restart => {
            tracing::info!("Restarting host");
            let mut args = std::env::args_os();
            let program = std::env::current_exe().context("cannot locate host executable")?;
            args.next();
            // Only returns on failure.
            let err = Command::new(program).args(args).exec();
            Err(err).context("failed to restart host")
        }
    }
}
