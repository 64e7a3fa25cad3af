//! Example client attaching the local terminal to a host shell.
//!
//! Run with: cargo run -p shell-client [PROJECT_DIR]
//!
//! Keeps reconnecting across host restarts and exits when the session is
//! ended or the host goes away for good.

use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use hostshell_core::ShellConfig;
use hostshell_transport::{
    BannerStyle, Connector,
    terminal::{CrosstermTerminal, spawn_stdin_reader},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // stdout belongs to the session; logs go to stderr.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let project_dir = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .map_or_else(std::env::current_dir, Ok)
        .context("no project directory")?;
    let config = ShellConfig::from_env(project_dir.join("tmp"))?;

    let connector = Connector::new(&config, CrosstermTerminal::new(), spawn_stdin_reader())
        .with_banner(BannerStyle::from_env());
    let exit = connector.run().await?;
    tracing::debug!(?exit, "Detached from host shell");

    Ok(ExitCode::SUCCESS)
}
