//! Shell endpoint and client configuration.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name of the rendezvous socket inside the project directory.
pub const SOCKET_FILE_NAME: &str = "shell.sock";

/// File name of the shared command history inside the project directory.
pub const HISTORY_FILE_NAME: &str = "shell-history";

/// Fixed delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 100;

/// Prompt shown before every input line.
pub const DEFAULT_PROMPT: &str = "> ";

pub const ENV_PROJECT_DIR: &str = "HOSTSHELL_DIR";
pub const ENV_SOCKET: &str = "HOSTSHELL_SOCKET";
pub const ENV_HISTORY: &str = "HOSTSHELL_HISTORY";
pub const ENV_RECONNECT_MS: &str = "HOSTSHELL_RECONNECT_MS";
pub const ENV_PROMPT: &str = "HOSTSHELL_PROMPT";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

/// Settings shared by the host and the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Well-known rendezvous socket.
    pub socket_path: PathBuf,

    /// Append-only history log.
    pub history_path: PathBuf,

    /// Client reconnect delay in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Prompt written before each input line.
    #[serde(default = "default_prompt")]
    pub prompt: String,
}

const fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

impl ShellConfig {
    /// Conventional layout inside a project-local directory.
    #[must_use]
    pub fn for_project_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            socket_path: dir.join(SOCKET_FILE_NAME),
            history_path: dir.join(HISTORY_FILE_NAME),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            prompt: default_prompt(),
        }
    }

    /// Build from the process environment, falling back to `default_dir`.
    ///
    /// # Errors
    /// Returns error if a numeric override does not parse.
    pub fn from_env(default_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_lookup(default_dir, |var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup.
    ///
    /// # Errors
    /// Returns error if a numeric override does not parse.
    pub fn from_lookup<F>(default_dir: impl AsRef<Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let dir = lookup(ENV_PROJECT_DIR)
            .filter(|d| !d.is_empty())
            .map_or_else(|| default_dir.as_ref().to_path_buf(), PathBuf::from);
        let mut config = Self::for_project_dir(dir);

        if let Some(socket) = lookup(ENV_SOCKET).filter(|s| !s.is_empty()) {
            config.socket_path = PathBuf::from(socket);
        }
        if let Some(history) = lookup(ENV_HISTORY).filter(|s| !s.is_empty()) {
            config.history_path = PathBuf::from(history);
        }
        if let Some(raw) = lookup(ENV_RECONNECT_MS) {
            config.reconnect_delay_ms =
                raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    var: ENV_RECONNECT_MS,
                    value: raw.clone(),
                })?;
        }
        if let Some(prompt) = lookup(ENV_PROMPT) {
            config.prompt = prompt;
        }

        tracing::debug!(
            socket = %config.socket_path.display(),
            history = %config.history_path.display(),
            reconnect_delay_ms = config.reconnect_delay_ms,
            "Resolved shell config"
        );
        Ok(config)
    }

    /// Reconnect delay as a duration.
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
