//! Session host: accepts clients on the endpoint and runs one REPL per
//! connection on its own task.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use bytes::Bytes;
use hostshell_core::{EvalContext, Evaluator, SessionId, ShellConfig};
use hostshell_transport::{
    endpoint::{self, Endpoint, EndpointError},
    protocol::sentinel_line,
};
use tokio::{
    io::AsyncWriteExt,
    net::{UnixStream, unix::OwnedWriteHalf},
    sync::{RwLock, mpsc, oneshot, watch},
};

use crate::{
    history::{HistorySession, HistoryStore},
    repl::{Repl, SessionEnd},
};

/// Server error.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("endpoint error: {0}")]
    Endpoint(#[from] EndpointError),
}

/// Why [`ShellServer::serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostExit {
    /// A session asked for the host to restart.
    Restart,
    /// [`ServerHandle::shutdown`] was called.
    Shutdown,
}

/// Active session state.
struct ActiveSession {
    detach_tx: Option<oneshot::Sender<()>>,
}

type Registry = Arc<RwLock<HashMap<SessionId, ActiveSession>>>;

/// Owns the endpoint and serves shell sessions on it.
pub struct ShellServer<E: Evaluator + ?Sized> {
    endpoint: Endpoint,
    history: HistoryStore,
    evaluator: Arc<E>,
    prompt: String,
    working_dir: PathBuf,
    sessions: Registry,
    restart_tx: mpsc::UnboundedSender<SessionId>,
    restart_rx: mpsc::UnboundedReceiver<SessionId>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl<E: Evaluator + ?Sized + 'static> ShellServer<E> {
    /// Bind the endpoint from `config`.
    ///
    /// # Errors
    /// Returns error if the endpoint cannot be bound.
    pub fn bind(config: &ShellConfig, evaluator: Arc<E>) -> Result<Self, ServerError> {
        let endpoint = Endpoint::bind(&config.socket_path)?;
        let (restart_tx, restart_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            endpoint,
            history: HistoryStore::new(&config.history_path),
            evaluator,
            prompt: config.prompt.clone(),
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            restart_tx,
            restart_rx,
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }

    /// Like [`ShellServer::bind`], but a failure only disables the shell.
    #[must_use]
    pub fn try_bind(config: &ShellConfig, evaluator: Arc<E>) -> Option<Self> {
        match Self::bind(config, evaluator) {
            Ok(server) => Some(server),
            Err(e) => {
                tracing::error!(error = %e, "Interactive shell disabled for this run");
                None
            }
        }
    }

    /// Directory new sessions evaluate in.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Handle for shutting the server down from elsewhere.
    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            socket_path: self.endpoint.path().to_path_buf(),
            sessions: Arc::clone(&self.sessions),
            shutdown_tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Accept and serve sessions until a restart or shutdown.
    ///
    /// On restart every other session is detached without the sentinel and
    /// the endpoint file is left in place, so attached clients see their
    /// stream close and keep retrying until the next host binds.
    ///
    /// # Errors
    /// Currently infallible; accept errors are logged and retried.
    pub async fn serve(mut self) -> Result<HostExit, ServerError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = self.endpoint.accept() => match accepted {
                    Ok((session_id, stream)) => self.spawn_session(session_id, stream).await,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept shell client");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(session_id) = self.restart_rx.recv() => {
                    let detached = detach_all(&self.sessions).await;
                    tracing::info!(%session_id, detached, "Host restart requested");
                    return Ok(HostExit::Restart);
                }
                () = async {
                    // The borrow guard must not live in the select output.
                    let _ = shutdown_rx.wait_for(|stop| *stop).await;
                } => {
                    // Catch sessions accepted while the shutdown was underway.
                    detach_all(&self.sessions).await;
                    tracing::info!("Shell server shutting down");
                    return Ok(HostExit::Shutdown);
                }
            }
        }
    }

    async fn spawn_session(&self, session_id: SessionId, stream: UnixStream) {
        let stopping = *self.shutdown_tx.borrow();
        if stopping {
            tracing::debug!(%session_id, "Refusing session during shutdown");
            return;
        }

        let (detach_tx, detach_rx) = oneshot::channel();
        self.sessions.write().await.insert(
            session_id,
            ActiveSession {
                detach_tx: Some(detach_tx),
            },
        );

        let task = SessionTask {
            session_id,
            evaluator: Arc::clone(&self.evaluator),
            history: self.history.clone(),
            prompt: self.prompt.clone(),
            working_dir: self.working_dir.clone(),
            sessions: Arc::clone(&self.sessions),
            restart_tx: self.restart_tx.clone(),
        };
        tokio::spawn(task.run(stream, detach_rx));
    }
}

/// Everything one session needs, moved onto its task.
struct SessionTask<E: Evaluator + ?Sized> {
    session_id: SessionId,
    evaluator: Arc<E>,
    history: HistoryStore,
    prompt: String,
    working_dir: PathBuf,
    sessions: Registry,
    restart_tx: mpsc::UnboundedSender<SessionId>,
}

impl<E: Evaluator + ?Sized + 'static> SessionTask<E> {
    async fn run(self, stream: UnixStream, detach_rx: oneshot::Receiver<()>) {
        let session_id = self.session_id;
        tracing::info!(%session_id, "Shell session attached");

        let (reader, writer) = stream.into_split();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_loop(session_id, writer, output_rx));

        let history = match self.history.open().await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(%session_id, error = %e, "History unavailable for session");
                let _ = output_tx.send(Bytes::from(format!(
                    "warning: {e}; history will not be saved\n"
                )));
                HistorySession::in_memory()
            }
        };

        let mut repl = Repl::new(
            session_id,
            self.evaluator,
            EvalContext::new(self.working_dir),
            history,
            self.prompt,
            output_tx.clone(),
        );

        let end = tokio::select! {
            end = repl.run(reader) => end,
            Ok(()) = detach_rx => SessionEnd::Detached,
        };

        // The sentinel is the last thing written before the stream closes.
        if end == SessionEnd::Quit {
            let _ = output_tx.send(Bytes::from(sentinel_line()));
        }
        drop(output_tx);

        let history = repl.into_history();
        if let Err(e) = history.close().await {
            tracing::warn!(%session_id, error = %e, "Failed to close history");
        }
        if let Err(e) = writer_task.await {
            tracing::error!(%session_id, error = %e, "Session writer task failed");
        }

        self.sessions.write().await.remove(&session_id);
        tracing::info!(%session_id, ?end, "Shell session ended");

        if end == SessionEnd::Restart {
            let _ = self.restart_tx.send(session_id);
        }
    }
}

/// Drain session output to the stream, then close its write side.
async fn write_loop(
    session_id: SessionId,
    mut writer: OwnedWriteHalf,
    mut output_rx: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(chunk) = output_rx.recv().await {
        if let Err(e) = writer.write_all(&chunk).await {
            tracing::debug!(%session_id, error = %e, "Session write failed");
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        tracing::debug!(%session_id, error = %e, "Session shutdown failed");
    }
}

/// Signal every registered session to close without the sentinel.
async fn detach_all(sessions: &Registry) -> usize {
    let mut sessions = sessions.write().await;
    sessions
        .values_mut()
        .filter_map(|s| s.detach_tx.take())
        .filter(|tx| !tx.is_closed())
        .map(|tx| tx.send(()))
        .filter(Result::is_ok)
        .count()
}

/// Cloneable control handle for a running [`ShellServer`].
#[derive(Clone)]
pub struct ServerHandle {
    socket_path: PathBuf,
    sessions: Registry,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ServerHandle {
    /// Remove the endpoint, detach every session, and stop serving.
    ///
    /// Detached clients see their stream close without the sentinel and,
    /// finding the endpoint gone, exit.
    ///
    /// # Errors
    /// Returns error if the endpoint file cannot be removed; sessions are
    /// detached regardless.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        let unbound = endpoint::unbind(&self.socket_path);
        let detached = detach_all(&self.sessions).await;
        tracing::info!(detached, "Detached shell sessions");
        self.shutdown_tx.send_replace(true);
        unbound.map_err(Into::into)
    }

    /// Force one session to close.
    pub async fn detach(&self, session_id: SessionId) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions
            .get_mut(&session_id)
            .and_then(|s| s.detach_tx.take())
            .is_some_and(|tx| tx.send(()).is_ok())
    }

    /// Ids of attached sessions.
    pub async fn active_sessions(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().copied().collect()
    }
}
