//! Reconnecting client connector.
//!
//! Drives `disconnected → connecting → connected → (disconnected | exiting)`:
//! a stream that closes after the exit sentinel ends the client, anything
//! else schedules one reconnect after a fixed delay.

use std::{path::PathBuf, pin::Pin, time::Duration};

use bytes::Bytes;
use hostshell_core::ShellConfig;
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
    sync::mpsc,
    time::Sleep,
};

use crate::{
    endpoint::{self, DialFailure},
    protocol::LineScanner,
    terminal::{BannerStyle, ClientTerminal},
};

/// Status shown while the host is unreachable.
pub const WAITING_STATUS: &str = "Waiting for host shell to come back...";

/// End-of-transmission, sent when local stdin closes.
const EOT: u8 = 0x04;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal; the client is about to exit.
    Exiting,
}

/// Why the client stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
    /// The host ended the session and sent the exit sentinel.
    Stopped,
    /// The endpoint vanished after the first attempt: torn down on purpose.
    EndpointRemoved,
}

/// What to do after a dial failure or a closed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Reconnect,
    Exit(ClientExit),
}

/// Connector error.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("terminal error: {0}")]
    Terminal(#[from] std::io::Error),
}

/// Pure transition logic of the connector.
#[derive(Debug)]
pub struct ConnectionTracker {
    state: ConnectionState,
    first_attempt: bool,
    attempts: u64,
    connections: u64,
    exit: Option<ClientExit>,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTracker {
    /// A tracker that has never dialed.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            first_attempt: true,
            attempts: 0,
            connections: 0,
            exit: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Dial attempts started so far.
    #[must_use]
    pub const fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Successful connections so far.
    #[must_use]
    pub const fn connections(&self) -> u64 {
        self.connections
    }

    /// Why the client is exiting, once it is.
    #[must_use]
    pub const fn exit(&self) -> Option<ClientExit> {
        self.exit
    }

    /// Enter `connecting`. Returns false, changing nothing, when already
    /// connected or exiting.
    pub const fn begin_attempt(&mut self) -> bool {
        match self.state {
            ConnectionState::Connected | ConnectionState::Exiting => false,
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                self.state = ConnectionState::Connecting;
                self.attempts += 1;
                true
            }
        }
    }

    pub const fn on_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.first_attempt = false;
        self.connections += 1;
    }

    /// Apply the reconnect policy to a failed dial.
    ///
    /// A refused connection is always retried. A missing endpoint is retried
    /// only on the very first attempt, when the host may still be starting.
    pub const fn on_dial_failed(&mut self, failure: DialFailure) -> NextStep {
        let first = self.first_attempt;
        self.first_attempt = false;
        match failure {
            DialFailure::Missing if !first => self.exiting(ClientExit::EndpointRemoved),
            DialFailure::Missing | DialFailure::Refused | DialFailure::Other => {
                self.state = ConnectionState::Disconnected;
                NextStep::Reconnect
            }
        }
    }

    /// Apply the exit protocol to a closed connection.
    pub const fn on_closed(&mut self, saw_exit: bool) -> NextStep {
        if saw_exit {
            self.exiting(ClientExit::Stopped)
        } else {
            self.state = ConnectionState::Disconnected;
            NextStep::Reconnect
        }
    }

    const fn exiting(&mut self, exit: ClientExit) -> NextStep {
        self.state = ConnectionState::Exiting;
        self.exit = Some(exit);
        NextStep::Exit(exit)
    }
}

/// Fixed-delay reconnect timer with at most one pending deadline.
#[derive(Debug)]
pub struct ReconnectTimer {
    delay: Duration,
    pending: Option<Pin<Box<Sleep>>>,
}

impl ReconnectTimer {
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Arm the timer. Returns false if a deadline was already pending, in
    /// which case the request is folded into it.
    pub fn schedule(&mut self) -> bool {
        if self.pending.is_some() {
            tracing::trace!("Reconnect already scheduled");
            return false;
        }
        self.pending = Some(Box::pin(tokio::time::sleep(self.delay)));
        true
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop the pending deadline.
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Wait for the pending deadline, if any, and disarm.
    pub async fn fired(&mut self) {
        if let Some(sleep) = self.pending.as_mut() {
            sleep.await;
        }
        self.pending = None;
    }
}

/// Attaches a local terminal to the host's shell endpoint.
pub struct Connector<T: ClientTerminal> {
    socket_path: PathBuf,
    tracker: ConnectionTracker,
    timer: ReconnectTimer,
    terminal: T,
    input: mpsc::Receiver<Bytes>,
    input_open: bool,
    banner: BannerStyle,
}

impl<T: ClientTerminal> Connector<T> {
    /// Create a connector; `input` carries local keystrokes.
    #[must_use]
    pub fn new(config: &ShellConfig, terminal: T, input: mpsc::Receiver<Bytes>) -> Self {
        Self {
            socket_path: config.socket_path.clone(),
            tracker: ConnectionTracker::new(),
            timer: ReconnectTimer::new(config.reconnect_delay()),
            terminal,
            input,
            input_open: true,
            banner: BannerStyle::default(),
        }
    }

    /// Choose the welcome banner.
    #[must_use]
    pub const fn with_banner(mut self, banner: BannerStyle) -> Self {
        self.banner = banner;
        self
    }

    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.tracker.state()
    }

    #[must_use]
    pub const fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Connect, reconnecting as needed, until the client should exit.
    ///
    /// # Errors
    /// Returns error if the local terminal cannot be written.
    pub async fn run(mut self) -> Result<ClientExit, ConnectorError> {
        loop {
            if let Some(exit) = self.connect().await? {
                return Ok(exit);
            }
            self.timer.fired().await;
        }
    }

    /// Make one connection attempt and, if it succeeds, serve it until it
    /// closes. A no-op while already connected; once exiting, returns the
    /// same exit again without dialing.
    ///
    /// Returns `Some` when the client should exit.
    ///
    /// # Errors
    /// Returns error if the local terminal cannot be written.
    pub async fn connect(&mut self) -> Result<Option<ClientExit>, ConnectorError> {
        if !self.tracker.begin_attempt() {
            return Ok(self.tracker.exit());
        }

        let step = match endpoint::dial(&self.socket_path).await {
            Ok(stream) => {
                self.timer.cancel();
                let reconnected = self.tracker.connections() > 0;
                self.tracker.on_connected();
                tracing::debug!(path = %self.socket_path.display(), "Connected to host shell");

                self.terminal.clear_status()?;
                self.terminal.show_banner(self.banner)?;
                if let Err(e) = self.terminal.enter_raw() {
                    tracing::warn!(error = %e, "Could not enable raw mode");
                }

                let saw_exit = self.pipe(stream, reconnected).await;

                // Unwired by now; restore the terminal before anything else.
                if let Err(e) = self.terminal.leave_raw() {
                    tracing::warn!(error = %e, "Could not restore terminal mode");
                }
                self.tracker.on_closed(saw_exit)
            }
            Err(e) => {
                let failure = DialFailure::classify(&e);
                tracing::debug!(?failure, error = %e, "Dial failed");
                self.tracker.on_dial_failed(failure)
            }
        };

        match step {
            NextStep::Reconnect => {
                self.terminal.show_status(WAITING_STATUS)?;
                self.timer.schedule();
                Ok(None)
            }
            NextStep::Exit(exit) => {
                tracing::debug!(?exit, "Client exiting");
                Ok(Some(exit))
            }
        }
    }

    /// Pipe input to the stream and output to the terminal until the stream
    /// closes. Returns whether the exit sentinel ended the stream.
    async fn pipe(&mut self, stream: UnixStream, reconnected: bool) -> bool {
        let (mut reader, mut writer) = stream.into_split();
        let mut scanner = LineScanner::new();
        let mut buf = vec![0u8; 4096];

        if reconnected {
            // Keystrokes typed while disconnected belong to no session.
            while self.input.try_recv().is_ok() {}
        }

        // Stdin already ended: every later session gets the same Ctrl-D.
        if !self.input_open {
            if let Err(e) = writer.write_all(&[EOT]).await {
                tracing::debug!(error = %e, "Connection write failed");
                return false;
            }
        }

        loop {
            tokio::select! {
                read = reader.read(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(n) => {
                        let display = scanner.feed(&buf[..n]);
                        if let Err(e) = self.terminal.write_output(&display) {
                            tracing::warn!(error = %e, "Terminal write failed");
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Connection read failed");
                        break;
                    }
                },
                input = self.input.recv(), if self.input_open => {
                    let bytes = match input {
                        Some(bytes) => bytes,
                        None => {
                            // Local stdin is done; ask the host to end the session.
                            self.input_open = false;
                            Bytes::from_static(&[EOT])
                        }
                    };
                    if let Err(e) = writer.write_all(&bytes).await {
                        tracing::debug!(error = %e, "Connection write failed");
                        break;
                    }
                }
            }
        }

        scanner.saw_exit()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncBufReadExt;

    use super::*;
    use crate::{
        endpoint::Endpoint,
        protocol::sentinel_line,
        terminal::MemoryTerminal,
    };

    #[test]
    fn test_refused_always_retries() {
        let mut tracker = ConnectionTracker::new();
        for _ in 0..5 {
            assert!(tracker.begin_attempt());
            assert_eq!(tracker.on_dial_failed(DialFailure::Refused), NextStep::Reconnect);
            assert_eq!(tracker.state(), ConnectionState::Disconnected);
        }
        assert_eq!(tracker.attempts(), 5);
    }

    #[test]
    fn test_missing_retries_only_on_first_attempt() {
        let mut tracker = ConnectionTracker::new();
        tracker.begin_attempt();
        assert_eq!(tracker.on_dial_failed(DialFailure::Missing), NextStep::Reconnect);
        tracker.begin_attempt();
        assert_eq!(
            tracker.on_dial_failed(DialFailure::Missing),
            NextStep::Exit(ClientExit::EndpointRemoved)
        );
        assert_eq!(tracker.state(), ConnectionState::Exiting);
        assert_eq!(tracker.exit(), Some(ClientExit::EndpointRemoved));
        assert!(!tracker.begin_attempt());
    }

    #[test]
    fn test_missing_after_connection_exits() {
        let mut tracker = ConnectionTracker::new();
        tracker.begin_attempt();
        tracker.on_connected();
        assert_eq!(tracker.on_closed(false), NextStep::Reconnect);
        tracker.begin_attempt();
        assert_eq!(
            tracker.on_dial_failed(DialFailure::Missing),
            NextStep::Exit(ClientExit::EndpointRemoved)
        );
    }

    #[test]
    fn test_sentinel_close_exits() {
        let mut tracker = ConnectionTracker::new();
        tracker.begin_attempt();
        tracker.on_connected();
        assert_eq!(tracker.on_closed(true), NextStep::Exit(ClientExit::Stopped));
        assert_eq!(tracker.state(), ConnectionState::Exiting);
        assert_eq!(tracker.exit(), Some(ClientExit::Stopped));
    }

    #[test]
    fn test_begin_attempt_is_noop_when_connected() {
        let mut tracker = ConnectionTracker::new();
        assert!(tracker.begin_attempt());
        tracker.on_connected();
        assert!(!tracker.begin_attempt());
        assert_eq!(tracker.attempts(), 1);
        assert_eq!(tracker.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_coalesces_requests() {
        let mut timer = ReconnectTimer::new(Duration::from_millis(100));
        assert!(timer.schedule());
        assert!(!timer.schedule());
        assert!(!timer.schedule());
        assert!(timer.is_pending());

        let start = tokio::time::Instant::now();
        timer.fired().await;
        assert_eq!(start.elapsed(), Duration::from_millis(100));
        assert!(!timer.is_pending());

        // Nothing pending: returns at once.
        timer.fired().await;
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_cancel() {
        let mut timer = ReconnectTimer::new(Duration::from_secs(10));
        timer.schedule();
        timer.cancel();
        assert!(!timer.is_pending());
        assert!(timer.schedule());
    }

    fn connector(dir: &tempfile::TempDir) -> (Connector<MemoryTerminal>, MemoryTerminal, mpsc::Sender<Bytes>) {
        let config = ShellConfig::for_project_dir(dir.path());
        let term = MemoryTerminal::new();
        let (tx, rx) = mpsc::channel(8);
        (Connector::new(&config, term.clone(), rx), term, tx)
    }

    #[tokio::test]
    async fn test_sentinel_stops_client() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::bind(dir.path().join("shell.sock")).unwrap();
        let (connector, term, _tx) = connector(&dir);

        let host = tokio::spawn(async move {
            let (_id, mut stream) = endpoint.accept().await.unwrap();
            stream.write_all(b"hello\n").await.unwrap();
            stream.write_all(&sentinel_line()).await.unwrap();
        });

        let exit = connector.run().await.unwrap();
        host.await.unwrap();

        assert_eq!(exit, ClientExit::Stopped);
        let rec = term.snapshot();
        assert_eq!(rec.output_text(), "hello\nShell exiting...\n");
        assert_eq!(rec.banners, 1);
        assert!(rec.statuses.is_empty());
        assert!(!rec.raw);
    }

    #[tokio::test]
    async fn test_close_without_sentinel_reconnects_once() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::bind(dir.path().join("shell.sock")).unwrap();
        let (connector, term, _tx) = connector(&dir);

        let host = tokio::spawn(async move {
            let (_id, first) = endpoint.accept().await.unwrap();
            drop(first);
            let (_id, mut second) = endpoint.accept().await.unwrap();
            second.write_all(&sentinel_line()).await.unwrap();
        });

        let exit = connector.run().await.unwrap();
        host.await.unwrap();

        assert_eq!(exit, ClientExit::Stopped);
        let rec = term.snapshot();
        assert_eq!(rec.statuses, vec![WAITING_STATUS.to_string()]);
        assert_eq!(rec.banners, 2);
        assert_eq!(rec.raw_entries, 2);
        assert!(rec.current_status.is_none());
    }

    #[tokio::test]
    async fn test_refused_retries_until_listener_appears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shell.sock");
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        let (connector, term, _tx) = connector(&dir);

        let client = tokio::spawn(connector.run());
        tokio::time::sleep(Duration::from_millis(350)).await;
        let waiting = term.snapshot();
        assert!(waiting.statuses.len() >= 2, "retries every ~100ms: {:?}", waiting.statuses);
        assert_eq!(waiting.current_status.as_deref(), Some(WAITING_STATUS));

        let endpoint = Endpoint::bind(&path).unwrap();
        let (_id, mut stream) = endpoint.accept().await.unwrap();
        stream.write_all(&sentinel_line()).await.unwrap();
        drop(stream);

        assert_eq!(client.await.unwrap().unwrap(), ClientExit::Stopped);
        let rec = term.snapshot();
        assert!(rec.current_status.is_none());
        assert_eq!(rec.banners, 1);
    }

    #[tokio::test]
    async fn test_missing_endpoint_retries_once_then_exits() {
        let dir = tempfile::tempdir().unwrap();
        let (connector, term, _tx) = connector(&dir);

        let exit = connector.run().await.unwrap();

        assert_eq!(exit, ClientExit::EndpointRemoved);
        assert_eq!(term.snapshot().statuses.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_after_exit_repeats_exit() {
        let dir = tempfile::tempdir().unwrap();
        let (mut connector, _term, _tx) = connector(&dir);

        assert_eq!(connector.connect().await.unwrap(), None);
        assert_eq!(
            connector.connect().await.unwrap(),
            Some(ClientExit::EndpointRemoved)
        );
        assert_eq!(
            connector.connect().await.unwrap(),
            Some(ClientExit::EndpointRemoved)
        );
        assert_eq!(connector.tracker().attempts(), 2);
        assert_eq!(connector.state(), ConnectionState::Exiting);
    }

    #[tokio::test]
    async fn test_vanished_endpoint_exits_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::bind(dir.path().join("shell.sock")).unwrap();
        let (connector, term, _tx) = connector(&dir);

        let host = tokio::spawn(async move {
            let (_id, stream) = endpoint.accept().await.unwrap();
            endpoint.unbind().unwrap();
            drop(stream);
        });

        let exit = connector.run().await.unwrap();
        host.await.unwrap();

        assert_eq!(exit, ClientExit::EndpointRemoved);
        assert_eq!(term.snapshot().banners, 1);
    }

    #[tokio::test]
    async fn test_input_is_forwarded_and_eof_sends_eot() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::bind(dir.path().join("shell.sock")).unwrap();
        let (connector, _term, tx) = connector(&dir);

        tx.send(Bytes::from_static(b"1 + 1\n")).await.unwrap();
        drop(tx);

        let host = tokio::spawn(async move {
            let (_id, stream) = endpoint.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut reader = tokio::io::BufReader::new(reader);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let mut eot = [0u8; 1];
            reader.read_exact(&mut eot).await.unwrap();
            writer.write_all(&sentinel_line()).await.unwrap();
            (line, eot[0])
        });

        assert_eq!(connector.run().await.unwrap(), ClientExit::Stopped);
        let (line, eot) = host.await.unwrap();
        assert_eq!(line, "1 + 1\n");
        assert_eq!(eot, EOT);
    }

    #[tokio::test]
    async fn test_closed_stdin_ends_session_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::bind(dir.path().join("shell.sock")).unwrap();
        let (connector, term, tx) = connector(&dir);

        tx.send(Bytes::from_static(b"reload\r")).await.unwrap();
        drop(tx);

        async fn read_until_eot(stream: &mut UnixStream) -> Vec<u8> {
            let mut seen = Vec::new();
            let mut byte = [0u8; 1];
            while seen.last() != Some(&EOT) {
                stream.read_exact(&mut byte).await.unwrap();
                seen.push(byte[0]);
            }
            seen
        }

        let host = tokio::spawn(async move {
            // Sees the command and Ctrl-D, then closes as a restart would.
            let (_id, mut first) = endpoint.accept().await.unwrap();
            let before = read_until_eot(&mut first).await;
            drop(first);

            // The next session must still be ended by the client.
            let (_id, mut second) = endpoint.accept().await.unwrap();
            let after = read_until_eot(&mut second).await;
            second.write_all(&sentinel_line()).await.unwrap();
            (before, after)
        });

        let exit = tokio::time::timeout(Duration::from_secs(5), connector.run())
            .await
            .expect("client hung after restart")
            .unwrap();
        let (before, after) = host.await.unwrap();

        assert_eq!(exit, ClientExit::Stopped);
        assert_eq!(before, b"reload\r\x04");
        assert_eq!(after, [EOT]);
        assert_eq!(term.snapshot().banners, 2);
    }
}
