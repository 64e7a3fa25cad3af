//! Interactive loop for one attached session.

use std::{fmt::Write as _, panic::AssertUnwindSafe, sync::Arc};

use bytes::Bytes;
use futures::FutureExt;
use hostshell_core::{CommandHelp, EvalContext, Evaluator, SessionId};
use hostshell_transport::protocol::sanitize_output;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
};

use crate::{
    editor::{EditorEvent, LineEditor},
    history::HistorySession,
};

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// `exit`/`quit`, Ctrl-D, or the evaluator asked to stop.
    Quit,
    /// `reload`/`restart`: the whole host should restart.
    Restart,
    /// The client went away.
    Disconnected,
    /// The host detached the session.
    Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Exit,
    Restart,
    Help,
    History,
}

impl Builtin {
    fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "exit" | "quit" => Some(Self::Exit),
            "reload" | "restart" => Some(Self::Restart),
            "help" => Some(Self::Help),
            "history" => Some(Self::History),
            _ => None,
        }
    }
}

const BUILTINS: &[CommandHelp] = &[
    CommandHelp {
        usage: "exit, quit",
        summary: "End this session",
    },
    CommandHelp {
        usage: "reload, restart",
        summary: "Restart the host process",
    },
    CommandHelp {
        usage: "help",
        summary: "Show this help",
    },
    CommandHelp {
        usage: "history",
        summary: "List command history",
    },
];

/// Read-eval-print loop bound to one connection.
///
/// Output goes to `output` as chunks; the session's writer task owns the
/// actual stream.
pub struct Repl<E: Evaluator + ?Sized> {
    session_id: SessionId,
    evaluator: Arc<E>,
    ctx: EvalContext,
    history: HistorySession,
    editor: LineEditor,
    output: mpsc::UnboundedSender<Bytes>,
}

impl<E: Evaluator + ?Sized> Repl<E> {
    #[must_use]
    pub fn new(
        session_id: SessionId,
        evaluator: Arc<E>,
        ctx: EvalContext,
        history: HistorySession,
        prompt: impl Into<String>,
        output: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        Self {
            session_id,
            evaluator,
            ctx,
            history,
            editor: LineEditor::new(prompt),
            output,
        }
    }

    #[must_use]
    pub const fn context(&self) -> &EvalContext {
        &self.ctx
    }

    /// Give up the history handle so the caller can close it.
    #[must_use]
    pub fn into_history(self) -> HistorySession {
        self.history
    }

    /// Run until the session ends.
    ///
    /// Lines are handled strictly in order: each is recorded, then
    /// evaluated, before the next prompt is written.
    pub async fn run<R: AsyncRead + Unpin>(&mut self, mut input: R) -> SessionEnd {
        let mut pending = Vec::new();
        let mut buf = vec![0u8; 1024];

        loop {
            self.send(self.editor.prompt().as_bytes().to_vec());

            let event = loop {
                if !pending.is_empty() {
                    let mut echo = Vec::new();
                    let (used, event) =
                        self.editor
                            .feed(&pending, self.history.entries(), &mut echo);
                    pending.drain(..used);
                    if !echo.is_empty() {
                        self.send(echo);
                    }
                    if let Some(event) = event {
                        break event;
                    }
                }
                match input.read(&mut buf).await {
                    Ok(0) => return SessionEnd::Disconnected,
                    Ok(n) => pending.extend_from_slice(&buf[..n]),
                    Err(e) => {
                        tracing::debug!(session_id = %self.session_id, error = %e, "Session read failed");
                        return SessionEnd::Disconnected;
                    }
                }
            };

            match event {
                EditorEvent::Interrupt => {}
                EditorEvent::Eof => return SessionEnd::Quit,
                EditorEvent::Line(line) => {
                    if let Some(end) = self.handle_line(&line).await {
                        return end;
                    }
                }
            }
        }
    }

    async fn handle_line(&mut self, line: &str) -> Option<SessionEnd> {
        if line.trim().is_empty() {
            return None;
        }

        if let Err(e) = self.history.record(line).await {
            tracing::warn!(session_id = %self.session_id, error = %e, "Failed to record history");
            self.send_text(&format!("warning: {e}"));
        }

        match Builtin::parse(line) {
            Some(Builtin::Exit) => return Some(SessionEnd::Quit),
            Some(Builtin::Restart) => return Some(SessionEnd::Restart),
            Some(Builtin::Help) => {
                self.send_text(&self.help_text());
                return None;
            }
            Some(Builtin::History) => {
                self.send_text(&self.history_text());
                return None;
            }
            None => {}
        }

        self.evaluate(line).await;
        self.ctx.exit_requested().then_some(SessionEnd::Quit)
    }

    async fn evaluate(&mut self, line: &str) {
        let result = AssertUnwindSafe(self.evaluator.eval(&mut self.ctx, line))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(Some(output))) => self.send_text(&output),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => self.send_text(&format!("error: {e}")),
            Err(_) => {
                tracing::error!(session_id = %self.session_id, line, "Evaluator panicked");
                self.send_text("error: evaluation panicked");
            }
        }
    }

    fn help_text(&self) -> String {
        let mut text = String::from("Built-in commands:\n");
        for cmd in BUILTINS {
            let _ = writeln!(text, "  {:<20} {}", cmd.usage, cmd.summary);
        }
        let extra = self.evaluator.commands();
        if !extra.is_empty() {
            text.push_str("Commands:\n");
            for cmd in extra {
                let _ = writeln!(text, "  {:<20} {}", cmd.usage, cmd.summary);
            }
        }
        text
    }

    fn history_text(&self) -> String {
        let mut text = String::new();
        for (i, entry) in self.history.entries().iter().enumerate() {
            let _ = writeln!(text, "{:>5}  {entry}", i + 1);
        }
        text
    }

    fn send_text(&self, text: &str) {
        let mut text = sanitize_output(text);
        if text.is_empty() {
            return;
        }
        if !text.ends_with('\n') {
            text.push('\n');
        }
        self.send(text.into_bytes());
    }

    fn send(&self, bytes: Vec<u8>) {
        // A closed channel means the writer is gone; the read side notices.
        let _ = self.output.send(Bytes::from(bytes));
    }
}
