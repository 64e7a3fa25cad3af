//! Local terminal side of the client.

use std::{
    io,
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use tokio::{io::AsyncReadExt, sync::mpsc};

/// Environment variable whose presence marks a terminal with poor raw input.
pub const LIMITED_TERMINAL_ENV: &str = "INSIDE_EMACS";

/// Which welcome banner to show after connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BannerStyle {
    /// Regular terminal.
    #[default]
    Full,
    /// Terminal that mangles raw input; mention the completion caveat.
    Limited,
}

impl BannerStyle {
    /// Pick the style from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        if std::env::var_os(LIMITED_TERMINAL_ENV).is_some() {
            Self::Limited
        } else {
            Self::Full
        }
    }

    /// Banner lines, without line endings.
    #[must_use]
    pub const fn lines(self) -> &'static [&'static str] {
        match self {
            Self::Full => &[
                "Attached to host shell.",
                "Type `help` for commands, `exit` to detach, `reload` to restart the host.",
            ],
            Self::Limited => &[
                "Attached to host shell.",
                "Type `help` for commands, `exit` to detach, `reload` to restart the host.",
                "Note: this terminal does not pass raw keystrokes; history keys and completion may not work.",
            ],
        }
    }
}

/// Operations the connector needs from the local terminal.
pub trait ClientTerminal: Send {
    /// Switch to raw passthrough.
    ///
    /// # Errors
    /// Returns error if the terminal mode cannot be changed.
    fn enter_raw(&mut self) -> io::Result<()>;

    /// Restore the mode saved by [`ClientTerminal::enter_raw`].
    ///
    /// # Errors
    /// Returns error if the terminal mode cannot be changed.
    fn leave_raw(&mut self) -> io::Result<()>;

    /// Print the welcome banner.
    ///
    /// # Errors
    /// Returns error if writing fails.
    fn show_banner(&mut self, style: BannerStyle) -> io::Result<()>;

    /// Show a status message, overwriting the previous one in place.
    ///
    /// # Errors
    /// Returns error if writing fails.
    fn show_status(&mut self, message: &str) -> io::Result<()>;

    /// Erase the status line, if one is shown.
    ///
    /// # Errors
    /// Returns error if writing fails.
    fn clear_status(&mut self) -> io::Result<()>;

    /// Write session output.
    ///
    /// # Errors
    /// Returns error if writing fails.
    fn write_output(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Spawn a task forwarding stdin chunks over a channel.
///
/// The channel outlives individual connections; the receiver sees `None`
/// once stdin reaches EOF.
#[must_use]
pub fn spawn_stdin_reader() -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = vec![0u8; 1024];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    });
    rx
}

/// Everything a [`MemoryTerminal`] was asked to do.
#[derive(Debug, Default, Clone)]
pub struct Recording {
    /// Session output, concatenated.
    pub output: Vec<u8>,
    /// Every status message shown, in order.
    pub statuses: Vec<String>,
    /// Status currently on screen.
    pub current_status: Option<String>,
    /// Number of banners printed.
    pub banners: usize,
    /// Whether the terminal is in raw mode right now.
    pub raw: bool,
    /// Number of raw-mode entries.
    pub raw_entries: usize,
}

impl Recording {
    /// Output as lossy UTF-8.
    #[must_use]
    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Headless terminal that records what the connector does.
///
/// Clones share one recording, so a test can keep a handle while the
/// connector owns the terminal.
#[derive(Debug, Default, Clone)]
pub struct MemoryTerminal {
    recording: Arc<Mutex<Recording>>,
}

impl MemoryTerminal {
    /// Create an empty terminal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recording.
    #[must_use]
    pub fn snapshot(&self) -> Recording {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recording> {
        self.recording
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl ClientTerminal for MemoryTerminal {
    fn enter_raw(&mut self) -> io::Result<()> {
        let mut rec = self.lock();
        rec.raw = true;
        rec.raw_entries += 1;
        Ok(())
    }

    fn leave_raw(&mut self) -> io::Result<()> {
        self.lock().raw = false;
        Ok(())
    }

    fn show_banner(&mut self, _style: BannerStyle) -> io::Result<()> {
        self.lock().banners += 1;
        Ok(())
    }

    fn show_status(&mut self, message: &str) -> io::Result<()> {
        let mut rec = self.lock();
        rec.statuses.push(message.to_string());
        rec.current_status = Some(message.to_string());
        Ok(())
    }

    fn clear_status(&mut self) -> io::Result<()> {
        self.lock().current_status = None;
        Ok(())
    }

    fn write_output(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.lock().output.extend_from_slice(bytes);
        Ok(())
    }
}

#[cfg(feature = "terminal")]
pub use self::crossterm_terminal::CrosstermTerminal;

#[cfg(feature = "terminal")]
mod crossterm_terminal {
    use std::io::{self, Stdout, Write};

    use crossterm::{
        cursor::MoveToColumn,
        queue,
        style::Print,
        terminal::{Clear, ClearType, disable_raw_mode, enable_raw_mode},
    };

    use super::{BannerStyle, ClientTerminal};

    /// The process's real terminal on stdout.
    pub struct CrosstermTerminal {
        out: Stdout,
        raw: bool,
        status_shown: bool,
    }

    impl CrosstermTerminal {
        /// Wrap stdout.
        #[must_use]
        pub fn new() -> Self {
            Self {
                out: io::stdout(),
                raw: false,
                status_shown: false,
            }
        }
    }

    impl Default for CrosstermTerminal {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ClientTerminal for CrosstermTerminal {
        fn enter_raw(&mut self) -> io::Result<()> {
            if !self.raw {
                enable_raw_mode()?;
                self.raw = true;
            }
            Ok(())
        }

        fn leave_raw(&mut self) -> io::Result<()> {
            if self.raw {
                disable_raw_mode()?;
                self.raw = false;
            }
            Ok(())
        }

        fn show_banner(&mut self, style: BannerStyle) -> io::Result<()> {
            for line in style.lines() {
                queue!(self.out, Print(line), Print("\r\n"))?;
            }
            self.out.flush()
        }

        fn show_status(&mut self, message: &str) -> io::Result<()> {
            queue!(
                self.out,
                MoveToColumn(0),
                Clear(ClearType::CurrentLine),
                Print(message)
            )?;
            self.status_shown = true;
            self.out.flush()
        }

        fn clear_status(&mut self) -> io::Result<()> {
            if self.status_shown {
                queue!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
                self.status_shown = false;
                self.out.flush()?;
            }
            Ok(())
        }

        fn write_output(&mut self, bytes: &[u8]) -> io::Result<()> {
            if self.raw {
                // Raw mode turns off output post-processing.
                for chunk in bytes.split_inclusive(|b| *b == b'\n') {
                    match chunk.strip_suffix(b"\n") {
                        Some(line) => {
                            self.out.write_all(line)?;
                            self.out.write_all(b"\r\n")?;
                        }
                        None => self.out.write_all(chunk)?,
                    }
                }
            } else {
                self.out.write_all(bytes)?;
            }
            self.out.flush()
        }
    }

    impl Drop for CrosstermTerminal {
        fn drop(&mut self) {
            if self.raw {
                let _ = disable_raw_mode();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limited_banner_mentions_caveat() {
        assert!(BannerStyle::Limited.lines().len() > BannerStyle::Full.lines().len());
        assert!(
            BannerStyle::Limited
                .lines()
                .iter()
                .any(|l| l.contains("completion"))
        );
    }

    #[test]
    fn test_memory_terminal_shares_recording() {
        let term = MemoryTerminal::new();
        let mut owned = term.clone();
        owned.enter_raw().unwrap();
        owned.show_status("waiting").unwrap();
        owned.write_output(b"hi\n").unwrap();

        let rec = term.snapshot();
        assert!(rec.raw);
        assert_eq!(rec.current_status.as_deref(), Some("waiting"));
        assert_eq!(rec.output_text(), "hi\n");

        owned.clear_status().unwrap();
        owned.leave_raw().unwrap();
        let rec = term.snapshot();
        assert!(!rec.raw);
        assert!(rec.current_status.is_none());
        assert_eq!(rec.statuses, vec!["waiting".to_string()]);
    }
}
