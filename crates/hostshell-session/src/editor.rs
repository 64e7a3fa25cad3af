//! Host-side line discipline for raw client keystrokes.
//!
//! The client forwards its terminal in raw mode, so echo, erase and history
//! recall happen here. Output uses bare `\n`; the client maps it for its
//! terminal.

use hostshell_transport::protocol::sanitize_output;

/// Erase the current terminal line and return to column 0.
const CLEAR_LINE: &[u8] = b"\r\x1b[K";

/// What a chunk of input amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    /// A submitted line, without its terminator.
    Line(String),
    /// Ctrl-C: the line was discarded.
    Interrupt,
    /// Ctrl-D on an empty line.
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    Esc,
    Csi,
    Ss3,
}

/// Line editor state for one session.
#[derive(Debug)]
pub struct LineEditor {
    prompt: String,
    buffer: String,
    utf8: Vec<u8>,
    escape: Escape,
    skip_lf: bool,
    recall: Option<usize>,
    stash: String,
}

impl LineEditor {
    /// The prompt is stored without sentinel markers, like all output.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: sanitize_output(&prompt.into()),
            buffer: String::new(),
            utf8: Vec::new(),
            escape: Escape::None,
            skip_lf: false,
            recall: None,
            stash: String::new(),
        }
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Text typed so far on the current line.
    #[must_use]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Process input up to and including the first completed event.
    ///
    /// Echo and redraw bytes are appended to `echo`. Returns how many bytes
    /// of `input` were consumed and the event, if one completed; unconsumed
    /// bytes belong to the next line.
    pub fn feed(
        &mut self,
        input: &[u8],
        history: &[String],
        echo: &mut Vec<u8>,
    ) -> (usize, Option<EditorEvent>) {
        for (i, &byte) in input.iter().enumerate() {
            if let Some(event) = self.byte(byte, history, echo) {
                return (i + 1, Some(event));
            }
        }
        (input.len(), None)
    }

    fn byte(&mut self, byte: u8, history: &[String], echo: &mut Vec<u8>) -> Option<EditorEvent> {
        let skip_lf = std::mem::take(&mut self.skip_lf);

        match self.escape {
            Escape::Esc => {
                self.escape = match byte {
                    b'[' => Escape::Csi,
                    b'O' => Escape::Ss3,
                    _ => Escape::None,
                };
                return None;
            }
            Escape::Csi | Escape::Ss3 => {
                // Parameter and intermediate bytes until the final byte.
                if (0x40..=0x7e).contains(&byte) {
                    self.escape = Escape::None;
                    match byte {
                        b'A' => self.recall_older(history, echo),
                        b'B' => self.recall_newer(history, echo),
                        _ => {}
                    }
                }
                return None;
            }
            Escape::None => {}
        }

        match byte {
            b'\r' => {
                self.skip_lf = true;
                Some(self.submit(echo))
            }
            b'\n' if skip_lf => None,
            b'\n' => Some(self.submit(echo)),
            0x7f | 0x08 => {
                if self.buffer.pop().is_some() {
                    self.redraw(echo);
                }
                None
            }
            0x03 => {
                echo.extend_from_slice(b"^C\n");
                self.reset_line();
                Some(EditorEvent::Interrupt)
            }
            0x04 if self.buffer.is_empty() => {
                echo.push(b'\n');
                self.reset_line();
                Some(EditorEvent::Eof)
            }
            0x15 => {
                self.buffer.clear();
                self.redraw(echo);
                None
            }
            0x1b => {
                self.escape = Escape::Esc;
                None
            }
            // Tab and the remaining control bytes are not ours to handle.
            0x00..=0x1f => None,
            _ => {
                self.utf8.push(byte);
                match std::str::from_utf8(&self.utf8) {
                    Ok(text) => {
                        self.buffer.push_str(text);
                        echo.extend_from_slice(&self.utf8);
                        self.utf8.clear();
                    }
                    Err(e) if e.error_len().is_none() => {}
                    Err(_) => self.utf8.clear(),
                }
                None
            }
        }
    }

    fn submit(&mut self, echo: &mut Vec<u8>) -> EditorEvent {
        echo.push(b'\n');
        let line = std::mem::take(&mut self.buffer);
        self.reset_line();
        EditorEvent::Line(line)
    }

    fn reset_line(&mut self) {
        self.buffer.clear();
        self.utf8.clear();
        self.recall = None;
        self.stash.clear();
    }

    fn recall_older(&mut self, history: &[String], echo: &mut Vec<u8>) {
        if history.is_empty() {
            return;
        }
        let index = match self.recall {
            None => {
                self.stash = std::mem::take(&mut self.buffer);
                history.len() - 1
            }
            Some(i) => i.saturating_sub(1),
        };
        self.recall = Some(index);
        self.buffer = sanitize_output(&history[index]);
        self.redraw(echo);
    }

    fn recall_newer(&mut self, history: &[String], echo: &mut Vec<u8>) {
        let Some(current) = self.recall else {
            return;
        };
        if current + 1 < history.len() {
            self.recall = Some(current + 1);
            self.buffer = sanitize_output(&history[current + 1]);
        } else {
            self.recall = None;
            self.buffer = std::mem::take(&mut self.stash);
        }
        self.redraw(echo);
    }

    fn redraw(&self, echo: &mut Vec<u8>) {
        echo.extend_from_slice(CLEAR_LINE);
        echo.extend_from_slice(self.prompt.as_bytes());
        echo.extend_from_slice(self.buffer.as_bytes());
    }
}
