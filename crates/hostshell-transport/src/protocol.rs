//! Line-oriented wire protocol between host and client.
//!
//! The stream carries plain interactive text. The only control message is
//! the exit sentinel: a complete line the host writes right before closing a
//! session it ended on purpose. The line starts with an ASCII record
//! separator that the host strips from all other output, so evaluator output
//! can never forge it.

/// Marker byte that only ever appears at the start of the sentinel line.
pub const SENTINEL_MARKER: u8 = 0x1e;

/// Human-readable part of the sentinel line.
pub const EXIT_SENTINEL: &str = "Shell exiting...";

/// The full sentinel line as written on the wire.
#[must_use]
pub fn sentinel_line() -> Vec<u8> {
    let mut line = Vec::with_capacity(EXIT_SENTINEL.len() + 2);
    line.push(SENTINEL_MARKER);
    line.extend_from_slice(EXIT_SENTINEL.as_bytes());
    line.push(b'\n');
    line
}

/// Remove sentinel markers from text about to be sent as ordinary output.
#[must_use]
pub fn sanitize_output(text: &str) -> String {
    text.replace(char::from(SENTINEL_MARKER), "")
}

/// Client-side scanner that watches line boundaries for the sentinel.
#[derive(Debug, Default)]
pub struct LineScanner {
    partial: Vec<u8>,
    last_line_was_sentinel: bool,
}

impl LineScanner {
    /// Create a new scanner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume an output chunk and return the bytes to display.
    ///
    /// Marker bytes are dropped from the display copy; the sentinel's text
    /// is shown like any other line.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut display = Vec::with_capacity(chunk.len());
        for &byte in chunk {
            if byte == b'\n' {
                let line = self.partial.strip_suffix(b"\r").unwrap_or(self.partial.as_slice());
                self.last_line_was_sentinel = line.first() == Some(&SENTINEL_MARKER)
                    && &line[1..] == EXIT_SENTINEL.as_bytes();
                self.partial.clear();
            } else {
                self.partial.push(byte);
            }
            if byte != SENTINEL_MARKER {
                display.push(byte);
            }
        }
        display
    }

    /// Whether the stream, if it closed now, ended with the sentinel.
    #[must_use]
    pub fn saw_exit(&self) -> bool {
        self.last_line_was_sentinel && self.partial.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_as_last_line() {
        let mut scanner = LineScanner::new();
        let mut stream = b"> exit\n".to_vec();
        stream.extend(sentinel_line());
        let display = scanner.feed(&stream);
        assert!(scanner.saw_exit());
        assert_eq!(display, b"> exit\nShell exiting...\n");
    }

    #[test]
    fn test_sentinel_split_across_chunks() {
        let mut scanner = LineScanner::new();
        let line = sentinel_line();
        let (head, tail) = line.split_at(7);
        scanner.feed(b"bye\n");
        scanner.feed(head);
        assert!(!scanner.saw_exit());
        scanner.feed(tail);
        assert!(scanner.saw_exit());
    }

    #[test]
    fn test_plain_text_is_not_sentinel() {
        let mut scanner = LineScanner::new();
        scanner.feed(b"Shell exiting...\n");
        assert!(!scanner.saw_exit());
    }

    #[test]
    fn test_output_after_sentinel_clears_it() {
        let mut scanner = LineScanner::new();
        scanner.feed(&sentinel_line());
        scanner.feed(b"> ");
        assert!(!scanner.saw_exit());
        scanner.feed(b"still here\n");
        assert!(!scanner.saw_exit());
    }

    #[test]
    fn test_crlf_sentinel() {
        let mut scanner = LineScanner::new();
        let mut line = sentinel_line();
        line.insert(line.len() - 1, b'\r');
        scanner.feed(&line);
        assert!(scanner.saw_exit());
    }

    #[test]
    fn test_sanitized_output_cannot_forge_sentinel() {
        let forged = String::from_utf8(sentinel_line()).unwrap();
        let mut scanner = LineScanner::new();
        scanner.feed(sanitize_output(&forged).as_bytes());
        assert!(!scanner.saw_exit());
    }
}
