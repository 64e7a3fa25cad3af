//! Session host and command history for host-attached shells.
//!
//! Provides:
//! - `ShellServer` - Accept clients and run one REPL task per connection
//! - `HistoryStore` - Durable, deduplicated history shared across sessions
//! - `LineEditor` - Host-side line discipline for raw client input

pub mod editor;
pub mod history;
pub mod repl;
pub mod server;

pub use editor::{EditorEvent, LineEditor};
pub use history::{HistoryError, HistorySession, HistoryStore};
pub use repl::{Repl, SessionEnd};
pub use server::{HostExit, ServerError, ServerHandle, ShellServer};
