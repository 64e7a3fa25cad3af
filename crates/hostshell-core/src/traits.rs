//! Core traits for command evaluation.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::EvalContext;

/// Session identifier.
pub type SessionId = Uuid;

/// Evaluator error.
///
/// Reported back to the attached client as session output; never closes the
/// connection.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("{0}")]
    Failed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One line of `help` output advertised by an evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHelp {
    /// Usage, e.g. `set NAME VALUE`.
    pub usage: &'static str,
    /// Short description.
    pub summary: &'static str,
}

/// Trait for command evaluators.
///
/// Implementations may suspend for as long as they need (waiting on I/O,
/// timers, other tasks); each session awaits its evaluator on its own task,
/// so a slow command never stalls other sessions or the accept loop.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Evaluate one submitted command line.
    ///
    /// Returns the text to show the user, or `None` for no output.
    async fn eval(&self, ctx: &mut EvalContext, line: &str) -> Result<Option<String>, EvalError>;

    /// Commands this evaluator wants listed by `help`.
    fn commands(&self) -> Vec<CommandHelp> {
        Vec::new()
    }
}
