//! Execution context for shell sessions.

use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session-local execution context handed to the evaluator.
///
/// One context lives exactly as long as one attached session: state bound by
/// one command is visible to later commands of the same session and never
/// leaks into another session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalContext {
    /// Working directory commands are evaluated relative to.
    pub working_dir: PathBuf,

    /// Values bound by earlier commands.
    #[serde(default)]
    pub bindings: BTreeMap<String, Value>,

    #[serde(skip)]
    exit_requested: bool,
}

impl EvalContext {
    /// Create a new context rooted at a working directory.
    #[must_use]
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            bindings: BTreeMap::new(),
            exit_requested: false,
        }
    }

    /// Get a bound value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// Bind a value, returning the previous one.
    pub fn bind(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.bindings.insert(name.into(), value)
    }

    /// Remove a binding.
    pub fn unbind(&mut self, name: &str) -> Option<Value> {
        self.bindings.remove(name)
    }

    /// Ask the session to end after the current command.
    ///
    /// The host treats this exactly like an explicit `exit`.
    pub const fn request_exit(&mut self) {
        self.exit_requested = true;
    }

    /// Whether the evaluator asked the session to end.
    #[must_use]
    pub const fn exit_requested(&self) -> bool {
        self.exit_requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_replace_previous_value() {
        let mut ctx = EvalContext::new(PathBuf::from("/tmp"));
        assert!(ctx.bind("x", Value::from(1)).is_none());
        assert_eq!(ctx.bind("x", Value::from(2)), Some(Value::from(1)));
        assert_eq!(ctx.get("x"), Some(&Value::from(2)));
        assert_eq!(ctx.unbind("x"), Some(Value::from(2)));
        assert!(ctx.get("x").is_none());
    }

    #[test]
    fn exit_request_is_not_serialized() {
        let mut ctx = EvalContext::new(PathBuf::from("/srv/app"));
        ctx.request_exit();
        let json = serde_json::to_string(&ctx).unwrap();
        let parsed: EvalContext = serde_json::from_str(&json).unwrap();
        assert!(!parsed.exit_requested());
        assert_eq!(parsed.working_dir, PathBuf::from("/srv/app"));
    }
}
