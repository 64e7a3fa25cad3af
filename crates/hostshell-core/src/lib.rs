//! Core abstractions for host-attached interactive shells.
//!
//! This crate provides the fundamental building blocks:
//! - `Evaluator` - The opaque command-evaluation capability
//! - `EvalContext` - Session-local execution state
//! - `ShellConfig` - Endpoint, history and client settings

pub mod config;
pub mod context;
pub mod traits;

pub use config::{ConfigError, ShellConfig};
pub use context::EvalContext;
pub use traits::{CommandHelp, EvalError, Evaluator, SessionId};
