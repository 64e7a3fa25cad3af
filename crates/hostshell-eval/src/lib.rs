//! Reference evaluator for host-attached shells.
//!
//! Provides:
//! - `BuiltinEvaluator` - Variables, echo and a suspending `sleep`

pub mod builtin;

pub use builtin::BuiltinEvaluator;
