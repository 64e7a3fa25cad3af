//! Built-in command evaluator.

use std::time::Duration;

use async_trait::async_trait;
use hostshell_core::{CommandHelp, EvalContext, EvalError, Evaluator};
use serde_json::Value;

const COMMANDS: &[CommandHelp] = &[
    CommandHelp {
        usage: "set NAME VALUE...",
        summary: "Bind a value (JSON if it parses, else text)",
    },
    CommandHelp {
        usage: "get NAME",
        summary: "Show a bound value",
    },
    CommandHelp {
        usage: "unset NAME",
        summary: "Remove a binding",
    },
    CommandHelp {
        usage: "vars",
        summary: "List bindings",
    },
    CommandHelp {
        usage: "echo WORDS...",
        summary: "Print words, expanding $NAME",
    },
    CommandHelp {
        usage: "sleep MS",
        summary: "Wait without blocking other sessions",
    },
    CommandHelp {
        usage: "pwd",
        summary: "Show the working directory",
    },
    CommandHelp {
        usage: "leave",
        summary: "End the session from the evaluator",
    },
];

/// Small evaluator over the session's bindings.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinEvaluator;

impl BuiltinEvaluator {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace a leading `$NAME` with its value; unset names expand to nothing.
/// The name ends at the first character that is not alphanumeric or `_`.
fn expand(ctx: &EvalContext, word: &str) -> String {
    let Some(rest) = word.strip_prefix('$') else {
        return word.to_string();
    };
    let end = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    let (name, suffix) = rest.split_at(end);
    if name.is_empty() {
        return word.to_string();
    }
    let mut out = ctx.get(name).map(render).unwrap_or_default();
    out.push_str(suffix);
    out
}

fn usage(usage: &str) -> EvalError {
    EvalError::Failed(format!("usage: {usage}"))
}

#[async_trait]
impl Evaluator for BuiltinEvaluator {
    async fn eval(&self, ctx: &mut EvalContext, line: &str) -> Result<Option<String>, EvalError> {
        let words = shlex::split(line)
            .ok_or_else(|| EvalError::Parse(format!("unbalanced quotes in {line:?}")))?;
        let Some((command, args)) = words.split_first() else {
            return Ok(None);
        };
        tracing::trace!(command, args = args.len(), "Evaluating builtin");

        match command.as_str() {
            "set" => {
                let [name, rest @ ..] = args else {
                    return Err(usage("set NAME VALUE..."));
                };
                if rest.is_empty() {
                    return Err(usage("set NAME VALUE..."));
                }
                let raw = rest.join(" ");
                let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
                let shown = render(&value);
                ctx.bind(name.clone(), value);
                Ok(Some(format!("{name} = {shown}")))
            }
            "get" => {
                let [name] = args else {
                    return Err(usage("get NAME"));
                };
                ctx.get(name)
                    .map(|v| Some(render(v)))
                    .ok_or_else(|| EvalError::Failed(format!("{name} is not set")))
            }
            "unset" => {
                let [name] = args else {
                    return Err(usage("unset NAME"));
                };
                ctx.unbind(name)
                    .map(|_| None)
                    .ok_or_else(|| EvalError::Failed(format!("{name} is not set")))
            }
            "vars" => {
                if ctx.bindings.is_empty() {
                    return Ok(None);
                }
                let listing: Vec<String> = ctx
                    .bindings
                    .iter()
                    .map(|(name, value)| format!("{name} = {}", render(value)))
                    .collect();
                Ok(Some(listing.join("\n")))
            }
            "echo" => {
                let expanded: Vec<String> = args.iter().map(|word| expand(ctx, word)).collect();
                Ok(Some(expanded.join(" ")))
            }
            "sleep" => {
                let [ms] = args else {
                    return Err(usage("sleep MS"));
                };
                let ms: u64 = ms
                    .parse()
                    .map_err(|_| EvalError::Parse(format!("not a number of milliseconds: {ms}")))?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(None)
            }
            "pwd" => Ok(Some(ctx.working_dir.display().to_string())),
            "leave" => {
                ctx.request_exit();
                Ok(None)
            }
            other => Err(EvalError::UnknownCommand(other.to_string())),
        }
    }

    fn commands(&self) -> Vec<CommandHelp> {
        COMMANDS.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    async fn eval(ctx: &mut EvalContext, line: &str) -> Result<Option<String>, EvalError> {
        BuiltinEvaluator::new().eval(ctx, line).await
    }

    #[tokio::test]
    async fn test_set_get_json_and_text() {
        let mut ctx = EvalContext::default();
        assert_eq!(eval(&mut ctx, "set n 42").await.unwrap().as_deref(), Some("n = 42"));
        assert_eq!(ctx.get("n"), Some(&Value::from(42)));

        eval(&mut ctx, "set greeting 'hello world'").await.unwrap();
        assert_eq!(
            eval(&mut ctx, "get greeting").await.unwrap().as_deref(),
            Some("hello world")
        );
        assert_eq!(
            eval(&mut ctx, "echo $greeting, $missing!").await.unwrap().as_deref(),
            Some("hello world, !")
        );
    }

    #[tokio::test]
    async fn test_echo_keeps_text_after_name() {
        let mut ctx = EvalContext::default();
        eval(&mut ctx, "set user_1 ada").await.unwrap();
        assert_eq!(
            eval(&mut ctx, "echo ($user_1) $user_1, $ $.x").await.unwrap().as_deref(),
            Some("($user_1) ada, $ $.x")
        );
    }

    #[tokio::test]
    async fn test_vars_and_unset() {
        let mut ctx = EvalContext::default();
        assert_eq!(eval(&mut ctx, "vars").await.unwrap(), None);
        eval(&mut ctx, "set b true").await.unwrap();
        eval(&mut ctx, "set a [1,2]").await.unwrap();
        assert_eq!(
            eval(&mut ctx, "vars").await.unwrap().as_deref(),
            Some("a = [1,2]\nb = true")
        );
        assert_eq!(eval(&mut ctx, "unset a").await.unwrap(), None);
        tokio_test::assert_err!(eval(&mut ctx, "get a").await);
    }

    #[tokio::test]
    async fn test_errors() {
        let mut ctx = EvalContext::default();
        assert!(matches!(
            eval(&mut ctx, "frobnicate").await,
            Err(EvalError::UnknownCommand(c)) if c == "frobnicate"
        ));
        assert!(matches!(eval(&mut ctx, "echo 'open").await, Err(EvalError::Parse(_))));
        assert!(matches!(eval(&mut ctx, "set x").await, Err(EvalError::Failed(_))));
        assert!(matches!(eval(&mut ctx, "sleep soon").await, Err(EvalError::Parse(_))));
        assert_eq!(eval(&mut ctx, "   ").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_suspends() {
        let mut ctx = EvalContext::default();
        let start = tokio::time::Instant::now();
        assert_eq!(eval(&mut ctx, "sleep 1500").await.unwrap(), None);
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_pwd_and_leave() {
        let mut ctx = EvalContext::new(PathBuf::from("/srv/app"));
        assert_eq!(eval(&mut ctx, "pwd").await.unwrap().as_deref(), Some("/srv/app"));
        eval(&mut ctx, "leave").await.unwrap();
        assert!(ctx.exit_requested());
    }

    #[test]
    fn test_commands_are_advertised() {
        let commands = BuiltinEvaluator::new().commands();
        assert!(commands.iter().any(|c| c.usage.starts_with("sleep")));
    }
}
