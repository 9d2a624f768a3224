//! Script runtime management
//!
//! Owns the engine instance and the parse-run-release cycle. Every
//! engine-owned value created while servicing one `execute` call is
//! released before the call returns, on success and on every failure path;
//! the engine runs for the device's lifetime and cannot tolerate leaked
//! interpreter values.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rquickjs::prelude::Coerced;
use rquickjs::{Context, Ctx, FromJs, Runtime, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result of executing one received chunk.
///
/// Parse and runtime failures are expected per-cycle outcomes, not errors:
/// the loop reports them and moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    ParseError { diagnostic: String },
    RuntimeError { diagnostic: String },
}

/// Engine-level failures. Unlike [`ExecutionOutcome`] variants these are
/// unexpected; a cycle that hits one is abandoned.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("scripting engine failure: {0}")]
    Engine(#[from] rquickjs::Error),
}

/// Bounds on script execution. A chunk cannot be preempted once it starts,
/// so both limits default on; either can be disabled per field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineLimits {
    /// Engine heap ceiling. Scripts that exhaust it fail their cycle.
    pub memory_limit_bytes: Option<usize>,
    /// Wall-clock budget per executed chunk.
    pub execution_budget_ms: Option<u64>,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            memory_limit_bytes: Some(4 * 1024 * 1024),
            execution_budget_ms: Some(5_000),
        }
    }
}

/// Script execution context
///
/// Initialized once at boot with an empty global environment. The global
/// scope persists across chunks: a `var` defined by one program is visible
/// to the next. Dropping the runtime tears the engine down.
pub struct ScriptRuntime {
    #[allow(dead_code)] // Kept alive for context lifetime
    runtime: Runtime,
    pub(crate) context: Context,
    deadline: Arc<Mutex<Option<Instant>>>,
    budget: Option<Duration>,
}

impl ScriptRuntime {
    pub fn new(limits: &EngineLimits) -> Result<Self, ScriptError> {
        let runtime = Runtime::new()?;
        if let Some(bytes) = limits.memory_limit_bytes {
            runtime.set_memory_limit(bytes);
        }

        let deadline = Arc::new(Mutex::new(None::<Instant>));
        let budget = limits.execution_budget_ms.map(Duration::from_millis);
        if budget.is_some() {
            let watchdog = Arc::clone(&deadline);
            runtime.set_interrupt_handler(Some(Box::new(move || {
                match *watchdog.lock().expect("deadline lock poisoned") {
                    Some(deadline) => Instant::now() >= deadline,
                    None => false,
                }
            })));
        }

        let context = Context::full(&runtime)?;
        Ok(Self {
            runtime,
            context,
            deadline,
            budget,
        })
    }

    /// Execute one chunk of program text in the global scope.
    ///
    /// The parsed program and its result value live only inside this call.
    /// The result is inspected for the debug log and released; it is never
    /// stored or forwarded.
    pub fn execute(&self, bytes: &[u8]) -> Result<ExecutionOutcome, ScriptError> {
        let source = match std::str::from_utf8(bytes) {
            Ok(source) => source,
            Err(err) => {
                return Ok(ExecutionOutcome::ParseError {
                    diagnostic: format!("program text is not valid utf-8: {err}"),
                })
            }
        };

        self.arm_watchdog();
        let outcome = self
            .context
            .with(|ctx| -> Result<ExecutionOutcome, ScriptError> {
                match ctx.eval::<Value, _>(source) {
                    Ok(result) => {
                        tracing::debug!(result = %coerce_repr(&ctx, result), "chunk completed");
                        Ok(ExecutionOutcome::Completed)
                    }
                    Err(rquickjs::Error::Exception) => Ok(classify_thrown(&ctx)),
                    Err(err) => Err(ScriptError::Engine(err)),
                }
            });
        self.disarm_watchdog();
        outcome
    }

    fn arm_watchdog(&self) {
        if let Some(budget) = self.budget {
            *self.deadline.lock().expect("deadline lock poisoned") = Some(Instant::now() + budget);
        }
    }

    fn disarm_watchdog(&self) {
        if self.budget.is_some() {
            *self.deadline.lock().expect("deadline lock poisoned") = None;
        }
    }
}

/// Split the pending exception into a parse or runtime outcome.
///
/// The engine reports malformed program text by throwing a `SyntaxError`
/// from its eval entry point; everything else thrown is a runtime failure.
fn classify_thrown(ctx: &Ctx<'_>) -> ExecutionOutcome {
    let thrown = ctx.catch();
    let name = property_string(&thrown, "name");
    let message = property_string(&thrown, "message");

    let diagnostic = match (&name, &message) {
        (Some(name), Some(message)) => format!("{name}: {message}"),
        (Some(name), None) => name.clone(),
        _ => coerce_repr(ctx, thrown),
    };

    if name.as_deref() == Some("SyntaxError") {
        ExecutionOutcome::ParseError { diagnostic }
    } else {
        ExecutionOutcome::RuntimeError { diagnostic }
    }
}

fn property_string(value: &Value<'_>, key: &str) -> Option<String> {
    let object = value.as_object()?;
    object
        .get::<_, Option<Coerced<String>>>(key)
        .ok()
        .flatten()
        .map(|coerced| coerced.0)
}

/// String form of a value for diagnostics. A value whose coercion itself
/// throws must not poison the cycle.
fn coerce_repr<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> String {
    match Coerced::<String>::from_js(ctx, value) {
        Ok(Coerced(repr)) => repr,
        Err(_) => {
            let _ = ctx.catch();
            String::from("<unrepresentable>")
        }
    }
}
