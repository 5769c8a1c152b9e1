//! QuickJS runtime with interruption support

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rand::rngs::{OsRng, StdRng};
use rand::SeedableRng;
use rquickjs::context::EvalOptions;
use rquickjs::convert::Coerced;
use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, FromJs, Runtime, Value};
use tokio::task::JoinHandle;

use crate::bindings::{install_host_bindings, stderr_sink, FailureOrigin, LogSink};
use crate::{ScriptConfig, ScriptError, ScriptResult, ScriptSource};

/// Reason passed to the engine when the time limit expires
pub const TIMEOUT_REASON: &str = "timeout";

/// Thread-safe, one-shot cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    reason: Arc<OnceLock<String>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Only the first reason is kept.
    pub fn cancel(&self, reason: &str) {
        if self.reason.set(reason.to_owned()).is_ok() {
            tracing::info!(reason, "Interrupt requested");
        }
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }
}

/// Options for evaluating a whole script file (sloppy mode, global scope)
pub(crate) fn script_options() -> EvalOptions {
    let mut options = EvalOptions::default();
    options.global = true;
    options.strict = false;
    options
}

/// A single QuickJS runtime and context with the host bindings installed.
///
/// Nested `load` calls evaluate in this same context, so they share globals
/// and observe the same cancellation token.
pub struct Engine {
    context: Context,
    // Kept alive for the context's lifetime
    #[allow(dead_code)]
    runtime: Runtime,
    cancellation: CancellationToken,
    origin: FailureOrigin,
}

impl Engine {
    /// Create the runtime, seed `Math.random`, and install the host API.
    pub fn new(sink: LogSink, cancellation: CancellationToken) -> Result<Self, ScriptError> {
        let rng = StdRng::from_rng(OsRng).map_err(ScriptError::Seed)?;

        let runtime = Runtime::new()?;
        let flag = cancellation.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || flag.is_cancelled())));

        let context = Context::full(&runtime)?;
        let origin = FailureOrigin::default();
        context.with(|ctx| {
            install_host_bindings(&ctx, sink, rng, origin.clone(), cancellation.clone())
        })?;

        tracing::debug!("Engine created");
        Ok(Self {
            context,
            runtime,
            cancellation,
            origin,
        })
    }

    /// Token that interrupts this engine when cancelled
    pub fn interrupt_handle(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Ask the running program to stop at the engine's next interrupt check
    pub fn interrupt(&self, reason: &str) {
        self.cancellation.cancel(reason);
    }

    /// Compile and run a script to completion.
    pub fn run(&self, source: &ScriptSource) -> Result<ScriptResult, ScriptError> {
        let program = source.name.as_str();
        let text = source.text();
        tracing::debug!(program, bytes = source.bytes.len(), "Running script");
        self.origin.clear();

        self.context.with(|ctx| {
            match ctx
                .eval_with_options::<Value, _>(text, script_options())
                .catch(&ctx)
            {
                Ok(value) => Ok(ScriptResult {
                    return_value: completion_string(&ctx, value),
                }),
                Err(caught) => Err(self.classify(&ctx, program, caught)),
            }
        })
    }

    fn classify<'js>(&self, ctx: &Ctx<'js>, program: &str, caught: CaughtError<'js>) -> ScriptError {
        // The engine reports an interrupt as an ordinary uncatchable error,
        // so the token decides first.
        if self.cancellation.is_cancelled() {
            return ScriptError::Interrupted {
                reason: self
                    .cancellation
                    .reason()
                    .unwrap_or(TIMEOUT_REASON)
                    .to_owned(),
            };
        }

        match caught {
            CaughtError::Exception(exception) => {
                let name = exception
                    .as_object()
                    .get::<_, Option<String>>("name")
                    .ok()
                    .flatten();
                let message = exception.message().unwrap_or_default();
                let stack = exception.stack().filter(|s| !s.trim().is_empty());

                if name.as_deref() == Some("SyntaxError") {
                    if let Some(location) = stack.as_deref().and_then(parser_location) {
                        return ScriptError::Syntax {
                            program: program.to_owned(),
                            message,
                            location,
                        };
                    }
                }

                let message = match name {
                    Some(name) if message.is_empty() => name,
                    Some(name) => format!("{name}: {message}"),
                    None => message,
                };
                // Raised inside a loaded file rather than the main program
                let program = stack
                    .as_deref()
                    .and_then(|stack| self.origin.program_for(stack))
                    .unwrap_or_else(|| program.to_owned());
                ScriptError::Exception {
                    program,
                    message,
                    stack,
                }
            }
            CaughtError::Value(value) => ScriptError::Exception {
                program: program.to_owned(),
                message: Coerced::<String>::from_js(ctx, value)
                    .map(|s| s.0)
                    .unwrap_or_else(|_| "exception".to_owned()),
                stack: None,
            },
            CaughtError::Error(err) => ScriptError::Exception {
                program: program.to_owned(),
                message: err.to_string(),
                stack: None,
            },
        }
    }
}

fn completion_string<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Option<String> {
    if value.is_undefined() || value.is_null() {
        return None;
    }
    Coerced::<String>::from_js(ctx, value).ok().map(|s| s.0)
}

/// Location of an error raised by the parser for the program being run.
///
/// The parser records only `at <file>:<line>[:<column>]`. Any frame with a
/// function name, such as `at <eval> (...)` or `at parse (native)`, means
/// the SyntaxError was thrown by running code.
fn parser_location(stack: &str) -> Option<String> {
    let mut frames = stack.lines().map(str::trim).filter(|line| !line.is_empty());
    let frame = frames.next()?;
    if frame.contains('(') || frames.any(|f| f.contains('(')) {
        return None;
    }

    let location = frame.strip_prefix("at ")?;
    let mut parts = location.rsplitn(3, ':');
    let last: u32 = parts.next()?.parse().ok()?;
    let previous = parts.next()?;
    match previous.parse::<u32>() {
        Ok(line) if parts.next().is_some() => Some(format!("{line}:{last}")),
        _ => Some(last.to_string()),
    }
}

/// Arm a one-shot timer that interrupts the engine after `limit`
pub fn arm_timeout(token: CancellationToken, limit: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(limit).await;
        token.cancel(TIMEOUT_REASON);
    })
}

/// Script execution context with host communication
pub struct ScriptHost {
    config: ScriptConfig,
    cancellation: CancellationToken,
    log_sink: LogSink,
}

impl ScriptHost {
    pub fn new(config: ScriptConfig) -> Self {
        Self {
            config,
            cancellation: CancellationToken::new(),
            log_sink: stderr_sink(),
        }
    }

    /// Send `console.log` output somewhere other than standard error
    pub fn with_log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = sink;
        self
    }

    /// Get the cancellation token for this host
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Cancel a running script
    pub fn cancel(&self, reason: &str) {
        self.cancellation.cancel(reason);
    }

    /// Execute a script with the host API installed.
    ///
    /// The engine lives on a blocking thread for the whole run; the time
    /// limit, if any, is enforced by a timer task on the tokio runtime.
    /// Cancellation is one-shot, so a host that has been cancelled will
    /// interrupt every later run as well.
    pub async fn execute(&self, source: ScriptSource) -> Result<ScriptResult, ScriptError> {
        let sink = self.log_sink.clone();
        let cancellation = self.cancellation.clone();

        // Run the script in a blocking task
        let handle = tokio::task::spawn_blocking(move || {
            let engine = Engine::new(sink, cancellation)?;
            engine.run(&source)
        });

        let timer = self
            .config
            .time_limit
            .map(|limit| arm_timeout(self.cancellation.clone(), limit));

        let result = handle.await;
        if let Some(timer) = timer {
            timer.abort();
        }

        match result {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => Err(ScriptError::InitError(err.to_string())),
        }
    }
}

impl Default for ScriptHost {
    fn default() -> Self {
        Self::new(ScriptConfig::default())
    }
}
