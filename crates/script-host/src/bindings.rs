//! Host API bindings for JavaScript
//!
//! Installs the globals a script can use to talk to the host: `console.log`
//! for diagnostics, `load` for synchronous nested evaluation, and a
//! `Math.random` backed by a securely seeded generator.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::Rng;
use rquickjs::convert::Coerced;
use rquickjs::function::{Func, Rest};
use rquickjs::{Ctx, Exception, Object, Value};

use crate::runtime::script_options;
use crate::{read_source, CancellationToken, MutexExt, ScriptError};

/// Destination for `console.log` output
pub type LogSink = Arc<Mutex<dyn Write + Send>>;

/// Log sink writing to the process's standard error
pub fn stderr_sink() -> LogSink {
    Arc::new(Mutex::new(std::io::stderr()))
}

/// Join already stringified arguments the way `console.log` prints them
pub fn format_log_line<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Program an exception escaping `load` was first raised in.
///
/// The engine names every evaluated script the same way, so the loaded
/// path is remembered next to the exception's stack and matched back when
/// the failure reaches the top level.
#[derive(Debug, Clone, Default)]
pub(crate) struct FailureOrigin(Rc<RefCell<Option<(String, String)>>>);

impl FailureOrigin {
    /// Keep the innermost program: an outer `load` rethrowing the same
    /// exception does not overwrite it.
    fn record(&self, program: &str, stack: String) {
        let mut slot = self.0.borrow_mut();
        if slot.as_ref().is_some_and(|(_, seen)| *seen == stack) {
            return;
        }
        *slot = Some((program.to_owned(), stack));
    }

    pub(crate) fn program_for(&self, stack: &str) -> Option<String> {
        self.0
            .borrow()
            .as_ref()
            .filter(|(_, seen)| seen == stack)
            .map(|(program, _)| program.clone())
    }

    pub(crate) fn clear(&self) {
        self.0.borrow_mut().take();
    }
}

/// Create host API bindings in the JavaScript context
pub(crate) fn install_host_bindings<'js>(
    ctx: &Ctx<'js>,
    sink: LogSink,
    rng: StdRng,
    origin: FailureOrigin,
    cancellation: CancellationToken,
) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    // Arguments are coerced with ToString before the closure runs, so a
    // throwing toString() surfaces as an exception in the caller.
    let console = Object::new(ctx.clone())?;
    let log_fn = Func::from(move |args: Rest<Coerced<String>>| {
        let parts: Vec<&str> = args.0.iter().map(|arg| arg.0.as_str()).collect();
        let line = format_log_line(&parts);
        let mut out = sink.lock_or_recover();
        let _ = writeln!(out, "{line}");
    });
    console.set("log", log_fn)?;
    globals.set("console", console)?;

    let load_fn = Func::from(move |ctx: Ctx<'js>, path: Coerced<String>| {
        load(&ctx, &path.0, &origin, &cancellation)
    });
    globals.set("load", load_fn)?;

    let rng = RefCell::new(rng);
    let math: Object = globals.get("Math")?;
    let random_fn = Func::from(move || rng.borrow_mut().gen::<f64>());
    math.set("random", random_fn)?;

    Ok(())
}

/// Read `path` and evaluate it in the calling context.
///
/// Blocks the calling script until the nested one finishes. Read failures
/// are thrown as catchable errors; exceptions from the nested script are
/// rethrown unchanged after noting which program raised them.
fn load<'js>(
    ctx: &Ctx<'js>,
    path: &str,
    origin: &FailureOrigin,
    cancellation: &CancellationToken,
) -> rquickjs::Result<Value<'js>> {
    let source = match read_source(path) {
        Ok(source) => source,
        Err(source) => {
            let err = ScriptError::Io {
                name: path.to_owned(),
                source,
            };
            return Err(Exception::throw_message(ctx, &err.to_string()));
        }
    };

    tracing::debug!(path, bytes = source.bytes.len(), "Loading script");
    match ctx.eval_with_options::<Value, _>(source.text(), script_options()) {
        // An interrupt must stay pending as-is so it cannot be caught.
        Err(rquickjs::Error::Exception) if !cancellation.is_cancelled() => {
            let thrown = ctx.catch();
            let stack = thrown
                .as_object()
                .and_then(|obj| obj.get::<_, Option<String>>("stack").ok().flatten());
            if let Some(stack) = stack {
                origin.record(path, stack);
            }
            Err(ctx.throw(thrown))
        }
        result => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_line_is_space_joined() {
        assert_eq!(format_log_line(&["1", "a", "true"]), "1 a true");
        assert_eq!(format_log_line(&["only"]), "only");
        assert_eq!(format_log_line::<&str>(&[]), "");
    }

    #[test]
    fn failure_origin_keeps_innermost_program() {
        let origin = FailureOrigin::default();
        origin.record("b.js", "    at inner (eval_script:2:9)\n".into());
        origin.record("a.js", "    at inner (eval_script:2:9)\n".into());
        assert_eq!(
            origin.program_for("    at inner (eval_script:2:9)\n"),
            Some("b.js".to_string())
        );
        assert_eq!(origin.program_for("    at <eval> (eval_script:1:1)\n"), None);

        origin.record("c.js", "    at <eval> (eval_script:5:1)\n".into());
        assert_eq!(
            origin.program_for("    at <eval> (eval_script:5:1)\n"),
            Some("c.js".to_string())
        );

        origin.clear();
        assert_eq!(origin.program_for("    at <eval> (eval_script:5:1)\n"), None);
    }

    #[test]
    fn sinks_coerce_from_buffers() {
        let buffer = Arc::new(Mutex::new(Vec::<u8>::new()));
        let sink: LogSink = buffer.clone();
        writeln!(sink.lock_or_recover(), "hello").unwrap();
        assert_eq!(buffer.lock_or_recover().as_slice(), b"hello\n");
    }
}
