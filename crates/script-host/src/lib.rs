//! jsrun Script Host
//!
//! QuickJS host for running script files with a small host API and an
//! optional wall-clock time limit.
//!
//! ## Host API
//!
//! Scripts have access to the following globals:
//!
//! - `console.log(...args)` - Print the string form of each argument, space separated
//! - `load(path)` - Read, evaluate and return the completion value of another script
//! - `Math.random()` - Backed by a generator seeded from the OS secure source

mod bindings;
mod runtime;
mod source;
mod sync;

pub use bindings::*;
pub use runtime::*;
pub use source::*;
pub use sync::MutexExt;

use std::time::Duration;

use thiserror::Error;

/// Errors from script execution
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Could not read {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Parse failure of the program itself; `location` is `line` or `line:column`
    #[error("{program}:{location}: SyntaxError: {message}")]
    Syntax {
        program: String,
        message: String,
        location: String,
    },

    #[error("{program}: Uncaught {message}")]
    Exception {
        program: String,
        message: String,
        stack: Option<String>,
    },

    #[error("Execution interrupted: {reason}")]
    Interrupted { reason: String },

    #[error("Could not read random bytes: {0}")]
    Seed(#[source] rand::Error),

    #[error("Runtime initialization failed: {0}")]
    InitError(String),
}

impl ScriptError {
    /// Whether the error happened before any script could run.
    ///
    /// Startup errors are host failures rather than script failures and are
    /// reported differently by the driver.
    pub fn is_startup(&self) -> bool {
        matches!(self, Self::Seed(_) | Self::InitError(_))
    }

    /// Engine stack trace attached to an uncaught exception, if any
    pub fn stack(&self) -> Option<&str> {
        match self {
            Self::Exception { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }
}

impl From<rquickjs::Error> for ScriptError {
    fn from(err: rquickjs::Error) -> Self {
        Self::InitError(err.to_string())
    }
}

/// Script execution result
#[derive(Debug, Clone, Default)]
pub struct ScriptResult {
    /// String form of the completion value, absent for `undefined` and `null`
    pub return_value: Option<String>,
}

/// Configuration for script execution
#[derive(Debug, Clone, Default)]
pub struct ScriptConfig {
    /// Abort execution once this much wall-clock time has passed
    pub time_limit: Option<Duration>,
}

impl ScriptConfig {
    /// Build a config from a limit in whole seconds; zero means unbounded.
    pub fn with_time_limit_secs(secs: u64) -> Self {
        Self {
            time_limit: (secs > 0).then(|| Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ScriptConfig::default();
        assert!(config.time_limit.is_none());
    }

    #[test]
    fn zero_time_limit_is_unbounded() {
        assert!(ScriptConfig::with_time_limit_secs(0).time_limit.is_none());
        assert_eq!(
            ScriptConfig::with_time_limit_secs(3).time_limit,
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn error_display_forms_are_distinct() {
        let syntax = ScriptError::Syntax {
            program: "main.js".into(),
            message: "unexpected token".into(),
            location: "2:5".into(),
        };
        let exception = ScriptError::Exception {
            program: "main.js".into(),
            message: "Error: boom".into(),
            stack: Some("    at <eval> (main.js:1)".into()),
        };
        let interrupted = ScriptError::Interrupted {
            reason: "timeout".into(),
        };

        assert_eq!(syntax.to_string(), "main.js:2:5: SyntaxError: unexpected token");
        assert_eq!(exception.to_string(), "main.js: Uncaught Error: boom");
        assert_eq!(interrupted.to_string(), "Execution interrupted: timeout");
        assert_eq!(exception.stack(), Some("    at <eval> (main.js:1)"));
        assert!(syntax.stack().is_none());
    }

    #[test]
    fn startup_errors_are_classified() {
        assert!(ScriptError::InitError("no runtime".into()).is_startup());
        assert!(!ScriptError::Interrupted { reason: "timeout".into() }.is_startup());
        let io = ScriptError::Io {
            name: "a.js".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(!io.is_startup());
        assert_eq!(io.to_string(), "Could not read a.js: missing");
    }
}
