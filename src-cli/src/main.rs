//! jsrun - run a script file against an embedded QuickJS engine
//!
//! ## Module Structure
//! - `helpers` - Exit codes and error formatting
//! - `profile` - CPU profiling session for `--cpuprofile`

mod helpers;
mod profile;

use std::backtrace::Backtrace;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use helpers::{
    error_line, exit_code, format_stack, EXIT_PROFILER_FAILURE, EXIT_SCRIPT_FAILURE, EXIT_SUCCESS,
};
use jsrun_script_host::{display_name, read_source, ScriptConfig, ScriptError, ScriptHost};
use profile::CpuProfile;

#[derive(Parser, Debug)]
#[command(
    name = "jsrun",
    version,
    about = "Run a script file against an embedded QuickJS engine"
)]
struct Cli {
    /// Script to run; omit or pass `-` to read from standard input
    script: Option<String>,

    /// Write a CPU profile to this file
    #[arg(long, value_name = "PATH")]
    cpuprofile: Option<PathBuf>,

    /// Max time to run in seconds (0 or negative for no limit)
    #[arg(long, value_name = "SECONDS", default_value_t = 0, allow_negative_numbers = true)]
    timelimit: i64,
}

impl Cli {
    /// Only a positive limit bounds the run
    fn time_limit_secs(&self) -> u64 {
        u64::try_from(self.timelimit).unwrap_or(0)
    }
}

/// Log panics with a backtrace, then hand over to the previous hook.
fn install_crash_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let backtrace = Backtrace::force_capture();
        tracing::error!("Host panicked: {info}\n{backtrace}");
        previous(info);
    }));
}

/// Read and execute the main script, returning the process exit code.
async fn run(cli: &Cli) -> i32 {
    let name = cli.script.as_deref().unwrap_or_default();

    let source = match read_source(name) {
        Ok(source) => source,
        Err(source) => {
            let err = ScriptError::Io {
                name: display_name(name).to_owned(),
                source,
            };
            println!("{}", error_line(&err));
            return EXIT_SCRIPT_FAILURE;
        }
    };

    let host = ScriptHost::new(ScriptConfig::with_time_limit_secs(cli.time_limit_secs()));
    match host.execute(source).await {
        Ok(_) => EXIT_SUCCESS,
        Err(err) if err.is_startup() => {
            tracing::error!("{err}");
            exit_code(&err)
        }
        Err(err) => {
            println!("{}", error_line(&err));
            if let Some(stack) = err.stack() {
                eprint!("{}", format_stack(stack));
            }
            exit_code(&err)
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing on stderr; stdout carries only the error line
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("jsrun=warn,jsrun_script_host=warn")),
        )
        .init();
    install_crash_hook();

    let cli = Cli::parse();

    let profile = match cli.cpuprofile.as_deref().map(CpuProfile::start).transpose() {
        Ok(profile) => profile,
        Err(err) => {
            tracing::error!("{err}");
            std::process::exit(EXIT_PROFILER_FAILURE);
        }
    };

    let code = run(&cli).await;

    // process::exit skips destructors, so flush the profile explicitly
    if let Some(profile) = profile {
        tracing::debug!(path = %profile.path().display(), "Flushing CPU profile");
        if let Err(err) = profile.finish() {
            tracing::error!("{err}");
        }
    }

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let cli = Cli::parse_from(["jsrun", "--timelimit", "5", "--cpuprofile", "cpu.pprof", "main.js"]);
        assert_eq!(cli.script.as_deref(), Some("main.js"));
        assert_eq!(cli.timelimit, 5);
        assert_eq!(cli.time_limit_secs(), 5);
        assert_eq!(cli.cpuprofile, Some(PathBuf::from("cpu.pprof")));
    }

    #[test]
    fn defaults_read_stdin_without_limit() {
        let cli = Cli::parse_from(["jsrun"]);
        assert!(cli.script.is_none());
        assert_eq!(cli.timelimit, 0);
        assert!(cli.cpuprofile.is_none());
    }

    #[test]
    fn negative_timelimit_means_no_limit() {
        let cli = Cli::parse_from(["jsrun", "--timelimit", "-1", "main.js"]);
        assert_eq!(cli.timelimit, -1);
        assert_eq!(cli.time_limit_secs(), 0);
        assert_eq!(cli.script.as_deref(), Some("main.js"));
    }

    #[test]
    fn dash_is_kept_as_script_name() {
        let cli = Cli::parse_from(["jsrun", "-"]);
        assert_eq!(cli.script.as_deref(), Some("-"));
    }
}
