// src/logging.rs

//! Tracing subscriber for the daemon.
//!
//! The filter comes from `--log-level` when given. Otherwise `DIRWATCH_LOG`
//! is read as a full directive string, so `dirwatch=debug,notify=warn`
//! works as well as a bare level. Without either, `info` is used.
//!
//! `notify` internals are capped at `warn` unless a directive names them.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "DIRWATCH_LOG";

const DEFAULT_DIRECTIVES: &str = "info";
const NOTIFY_DIRECTIVE: &str = "notify=warn";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV_VAR).ok();
    let filter = build_filter(cli_level, env.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}

fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> Result<EnvFilter> {
    let directives = match (cli_level, env.map(str::trim)) {
        (Some(level), _) => level_directive(level).to_string(),
        (None, Some(env)) if !env.is_empty() => env.to_string(),
        _ => DEFAULT_DIRECTIVES.to_string(),
    };

    let mut filter = EnvFilter::try_new(&directives)
        .map_err(|e| anyhow!("invalid {LOG_ENV_VAR} directives '{directives}': {e}"))?;
    if !directives.contains("notify") {
        filter = filter.add_directive(NOTIFY_DIRECTIVE.parse()?);
    }
    Ok(filter)
}

fn level_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_level_wins_over_env() {
        let filter = build_filter(Some(LogLevel::Trace), Some("error")).unwrap();
        assert!(filter.to_string().to_lowercase().contains("trace"));
    }

    #[test]
    fn env_directives_are_passed_through() {
        let filter = build_filter(None, Some("dirwatch=debug")).unwrap();
        let rendered = filter.to_string().to_lowercase();
        assert!(rendered.contains("dirwatch=debug"));
        assert!(rendered.contains("notify=warn"));
    }

    #[test]
    fn explicit_notify_directive_is_kept() {
        let filter = build_filter(None, Some("info,notify=trace")).unwrap();
        assert!(!filter.to_string().to_lowercase().contains("notify=warn"));
    }

    #[test]
    fn malformed_env_is_an_error() {
        assert!(build_filter(None, Some("dirwatch=loud")).is_err());
    }

    #[test]
    fn blank_env_falls_back_to_info() {
        let filter = build_filter(None, Some("  ")).unwrap();
        assert!(filter.to_string().to_lowercase().contains("info"));
    }
}
