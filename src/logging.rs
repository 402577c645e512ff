//! Logging initialization for feedgate.
//!
//! Every subscriber shares one filter: the configured level for feedgate
//! itself, with the database driver and the HTTP stack held back so a
//! refresh cycle does not bury the log in per-query and per-connection
//! lines. `RUST_LOG` still wins when set.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::Result;

/// Ceilings for dependencies that log every query or connection.
const QUIET_TARGETS: &[&str] = &[
    "sqlx=warn",
    "hyper=warn",
    "hyper_util=warn",
    "reqwest=warn",
    "rustls=warn",
    "h2=warn",
];

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Filter for `level`, with [`QUIET_TARGETS`] applied unless `RUST_LOG`
/// is set.
fn build_filter(level: &str, rust_log: Option<&str>) -> EnvFilter {
    if let Some(filter) = rust_log.and_then(|spec| EnvFilter::try_new(spec).ok()) {
        return filter;
    }

    QUIET_TARGETS
        .iter()
        .filter_map(|d| d.parse::<Directive>().ok())
        .fold(
            EnvFilter::default().add_directive(parse_level(level).into()),
            EnvFilter::add_directive,
        )
}

fn env_filter(level: &str) -> EnvFilter {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|v| !v.is_empty());
    build_filter(level, rust_log.as_deref())
}

/// Initialize logging to stdout and the configured log file.
pub fn init(config: &LoggingConfig) -> Result<()> {
    if let Some(parent) = Path::new(&config.file).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let log_file = Arc::new(File::create(&config.file)?);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout.and(log_file))
                .with_ansi(false)
                .with_target(true),
        )
        .with(env_filter(&config.level))
        .init();

    Ok(())
}

/// Initialize console-only logging, used when the log file cannot be opened.
pub fn init_console_only(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(true),
        )
        .with(env_filter(level))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("ERROR"), Level::ERROR);
        assert_eq!(parse_level("invalid"), Level::INFO);
    }

    #[test]
    fn test_quiet_targets_parse() {
        for target in QUIET_TARGETS {
            assert!(target.parse::<Directive>().is_ok(), "{target}");
        }
    }

    #[test]
    fn test_filter_holds_back_noisy_crates() {
        let filter = build_filter("debug", None).to_string();
        assert!(filter.contains("sqlx=warn"), "{filter}");
        assert!(filter.contains("hyper=warn"), "{filter}");
        assert!(filter.contains("debug"), "{filter}");
    }

    #[test]
    fn test_rust_log_overrides_defaults() {
        let filter = build_filter("info", Some("feedgate=trace")).to_string();
        assert!(filter.contains("feedgate=trace"), "{filter}");
        assert!(!filter.contains("sqlx"), "{filter}");

        // An unparsable RUST_LOG falls back to the configured level
        let filter = build_filter("info", Some("feedgate=loud")).to_string();
        assert!(filter.contains("sqlx=warn"), "{filter}");
    }
}
