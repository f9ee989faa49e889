use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "activityd")]
#[command(about = "Student activity assignment and approval engine (JSON lines over stdio)", long_about = None)]
pub struct Config {
    /// Workspace directory to open at startup instead of waiting for workspace.select
    #[arg(long, env = "ACTIVITYD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Log line format on stderr
    #[arg(long, env = "ACTIVITYD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Logs go to stderr; stdout carries responses.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_wait_for_workspace_select() {
        let cfg = Config::try_parse_from(["activityd"]).unwrap();
        assert!(cfg.workspace.is_none());
        assert_eq!(cfg.log_format, LogFormat::Text);
    }

    #[test]
    fn flags_override_defaults() {
        let cfg = Config::try_parse_from(["activityd", "--workspace", "/tmp/ws", "--log-format", "json"])
            .unwrap();
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(cfg.log_format, LogFormat::Json);
    }
}
