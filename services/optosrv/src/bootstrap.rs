//! Process bootstrap: CLI arguments, logging, shutdown signal.

use std::path::PathBuf;

use clap::Parser;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Heating-link polling service.
#[derive(Parser, Debug, Clone)]
#[command(name = "optosrv", version, about)]
pub struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "optolink.json", env = "OPTOLINK_CONFIG_FILE")]
    pub config: PathBuf,

    /// Directory data log rows are written beneath.
    #[arg(long, default_value = ".", env = "OPTOLINK_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Directory for service log files; logs go to stderr when unset.
    #[arg(long, env = "OPTOLINK_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    pub validate: bool,
}

/// Initialise tracing. With a log directory, output goes to a daily-rotated
/// file through a non-blocking writer; hold the returned guard for the
/// process lifetime or buffered lines are lost on exit.
pub fn init_logging(args: &Args) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "optosrv.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

/// Wait for a shutdown signal: Ctrl+C, or SIGTERM on Unix.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!(
                    "Failed to install SIGTERM handler: {}. Service will only respond to Ctrl+C",
                    e
                );
                None
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(mut sig) = term_signal {
                    sig.recv().await;
                } else {
                    // If the SIGTERM handler failed, wait forever (only
                    // Ctrl+C will work).
                    std::future::pending::<()>().await
                }
            } => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["optosrv"]);
        assert_eq!(args.config, PathBuf::from("optolink.json"));
        assert_eq!(args.data_dir, PathBuf::from("."));
        assert!(args.log_dir.is_none());
        assert!(!args.validate);
    }

    #[test]
    fn test_args_override() {
        let args = Args::parse_from([
            "optosrv",
            "--config",
            "/etc/heizung.json",
            "--data-dir",
            "/var/lib/heizung",
            "--validate",
        ]);
        assert_eq!(args.config, PathBuf::from("/etc/heizung.json"));
        assert_eq!(args.data_dir, PathBuf::from("/var/lib/heizung"));
        assert!(args.validate);
    }
}
