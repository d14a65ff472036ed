//! # Logging Initialization
//!
//! Installs the global `tracing` subscriber once per process.
//!
//! - The filter comes from `RUST_LOG` when set, otherwise
//!   `<level>,scaffold_guard=debug`.
//! - File mode writes a daily rolling file in the user cache directory
//!   (resolved with `directories`), without ANSI colors. If the directory
//!   cannot be determined or created, logging falls back to stderr.
//! - Stderr mode enables ANSI colors.
//!
//! Diagnostic logging is separate from the audit log, which is the durable
//! security record and is configured on its own.

use anyhow::Result;
use directories::ProjectDirs;
use std::io::stderr;
use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

static INIT: Once = Once::new();

const LOG_FILE_PREFIX: &str = "scaffold_guard.log";

/// Cache directory for log files and the default audit log.
pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "ScaffoldGuard", "scaffold_guard")
}

pub fn init_test_logging() {
    let _ = init_logging("trace", false);
}

/// Initialize diagnostic logging. Later calls are no-ops.
pub fn init_logging(log_level: &str, log_to_file: bool) -> Result<()> {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},scaffold_guard=debug")));

        let log_dir = if log_to_file {
            project_dirs()
                .map(|dirs| dirs.cache_dir().to_path_buf())
                .filter(|dir| std::fs::create_dir_all(dir).is_ok())
        } else {
            None
        };

        match log_dir {
            Some(dir) => {
                let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer().with_writer(non_blocking).with_ansi(false))
                    .init();
                // Flushes on drop, so it lives as long as the process.
                Box::leak(Box::new(guard));
            }
            None => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer().with_writer(stderr).with_ansi(true))
                    .init();
            }
        }
    });

    Ok(())
}
