use std::path::PathBuf;

use tokio::sync::RwLock;
use tracing::{debug, info, metadata::LevelFilter};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{prelude::*, EnvFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}

fn do_init(log_dir: Option<PathBuf>) {
    let mut message = String::from("Logging with: stdout");

    let stdout_layer = tracing_subscriber::fmt::layer().with_filter(env_filter());

    let registry = tracing_subscriber::registry().with(stdout_layer);

    let maybe_file_layer = if let Some(output_dir) = log_dir {
        message += &format!(", file (in dir {output_dir:?})");

        let file_appender = RollingFileAppender::new(Rotation::DAILY, output_dir, "bridge.log");

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_filter(env_filter());
        Some(file_layer)
    } else {
        None
    };

    // Someone else (e.g. a test harness) may have set a global subscriber already.
    if registry.with(maybe_file_layer).try_init().is_ok() {
        debug!(message);
    }
}

/// Initialize tracing.
///
/// Filtered by `RUST_LOG`, `info` if unset.
/// If a directory is given logs are also written there, rotated daily.
///
/// Will only initialize once, so tests may call this.
pub async fn init(log_dir: Option<PathBuf>) {
    static TRACING_IS_INITIALIZED: RwLock<bool> = RwLock::const_new(false);

    let initialized = { *TRACING_IS_INITIALIZED.read().await };

    if !initialized {
        let mut initialized = TRACING_IS_INITIALIZED.write().await;

        // To avoid race condition between the `.read()` and the
        // `.write()`.
        if *initialized {
            return;
        }

        do_init(log_dir);

        *initialized = true;
    }

    info!("Logging initialized");
}
