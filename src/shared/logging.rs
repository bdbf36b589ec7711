use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize service logging (rolling file + console, console only when the
/// log directory is not writable).
pub fn init_service_logging(log_dir: &Path, service_name: &str) -> Result<(), anyhow::Error> {
    // Controlled via RUST_LOG
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if log_dir_writable(log_dir) {
        use tracing_appender::rolling;

        let rotated = rotate_logs_on_startup(log_dir, service_name);

        let file_appender = rolling::daily(log_dir, format!("{service_name}.log"));
        let (non_blocking_file, guard_file) = non_blocking(file_appender);
        let (non_blocking_stdout, guard_stdout) = non_blocking(std::io::stdout());

        let file_layer = fmt::layer()
            .with_writer(non_blocking_file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true);

        let console_layer = fmt::layer()
            .with_writer(non_blocking_stdout)
            .with_ansi(true)
            .with_target(false)
            .with_thread_ids(false)
            .with_line_number(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(console_layer)
            .try_init()?;

        // Guards must outlive the program
        std::mem::forget(guard_file);
        std::mem::forget(guard_stdout);

        if let Ok(Some(backup)) = rotated {
            info!("Previous log file backed up to: {backup}");
        }
        info!(
            "Logging initialized - logs will be written to {}/{service_name}.log.<date>",
            log_dir.display()
        );
    } else {
        let (non_blocking_stdout, guard_stdout) = non_blocking(std::io::stdout());

        let console_layer = fmt::layer()
            .with_writer(non_blocking_stdout)
            .with_ansi(true)
            .with_target(false)
            .with_thread_ids(false)
            .with_line_number(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()?;

        std::mem::forget(guard_stdout);

        info!("Logging initialized - console output only (could not create log directory)");
    }

    Ok(())
}

/// Probes writability by opening a marker file in append mode. The marker is
/// left in place; nothing in this service removes files.
fn log_dir_writable(log_dir: &Path) -> bool {
    std::fs::create_dir_all(log_dir)
        .and_then(|_| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_dir.join(".write_probe"))
        })
        .is_ok()
}

/// Renames today's log aside so each start begins with a fresh file.
/// The daily appender names files `<service>.log.YYYY-MM-DD` in UTC.
pub fn rotate_logs_on_startup(
    log_dir: &Path,
    service_name: &str,
) -> Result<Option<String>, anyhow::Error> {
    let now = chrono::Utc::now();
    let log_path = log_dir.join(format!("{service_name}.log.{}", now.format("%Y-%m-%d")));

    if !log_path.exists() {
        return Ok(None);
    }

    let backup = log_dir.join(format!("{service_name}.{}.log", now.format("%Y%m%d_%H%M%S")));
    std::fs::rename(&log_path, &backup)?;

    Ok(Some(backup.display().to_string()))
}
