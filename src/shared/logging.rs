use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

fn filter(level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy() // respects RUST_LOG if user set it
}

/// Install the global subscriber for the binary.
///
/// Logs go to stderr; stdout is reserved for the progress line.
pub fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let _ = tracing_subscriber::registry()
        .with(filter(level))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .with_target(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init();
}

///Intialize a logger for my tests.
/// # Arguements:
/// * level :This is the log level.
#[cfg(test)]
pub fn test_logger_init(level: Level) {
    let _ = tracing_subscriber::registry()
        .with(filter(level))
        .with(fmt::layer().with_test_writer().with_target(false).compact())
        .try_init();
}
