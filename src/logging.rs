use std::fs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the logging system with both console and file output.
///
/// `verbose` lowers the crate's default level from `info` to `debug`. An explicit
/// `RUST_LOG` still takes precedence for other targets.
pub fn init_logging(verbose: bool) {
    let _ = fs::create_dir_all("logs");

    let file_appender = tracing_appender::rolling::daily("logs", "event_router.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);
    let console_layer = fmt::layer().with_writer(std::io::stdout);

    let level = if verbose { "debug" } else { "info" };
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("event_router={level}").parse() {
        filter = filter.add_directive(directive);
    }

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    // keep the writer alive for the lifetime of the process so logs are flushed
    std::mem::forget(guard);
}
