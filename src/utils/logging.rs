use tracing::Level;

/// Map a textual level from configuration onto a `tracing` level.
///
/// Unknown values fall back to `INFO`.
pub fn parse_level(level: &str) -> Level {
    match level.trim().to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Initialize tracing output for the process.
///
/// Uses `try_init` so tests and embedding applications can call this more
/// than once without panicking.
pub fn init(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_level(level))
        .with_target(false)
        .with_thread_names(true)
        .try_init();
}
