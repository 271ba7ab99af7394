use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install a process-wide tracing subscriber. Safe to call once at process start;
/// a second call is a no-op (the global default is already set).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
