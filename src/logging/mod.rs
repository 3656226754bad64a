//! JSON-lines logging on stdout.
//!
//! `LOG_LEVEL` picks the minimum severity. Unknown values fall back to
//! `info` instead of failing startup.

use tracing::{subscriber::DefaultGuard, Level};
use tracing_subscriber::{
    filter::LevelFilter, fmt::MakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
    Registry,
};

pub fn parse_level(level: &str) -> Level {
    match level.to_ascii_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Builds a subscriber that drops records below `level` and writes the rest
/// as one JSON object per line to `writer`.
pub fn subscriber<W>(level: Level, writer: W) -> impl tracing::Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .parse_lossy("");
    Registry::default().with(filter).with(
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(writer),
    )
}

/// Installs the process-wide subscriber for `level`.
pub fn init(level: &str) {
    subscriber(parse_level(level), std::io::stdout).init();
}

/// Scoped stdout subscriber for the window before configuration is known.
pub fn bootstrap() -> DefaultGuard {
    subscriber(Level::INFO, std::io::stdout).set_default()
}
