//! Structured logging setup shared by the binaries.

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

/// Level used when `LOG_LEVEL` is not set.
fn default_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    }
}

fn parse_level(raw: Option<&str>) -> LevelFilter {
    let Some(raw) = raw else {
        return default_level();
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "off" => LevelFilter::OFF,
        "error" => LevelFilter::ERROR,
        "warn" => LevelFilter::WARN,
        "info" => LevelFilter::INFO,
        "debug" => LevelFilter::DEBUG,
        "trace" => LevelFilter::TRACE,
        _ => LevelFilter::ERROR,
    }
}

/// Install the global subscriber: compact fmt output with RFC 3339 UTC
/// timestamps, level from `LOG_LEVEL`, events from `postbox*` targets only.
///
/// Calling it again is a no-op.
pub fn init() {
    let level = parse_level(std::env::var("LOG_LEVEL").ok().as_deref());

    let _ = tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target().starts_with("postbox")
                })),
        )
        .try_init();
}
