use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

/// Environment variable holding the maximum level, e.g. `debug`.
pub const LEVEL_VAR: &str = "LOG_LEVEL";

/// Emits an event inside a span named after the traffic channel.
#[macro_export]
macro_rules! log {
    ($level:expr, $channel:literal, $($arg:tt)+) => {{
        let _channel = $crate::tracing::span!($level, $channel).entered();
        $crate::tracing::event!($level, $($arg)+)
    }};
}

/// Lines written to the SMTP server.
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($arg:tt)+) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::log!($crate::tracing::Level::TRACE, "outgoing", $($arg)+)
    };
}

/// Replies read from the SMTP server.
#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($arg:tt)+) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::log!($crate::tracing::Level::TRACE, "incoming", $($arg)+)
    };
}

/// Connection, session and dispatch lifecycle.
#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($arg:tt)+) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::log!($crate::tracing::Level::TRACE, "internal", $($arg)+)
    };
}

/// Resolves the maximum level from `value`, falling back to `TRACE` in
/// debug builds and `INFO` in release builds when it is absent or invalid.
#[must_use]
pub fn parse_level(value: Option<&str>) -> LevelFilter {
    let fallback = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    let Some(value) = value else {
        return fallback;
    };

    LevelFilter::from_str(value.trim()).unwrap_or_else(|_| {
        eprintln!("Ignoring invalid {LEVEL_VAR} '{value}', using {fallback}");
        fallback
    })
}

/// Installs the global subscriber, writing to stderr so that reports
/// printed on stdout stay machine-readable.
///
/// Only `volley*` targets are emitted. Calling this more than once is
/// harmless; later calls leave the first subscriber in place.
pub fn init() {
    let level = parse_level(std::env::var(LEVEL_VAR).ok().as_deref());

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
        .with_filter(level)
        .with_filter(FilterFn::new(|metadata| {
            metadata.target().starts_with("volley")
        }));

    if tracing_subscriber::Registry::default()
        .with(layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("Logging was already initialised");
    }
}
