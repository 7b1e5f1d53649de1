//! Structured JSON logging

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Map a configured level name to a filter. Unknown names fall back to `info`.
pub fn level_filter(level: &str) -> LevelFilter {
    match level.trim().to_ascii_lowercase().as_str() {
        "debug" => LevelFilter::DEBUG,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

/// Install the global JSON subscriber writing to stdout.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init(level: &str) {
    let filter = EnvFilter::builder()
        .with_default_directive(level_filter(level).into())
        .parse_lossy("");

    let _ = tracing_subscriber::fmt()
        .json()
        .with_current_span(true)
        .with_env_filter(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter() {
        assert_eq!(level_filter("debug"), LevelFilter::DEBUG);
        assert_eq!(level_filter("WARN"), LevelFilter::WARN);
        assert_eq!(level_filter("error"), LevelFilter::ERROR);
        assert_eq!(level_filter("info"), LevelFilter::INFO);
    }

    #[test]
    fn test_unknown_level_is_info() {
        assert_eq!(level_filter("verbose"), LevelFilter::INFO);
        assert_eq!(level_filter(""), LevelFilter::INFO);
    }

    #[test]
    fn test_init_twice() {
        init("debug");
        init("error");
    }
}
