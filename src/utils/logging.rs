use std::str::FromStr;

use tracing::Level;

/// Installs the global fmt subscriber at `level` and returns the level applied.
///
/// Log lines go to stderr so that `popmqtt sub` can print messages on stdout.
/// Calling this again after a subscriber is installed is a no-op.
pub fn init(level: &str) -> Level {
    let level = parse_level(level);
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
    level
}

/// Parses a level name such as `debug` or `WARN`; unknown names mean `info`.
pub fn parse_level(name: &str) -> Level {
    let name = name.trim();
    if name.eq_ignore_ascii_case("warning") {
        return Level::WARN;
    }
    Level::from_str(name).unwrap_or(Level::INFO)
}
