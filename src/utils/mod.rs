//! The `utils` module provides a collection of shared definitions used across
//! the `popmqtt` crate.
//!
//! It centralizes the crate-wide error type and the tracing bootstrap so that
//! every layer reports failures and log lines the same way.

pub mod error;
pub mod logging;

pub use error::{Error, Result};

#[cfg(test)]
mod tests {
    use super::logging;
    use tracing::Level;

    #[test]
    fn level_names_parse_case_insensitively() {
        assert_eq!(logging::parse_level("debug"), Level::DEBUG);
        assert_eq!(logging::parse_level("TRACE"), Level::TRACE);
        assert_eq!(logging::parse_level(" error "), Level::ERROR);
        assert_eq!(logging::parse_level("Warning"), Level::WARN);
        assert_eq!(logging::parse_level("bogus"), Level::INFO);
    }

    #[test]
    fn init_can_run_twice() {
        assert_eq!(logging::init("warn"), Level::WARN);
        assert_eq!(logging::init("info"), Level::INFO);
    }
}
