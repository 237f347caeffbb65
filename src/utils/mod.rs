//! The `utils` module holds the pieces every other module leans on: the
//! crate-wide error type and logging initialisation.

pub mod error;
pub mod logging;

pub use error::{Error, Result};

#[cfg(test)]
mod tests {
    use super::logging;
    use tracing::Level;

    #[test]
    fn logging_init_accepts_levels() {
        logging::init("info");
        logging::init("debug");
        logging::init("warn");
    }

    #[test]
    fn parse_level_defaults_to_info() {
        assert_eq!(logging::parse_level("WARNING"), Level::WARN);
        assert_eq!(logging::parse_level(" trace "), Level::TRACE);
        assert_eq!(logging::parse_level("verbose"), Level::INFO);
    }
}
