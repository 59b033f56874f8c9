//! Core utilities and shared types for the toolbox engine.

pub mod clock;
pub mod observability;

pub use clock::{rfc3339_from_ms, Clock, ManualClock, SystemClock};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }
}
