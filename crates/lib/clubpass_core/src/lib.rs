//! # clubpass_core
//!
//! Identity, session and bus-credential logic for Clubpass.

pub mod auth;
pub mod config;
pub mod directory;
pub mod migrate;
pub mod models;
pub mod session;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
