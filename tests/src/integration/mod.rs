//! Cross-crate integration suites.

pub mod properties;
