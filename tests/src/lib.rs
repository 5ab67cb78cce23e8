//! # Change-Stream Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── scenarios.rs   # End-to-end flows through a running bus
//!     └── properties.rs  # Delivery guarantees, incl. proptest
//!
//! tests/benches/
//! └── bus_benchmarks.rs  # Publish fan-out throughput
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p change-tests
//! cargo test -p change-tests integration::properties
//! cargo bench -p change-tests
//! ```

pub mod integration;
