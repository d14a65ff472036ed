//! # Utility Modules
//!
//! - **`logging`**: diagnostic `tracing` subscriber setup for the binary and
//!   tests.

pub mod logging;
