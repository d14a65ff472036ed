//! Command-line front end. `src/shell/bin.rs` only calls [`run`].

mod cli;

pub use cli::run;
