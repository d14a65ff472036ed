//! # Boundary Enforcer
//!
//! The sole translator from "a path something wants" to "a path safe to
//! touch". A [`BoundaryEnforcer`] is rooted at one canonical directory and
//! returns only paths equal to that root or beneath it.
//!
//! Validation is lexical first (`.`/`..` resolved against the root, NUL bytes
//! refused) and then physical: the deepest existing ancestor is canonicalized
//! so a symlink inside the root cannot redirect a write outside it.
//!
//! [`BoundedFs`] is the façade the rest of the crate uses for file access.
//! No component operating inside a bounded root holds an unwrapped handle.

mod enforcer;
mod error;
mod fs;
mod normalize;

pub use enforcer::{Attribution, BoundaryEnforcer};
pub use error::{BoundaryViolation, FsError, ViolationType};
pub use fs::BoundedFs;
pub use normalize::normalize_path_lexically;
