//! Version selection for floating image tags.
//!
//! - `constraint`: range grammar and lenient tag parsing
//! - `resolver`: picks the highest satisfying tag

pub mod constraint;
pub mod resolver;

pub use constraint::{ConstraintError, Constraints, parse_tag};
pub use resolver::{SemverResolver, VersionResolver};
