//! Constraint-based tag selection.

use semver::Version;
use tracing::trace;

use super::constraint::{Constraints, parse_tag};

/// Chooses the tag to pin for a constraint out of the tags a registry offers.
pub trait VersionResolver: Send + Sync {
    /// Pick a tag for `constraint` from `candidates`.
    ///
    /// Never fails: when nothing can be selected the constraint itself is
    /// returned.
    fn resolve(&self, constraint: &str, candidates: &[String]) -> String;
}

/// Semantic-version resolver.
///
/// Returns the original spelling of the highest candidate that parses as a
/// version and satisfies the constraint. When the constraint does not parse,
/// or no candidate satisfies it, the constraint string is returned unchanged
/// and ends up verbatim in the rewritten image reference.
#[derive(Debug, Clone, Copy, Default)]
pub struct SemverResolver;

impl SemverResolver {
    pub fn new() -> Self {
        Self
    }
}

impl VersionResolver for SemverResolver {
    fn resolve(&self, constraint: &str, candidates: &[String]) -> String {
        let constraints = match Constraints::parse(constraint) {
            Ok(c) => c,
            Err(e) => {
                trace!(constraint, error = %e, "Constraint is not a range, keeping it as a literal tag");
                return constraint.to_string();
            }
        };

        let mut compatible: Vec<(Version, &String)> = candidates
            .iter()
            .filter_map(|tag| parse_tag(tag).map(|v| (v, tag)))
            .filter(|(v, _)| constraints.matches(v))
            .collect();

        // Stable sort keeps registry order among equal-precedence spellings.
        compatible.sort_by(|(a, _), (b, _)| b.cmp_precedence(a));

        match compatible.first() {
            Some((_, tag)) => (*tag).clone(),
            None => constraint.to_string(),
        }
    }
}
