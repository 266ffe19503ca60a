//! Version constraint grammar.
//!
//! Constraints use the classic range syntax found on container image tags:
//!
//! - alternatives separated by `||`, each a `,`-separated conjunction
//! - comparators `=`, `!=`, `>`, `<`, `>=` (`=>`), `<=` (`=<`), `~` (`~>`), `^`
//! - wildcards `x`, `X` and `*` in any position, and a missing minor
//!   component (`1`, `~1`) behaves as a minor wildcard
//! - hyphen ranges such as `1.2 - 1.4.5`
//!
//! The caret operator only pins the major version: `^0.5.0` accepts `0.6`.
//! A pre-release version only satisfies comparators that carry a pre-release
//! themselves.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use semver::{BuildMetadata, Prerelease, Version};
use thiserror::Error;

/// Errors produced while parsing a constraint expression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConstraintError {
    #[error("empty constraint")]
    Empty,

    #[error("improper constraint: {0}")]
    Improper(String),

    #[error("invalid version in constraint {constraint}: {reason}")]
    InvalidVersion { constraint: String, reason: String },
}

static TAG_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^v?([0-9]+)(?:\.([0-9]+))?(?:\.([0-9]+))?(?:-([0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*))?(?:\+([0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*))?$",
    )
    .ok()
});

static COMPARATOR_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(!=|>=|=>|<=|=<|~>|=|>|<|~|\^)?\s*v?([0-9]+|[xX*])(?:\.([0-9]+|[xX*]))?(?:\.([0-9]+|[xX*]))?(?:-([0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*))?(?:\+([0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*))?\s*$",
    )
    .ok()
});

static HYPHEN_RANGE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    let bound = r"v?[0-9xX*]+(?:\.[0-9xX*]+){0,2}(?:-[0-9A-Za-z.-]+)?(?:\+[0-9A-Za-z.-]+)?";
    Regex::new(&format!(r"\s*({bound})\s+-\s+({bound})\s*")).ok()
});

/// Parse an image tag as a semantic version.
///
/// Tags are parsed leniently: a leading `v` is allowed and missing minor or
/// patch components default to zero (`0.6` is `0.6.0`, `0.5-beta` is
/// `0.5.0-beta`). Returns `None` for tags that are not versions.
pub fn parse_tag(tag: &str) -> Option<Version> {
    let re = TAG_RE.as_ref()?;
    let caps = re.captures(tag)?;

    let number = |idx: usize| -> Option<u64> {
        match caps.get(idx) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(0),
        }
    };

    let mut version = Version::new(number(1)?, number(2)?, number(3)?);
    if let Some(pre) = caps.get(4) {
        version.pre = Prerelease::new(pre.as_str()).ok()?;
    }
    if let Some(build) = caps.get(5) {
        version.build = BuildMetadata::new(build.as_str()).ok()?;
    }
    Some(version)
}

/// Comparison operator of a single comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    /// No operator or `=`. Behaves as `~` when the version has wildcards.
    TildeOrEqual,
    NotEqual,
    Greater,
    Less,
    GreaterEq,
    LessEq,
    Tilde,
    Caret,
}

impl Op {
    fn parse(op: Option<&str>) -> Self {
        match op {
            Some("!=") => Op::NotEqual,
            Some(">") => Op::Greater,
            Some("<") => Op::Less,
            Some(">=") | Some("=>") => Op::GreaterEq,
            Some("<=") | Some("=<") => Op::LessEq,
            Some("~") | Some("~>") => Op::Tilde,
            Some("^") => Op::Caret,
            _ => Op::TildeOrEqual,
        }
    }
}

/// Which component of a comparator's version was left open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wildcard {
    None,
    Major,
    Minor,
    Patch,
}

fn is_wildcard(part: &str) -> bool {
    matches!(part, "x" | "X" | "*")
}

/// A single `<op><version>` term.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Comparator {
    op: Op,
    version: Version,
    wildcard: Wildcard,
}

impl Comparator {
    fn parse(term: &str) -> Result<Self, ConstraintError> {
        let re = COMPARATOR_RE
            .as_ref()
            .ok_or_else(|| ConstraintError::Improper(term.to_string()))?;
        let caps = re
            .captures(term)
            .ok_or_else(|| ConstraintError::Improper(term.trim().to_string()))?;

        let op = Op::parse(caps.get(1).map(|m| m.as_str()));
        let major = caps.get(2).map_or("", |m| m.as_str());
        let minor = caps.get(3).map(|m| m.as_str());
        let patch = caps.get(4).map(|m| m.as_str());

        let invalid = |reason: String| ConstraintError::InvalidVersion {
            constraint: term.trim().to_string(),
            reason,
        };
        let number = |part: &str| -> Result<u64, ConstraintError> {
            part.parse::<u64>().map_err(|e| invalid(e.to_string()))
        };

        let (wildcard, mut version) = if is_wildcard(major) {
            (Wildcard::Major, Version::new(0, 0, 0))
        } else {
            match (minor, patch) {
                (None, _) => (Wildcard::Minor, Version::new(number(major)?, 0, 0)),
                (Some(m), _) if is_wildcard(m) => {
                    (Wildcard::Minor, Version::new(number(major)?, 0, 0))
                }
                (Some(m), Some(p)) if is_wildcard(p) => (
                    Wildcard::Patch,
                    Version::new(number(major)?, number(m)?, 0),
                ),
                (Some(m), Some(p)) => (
                    Wildcard::None,
                    Version::new(number(major)?, number(m)?, number(p)?),
                ),
                (Some(m), None) => (Wildcard::None, Version::new(number(major)?, number(m)?, 0)),
            }
        };

        if wildcard != Wildcard::Major
            && let Some(pre) = caps.get(5)
        {
            version.pre = Prerelease::new(pre.as_str()).map_err(|e| invalid(e.to_string()))?;
        }

        Ok(Self {
            op,
            version,
            wildcard,
        })
    }

    fn dirty(&self) -> bool {
        self.wildcard != Wildcard::None
    }

    fn matches(&self, v: &Version) -> bool {
        if !v.pre.is_empty() && self.version.pre.is_empty() {
            return false;
        }

        let ordering = v.cmp_precedence(&self.version);
        let con = &self.version;

        match self.op {
            Op::TildeOrEqual if self.dirty() => self.tilde(v, ordering),
            Op::TildeOrEqual => ordering == Ordering::Equal,
            Op::Tilde => self.tilde(v, ordering),
            Op::Caret => ordering != Ordering::Less && v.major == con.major,
            Op::NotEqual => {
                if !self.dirty() {
                    return ordering != Ordering::Equal;
                }
                if v.major != con.major {
                    return true;
                }
                self.wildcard == Wildcard::Patch && v.minor != con.minor
            }
            Op::Greater => {
                if !self.dirty() {
                    return ordering == Ordering::Greater;
                }
                match v.major.cmp(&con.major) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => self.wildcard == Wildcard::Patch && v.minor > con.minor,
                }
            }
            Op::GreaterEq => ordering != Ordering::Less,
            Op::Less => ordering == Ordering::Less,
            Op::LessEq => {
                if !self.dirty() {
                    return ordering != Ordering::Greater;
                }
                match self.wildcard {
                    Wildcard::Major => true,
                    Wildcard::Minor => v.major <= con.major,
                    _ => v.major < con.major || (v.major == con.major && v.minor <= con.minor),
                }
            }
        }
    }

    fn tilde(&self, v: &Version, ordering: Ordering) -> bool {
        if ordering == Ordering::Less {
            return false;
        }
        // ~0.0.0 and bare wildcards accept everything at or above the floor.
        if self.wildcard == Wildcard::Major {
            return true;
        }
        let con = &self.version;
        if con.major == 0 && con.minor == 0 && con.patch == 0 && self.wildcard == Wildcard::None {
            return true;
        }
        if v.major != con.major {
            return false;
        }
        self.wildcard == Wildcard::Minor || v.minor == con.minor
    }
}

/// A parsed constraint expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraints {
    original: String,
    alternatives: Vec<Vec<Comparator>>,
}

impl Constraints {
    /// Parse a constraint expression.
    pub fn parse(input: &str) -> Result<Self, ConstraintError> {
        if input.trim().is_empty() {
            return Err(ConstraintError::Empty);
        }

        let rewritten = match HYPHEN_RANGE_RE.as_ref() {
            Some(re) => re.replace_all(input, ">= $1, <= $2").into_owned(),
            None => input.to_string(),
        };

        let alternatives = rewritten
            .split("||")
            .map(|alternative| {
                alternative
                    .split(',')
                    .map(Comparator::parse)
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            original: input.to_string(),
            alternatives,
        })
    }

    /// Check whether a version satisfies any alternative of the expression.
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives
            .iter()
            .any(|all| all.iter().all(|c| c.matches(version)))
    }
}

impl FromStr for Constraints {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Constraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}
