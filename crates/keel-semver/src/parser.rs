//! Constraint-string parsing into version sets.

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::range::VersionSetSpecifier;
use crate::version::{Version, VersionError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConstraintError {
    #[error("Could not parse version constraint \"{constraint}\": {reason}")]
    Malformed { constraint: String, reason: String },
    #[error(transparent)]
    Version(#[from] VersionError),
}

lazy_static! {
    // OR constraint splitter, tolerant of single-pipe spelling
    static ref OR_SPLIT_RE: Regex = Regex::new(r"\s*\|\|?\s*").unwrap();

    // Hyphen range "A - B" (spaces required so prerelease dashes survive)
    static ref HYPHEN_RE: Regex =
        Regex::new(r"^(?P<from>[^\s]+)\s+-\s+(?P<to>[^\s]+)$").unwrap();

    // Bare wildcard
    static ref WILDCARD_RE: Regex = Regex::new(r"^v?[xX*](\.[xX*])*$").unwrap();

    // Trailing-wildcard partial like 1.x or 1.2.*
    static ref X_RANGE_RE: Regex =
        Regex::new(r"^v?(\d+)(?:\.(\d+))?(?:\.[xX*])+$").unwrap();

    // Whitespace between an operator and its version
    static ref OP_SPACE_RE: Regex = Regex::new(r"(>=|<=|==|!=|<>|[><=~^])\s+").unwrap();
}

/// How much of a version a constraint spelled out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Precision {
    Major,
    Minor,
    Full,
}

/// A version with the precision it was written at; `1.2` parses as
/// `1.2.0` at minor precision.
#[derive(Debug, Clone)]
struct PartialVersion {
    version: Version,
    precision: Precision,
}

impl PartialVersion {
    fn parse(input: &str) -> Result<Self, ConstraintError> {
        let trimmed = input.strip_prefix('v').unwrap_or(input);

        // Count the numeric components before any prerelease/build suffix
        let core_len = trimmed
            .find(|c| c == '-' || c == '+')
            .unwrap_or(trimmed.len());
        let dots = trimmed[..core_len].matches('.').count();

        let (full, precision) = match dots {
            0 => (format!("{}.0.0", &trimmed[..core_len]), Precision::Major),
            1 => (format!("{}.0", &trimmed[..core_len]), Precision::Minor),
            _ => (trimmed.to_string(), Precision::Full),
        };
        if precision != Precision::Full && core_len != trimmed.len() {
            return Err(ConstraintError::Malformed {
                constraint: input.to_string(),
                reason: "prerelease requires all three version components".to_string(),
            });
        }

        let version: Version = full.parse()?;
        Ok(Self { version, precision })
    }

    /// The smallest release above everything this partial covers.
    fn implied_upper(&self) -> Version {
        match self.precision {
            Precision::Major => self.version.next_major(),
            Precision::Minor => self.version.next_minor(),
            Precision::Full => self.version.next_patch(),
        }
    }

    /// A bare or `=` partial denotes its whole implied range; a full
    /// version denotes itself.
    fn as_range(&self) -> VersionSetSpecifier {
        match self.precision {
            Precision::Full => VersionSetSpecifier::exact(self.version.clone()),
            _ => VersionSetSpecifier::between(self.version.clone(), self.implied_upper()),
        }
    }
}

/// Parse a constraint string into a [`VersionSetSpecifier`].
///
/// Supports exact and partial versions, `^`/`~` shorthands, the
/// comparison operators, `x`/`*` wildcards, hyphen ranges, `||`
/// unions and whitespace/comma conjunctions.
pub fn parse_constraint(input: &str) -> Result<VersionSetSpecifier, ConstraintError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ConstraintError::Malformed {
            constraint: input.to_string(),
            reason: "empty constraint".to_string(),
        });
    }

    let mut result = VersionSetSpecifier::empty();
    for group in OR_SPLIT_RE.split(trimmed) {
        result = result.union(&parse_and_group(group, input)?);
    }
    Ok(result)
}

fn parse_and_group(group: &str, original: &str) -> Result<VersionSetSpecifier, ConstraintError> {
    let group = group.trim();
    if group.is_empty() {
        return Err(ConstraintError::Malformed {
            constraint: original.to_string(),
            reason: "empty constraint group".to_string(),
        });
    }

    if let Some(caps) = HYPHEN_RE.captures(group) {
        let from = PartialVersion::parse(&caps["from"])?;
        let to = PartialVersion::parse(&caps["to"])?;
        let lower = VersionSetSpecifier::at_least(from.version);
        let upper = match to.precision {
            // "1.2.3 - 2.3.4" is inclusive of its upper end
            Precision::Full => VersionSetSpecifier::at_most(to.version),
            // "1.2 - 2.3" runs to the end of 2.3.x
            _ => VersionSetSpecifier::lower_than(to.implied_upper()),
        };
        return Ok(lower.intersect(&upper));
    }

    let group = OP_SPACE_RE.replace_all(group, "$1");
    let mut result = VersionSetSpecifier::any();
    for token in group.split(|c: char| c.is_whitespace() || c == ',') {
        if token.is_empty() {
            continue;
        }
        result = result.intersect(&parse_simple(token, original)?);
    }
    Ok(result)
}

fn parse_simple(token: &str, original: &str) -> Result<VersionSetSpecifier, ConstraintError> {
    if WILDCARD_RE.is_match(token) {
        return Ok(VersionSetSpecifier::any());
    }

    if let Some(caps) = X_RANGE_RE.captures(token) {
        let major: u64 = caps[1].parse().map_err(|_| ConstraintError::Malformed {
            constraint: original.to_string(),
            reason: format!("version component out of range in \"{}\"", token),
        })?;
        return Ok(match caps.get(2) {
            Some(minor) => {
                let minor: u64 = minor.as_str().parse().map_err(|_| {
                    ConstraintError::Malformed {
                        constraint: original.to_string(),
                        reason: format!("version component out of range in \"{}\"", token),
                    }
                })?;
                let lower = Version::new(major, minor, 0);
                let upper = lower.next_minor();
                VersionSetSpecifier::between(lower, upper)
            }
            None => {
                let lower = Version::new(major, 0, 0);
                let upper = lower.next_major();
                VersionSetSpecifier::between(lower, upper)
            }
        });
    }

    if let Some(rest) = token.strip_prefix('^') {
        let partial = PartialVersion::parse(rest)?;
        return Ok(VersionSetSpecifier::caret(partial.version));
    }

    if let Some(rest) = token.strip_prefix('~') {
        let partial = PartialVersion::parse(rest)?;
        return Ok(match partial.precision {
            Precision::Major => VersionSetSpecifier::between(
                partial.version.clone(),
                partial.version.next_major(),
            ),
            _ => VersionSetSpecifier::tilde(partial.version),
        });
    }

    for op in [">=", "<=", "==", "!=", "<>", ">", "<", "="] {
        if let Some(rest) = token.strip_prefix(op) {
            let partial = PartialVersion::parse(rest.trim())?;
            return Ok(match op {
                ">=" => VersionSetSpecifier::at_least(partial.version),
                ">" => match partial.precision {
                    // ">1.2" means beyond the whole 1.2.x line
                    Precision::Full => VersionSetSpecifier::higher_than(partial.version),
                    _ => VersionSetSpecifier::at_least(partial.implied_upper()),
                },
                "<" => VersionSetSpecifier::lower_than(partial.version),
                "<=" => match partial.precision {
                    Precision::Full => VersionSetSpecifier::at_most(partial.version),
                    _ => VersionSetSpecifier::lower_than(partial.implied_upper()),
                },
                "=" | "==" => partial.as_range(),
                _ => partial.as_range().complement(),
            });
        }
    }

    let partial = PartialVersion::parse(token)?;
    Ok(partial.as_range())
}
