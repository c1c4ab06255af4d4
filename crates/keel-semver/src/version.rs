//! Strict SemVer 2.0.0 version type.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use thiserror::Error;

/// Error type for version parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Invalid version string \"{0}\"")]
    InvalidVersion(String),
    #[error("Invalid version string \"{version}\": {reason}")]
    InvalidComponent { version: String, reason: String },
}

/// A single dot-separated prerelease identifier.
///
/// Numeric identifiers compare numerically and always sort before
/// alphanumeric identifiers, per SemVer 2.0.0 §11.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u64),
    AlphaNumeric(String),
}

impl Identifier {
    fn parse(s: &str, version: &str) -> Result<Self, VersionError> {
        if s.is_empty() {
            return Err(VersionError::InvalidComponent {
                version: version.to_string(),
                reason: "empty prerelease identifier".to_string(),
            });
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            if s.len() > 1 && s.starts_with('0') {
                return Err(VersionError::InvalidComponent {
                    version: version.to_string(),
                    reason: format!("leading zero in numeric identifier \"{}\"", s),
                });
            }
            let n = s.parse::<u64>().map_err(|_| VersionError::InvalidComponent {
                version: version.to_string(),
                reason: format!("numeric identifier \"{}\" out of range", s),
            })?;
            Ok(Identifier::Numeric(n))
        } else {
            if !s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
                return Err(VersionError::InvalidComponent {
                    version: version.to_string(),
                    reason: format!("invalid character in identifier \"{}\"", s),
                });
            }
            Ok(Identifier::AlphaNumeric(s.to_string()))
        }
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Identifier::Numeric(a), Identifier::Numeric(b)) => a.cmp(b),
            (Identifier::Numeric(_), Identifier::AlphaNumeric(_)) => Ordering::Less,
            (Identifier::AlphaNumeric(_), Identifier::Numeric(_)) => Ordering::Greater,
            (Identifier::AlphaNumeric(a), Identifier::AlphaNumeric(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Numeric(n) => write!(f, "{}", n),
            Identifier::AlphaNumeric(s) => write!(f, "{}", s),
        }
    }
}

/// A strict SemVer 2.0.0 version.
///
/// Build metadata is carried for formatting but ignored by comparison,
/// equality and hashing, so `1.0.0+a` and `1.0.0+b` are the same version
/// as far as resolution is concerned.
#[derive(Debug, Clone)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Vec<Identifier>,
    pub build: Vec<String>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: Vec::new(),
            build: Vec::new(),
        }
    }

    /// Whether this version carries prerelease identifiers.
    pub fn is_prerelease(&self) -> bool {
        !self.prerelease.is_empty()
    }

    /// The smallest release version strictly greater than every version
    /// with this major component.
    pub fn next_major(&self) -> Version {
        Version::new(self.major + 1, 0, 0)
    }

    /// The smallest release version strictly greater than every version
    /// with this major.minor prefix.
    pub fn next_minor(&self) -> Version {
        Version::new(self.major, self.minor + 1, 0)
    }

    /// The release version immediately following this one on the patch line.
    pub fn next_patch(&self) -> Version {
        Version::new(self.major, self.minor, self.patch + 1)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.prerelease.hash(state);
        // build metadata excluded: it is excluded from Eq as well
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then_with(|| self.minor.cmp(&other.minor))
            .then_with(|| self.patch.cmp(&other.patch))
            .then_with(|| compare_prerelease(&self.prerelease, &other.prerelease))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// SemVer §11: a release sorts above any of its prereleases; prerelease
/// lists compare identifier by identifier, shorter prefix first.
fn compare_prerelease(a: &[Identifier], b: &[Identifier]) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        (false, false) => {}
    }
    for (x, y) in a.iter().zip(b.iter()) {
        match x.cmp(y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let original = input;

        // Split off build metadata first, then prerelease
        let (rest, build) = match input.split_once('+') {
            Some((head, meta)) => (head, parse_build(meta, original)?),
            None => (input, Vec::new()),
        };
        let (core, prerelease) = match rest.split_once('-') {
            Some((head, pre)) => (head, parse_prerelease(pre, original)?),
            None => (rest, Vec::new()),
        };

        let mut parts = core.split('.');
        let major = parse_numeric(parts.next(), original)?;
        let minor = parse_numeric(parts.next(), original)?;
        let patch = parse_numeric(parts.next(), original)?;
        if parts.next().is_some() {
            return Err(VersionError::InvalidComponent {
                version: original.to_string(),
                reason: "more than three version components".to_string(),
            });
        }

        Ok(Version {
            major,
            minor,
            patch,
            prerelease,
            build,
        })
    }
}

fn parse_numeric(part: Option<&str>, version: &str) -> Result<u64, VersionError> {
    let part = part.ok_or_else(|| VersionError::InvalidVersion(version.to_string()))?;
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VersionError::InvalidVersion(version.to_string()));
    }
    if part.len() > 1 && part.starts_with('0') {
        return Err(VersionError::InvalidComponent {
            version: version.to_string(),
            reason: format!("leading zero in \"{}\"", part),
        });
    }
    part.parse::<u64>().map_err(|_| VersionError::InvalidComponent {
        version: version.to_string(),
        reason: format!("component \"{}\" out of range", part),
    })
}

fn parse_prerelease(pre: &str, version: &str) -> Result<Vec<Identifier>, VersionError> {
    pre.split('.').map(|id| Identifier::parse(id, version)).collect()
}

fn parse_build(meta: &str, version: &str) -> Result<Vec<String>, VersionError> {
    meta.split('.')
        .map(|id| {
            if id.is_empty() || !id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
                Err(VersionError::InvalidComponent {
                    version: version.to_string(),
                    reason: format!("invalid build metadata \"{}\"", id),
                })
            } else {
                Ok(id.to_string())
            }
        })
        .collect()
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.prerelease.is_empty() {
            let ids: Vec<String> = self.prerelease.iter().map(|i| i.to_string()).collect();
            write!(f, "-{}", ids.join("."))?;
        }
        if !self.build.is_empty() {
            write!(f, "+{}", self.build.join("."))?;
        }
        Ok(())
    }
}
