//! Package identity and reference model.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use keel_semver::{Version, VersionSetSpecifier};

/// Canonical name of a package, derived purely syntactically from its URL
/// or filesystem path.
///
/// Two references with the same identity are the same package even when
/// their locations differ; in particular a mirror of a URL has the same
/// identity as the URL itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageIdentity(String);

impl PackageIdentity {
    /// Derive the identity from a repository URL or filesystem path.
    ///
    /// Strips the scheme, user-info and `.git` suffix, drops trailing
    /// separators, takes the last path component and case-folds it.
    pub fn from_location(location: &str) -> Self {
        let mut rest = location.trim();

        // Strip "scheme://"
        if let Some(idx) = rest.find("://") {
            rest = &rest[idx + 3..];
        }
        // Strip user-info in both authority and scp-like forms
        if let Some(idx) = rest.find('@') {
            rest = &rest[idx + 1..];
        }
        // scp-like "host:path" separators count as path separators
        let rest = rest.replace(':', "/");
        let rest = rest.trim_end_matches(&['/', '\\'][..]);

        let basename = rest
            .rsplit(&['/', '\\'][..])
            .find(|s| !s.is_empty())
            .unwrap_or(rest);
        let basename = basename
            .strip_suffix(".git")
            .or_else(|| basename.strip_suffix(".GIT"))
            .unwrap_or(basename);

        Self(basename.to_lowercase())
    }

    pub fn from_path(path: &Path) -> Self {
        Self::from_location(&path.to_string_lossy())
    }

    /// An identity already in canonical form, as read from a pins file.
    pub fn plain(name: impl Into<String>) -> Self {
        Self(name.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of origin a package reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceKind {
    Root,
    LocalSourceControl,
    RemoteSourceControl,
    Registry,
}

impl ReferenceKind {
    pub fn is_source_control(&self) -> bool {
        matches!(
            self,
            ReferenceKind::LocalSourceControl | ReferenceKind::RemoteSourceControl
        )
    }
}

/// A reference to a package: enough information to fetch it, while
/// equality and hashing consider only identity and kind.
#[derive(Debug, Clone)]
pub enum PackageReference {
    Root {
        identity: PackageIdentity,
        path: PathBuf,
    },
    LocalSourceControl {
        identity: PackageIdentity,
        path: PathBuf,
    },
    RemoteSourceControl {
        identity: PackageIdentity,
        url: String,
    },
    Registry {
        identity: PackageIdentity,
    },
}

impl PackageReference {
    pub fn root(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        PackageReference::Root {
            identity: PackageIdentity::from_path(&path),
            path,
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        PackageReference::LocalSourceControl {
            identity: PackageIdentity::from_path(&path),
            path,
        }
    }

    pub fn remote(url: impl Into<String>) -> Self {
        let url = url.into();
        PackageReference::RemoteSourceControl {
            identity: PackageIdentity::from_location(&url),
            url,
        }
    }

    pub fn registry(identity: PackageIdentity) -> Self {
        PackageReference::Registry { identity }
    }

    pub fn identity(&self) -> &PackageIdentity {
        match self {
            PackageReference::Root { identity, .. }
            | PackageReference::LocalSourceControl { identity, .. }
            | PackageReference::RemoteSourceControl { identity, .. }
            | PackageReference::Registry { identity } => identity,
        }
    }

    pub fn kind(&self) -> ReferenceKind {
        match self {
            PackageReference::Root { .. } => ReferenceKind::Root,
            PackageReference::LocalSourceControl { .. } => ReferenceKind::LocalSourceControl,
            PackageReference::RemoteSourceControl { .. } => ReferenceKind::RemoteSourceControl,
            PackageReference::Registry { .. } => ReferenceKind::Registry,
        }
    }

    /// The URL or path this reference fetches from.
    pub fn location(&self) -> String {
        match self {
            PackageReference::Root { path, .. }
            | PackageReference::LocalSourceControl { path, .. } => {
                path.to_string_lossy().into_owned()
            }
            PackageReference::RemoteSourceControl { url, .. } => url.clone(),
            PackageReference::Registry { identity } => identity.to_string(),
        }
    }
}

impl PartialEq for PackageReference {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity() && self.kind() == other.kind()
    }
}

impl Eq for PackageReference {}

impl Hash for PackageReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
        self.kind().hash(state);
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity())
    }
}

/// A dependency requirement.
///
/// Branches and revisions are opaque equality-only constraints; they
/// intersect with version ranges only in the trivial cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Range(VersionSetSpecifier),
    Exact(Version),
    Branch(String),
    Revision(String),
    Unversioned,
}

impl Requirement {
    /// The version set this requirement constrains to, when it is
    /// version-based at all.
    pub fn version_set(&self) -> Option<VersionSetSpecifier> {
        match self {
            Requirement::Range(set) => Some(set.clone()),
            Requirement::Exact(v) => Some(VersionSetSpecifier::exact(v.clone())),
            Requirement::Unversioned => Some(VersionSetSpecifier::any()),
            Requirement::Branch(_) | Requirement::Revision(_) => None,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Range(set) => write!(f, "{}", set),
            Requirement::Exact(v) => write!(f, "={}", v),
            Requirement::Branch(name) => write!(f, "branch '{}'", name),
            Requirement::Revision(rev) => write!(f, "revision '{}'", rev),
            Requirement::Unversioned => write!(f, "unversioned"),
        }
    }
}

/// The durable state a package is pinned at.
///
/// Revision strings are opaque bytes compared byte-exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinState {
    Version {
        version: Version,
        revision: Option<String>,
    },
    Branch {
        name: String,
        revision: String,
    },
    Revision {
        revision: String,
    },
}

impl PinState {
    pub fn revision(&self) -> Option<&str> {
        match self {
            PinState::Version { revision, .. } => revision.as_deref(),
            PinState::Branch { revision, .. } => Some(revision),
            PinState::Revision { revision } => Some(revision),
        }
    }

    pub fn version(&self) -> Option<&Version> {
        match self {
            PinState::Version { version, .. } => Some(version),
            _ => None,
        }
    }
}

impl fmt::Display for PinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinState::Version { version, .. } => write!(f, "{}", version),
            PinState::Branch { name, revision } => write!(f, "{} ({})", name, revision),
            PinState::Revision { revision } => write!(f, "{}", revision),
        }
    }
}
