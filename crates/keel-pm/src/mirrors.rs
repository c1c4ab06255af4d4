//! Bidirectional URL to mirror mapping.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A table routing package fetches through alternative hosts.
///
/// Applied with [`resolve`](Self::resolve) before identity derivation when
/// dependency edges load, and reversed with [`unresolve`](Self::unresolve)
/// when pins are saved, so the pins file stays portable across
/// environments with different mirror configurations.
#[derive(Debug, Clone, Default)]
pub struct Mirrors {
    forward: IndexMap<String, String>,
    reverse: HashMap<String, String>,
}

impl Mirrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `original` through `mirror`. Overwrites an existing entry for
    /// the same original.
    pub fn set(&mut self, original: impl Into<String>, mirror: impl Into<String>) {
        let original = original.into();
        let mirror = mirror.into();
        if let Some(previous) = self.forward.insert(original.clone(), mirror.clone()) {
            self.reverse.remove(&previous);
        }
        self.reverse.insert(mirror, original);
    }

    /// Remove the mirror for `original`, if set.
    pub fn unset(&mut self, original: &str) -> bool {
        match self.forward.shift_remove(original) {
            Some(mirror) => {
                self.reverse.remove(&mirror);
                true
            }
            None => false,
        }
    }

    /// The mirror for `url`, or `url` itself outside the table.
    pub fn resolve<'a>(&'a self, url: &'a str) -> &'a str {
        self.forward.get(url).map(String::as_str).unwrap_or(url)
    }

    /// The original for a known mirror target, or `url` itself otherwise.
    pub fn unresolve<'a>(&'a self, url: &'a str) -> &'a str {
        self.reverse.get(url).map(String::as_str).unwrap_or(url)
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.forward.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// On-disk form of the mirrors configuration.
#[derive(Debug, Serialize, Deserialize)]
pub struct MirrorsFile {
    pub version: u32,
    #[serde(default)]
    pub mirrors: Vec<MirrorEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MirrorEntry {
    pub original: String,
    pub mirror: String,
}

impl From<&Mirrors> for MirrorsFile {
    fn from(mirrors: &Mirrors) -> Self {
        Self {
            version: 1,
            mirrors: mirrors
                .iter()
                .map(|(original, mirror)| MirrorEntry {
                    original: original.to_string(),
                    mirror: mirror.to_string(),
                })
                .collect(),
        }
    }
}

impl From<MirrorsFile> for Mirrors {
    fn from(file: MirrorsFile) -> Self {
        let mut mirrors = Mirrors::new();
        for entry in file.mirrors {
            mirrors.set(entry.original, entry.mirror);
        }
        mirrors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PackageIdentity;

    #[test]
    fn test_resolve_and_unresolve() {
        let mut mirrors = Mirrors::new();
        mirrors.set(
            "https://github.com/corporate/foo.git",
            "https://ghe.example.com/team/foo.git",
        );

        assert_eq!(
            mirrors.resolve("https://github.com/corporate/foo.git"),
            "https://ghe.example.com/team/foo.git"
        );
        assert_eq!(
            mirrors.unresolve("https://ghe.example.com/team/foo.git"),
            "https://github.com/corporate/foo.git"
        );
    }

    #[test]
    fn test_identity_outside_domain() {
        let mut mirrors = Mirrors::new();
        mirrors.set("https://a.example.com/x.git", "https://b.example.com/x.git");

        assert_eq!(
            mirrors.resolve("https://c.example.com/y.git"),
            "https://c.example.com/y.git"
        );
        assert_eq!(
            mirrors.unresolve("https://c.example.com/y.git"),
            "https://c.example.com/y.git"
        );
    }

    #[test]
    fn test_round_trip_invariant() {
        let mut mirrors = Mirrors::new();
        mirrors.set("https://a.example.com/x.git", "https://b.example.com/x.git");
        mirrors.set("https://a.example.com/y.git", "https://b.example.com/y.git");

        for (original, _) in mirrors.iter() {
            assert_eq!(mirrors.unresolve(mirrors.resolve(original)), original);
        }
    }

    #[test]
    fn test_mirror_to_itself_is_noop() {
        let mut mirrors = Mirrors::new();
        mirrors.set("https://a.example.com/x.git", "https://a.example.com/x.git");

        assert_eq!(
            mirrors.resolve("https://a.example.com/x.git"),
            "https://a.example.com/x.git"
        );
        assert_eq!(
            mirrors.unresolve("https://a.example.com/x.git"),
            "https://a.example.com/x.git"
        );
    }

    #[test]
    fn test_mirror_preserves_identity() {
        let mut mirrors = Mirrors::new();
        mirrors.set(
            "https://github.com/corporate/Foo.git",
            "https://ghe.example.com/mirrored/Foo.git",
        );

        for (original, mirror) in mirrors.iter() {
            assert_eq!(
                PackageIdentity::from_location(original),
                PackageIdentity::from_location(mirror)
            );
        }
    }

    #[test]
    fn test_overwrite_clears_stale_reverse_entry() {
        let mut mirrors = Mirrors::new();
        mirrors.set("https://a.example.com/x.git", "https://old.example.com/x.git");
        mirrors.set("https://a.example.com/x.git", "https://new.example.com/x.git");

        assert_eq!(
            mirrors.unresolve("https://old.example.com/x.git"),
            "https://old.example.com/x.git"
        );
        assert_eq!(
            mirrors.unresolve("https://new.example.com/x.git"),
            "https://a.example.com/x.git"
        );
    }

    #[test]
    fn test_file_round_trip() {
        let mut mirrors = Mirrors::new();
        mirrors.set("https://a.example.com/x.git", "https://b.example.com/x.git");

        let file = MirrorsFile::from(&mirrors);
        let json = serde_json::to_string(&file).unwrap();
        let reloaded: Mirrors = serde_json::from_str::<MirrorsFile>(&json).unwrap().into();

        assert_eq!(
            reloaded.resolve("https://a.example.com/x.git"),
            "https://b.example.com/x.git"
        );
    }
}
