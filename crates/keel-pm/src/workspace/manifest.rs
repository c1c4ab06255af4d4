//! Root manifest inputs to the resolver.
//!
//! The resolver never reads manifest syntax; each root manifest
//! contributes a reference and a set of dependency edges.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use keel_semver::parse_constraint;

use crate::error::{Error, Result};
use crate::identity::{PackageIdentity, PackageReference, Requirement};
use crate::solver::RootPackage;
use crate::tools_version::ToolsVersion;

/// A loaded root manifest: the package's own reference plus its declared
/// dependency edges.
#[derive(Debug, Clone)]
pub struct RootManifest {
    pub reference: PackageReference,
    pub tools_version: ToolsVersion,
    pub edges: Vec<(PackageReference, Requirement)>,
}

impl RootManifest {
    pub fn new(reference: PackageReference, edges: Vec<(PackageReference, Requirement)>) -> Self {
        Self {
            reference,
            tools_version: ToolsVersion::CURRENT,
            edges,
        }
    }

    /// Load a manifest file from the package directory at `dir`.
    pub fn from_dir(dir: &Path, file_name: &str) -> Result<Self> {
        let path = dir.join(file_name);
        let contents = fs::read_to_string(&path)?;
        let raw: RawManifest = serde_json::from_str(&contents)?;

        let tools_version = match raw.tools_version {
            Some(s) => s.parse()?,
            None => ToolsVersion::CURRENT,
        };

        let mut edges = Vec::with_capacity(raw.dependencies.len());
        for dependency in raw.dependencies {
            edges.push(dependency.into_edge(&path)?);
        }

        Ok(Self {
            reference: PackageReference::root(dir),
            tools_version,
            edges,
        })
    }

    pub(crate) fn to_root_package(&self) -> RootPackage {
        RootPackage {
            reference: self.reference.clone(),
            edges: self.edges.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    #[allow(dead_code)]
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tools_version: Option<String>,
    #[serde(default)]
    dependencies: Vec<RawDependency>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDependency {
    kind: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    identity: Option<String>,
    requirement: RawRequirement,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawRequirement {
    #[serde(default)]
    range: Option<String>,
    #[serde(default)]
    exact: Option<String>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    revision: Option<String>,
}

impl RawDependency {
    fn into_edge(self, path: &Path) -> Result<(PackageReference, Requirement)> {
        let malformed = |reason: String| Error::MalformedLockfile {
            path: path.to_path_buf(),
            reason,
        };

        let reference = match self.kind.as_str() {
            "remoteSourceControl" => {
                let url = self
                    .location
                    .ok_or_else(|| malformed("remote dependency without location".to_string()))?;
                PackageReference::remote(url)
            }
            "localSourceControl" => {
                let location = self
                    .location
                    .ok_or_else(|| malformed("local dependency without location".to_string()))?;
                PackageReference::local(PathBuf::from(location))
            }
            "registry" => {
                let identity = self
                    .identity
                    .or(self.location)
                    .ok_or_else(|| malformed("registry dependency without identity".to_string()))?;
                PackageReference::registry(PackageIdentity::plain(identity))
            }
            other => return Err(malformed(format!("unknown dependency kind \"{}\"", other))),
        };

        let requirement = match (
            self.requirement.range,
            self.requirement.exact,
            self.requirement.branch,
            self.requirement.revision,
        ) {
            (Some(range), None, None, None) => Requirement::Range(parse_constraint(&range)?),
            (None, Some(exact), None, None) => Requirement::Exact(exact.parse()?),
            (None, None, Some(branch), None) => Requirement::Branch(branch),
            (None, None, None, Some(revision)) => Requirement::Revision(revision),
            (None, None, None, None) => Requirement::Unversioned,
            _ => {
                return Err(malformed(
                    "dependency declares more than one requirement".to_string(),
                ))
            }
        };

        Ok((reference, requirement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("keel.json"),
            r#"{
                "name": "app",
                "toolsVersion": "6.0.0",
                "dependencies": [
                    { "kind": "remoteSourceControl",
                      "location": "https://example.com/foo.git",
                      "requirement": { "range": "^1.0.0" } },
                    { "kind": "registry", "identity": "bar",
                      "requirement": { "exact": "2.0.0" } },
                    { "kind": "remoteSourceControl",
                      "location": "https://example.com/baz.git",
                      "requirement": { "branch": "main" } }
                ]
            }"#,
        )
        .unwrap();

        let manifest = RootManifest::from_dir(dir.path(), "keel.json").unwrap();
        assert_eq!(manifest.tools_version, ToolsVersion::CURRENT);
        assert_eq!(manifest.edges.len(), 3);

        let (foo, requirement) = &manifest.edges[0];
        assert_eq!(foo.identity().as_str(), "foo");
        assert!(matches!(requirement, Requirement::Range(_)));

        assert!(matches!(&manifest.edges[1].1, Requirement::Exact(_)));
        assert!(matches!(&manifest.edges[2].1, Requirement::Branch(b) if b == "main"));
    }

    #[test]
    fn test_conflicting_requirement_fields() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("keel.json"),
            r#"{
                "dependencies": [
                    { "kind": "remoteSourceControl",
                      "location": "https://example.com/foo.git",
                      "requirement": { "range": "^1.0.0", "branch": "main" } }
                ]
            }"#,
        )
        .unwrap();

        assert!(RootManifest::from_dir(dir.path(), "keel.json").is_err());
    }
}
