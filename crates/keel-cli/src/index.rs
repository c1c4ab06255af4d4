//! Offline package index backing the CLI's container provider.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use keel_pm::identity::{PackageIdentity, PackageReference, Requirement};
use keel_pm::MemoryProvider;
use keel_semver::parse_constraint;

/// Index file shape: one entry per package identity, each listing its
/// released versions and branch heads with their dependency edges.
#[derive(Debug, Deserialize)]
struct IndexFile {
    #[serde(default)]
    packages: HashMap<String, IndexPackage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexPackage {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    releases: Vec<IndexRelease>,
    #[serde(default)]
    branches: HashMap<String, IndexBranch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexRelease {
    version: String,
    #[serde(default)]
    revision: Option<String>,
    #[serde(default = "default_true")]
    tools_compatible: bool,
    #[serde(default)]
    dependencies: Vec<IndexDependency>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexBranch {
    revision: String,
    #[serde(default)]
    dependencies: Vec<IndexDependency>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexDependency {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    identity: Option<String>,
    #[serde(default)]
    range: Option<String>,
    #[serde(default)]
    exact: Option<String>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    revision: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Load the index file into an in-memory container provider.
pub fn load_provider(path: &Path) -> Result<MemoryProvider> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("could not read package index at {}", path.display()))?;
    let index: IndexFile = serde_json::from_str(&contents)
        .with_context(|| format!("package index at {} is malformed", path.display()))?;

    let mut provider = MemoryProvider::new();
    for (identity, package) in index.packages {
        let reference = package_reference(&identity, &package)?;
        for release in package.releases {
            let version = release
                .version
                .parse()
                .with_context(|| format!("invalid version for '{}'", identity))?;
            let edges = edges(&release.dependencies, &identity)?;
            if release.tools_compatible {
                provider.add_version(
                    &reference,
                    version,
                    release.revision.unwrap_or_default(),
                    edges,
                );
            } else {
                provider.add_incompatible_version(&reference, version);
            }
        }
        for (name, branch) in package.branches {
            let branch_edges = edges(&branch.dependencies, &identity)?;
            provider.add_branch(&reference, name, branch.revision, branch_edges);
        }
    }
    Ok(provider)
}

fn package_reference(identity: &str, package: &IndexPackage) -> Result<PackageReference> {
    Ok(match package.kind.as_deref().unwrap_or("remoteSourceControl") {
        "remoteSourceControl" => {
            let location = package
                .location
                .clone()
                .with_context(|| format!("package '{}' has no location", identity))?;
            PackageReference::remote(location)
        }
        "localSourceControl" => {
            let location = package
                .location
                .clone()
                .with_context(|| format!("package '{}' has no location", identity))?;
            PackageReference::local(PathBuf::from(location))
        }
        "registry" => PackageReference::registry(PackageIdentity::plain(identity)),
        other => bail!("package '{}' has unknown kind \"{}\"", identity, other),
    })
}

fn edges(
    dependencies: &[IndexDependency],
    from: &str,
) -> Result<Vec<(PackageReference, Requirement)>> {
    let mut out = Vec::with_capacity(dependencies.len());
    for dependency in dependencies {
        let reference = match dependency.kind.as_deref().unwrap_or("remoteSourceControl") {
            "remoteSourceControl" => {
                let location = dependency
                    .location
                    .clone()
                    .with_context(|| format!("dependency of '{}' has no location", from))?;
                PackageReference::remote(location)
            }
            "localSourceControl" => {
                let location = dependency
                    .location
                    .clone()
                    .with_context(|| format!("dependency of '{}' has no location", from))?;
                PackageReference::local(PathBuf::from(location))
            }
            "registry" => {
                let identity = dependency
                    .identity
                    .clone()
                    .or_else(|| dependency.location.clone())
                    .with_context(|| format!("registry dependency of '{}' has no identity", from))?;
                PackageReference::registry(PackageIdentity::plain(identity))
            }
            other => bail!("dependency of '{}' has unknown kind \"{}\"", from, other),
        };

        let requirement = match (
            &dependency.range,
            &dependency.exact,
            &dependency.branch,
            &dependency.revision,
        ) {
            (Some(range), None, None, None) => Requirement::Range(parse_constraint(range)?),
            (None, Some(exact), None, None) => Requirement::Exact(exact.parse()?),
            (None, None, Some(branch), None) => Requirement::Branch(branch.clone()),
            (None, None, None, Some(revision)) => Requirement::Revision(revision.clone()),
            (None, None, None, None) => Requirement::Unversioned,
            _ => bail!("dependency of '{}' declares more than one requirement", from),
        };

        out.push((reference, requirement));
    }
    Ok(out)
}
