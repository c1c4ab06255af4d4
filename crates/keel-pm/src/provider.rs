//! The abstracted source of "what versions exist, what are their
//! dependencies" per package.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use keel_semver::Version;

use crate::error::{Error, Result};
use crate::identity::{PackageIdentity, PackageReference, Requirement};

/// A concrete point in a package's history dependencies can be read at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PinnedAt {
    Version(Version),
    Revision(String),
}

impl std::fmt::Display for PinnedAt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinnedAt::Version(v) => write!(f, "{}", v),
            PinnedAt::Revision(r) => write!(f, "{}", r),
        }
    }
}

/// Capability set the resolver is polymorphic over.
///
/// Calls may block on I/O; the resolver awaits them one at a time, so even
/// an implementation that parallelises internally presents its results
/// serially. Implementations are expected to cache — the resolver assumes
/// nothing about cost beyond the total ordering of versions.
#[async_trait]
pub trait PackageContainerProvider: Send + Sync {
    /// Known versions of `identity`, sorted descending.
    async fn versions(&self, identity: &PackageIdentity) -> Result<Vec<Version>>;

    /// Revisions answering a requirement: the branch head for a branch
    /// requirement, the tag revision for an exact version, the revision
    /// itself (when it exists) for a revision requirement.
    async fn revisions(
        &self,
        identity: &PackageIdentity,
        requirement: &Requirement,
    ) -> Result<Vec<String>>;

    /// Outgoing dependency edges of `identity` at a pinned point.
    async fn dependencies(
        &self,
        identity: &PackageIdentity,
        at: &PinnedAt,
    ) -> Result<Vec<(PackageReference, Requirement)>>;

    /// Whether the manifest at this version declares a compatible tools
    /// version.
    async fn is_tools_version_compatible(
        &self,
        identity: &PackageIdentity,
        at: &Version,
    ) -> bool;
}

#[derive(Debug, Clone, Default)]
struct MemoryRelease {
    revision: Option<String>,
    dependencies: Vec<(PackageReference, Requirement)>,
    tools_compatible: bool,
}

#[derive(Debug, Clone, Default)]
struct MemoryPackage {
    releases: HashMap<Version, MemoryRelease>,
    branches: HashMap<String, String>,
    revision_dependencies: HashMap<String, Vec<(PackageReference, Requirement)>>,
}

/// Deterministic in-memory container used by tests and examples.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    packages: HashMap<PackageIdentity, MemoryPackage>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a released version with its revision and dependency edges.
    pub fn add_version(
        &mut self,
        reference: &PackageReference,
        version: Version,
        revision: impl Into<String>,
        dependencies: Vec<(PackageReference, Requirement)>,
    ) {
        let package = self.packages.entry(reference.identity().clone()).or_default();
        package.releases.insert(
            version,
            MemoryRelease {
                revision: Some(revision.into()),
                dependencies,
                tools_compatible: true,
            },
        );
    }

    /// Register a version whose manifest declares an incompatible tools
    /// version; the resolver must skip it.
    pub fn add_incompatible_version(&mut self, reference: &PackageReference, version: Version) {
        let package = self.packages.entry(reference.identity().clone()).or_default();
        package.releases.insert(
            version,
            MemoryRelease {
                revision: None,
                dependencies: Vec::new(),
                tools_compatible: false,
            },
        );
    }

    /// Register a branch head, with the dependency edges visible there.
    pub fn add_branch(
        &mut self,
        reference: &PackageReference,
        name: impl Into<String>,
        revision: impl Into<String>,
        dependencies: Vec<(PackageReference, Requirement)>,
    ) {
        let package = self.packages.entry(reference.identity().clone()).or_default();
        let revision = revision.into();
        package.branches.insert(name.into(), revision.clone());
        package.revision_dependencies.insert(revision, dependencies);
    }

    fn package(&self, identity: &PackageIdentity) -> Result<&MemoryPackage> {
        self.packages.get(identity).ok_or_else(|| Error::Container {
            identity: identity.to_string(),
            reason: "unknown package".to_string(),
        })
    }
}

#[async_trait]
impl PackageContainerProvider for MemoryProvider {
    async fn versions(&self, identity: &PackageIdentity) -> Result<Vec<Version>> {
        let package = self.package(identity)?;
        let mut versions: Vec<Version> = package.releases.keys().cloned().collect();
        versions.sort();
        versions.reverse();
        Ok(versions)
    }

    async fn revisions(
        &self,
        identity: &PackageIdentity,
        requirement: &Requirement,
    ) -> Result<Vec<String>> {
        let package = self.package(identity)?;
        Ok(match requirement {
            Requirement::Branch(name) => {
                package.branches.get(name).cloned().into_iter().collect()
            }
            Requirement::Revision(revision) => {
                if package.revision_dependencies.contains_key(revision)
                    || package.branches.values().any(|r| r == revision)
                {
                    vec![revision.clone()]
                } else {
                    Vec::new()
                }
            }
            Requirement::Exact(version) => package
                .releases
                .get(version)
                .and_then(|r| r.revision.clone())
                .into_iter()
                .collect(),
            _ => Vec::new(),
        })
    }

    async fn dependencies(
        &self,
        identity: &PackageIdentity,
        at: &PinnedAt,
    ) -> Result<Vec<(PackageReference, Requirement)>> {
        let package = self.package(identity)?;
        match at {
            PinnedAt::Version(version) => package
                .releases
                .get(version)
                .map(|r| r.dependencies.clone())
                .ok_or_else(|| Error::Container {
                    identity: identity.to_string(),
                    reason: format!("unknown version {}", version),
                }),
            PinnedAt::Revision(revision) => package
                .revision_dependencies
                .get(revision)
                .cloned()
                .ok_or_else(|| Error::Container {
                    identity: identity.to_string(),
                    reason: format!("unknown revision {}", revision),
                }),
        }
    }

    async fn is_tools_version_compatible(
        &self,
        identity: &PackageIdentity,
        at: &Version,
    ) -> bool {
        self.packages
            .get(identity)
            .and_then(|p| p.releases.get(at))
            .map(|r| r.tools_compatible)
            .unwrap_or(false)
    }
}

/// Memoising decorator over any provider.
///
/// Containers are expected to cache; this wrapper gives that property to
/// providers that go to the network for every call.
pub struct CachingProvider {
    inner: Arc<dyn PackageContainerProvider>,
    versions: Mutex<HashMap<PackageIdentity, Vec<Version>>>,
    dependencies: Mutex<HashMap<(PackageIdentity, PinnedAt), Vec<(PackageReference, Requirement)>>>,
}

impl CachingProvider {
    pub fn new(inner: Arc<dyn PackageContainerProvider>) -> Self {
        Self {
            inner,
            versions: Mutex::new(HashMap::new()),
            dependencies: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PackageContainerProvider for CachingProvider {
    async fn versions(&self, identity: &PackageIdentity) -> Result<Vec<Version>> {
        {
            let cache = self.versions.lock().await;
            if let Some(hit) = cache.get(identity) {
                return Ok(hit.clone());
            }
        }
        let fetched = self.inner.versions(identity).await?;
        self.versions
            .lock()
            .await
            .insert(identity.clone(), fetched.clone());
        Ok(fetched)
    }

    async fn revisions(
        &self,
        identity: &PackageIdentity,
        requirement: &Requirement,
    ) -> Result<Vec<String>> {
        self.inner.revisions(identity, requirement).await
    }

    async fn dependencies(
        &self,
        identity: &PackageIdentity,
        at: &PinnedAt,
    ) -> Result<Vec<(PackageReference, Requirement)>> {
        let key = (identity.clone(), at.clone());
        {
            let cache = self.dependencies.lock().await;
            if let Some(hit) = cache.get(&key) {
                return Ok(hit.clone());
            }
        }
        let fetched = self.inner.dependencies(identity, at).await?;
        self.dependencies.lock().await.insert(key, fetched.clone());
        Ok(fetched)
    }

    async fn is_tools_version_compatible(
        &self,
        identity: &PackageIdentity,
        at: &Version,
    ) -> bool {
        self.inner.is_tools_version_compatible(identity, at).await
    }
}

/// Decorator applying the mirror table to dependency edges as they load,
/// before identity derivation elsewhere can observe them.
pub struct MirroredProvider {
    inner: Arc<dyn PackageContainerProvider>,
    mirrors: crate::mirrors::Mirrors,
}

impl MirroredProvider {
    pub fn new(inner: Arc<dyn PackageContainerProvider>, mirrors: crate::mirrors::Mirrors) -> Self {
        Self { inner, mirrors }
    }

    fn rewrite(
        &self,
        edges: Vec<(PackageReference, Requirement)>,
    ) -> Vec<(PackageReference, Requirement)> {
        edges
            .into_iter()
            .map(|(reference, requirement)| {
                let reference = match reference {
                    PackageReference::RemoteSourceControl { url, .. } => {
                        PackageReference::remote(self.mirrors.resolve(&url).to_string())
                    }
                    other => other,
                };
                (reference, requirement)
            })
            .collect()
    }
}

#[async_trait]
impl PackageContainerProvider for MirroredProvider {
    async fn versions(&self, identity: &PackageIdentity) -> Result<Vec<Version>> {
        self.inner.versions(identity).await
    }

    async fn revisions(
        &self,
        identity: &PackageIdentity,
        requirement: &Requirement,
    ) -> Result<Vec<String>> {
        self.inner.revisions(identity, requirement).await
    }

    async fn dependencies(
        &self,
        identity: &PackageIdentity,
        at: &PinnedAt,
    ) -> Result<Vec<(PackageReference, Requirement)>> {
        let edges = self.inner.dependencies(identity, at).await?;
        Ok(self.rewrite(edges))
    }

    async fn is_tools_version_compatible(
        &self,
        identity: &PackageIdentity,
        at: &Version,
    ) -> bool {
        self.inner.is_tools_version_compatible(identity, at).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_semver::VersionSetSpecifier;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_versions_sorted_descending() {
        let mut provider = MemoryProvider::new();
        let foo = PackageReference::remote("https://example.com/foo.git");
        provider.add_version(&foo, v("1.0.0"), "r1", vec![]);
        provider.add_version(&foo, v("1.2.0"), "r3", vec![]);
        provider.add_version(&foo, v("1.1.0"), "r2", vec![]);

        let versions = provider.versions(foo.identity()).await.unwrap();
        assert_eq!(versions, vec![v("1.2.0"), v("1.1.0"), v("1.0.0")]);
    }

    #[tokio::test]
    async fn test_unknown_package_is_container_error() {
        let provider = MemoryProvider::new();
        let err = provider
            .versions(&PackageIdentity::plain("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Container { .. }));
    }

    #[tokio::test]
    async fn test_revisions_for_requirements() {
        let mut provider = MemoryProvider::new();
        let foo = PackageReference::remote("https://example.com/foo.git");
        provider.add_version(&foo, v("1.0.0"), "tag-rev", vec![]);
        provider.add_branch(&foo, "main", "head-rev", vec![]);

        let branch = provider
            .revisions(foo.identity(), &Requirement::Branch("main".to_string()))
            .await
            .unwrap();
        assert_eq!(branch, vec!["head-rev"]);

        let exact = provider
            .revisions(foo.identity(), &Requirement::Exact(v("1.0.0")))
            .await
            .unwrap();
        assert_eq!(exact, vec!["tag-rev"]);

        let missing = provider
            .revisions(foo.identity(), &Requirement::Branch("gone".to_string()))
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_dependencies_at_version_and_revision() {
        let mut provider = MemoryProvider::new();
        let foo = PackageReference::remote("https://example.com/foo.git");
        let bar = PackageReference::remote("https://example.com/bar.git");
        let edge = (
            bar.clone(),
            Requirement::Range(VersionSetSpecifier::caret(v("1.0.0"))),
        );
        provider.add_version(&foo, v("1.0.0"), "r1", vec![edge.clone()]);
        provider.add_branch(&foo, "main", "head", vec![edge.clone()]);

        let at_version = provider
            .dependencies(foo.identity(), &PinnedAt::Version(v("1.0.0")))
            .await
            .unwrap();
        assert_eq!(at_version.len(), 1);
        assert_eq!(at_version[0].0.identity(), bar.identity());

        let at_revision = provider
            .dependencies(foo.identity(), &PinnedAt::Revision("head".to_string()))
            .await
            .unwrap();
        assert_eq!(at_revision.len(), 1);
    }

    #[tokio::test]
    async fn test_tools_version_filter() {
        let mut provider = MemoryProvider::new();
        let foo = PackageReference::remote("https://example.com/foo.git");
        provider.add_version(&foo, v("1.0.0"), "r1", vec![]);
        provider.add_incompatible_version(&foo, v("2.0.0"));

        assert!(
            provider
                .is_tools_version_compatible(foo.identity(), &v("1.0.0"))
                .await
        );
        assert!(
            !provider
                .is_tools_version_compatible(foo.identity(), &v("2.0.0"))
                .await
        );
    }

    #[tokio::test]
    async fn test_mirrored_provider_rewrites_edges() {
        let mut inner = MemoryProvider::new();
        let foo = PackageReference::remote("https://example.com/foo.git");
        let upstream_dep = PackageReference::remote("https://github.com/corporate/bar.git");
        inner.add_version(
            &foo,
            v("1.0.0"),
            "r1",
            vec![(
                upstream_dep,
                Requirement::Range(VersionSetSpecifier::caret(v("1.0.0"))),
            )],
        );

        let mut mirrors = crate::mirrors::Mirrors::new();
        mirrors.set(
            "https://github.com/corporate/bar.git",
            "https://ghe.example.com/team/bar.git",
        );

        let provider = MirroredProvider::new(Arc::new(inner), mirrors);
        let edges = provider
            .dependencies(foo.identity(), &PinnedAt::Version(v("1.0.0")))
            .await
            .unwrap();
        assert_eq!(edges[0].0.location(), "https://ghe.example.com/team/bar.git");
        // Identity is mirror-stable
        assert_eq!(edges[0].0.identity().as_str(), "bar");
    }

    #[tokio::test]
    async fn test_caching_provider_serves_hits() {
        let mut inner = MemoryProvider::new();
        let foo = PackageReference::remote("https://example.com/foo.git");
        inner.add_version(&foo, v("1.0.0"), "r1", vec![]);

        let caching = CachingProvider::new(Arc::new(inner));
        let first = caching.versions(foo.identity()).await.unwrap();
        let second = caching.versions(foo.identity()).await.unwrap();
        assert_eq!(first, second);
    }
}
