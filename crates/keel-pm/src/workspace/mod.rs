//! The reconciliation loop between manifests, pins and checkouts.

mod checkout;
mod manifest;

pub use checkout::{CheckoutState, DirectoryWorkingCopies, WorkingCopies};
pub use manifest::RootManifest;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::graph::Resolution;
use crate::identity::{PackageIdentity, PinState, Requirement};
use crate::mirrors::Mirrors;
use crate::pins::PinsStore;
use crate::provider::{MirroredProvider, PackageContainerProvider};
use crate::solver::{PubGrubResolver, RootPackage};
use crate::tools_version::ToolsVersion;
use crate::util::DirectoryLock;

/// Progress of the reconciliation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
    Idle,
    Loaded,
    Resolving,
    Resolved,
    Applied,
}

/// Coordinates manifest load, resolution, pinning and on-disk checkout
/// state: three potentially-inconsistent views that must converge.
pub struct Workspace {
    roots: Vec<RootManifest>,
    pins: PinsStore,
    mirrors: Mirrors,
    provider: Arc<dyn PackageContainerProvider>,
    working_copies: Box<dyn WorkingCopies>,
    state: WorkspaceState,
    cancel: Arc<AtomicBool>,
}

impl Workspace {
    pub fn builder() -> WorkspaceBuilder {
        WorkspaceBuilder::new()
    }

    pub fn state(&self) -> WorkspaceState {
        self.state
    }

    pub fn pins(&self) -> &PinsStore {
        &self.pins
    }

    pub fn cancellation(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Replace the loaded root manifests.
    pub fn load(&mut self, roots: Vec<RootManifest>) {
        self.roots = roots;
        self.transition(WorkspaceState::Loaded);
    }

    fn transition(&mut self, next: WorkspaceState) {
        log::debug!("workspace: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run resolution over the loaded roots, honoring pins, and write the
    /// outcome back to the pins store.
    pub async fn resolve(&mut self) -> Result<Resolution> {
        self.transition(WorkspaceState::Resolving);

        // Mirrors rewrite dependency locations before identity-sensitive
        // work begins; identities themselves are mirror-stable.
        let provider = MirroredProvider::new(Arc::clone(&self.provider), self.mirrors.clone());
        let root_packages: Vec<RootPackage> = self
            .roots
            .iter()
            .map(|m| {
                let mut root = m.to_root_package();
                for (reference, _) in &mut root.edges {
                    if let crate::identity::PackageReference::RemoteSourceControl { url, .. } =
                        reference
                    {
                        let routed = self.mirrors.resolve(url).to_string();
                        *url = routed;
                    }
                }
                root
            })
            .collect();

        let resolver = PubGrubResolver::new(&provider)
            .with_pins(&self.pins)
            .with_cancellation(Arc::clone(&self.cancel));
        let resolution = resolver.solve(&root_packages).await?;

        self.record(&resolution)?;
        self.transition(WorkspaceState::Resolved);
        Ok(resolution)
    }

    /// Drop the named pins (or all of them) and resolve afresh.
    pub async fn update(&mut self, packages: &[PackageIdentity]) -> Result<Resolution> {
        if packages.is_empty() {
            self.pins.unpin_all();
        } else {
            for package in packages {
                self.pins.unpin(package);
            }
        }
        self.resolve().await
    }

    fn record(&mut self, resolution: &Resolution) -> Result<()> {
        let _lock = self.pins_lock()?;
        self.pins.unpin_all();
        for (reference, state) in resolution.bindings() {
            self.pins.pin(reference, state);
        }
        self.pins.save(&self.mirrors)
    }

    fn pins_lock(&self) -> Result<DirectoryLock> {
        let parent = self
            .pins
            .path()
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        DirectoryLock::acquire(&parent)
    }

    /// Reconcile the on-disk checkouts with a resolution.
    pub fn apply(&mut self, resolution: &Resolution) -> Result<()> {
        for (reference, state) in resolution.bindings() {
            let identity = reference.identity().clone();
            match self.working_copies.state(&identity) {
                CheckoutState::Missing => {
                    log::warn!("dependency '{}' is missing; cloning again", identity);
                    self.working_copies.fetch(&reference, &state)?;
                }
                CheckoutState::Edited { revision } => {
                    if revision.as_deref() != state.revision() {
                        log::warn!(
                            "dependency '{}' already exists at the edit destination; not checking-out branch/revision '{}'",
                            identity,
                            describe_target(&state)
                        );
                    }
                }
                CheckoutState::Clean { revision } => {
                    if revision.as_deref() != state.revision() {
                        self.working_copies.checkout(&identity, &state)?;
                    }
                }
                CheckoutState::Dirty {
                    revision,
                    uncommitted,
                    unpushed,
                } => {
                    if revision.as_deref() != state.revision() {
                        let path = self.working_copies.path(&identity);
                        if uncommitted {
                            return Err(Error::UncommittedChanges(path));
                        }
                        if unpushed {
                            return Err(Error::UnpushedChanges(path));
                        }
                    }
                }
            }
        }
        self.transition(WorkspaceState::Applied);
        Ok(())
    }

    /// Put a dependency into edit mode.
    pub fn edit(
        &mut self,
        identity: &PackageIdentity,
        branch: Option<&str>,
        revision: Option<&str>,
    ) -> Result<()> {
        match self.working_copies.state(identity) {
            CheckoutState::Missing => Err(Error::DependencyMissing(identity.to_string())),
            CheckoutState::Dirty { uncommitted, .. } => {
                let path = self.working_copies.path(identity);
                if uncommitted {
                    Err(Error::UncommittedChanges(path))
                } else {
                    Err(Error::UnpushedChanges(path))
                }
            }
            CheckoutState::Edited { .. } => {
                log::warn!("dependency '{}' is already in edit mode", identity);
                Ok(())
            }
            CheckoutState::Clean { .. } => {
                if let Some(branch) = branch {
                    if self.working_copies.branch_exists(identity, branch)? {
                        return Err(Error::BranchAlreadyExists(branch.to_string()));
                    }
                }
                if let Some(revision) = revision {
                    if !self.working_copies.revision_exists(identity, revision)? {
                        return Err(Error::RevisionDoesNotExist(revision.to_string()));
                    }
                }
                self.working_copies.begin_edit(identity, branch, revision)
            }
        }
    }

    /// Take a dependency out of edit mode.
    pub fn unedit(&mut self, identity: &PackageIdentity) -> Result<()> {
        match self.working_copies.state(identity) {
            CheckoutState::Edited { .. } => self.working_copies.end_edit(identity),
            _ => Err(Error::DependencyNotInEditMode(identity.to_string())),
        }
    }

    /// Pin an already-resolved dependency to a specific state.
    pub async fn pin(&mut self, identity: &PackageIdentity, requirement: Requirement) -> Result<()> {
        let pin = self
            .pins
            .get(identity)
            .ok_or_else(|| Error::DependencyMissing(identity.to_string()))?;
        let reference = pin.reference.clone();

        let state = match &requirement {
            Requirement::Exact(version) => {
                let revision = self
                    .provider
                    .revisions(identity, &requirement)
                    .await?
                    .into_iter()
                    .next();
                PinState::Version {
                    version: version.clone(),
                    revision,
                }
            }
            Requirement::Branch(name) => {
                let revision = self
                    .provider
                    .revisions(identity, &requirement)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::Container {
                        identity: identity.to_string(),
                        reason: format!("branch '{}' could not be found", name),
                    })?;
                PinState::Branch {
                    name: name.clone(),
                    revision,
                }
            }
            Requirement::Revision(revision) => {
                let known = self.provider.revisions(identity, &requirement).await?;
                if known.is_empty() {
                    return Err(Error::RevisionDoesNotExist(revision.clone()));
                }
                PinState::Revision {
                    revision: revision.clone(),
                }
            }
            other => {
                return Err(Error::InvalidPinRequirement {
                    identity: identity.to_string(),
                    requirement: other.to_string(),
                })
            }
        };

        let _lock = self.pins_lock()?;
        self.pins.pin(reference, state);
        self.pins.save(&self.mirrors)
    }

    /// Remove the pin for `identity`. Returns whether one existed.
    pub fn unpin(&mut self, identity: &PackageIdentity) -> Result<bool> {
        let _lock = self.pins_lock()?;
        let removed = self.pins.unpin(identity);
        self.pins.save(&self.mirrors)?;
        Ok(removed)
    }
}

fn describe_target(state: &PinState) -> String {
    match state {
        PinState::Branch { name, .. } => name.clone(),
        PinState::Version { version, revision } => revision
            .clone()
            .unwrap_or_else(|| version.to_string()),
        PinState::Revision { revision } => revision.clone(),
    }
}

/// Builder for workspaces, mirroring how the rest of the crate assembles
/// its central objects.
pub struct WorkspaceBuilder {
    pins_path: Option<PathBuf>,
    tools_version: ToolsVersion,
    mirrors: Mirrors,
    provider: Option<Arc<dyn PackageContainerProvider>>,
    working_copies: Option<Box<dyn WorkingCopies>>,
    roots: Vec<RootManifest>,
}

impl WorkspaceBuilder {
    pub fn new() -> Self {
        Self {
            pins_path: None,
            tools_version: ToolsVersion::CURRENT,
            mirrors: Mirrors::new(),
            provider: None,
            working_copies: None,
            roots: Vec::new(),
        }
    }

    pub fn with_pins_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pins_path = Some(path.into());
        self
    }

    pub fn with_tools_version(mut self, tools_version: ToolsVersion) -> Self {
        self.tools_version = tools_version;
        self
    }

    pub fn with_mirrors(mut self, mirrors: Mirrors) -> Self {
        self.mirrors = mirrors;
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn PackageContainerProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_working_copies(mut self, working_copies: Box<dyn WorkingCopies>) -> Self {
        self.working_copies = Some(working_copies);
        self
    }

    pub fn with_roots(mut self, roots: Vec<RootManifest>) -> Self {
        self.roots = roots;
        self
    }

    pub fn build(self) -> Result<Workspace> {
        let pins_path = self.pins_path.ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "workspace requires a pins path",
            ))
        })?;
        let provider = self.provider.ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "workspace requires a container provider",
            ))
        })?;
        let working_copies = self.working_copies.ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "workspace requires a working-copy view",
            ))
        })?;

        let pins = PinsStore::load(&pins_path, self.tools_version)?;
        let state = if self.roots.is_empty() {
            WorkspaceState::Idle
        } else {
            WorkspaceState::Loaded
        };

        Ok(Workspace {
            roots: self.roots,
            pins,
            mirrors: self.mirrors,
            provider,
            working_copies,
            state,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl Default for WorkspaceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PackageReference;
    use crate::provider::MemoryProvider;
    use keel_semver::{Version, VersionSetSpecifier};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn caret(s: &str) -> Requirement {
        Requirement::Range(VersionSetSpecifier::caret(v(s)))
    }

    /// In-memory working copies recording what the reconciler did.
    #[derive(Default)]
    struct MemoryWorkingCopies {
        states: HashMap<PackageIdentity, CheckoutState>,
        fetched: Mutex<Vec<PackageIdentity>>,
        checked_out: Mutex<Vec<PackageIdentity>>,
        branches: Vec<(PackageIdentity, String)>,
        edited: Mutex<Vec<PackageIdentity>>,
    }

    impl WorkingCopies for MemoryWorkingCopies {
        fn state(&self, identity: &PackageIdentity) -> CheckoutState {
            self.states
                .get(identity)
                .cloned()
                .unwrap_or(CheckoutState::Missing)
        }

        fn path(&self, identity: &PackageIdentity) -> PathBuf {
            PathBuf::from("/checkouts").join(identity.as_str())
        }

        fn fetch(&mut self, reference: &PackageReference, _state: &PinState) -> Result<()> {
            self.fetched.lock().unwrap().push(reference.identity().clone());
            Ok(())
        }

        fn checkout(&mut self, identity: &PackageIdentity, _state: &PinState) -> Result<()> {
            self.checked_out.lock().unwrap().push(identity.clone());
            Ok(())
        }

        fn branch_exists(&self, identity: &PackageIdentity, name: &str) -> Result<bool> {
            Ok(self
                .branches
                .iter()
                .any(|(i, b)| i == identity && b == name))
        }

        fn revision_exists(&self, identity: &PackageIdentity, revision: &str) -> Result<bool> {
            Ok(match self.states.get(identity) {
                Some(CheckoutState::Clean { revision: r }) => r.as_deref() == Some(revision),
                _ => false,
            })
        }

        fn begin_edit(
            &mut self,
            identity: &PackageIdentity,
            _branch: Option<&str>,
            _revision: Option<&str>,
        ) -> Result<()> {
            self.edited.lock().unwrap().push(identity.clone());
            self.states.insert(
                identity.clone(),
                CheckoutState::Edited { revision: None },
            );
            Ok(())
        }

        fn end_edit(&mut self, identity: &PackageIdentity) -> Result<()> {
            self.states.insert(
                identity.clone(),
                CheckoutState::Clean { revision: None },
            );
            Ok(())
        }
    }

    fn simple_provider() -> MemoryProvider {
        let mut provider = MemoryProvider::new();
        let foo = PackageReference::remote("https://example.com/foo.git");
        provider.add_version(&foo, v("1.0.0"), "r100", vec![]);
        provider.add_version(&foo, v("1.0.2"), "r102", vec![]);
        provider
    }

    fn workspace_with(
        dir: &TempDir,
        provider: MemoryProvider,
        copies: MemoryWorkingCopies,
    ) -> Workspace {
        let foo = PackageReference::remote("https://example.com/foo.git");
        Workspace::builder()
            .with_pins_path(dir.path().join("keel.lock"))
            .with_provider(Arc::new(provider))
            .with_working_copies(Box::new(copies))
            .with_roots(vec![RootManifest::new(
                PackageReference::root("/work/app"),
                vec![(foo, caret("1.0.0"))],
            )])
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_resolve_writes_pins() {
        let dir = TempDir::new().unwrap();
        let mut workspace = workspace_with(&dir, simple_provider(), Default::default());

        let resolution = workspace.resolve().await.unwrap();
        assert_eq!(workspace.state(), WorkspaceState::Resolved);

        let bindings = resolution.bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(
            bindings[0].1,
            PinState::Version {
                version: v("1.0.2"),
                revision: Some("r102".to_string()),
            }
        );

        // Pins landed on disk
        let reloaded =
            PinsStore::load(dir.path().join("keel.lock"), ToolsVersion::CURRENT).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get(&PackageIdentity::plain("foo")).is_some());
    }

    #[tokio::test]
    async fn test_resolve_honors_existing_pin_and_update_drops_it() {
        let dir = TempDir::new().unwrap();

        {
            let mut workspace = workspace_with(&dir, simple_provider(), Default::default());
            workspace.resolve().await.unwrap();
        }

        // Rewrite the pin to the older version by hand
        {
            let mut pins =
                PinsStore::load(dir.path().join("keel.lock"), ToolsVersion::CURRENT).unwrap();
            pins.pin(
                PackageReference::remote("https://example.com/foo.git"),
                PinState::Version {
                    version: v("1.0.0"),
                    revision: Some("r100".to_string()),
                },
            );
            pins.save(&Mirrors::new()).unwrap();
        }

        let mut workspace = workspace_with(&dir, simple_provider(), Default::default());
        let resolution = workspace.resolve().await.unwrap();
        assert_eq!(
            resolution
                .binding_for(&PackageIdentity::plain("foo"))
                .unwrap()
                .version(),
            Some(&v("1.0.0"))
        );

        // update() drops the pin and re-resolves to the highest version
        let resolution = workspace
            .update(&[PackageIdentity::plain("foo")])
            .await
            .unwrap();
        assert_eq!(
            resolution
                .binding_for(&PackageIdentity::plain("foo"))
                .unwrap()
                .version(),
            Some(&v("1.0.2"))
        );
    }

    #[tokio::test]
    async fn test_apply_fetches_missing_checkout() {
        let dir = TempDir::new().unwrap();
        let mut workspace = workspace_with(&dir, simple_provider(), Default::default());

        let resolution = workspace.resolve().await.unwrap();
        workspace.apply(&resolution).unwrap();
        assert_eq!(workspace.state(), WorkspaceState::Applied);
    }

    #[tokio::test]
    async fn test_apply_keeps_edited_checkout() {
        let dir = TempDir::new().unwrap();
        let mut copies = MemoryWorkingCopies::default();
        copies.states.insert(
            PackageIdentity::plain("foo"),
            CheckoutState::Edited {
                revision: Some("local-work".to_string()),
            },
        );
        let mut workspace = workspace_with(&dir, simple_provider(), copies);

        let resolution = workspace.resolve().await.unwrap();
        // Applying must not touch the edited working copy
        workspace.apply(&resolution).unwrap();
    }

    #[tokio::test]
    async fn test_apply_refuses_to_clobber_dirty_checkout() {
        let dir = TempDir::new().unwrap();
        let mut copies = MemoryWorkingCopies::default();
        copies.states.insert(
            PackageIdentity::plain("foo"),
            CheckoutState::Dirty {
                revision: Some("old".to_string()),
                uncommitted: true,
                unpushed: false,
            },
        );
        let mut workspace = workspace_with(&dir, simple_provider(), copies);

        let resolution = workspace.resolve().await.unwrap();
        let err = workspace.apply(&resolution).unwrap_err();
        assert!(matches!(err, Error::UncommittedChanges(_)));
    }

    #[tokio::test]
    async fn test_apply_refuses_unpushed_changes() {
        let dir = TempDir::new().unwrap();
        let mut copies = MemoryWorkingCopies::default();
        copies.states.insert(
            PackageIdentity::plain("foo"),
            CheckoutState::Dirty {
                revision: Some("old".to_string()),
                uncommitted: false,
                unpushed: true,
            },
        );
        let mut workspace = workspace_with(&dir, simple_provider(), copies);

        let resolution = workspace.resolve().await.unwrap();
        let err = workspace.apply(&resolution).unwrap_err();
        assert!(matches!(err, Error::UnpushedChanges(_)));
    }

    #[tokio::test]
    async fn test_apply_skips_checkout_already_at_pinned_revision() {
        let dir = TempDir::new().unwrap();
        let mut copies = MemoryWorkingCopies::default();
        copies.states.insert(
            PackageIdentity::plain("foo"),
            CheckoutState::Clean {
                revision: Some("r102".to_string()),
            },
        );
        let mut workspace = workspace_with(&dir, simple_provider(), copies);

        let resolution = workspace.resolve().await.unwrap();
        workspace.apply(&resolution).unwrap();
    }

    #[tokio::test]
    async fn test_edit_workflow_errors() {
        let dir = TempDir::new().unwrap();
        let mut copies = MemoryWorkingCopies::default();
        let foo = PackageIdentity::plain("foo");
        copies.states.insert(
            foo.clone(),
            CheckoutState::Clean {
                revision: Some("r102".to_string()),
            },
        );
        copies.branches.push((foo.clone(), "taken".to_string()));
        let mut workspace = workspace_with(&dir, simple_provider(), copies);

        let err = workspace.edit(&foo, Some("taken"), None).unwrap_err();
        assert!(matches!(err, Error::BranchAlreadyExists(_)));

        let err = workspace.edit(&foo, None, Some("nope")).unwrap_err();
        assert!(matches!(err, Error::RevisionDoesNotExist(_)));

        workspace.edit(&foo, Some("fresh"), None).unwrap();

        // unedit only works while editing
        workspace.unedit(&foo).unwrap();
        let err = workspace.unedit(&foo).unwrap_err();
        assert!(matches!(err, Error::DependencyNotInEditMode(_)));
    }

    #[tokio::test]
    async fn test_edit_requires_existing_checkout() {
        let dir = TempDir::new().unwrap();
        let mut workspace = workspace_with(&dir, simple_provider(), Default::default());

        let err = workspace
            .edit(&PackageIdentity::plain("foo"), None, None)
            .unwrap_err();
        assert!(matches!(err, Error::DependencyMissing(_)));
    }

    #[tokio::test]
    async fn test_mirrored_resolution_round_trip() {
        let dir = TempDir::new().unwrap();

        // The provider only knows the package under its mirrored location
        let mut provider = MemoryProvider::new();
        let mirrored = PackageReference::remote("https://ghe.example.com/team/foo.git");
        provider.add_version(&mirrored, v("1.0.0"), "r100", vec![]);

        let mut mirrors = Mirrors::new();
        mirrors.set(
            "https://github.com/corporate/foo.git",
            "https://ghe.example.com/team/foo.git",
        );

        let upstream = PackageReference::remote("https://github.com/corporate/foo.git");
        let mut workspace = Workspace::builder()
            .with_pins_path(dir.path().join("keel.lock"))
            .with_provider(Arc::new(provider))
            .with_working_copies(Box::new(MemoryWorkingCopies::default()))
            .with_mirrors(mirrors)
            .with_roots(vec![RootManifest::new(
                PackageReference::root("/work/app"),
                vec![(upstream, caret("1.0.0"))],
            )])
            .build()
            .unwrap();

        workspace.resolve().await.unwrap();

        // The lockfile records the upstream URL, not the mirror
        let reloaded =
            PinsStore::load(dir.path().join("keel.lock"), ToolsVersion::CURRENT).unwrap();
        let pin = reloaded.get(&PackageIdentity::plain("foo")).unwrap();
        assert_eq!(
            pin.reference.location(),
            "https://github.com/corporate/foo.git"
        );
    }

    #[tokio::test]
    async fn test_pin_rejects_range_requirements() {
        let dir = TempDir::new().unwrap();
        let mut workspace = workspace_with(&dir, simple_provider(), Default::default());
        workspace.resolve().await.unwrap();

        let err = workspace
            .pin(&PackageIdentity::plain("foo"), caret("1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPinRequirement { .. }));

        let err = workspace
            .pin(&PackageIdentity::plain("foo"), Requirement::Unversioned)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPinRequirement { .. }));
    }

    #[tokio::test]
    async fn test_unpin() {
        let dir = TempDir::new().unwrap();
        let mut workspace = workspace_with(&dir, simple_provider(), Default::default());
        workspace.resolve().await.unwrap();

        assert!(workspace.unpin(&PackageIdentity::plain("foo")).unwrap());
        assert!(!workspace.unpin(&PackageIdentity::plain("foo")).unwrap());
        // Empty store deletes the pins file
        assert!(!dir.path().join("keel.lock").exists());
    }
}
