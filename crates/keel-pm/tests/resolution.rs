//! End-to-end resolution scenarios through the workspace.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use keel_pm::identity::{PackageIdentity, PackageReference, PinState, Requirement};
use keel_pm::workspace::{CheckoutState, RootManifest, WorkingCopies, Workspace};
use keel_pm::{Error, MemoryProvider, Mirrors, PinsStore, ToolsVersion};
use keel_semver::{Version, VersionSetSpecifier};

fn v(s: &str) -> Version {
    s.parse().unwrap()
}

fn caret(s: &str) -> Requirement {
    Requirement::Range(VersionSetSpecifier::caret(v(s)))
}

/// Minimal working-copy fake; every checkout reports clean at whatever
/// revision was last written.
#[derive(Default)]
struct FakeWorkingCopies {
    revisions: HashMap<PackageIdentity, String>,
}

impl WorkingCopies for FakeWorkingCopies {
    fn state(&self, identity: &PackageIdentity) -> CheckoutState {
        match self.revisions.get(identity) {
            Some(revision) => CheckoutState::Clean {
                revision: Some(revision.clone()),
            },
            None => CheckoutState::Missing,
        }
    }

    fn path(&self, identity: &PackageIdentity) -> PathBuf {
        PathBuf::from("/checkouts").join(identity.as_str())
    }

    fn fetch(&mut self, reference: &PackageReference, state: &PinState) -> keel_pm::Result<()> {
        self.revisions.insert(
            reference.identity().clone(),
            state.revision().unwrap_or_default().to_string(),
        );
        Ok(())
    }

    fn checkout(&mut self, identity: &PackageIdentity, state: &PinState) -> keel_pm::Result<()> {
        self.revisions.insert(
            identity.clone(),
            state.revision().unwrap_or_default().to_string(),
        );
        Ok(())
    }

    fn branch_exists(&self, _identity: &PackageIdentity, _name: &str) -> keel_pm::Result<bool> {
        Ok(false)
    }

    fn revision_exists(&self, identity: &PackageIdentity, revision: &str) -> keel_pm::Result<bool> {
        Ok(self.revisions.get(identity).map(String::as_str) == Some(revision))
    }

    fn begin_edit(
        &mut self,
        _identity: &PackageIdentity,
        _branch: Option<&str>,
        _revision: Option<&str>,
    ) -> keel_pm::Result<()> {
        Ok(())
    }

    fn end_edit(&mut self, _identity: &PackageIdentity) -> keel_pm::Result<()> {
        Ok(())
    }
}

fn workspace(
    dir: &TempDir,
    provider: MemoryProvider,
    mirrors: Mirrors,
    roots: Vec<RootManifest>,
) -> Workspace {
    Workspace::builder()
        .with_pins_path(dir.path().join("keel.lock"))
        .with_provider(Arc::new(provider))
        .with_working_copies(Box::new(FakeWorkingCopies::default()))
        .with_mirrors(mirrors)
        .with_roots(roots)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_basic_pin_round_trip() {
    let dir = TempDir::new().unwrap();

    let mut provider = MemoryProvider::new();
    let foo = PackageReference::remote("https://example.com/foo.git");
    provider.add_version(&foo, v("1.0.0"), "rev-100", vec![]);
    provider.add_version(&foo, v("1.0.2"), "rev-102", vec![]);

    let roots = vec![RootManifest::new(
        PackageReference::root("/work/app"),
        vec![(foo.clone(), caret("1.0.0"))],
    )];
    let mut workspace = workspace(&dir, provider, Mirrors::new(), roots);

    let resolution = workspace.resolve().await.unwrap();
    assert_eq!(
        resolution
            .binding_for(&PackageIdentity::plain("foo"))
            .unwrap(),
        PinState::Version {
            version: v("1.0.2"),
            revision: Some("rev-102".to_string()),
        }
    );

    // The saved pins file has exactly one entry carrying the version and
    // the revision of that version
    let pins = PinsStore::load(dir.path().join("keel.lock"), ToolsVersion::CURRENT).unwrap();
    assert_eq!(pins.len(), 1);
    let pin = pins.get(&PackageIdentity::plain("foo")).unwrap();
    assert_eq!(pin.state.version(), Some(&v("1.0.2")));
    assert_eq!(pin.state.revision(), Some("rev-102"));
}

#[tokio::test]
async fn test_mirror_indirection() {
    let dir = TempDir::new().unwrap();

    let upstream_url = "https://github.com/corporate/foo.git";
    let mirror_url = "https://ghe.example.com/team/foo.git";

    // The container serves the package at the mirrored location
    let mut provider = MemoryProvider::new();
    let mirrored = PackageReference::remote(mirror_url);
    provider.add_version(&mirrored, v("1.0.0"), "rev-1", vec![]);

    let mut mirrors = Mirrors::new();
    mirrors.set(upstream_url, mirror_url);

    let roots = vec![RootManifest::new(
        PackageReference::root("/work/app"),
        vec![(PackageReference::remote(upstream_url), caret("1.0.0"))],
    )];
    let mut ws = workspace(&dir, provider, mirrors.clone(), roots);
    ws.resolve().await.unwrap();

    // Reloading without mirrors sees the upstream URL in the lockfile
    let pins = PinsStore::load(dir.path().join("keel.lock"), ToolsVersion::CURRENT).unwrap();
    let pin = pins.get(&PackageIdentity::plain("foo")).unwrap();
    assert_eq!(pin.reference.location(), upstream_url);

    // Reloading with mirrors routes fetches through the mirror again
    assert_eq!(pin.fetch_location(&mirrors), mirror_url);
}

#[tokio::test]
async fn test_unsatisfiable_mentions_both_requirers() {
    let dir = TempDir::new().unwrap();

    let mut provider = MemoryProvider::new();
    let a = PackageReference::remote("https://example.com/a.git");
    let b = PackageReference::remote("https://example.com/b.git");
    let c = PackageReference::remote("https://example.com/c.git");
    provider.add_version(&a, v("1.0.0"), "ra", vec![(c.clone(), caret("1.0.0"))]);
    provider.add_version(&b, v("1.0.0"), "rb", vec![(c.clone(), caret("2.0.0"))]);
    provider.add_version(&c, v("1.0.0"), "rc1", vec![]);
    provider.add_version(&c, v("2.0.0"), "rc2", vec![]);

    let roots = vec![RootManifest::new(
        PackageReference::root("/work/app"),
        vec![(a.clone(), caret("1.0.0")), (b.clone(), caret("1.0.0"))],
    )];
    let mut ws = workspace(&dir, provider, Mirrors::new(), roots);

    match ws.resolve().await.unwrap_err() {
        Error::Unsatisfiable { report } => {
            assert!(report.contains("'a'"), "report: {}", report);
            assert!(report.contains("'b'"), "report: {}", report);
        }
        other => panic!("expected unsatisfiable, got {:?}", other),
    }

    // A failed resolution leaves no pins behind
    assert!(!dir.path().join("keel.lock").exists());
}

#[tokio::test]
async fn test_branch_requirement_records_no_version() {
    let dir = TempDir::new().unwrap();

    let mut provider = MemoryProvider::new();
    let foo = PackageReference::remote("https://example.com/foo.git");
    provider.add_branch(&foo, "main", "head-rev", vec![]);

    let roots = vec![RootManifest::new(
        PackageReference::root("/work/app"),
        vec![(foo.clone(), Requirement::Branch("main".to_string()))],
    )];
    let mut ws = workspace(&dir, provider, Mirrors::new(), roots);
    ws.resolve().await.unwrap();

    let pins = PinsStore::load(dir.path().join("keel.lock"), ToolsVersion::CURRENT).unwrap();
    let pin = pins.get(&PackageIdentity::plain("foo")).unwrap();
    assert_eq!(
        pin.state,
        PinState::Branch {
            name: "main".to_string(),
            revision: "head-rev".to_string(),
        }
    );
    assert!(pin.state.version().is_none());
}

#[tokio::test]
async fn test_pins_survive_across_workspaces() {
    let dir = TempDir::new().unwrap();

    let make_provider = || {
        let mut provider = MemoryProvider::new();
        let foo = PackageReference::remote("https://example.com/foo.git");
        provider.add_version(&foo, v("1.0.0"), "rev-100", vec![]);
        provider.add_version(&foo, v("1.2.0"), "rev-120", vec![]);
        provider
    };
    let roots = || {
        vec![RootManifest::new(
            PackageReference::root("/work/app"),
            vec![(
                PackageReference::remote("https://example.com/foo.git"),
                caret("1.0.0"),
            )],
        )]
    };

    // First resolution pins the highest version
    {
        let mut ws = workspace(&dir, make_provider(), Mirrors::new(), roots());
        ws.resolve().await.unwrap();
    }

    // Move the pin back by hand, as if the lockfile came from another
    // machine
    {
        let mut pins =
            PinsStore::load(dir.path().join("keel.lock"), ToolsVersion::CURRENT).unwrap();
        pins.pin(
            PackageReference::remote("https://example.com/foo.git"),
            PinState::Version {
                version: v("1.0.0"),
                revision: Some("rev-100".to_string()),
            },
        );
        pins.save(&Mirrors::new()).unwrap();
    }

    // A fresh workspace honors the pin instead of re-maximizing
    let mut ws = workspace(&dir, make_provider(), Mirrors::new(), roots());
    let resolution = ws.resolve().await.unwrap();
    assert_eq!(
        resolution
            .binding_for(&PackageIdentity::plain("foo"))
            .unwrap()
            .version(),
        Some(&v("1.0.0"))
    );

    // update() discards the pin and re-maximizes
    let resolution = ws.update(&[]).await.unwrap();
    assert_eq!(
        resolution
            .binding_for(&PackageIdentity::plain("foo"))
            .unwrap()
            .version(),
        Some(&v("1.2.0"))
    );
}

#[tokio::test]
async fn test_resolution_then_apply_converges_checkouts() {
    let dir = TempDir::new().unwrap();

    let mut provider = MemoryProvider::new();
    let a = PackageReference::remote("https://example.com/a.git");
    let b = PackageReference::remote("https://example.com/b.git");
    provider.add_version(&a, v("1.0.0"), "ra", vec![(b.clone(), caret("2.0.0"))]);
    provider.add_version(&b, v("2.3.0"), "rb", vec![]);

    let roots = vec![RootManifest::new(
        PackageReference::root("/work/app"),
        vec![(a.clone(), caret("1.0.0"))],
    )];
    let mut ws = workspace(&dir, provider, Mirrors::new(), roots);

    let resolution = ws.resolve().await.unwrap();
    ws.apply(&resolution).unwrap();

    let bindings = resolution.bindings();
    assert_eq!(bindings.len(), 2);
    let identities: Vec<&str> = bindings
        .iter()
        .map(|(r, _)| r.identity().as_str())
        .collect();
    assert_eq!(identities, vec!["a", "b"]);
}
