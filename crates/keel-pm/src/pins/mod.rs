//! The durable store of pinned resolution outcomes.

mod schema;

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::identity::{PackageIdentity, PackageReference, PinState, ReferenceKind};
use crate::mirrors::Mirrors;
use crate::tools_version::ToolsVersion;
use crate::util::atomic_write;

use schema::{PinEntryV2, PinStateEntry, PinsFileV1, PinsFileV2};

/// A persisted resolution decision for one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    pub reference: PackageReference,
    pub state: PinState,
}

impl Pin {
    /// The location to fetch from in the current environment: the stored
    /// location routed through the mirror table.
    pub fn fetch_location(&self, mirrors: &Mirrors) -> String {
        mirrors.resolve(&self.reference.location()).to_string()
    }
}

/// The pinned-state map backing the pins file.
///
/// Mutations stay in memory until [`save`](Self::save); uniqueness is by
/// package identity. Loading a legacy v1 file silently upgrades it to the
/// in-memory model; saves always write the v2 schema.
#[derive(Debug)]
pub struct PinsStore {
    path: PathBuf,
    pins: IndexMap<PackageIdentity, Pin>,
    tools_version: ToolsVersion,
}

impl PinsStore {
    /// Load the store from `path`. A missing file yields an empty store.
    pub fn load(path: impl Into<PathBuf>, tools_version: ToolsVersion) -> Result<Self> {
        let path = path.into();
        let pins = match fs::read_to_string(&path) {
            Ok(contents) => Self::parse(&path, &contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IndexMap::new(),
            Err(e) => return Err(Error::Io(e)),
        };
        Ok(Self {
            path,
            pins,
            tools_version,
        })
    }

    /// An empty in-memory store that will save to `path`.
    pub fn empty(path: impl Into<PathBuf>, tools_version: ToolsVersion) -> Self {
        Self {
            path: path.into(),
            pins: IndexMap::new(),
            tools_version,
        }
    }

    fn parse(path: &Path, contents: &str) -> Result<IndexMap<PackageIdentity, Pin>> {
        let value: serde_json::Value =
            serde_json::from_str(contents).map_err(|e| Error::MalformedLockfile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let version = value
            .get("version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::MalformedLockfile {
                path: path.to_path_buf(),
                reason: "missing schema version".to_string(),
            })?;

        match version {
            1 => {
                let file: PinsFileV1 =
                    serde_json::from_value(value).map_err(|e| Error::MalformedLockfile {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    })?;
                Self::from_v1(path, file)
            }
            2 => {
                let file: PinsFileV2 =
                    serde_json::from_value(value).map_err(|e| Error::MalformedLockfile {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    })?;
                Self::from_v2(path, file)
            }
            other => Err(Error::MalformedLockfile {
                path: path.to_path_buf(),
                reason: format!("unknown schema version {}", other),
            }),
        }
    }

    fn from_v1(path: &Path, file: PinsFileV1) -> Result<IndexMap<PackageIdentity, Pin>> {
        let mut pins = IndexMap::new();
        for entry in file.object.pins {
            // Legacy entries name the package directly; the identity is
            // its case-folded form
            let identity = PackageIdentity::plain(entry.package);
            let reference = PackageReference::RemoteSourceControl {
                identity: identity.clone(),
                url: entry.repository_url,
            };
            let state = Self::state_from_entry(
                path,
                &identity,
                ReferenceKind::RemoteSourceControl,
                entry.state,
            )?;
            pins.insert(identity, Pin { reference, state });
        }
        Ok(pins)
    }

    fn from_v2(path: &Path, file: PinsFileV2) -> Result<IndexMap<PackageIdentity, Pin>> {
        let mut pins = IndexMap::new();
        for entry in file.pins {
            let identity = PackageIdentity::plain(entry.identity);
            let reference = match entry.kind {
                ReferenceKind::RemoteSourceControl => PackageReference::RemoteSourceControl {
                    identity: identity.clone(),
                    url: entry.location,
                },
                ReferenceKind::LocalSourceControl => PackageReference::LocalSourceControl {
                    identity: identity.clone(),
                    path: PathBuf::from(entry.location),
                },
                ReferenceKind::Registry => PackageReference::Registry {
                    identity: identity.clone(),
                },
                ReferenceKind::Root => {
                    return Err(Error::MalformedLockfile {
                        path: path.to_path_buf(),
                        reason: format!("pin for '{}' has root kind", identity),
                    })
                }
            };
            let state = Self::state_from_entry(path, &identity, entry.kind, entry.state)?;
            pins.insert(identity, Pin { reference, state });
        }
        Ok(pins)
    }

    fn state_from_entry(
        path: &Path,
        identity: &PackageIdentity,
        kind: ReferenceKind,
        entry: PinStateEntry,
    ) -> Result<PinState> {
        if let Some(version) = entry.version {
            let version = version.parse().map_err(|e| Error::MalformedLockfile {
                path: path.to_path_buf(),
                reason: format!("pin for '{}': {}", identity, e),
            })?;
            if entry.revision.is_none() && kind.is_source_control() {
                log::warn!(
                    "pin for '{}' has no revision recorded for its source-control origin",
                    identity
                );
            }
            return Ok(PinState::Version {
                version,
                revision: entry.revision,
            });
        }
        if let Some(name) = entry.branch {
            let revision = entry.revision.ok_or_else(|| Error::MalformedLockfile {
                path: path.to_path_buf(),
                reason: format!("branch pin for '{}' has no revision", identity),
            })?;
            return Ok(PinState::Branch { name, revision });
        }
        if let Some(revision) = entry.revision {
            return Ok(PinState::Revision { revision });
        }
        Err(Error::MalformedLockfile {
            path: path.to_path_buf(),
            reason: format!("pin for '{}' has no state", identity),
        })
    }

    /// Record a pin, replacing any existing pin with the same identity.
    pub fn pin(&mut self, reference: PackageReference, state: PinState) {
        let identity = reference.identity().clone();
        self.pins.insert(identity, Pin { reference, state });
    }

    /// Remove the pin for `identity`. Returns whether one existed.
    pub fn unpin(&mut self, identity: &PackageIdentity) -> bool {
        self.pins.shift_remove(identity).is_some()
    }

    /// Remove every pin.
    pub fn unpin_all(&mut self) {
        self.pins.clear();
    }

    pub fn get(&self, identity: &PackageIdentity) -> Option<&Pin> {
        self.pins.get(identity)
    }

    pub fn pins(&self) -> impl Iterator<Item = &Pin> {
        self.pins.values()
    }

    /// All pinned identities, sorted.
    pub fn identities(&self) -> Vec<&PackageIdentity> {
        let mut identities: Vec<_> = self.pins.keys().collect();
        identities.sort();
        identities
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the store.
    ///
    /// Pins are written sorted by identity in the v2 schema, with each
    /// location passed through `Mirrors::unresolve` so the file records the
    /// upstream URL. The write is atomic; an empty store deletes the file
    /// instead of writing an empty one.
    pub fn save(&self, mirrors: &Mirrors) -> Result<()> {
        if self.pins.is_empty() {
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Io(e)),
            }
            return Ok(());
        }

        let mut entries = Vec::with_capacity(self.pins.len());
        let mut sorted: Vec<_> = self.pins.iter().collect();
        sorted.sort_by(|(a, _), (b, _)| a.cmp(b));

        for (identity, pin) in sorted {
            let kind = pin.reference.kind();
            if kind.is_source_control() && pin.state.revision().is_none() {
                return Err(Error::MalformedLockfile {
                    path: self.path.clone(),
                    reason: format!(
                        "pin for '{}' is missing a revision for its source-control origin",
                        identity
                    ),
                });
            }

            let state = match &pin.state {
                PinState::Version { version, revision } => PinStateEntry {
                    version: Some(version.to_string()),
                    branch: None,
                    revision: revision.clone(),
                },
                PinState::Branch { name, revision } => PinStateEntry {
                    version: None,
                    branch: Some(name.clone()),
                    revision: Some(revision.clone()),
                },
                PinState::Revision { revision } => PinStateEntry {
                    version: None,
                    branch: None,
                    revision: Some(revision.clone()),
                },
            };

            entries.push(PinEntryV2 {
                identity: identity.to_string(),
                kind,
                location: mirrors.unresolve(&pin.reference.location()).to_string(),
                state,
            });
        }

        let file = PinsFileV2 {
            version: 2,
            origin_hash: Some(self.origin_hash()),
            pins: entries,
        };

        let mut contents = serde_json::to_string_pretty(&file)?;
        contents.push('\n');
        atomic_write(&self.path, contents.as_bytes())
    }

    /// Forward-compat marker: a fingerprint of the tools version that
    /// produced the file.
    fn origin_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.tools_version.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
