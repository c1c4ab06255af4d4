//! Working-copy state abstraction for the reconciler.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::identity::{PackageIdentity, PackageReference, PinState};

/// What the reconciler can observe about an on-disk checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutState {
    /// No checkout exists
    Missing,
    /// A pristine checkout at the given revision
    Clean { revision: Option<String> },
    /// The dependency is in edit mode; the user owns the working copy
    Edited { revision: Option<String> },
    /// Local modifications that must not be thrown away
    Dirty {
        revision: Option<String>,
        uncommitted: bool,
        unpushed: bool,
    },
}

/// The reconciler's view of on-disk checkouts.
///
/// Implementations back this with a real source-control tool; tests use
/// in-memory fakes.
pub trait WorkingCopies: Send + Sync {
    fn state(&self, identity: &PackageIdentity) -> CheckoutState;

    fn path(&self, identity: &PackageIdentity) -> PathBuf;

    /// Create a checkout for `reference` at the pinned state.
    fn fetch(&mut self, reference: &PackageReference, state: &PinState) -> Result<()>;

    /// Move an existing checkout to the pinned state.
    fn checkout(&mut self, identity: &PackageIdentity, state: &PinState) -> Result<()>;

    fn branch_exists(&self, identity: &PackageIdentity, name: &str) -> Result<bool>;

    fn revision_exists(&self, identity: &PackageIdentity, revision: &str) -> Result<bool>;

    /// Put the checkout into edit mode.
    fn begin_edit(
        &mut self,
        identity: &PackageIdentity,
        branch: Option<&str>,
        revision: Option<&str>,
    ) -> Result<()>;

    /// Take the checkout out of edit mode.
    fn end_edit(&mut self, identity: &PackageIdentity) -> Result<()>;
}

const REVISION_MARKER: &str = ".keel-revision";
const EDIT_MARKER: &str = ".keel-edit";
const BRANCHES_MARKER: &str = ".keel-branches";

/// Directory-backed working copies: one checkout directory per identity,
/// with marker files recording the revision and edit state.
#[derive(Debug)]
pub struct DirectoryWorkingCopies {
    root: PathBuf,
}

impl DirectoryWorkingCopies {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn marker(&self, identity: &PackageIdentity, name: &str) -> PathBuf {
        self.path(identity).join(name)
    }

    fn read_revision(&self, identity: &PackageIdentity) -> Option<String> {
        fs::read_to_string(self.marker(identity, REVISION_MARKER))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn write_state(&self, identity: &PackageIdentity, state: &PinState) -> Result<()> {
        let dir = self.path(identity);
        fs::create_dir_all(&dir)?;
        if let Some(revision) = state.revision() {
            fs::write(dir.join(REVISION_MARKER), revision)?;
        }
        Ok(())
    }
}

impl WorkingCopies for DirectoryWorkingCopies {
    fn state(&self, identity: &PackageIdentity) -> CheckoutState {
        let dir = self.path(identity);
        if !dir.is_dir() {
            return CheckoutState::Missing;
        }
        let revision = self.read_revision(identity);
        if self.marker(identity, EDIT_MARKER).exists() {
            return CheckoutState::Edited { revision };
        }
        CheckoutState::Clean { revision }
    }

    fn path(&self, identity: &PackageIdentity) -> PathBuf {
        self.root.join(identity.as_str())
    }

    fn fetch(&mut self, reference: &PackageReference, state: &PinState) -> Result<()> {
        log::debug!("fetching '{}' at {}", reference.identity(), state);
        self.write_state(reference.identity(), state)
    }

    fn checkout(&mut self, identity: &PackageIdentity, state: &PinState) -> Result<()> {
        log::debug!("checking out '{}' at {}", identity, state);
        self.write_state(identity, state)
    }

    fn branch_exists(&self, identity: &PackageIdentity, name: &str) -> Result<bool> {
        let listing = self.marker(identity, BRANCHES_MARKER);
        match fs::read_to_string(listing) {
            Ok(contents) => Ok(contents.lines().any(|line| line.trim() == name)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn revision_exists(&self, identity: &PackageIdentity, revision: &str) -> Result<bool> {
        Ok(self.read_revision(identity).as_deref() == Some(revision))
    }

    fn begin_edit(
        &mut self,
        identity: &PackageIdentity,
        branch: Option<&str>,
        revision: Option<&str>,
    ) -> Result<()> {
        let dir = self.path(identity);
        fs::create_dir_all(&dir)?;
        let mut marker = String::new();
        if let Some(branch) = branch {
            marker.push_str(branch);
        }
        if let Some(revision) = revision {
            if !marker.is_empty() {
                marker.push(' ');
            }
            marker.push_str(revision);
        }
        fs::write(dir.join(EDIT_MARKER), marker)?;
        Ok(())
    }

    fn end_edit(&mut self, identity: &PackageIdentity) -> Result<()> {
        fs::remove_file(self.marker(identity, EDIT_MARKER))?;
        Ok(())
    }
}
