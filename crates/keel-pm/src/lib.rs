//! Dependency resolution, pinning and build-input classification for the
//! keel package manager.
//!
//! The crate centers on the PubGrub-style version solver and the
//! pinned-graph workflow around it: the [`workspace`] reconciler loads
//! root manifests, seeds the [`solver`] from the [`pins`] store, resolves
//! against a [`provider`], writes the outcome back, and converges the
//! on-disk checkouts. The [`target`] module classifies target file trees
//! into build inputs.

pub mod config;
pub mod error;
pub mod graph;
pub mod http;
pub mod identity;
pub mod mirrors;
pub mod pins;
pub mod provider;
pub mod solver;
pub mod target;
pub mod tools_version;
pub mod util;
pub mod workspace;

pub use error::{Error, Result};
pub use graph::{Resolution, ResolutionGraph};
pub use identity::{PackageIdentity, PackageReference, PinState, ReferenceKind, Requirement};
pub use mirrors::Mirrors;
pub use pins::{Pin, PinsStore};
pub use provider::{
    CachingProvider, MemoryProvider, MirroredProvider, PackageContainerProvider, PinnedAt,
};
pub use solver::{PubGrubResolver, RootPackage};
pub use target::{classify, ClassifiedSources, TargetDescription};
pub use tools_version::ToolsVersion;
pub use workspace::{
    CheckoutState, DirectoryWorkingCopies, RootManifest, WorkingCopies, Workspace, WorkspaceState,
};
