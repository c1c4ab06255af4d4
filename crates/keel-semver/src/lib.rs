//! Version algebra for the keel package manager.
//!
//! Provides the strict SemVer 2.0.0 [`Version`] type, the
//! [`VersionSetSpecifier`] set algebra the resolver's term arithmetic is
//! built on, and a parser for the constraint syntax used in manifests.

mod parser;
mod range;
mod version;

pub use parser::{parse_constraint, ConstraintError};
pub use range::{Bound, SetRelation, VersionSetSpecifier};
pub use version::{Identifier, Version, VersionError};
