//! Incompatibilities: conjunctions of terms known unsatisfiable.

use std::fmt;

use indexmap::IndexMap;

use keel_semver::Version;

use crate::identity::PackageIdentity;

use super::term::Term;

pub type IncompatibilityId = usize;

/// Why an incompatibility holds. `Conflict` causes form the derivation
/// tree the failure report is rendered from.
#[derive(Debug, Clone)]
pub enum Cause {
    /// A requirement of a root manifest
    Root,
    /// A dependency edge of `package` (at `version` when version-pinned)
    Dependency {
        package: PackageIdentity,
        version: Option<Version>,
    },
    /// Derived during conflict resolution from two prior incompatibilities
    Conflict {
        left: IncompatibilityId,
        right: IncompatibilityId,
    },
    /// The container had no version inside the term's set
    NoAvailableVersion,
    /// Every candidate declared an incompatible tools version
    ToolsVersionIncompatible { version: Version, have: String },
    /// The container failed outright; its error text is carried verbatim
    Unavailable { reason: String },
}

/// A set of terms whose conjunction is known unsatisfiable, with at most
/// one term per package.
#[derive(Debug, Clone)]
pub struct Incompatibility {
    terms: Vec<Term>,
    pub cause: Cause,
}

impl Incompatibility {
    /// Build an incompatibility, merging terms that share a package.
    ///
    /// Same-package terms fold into the single term their conjunction
    /// denotes: version sets union on shared negative polarity, intersect
    /// on shared positive polarity, and subtract on disagreeing
    /// polarities. Terms every assignment satisfies are dropped.
    pub fn new(terms: Vec<Term>, cause: Cause) -> Self {
        let mut merged: IndexMap<PackageIdentity, Term> = IndexMap::new();
        for term in terms {
            match merged.get_mut(&term.package) {
                Some(existing) => *existing = existing.intersect(&term),
                None => {
                    merged.insert(term.package.clone(), term);
                }
            }
        }
        let terms = merged
            .into_iter()
            .map(|(_, t)| t)
            .filter(|t| !t.is_vacuous())
            .collect();
        Self { terms, cause }
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn term_for(&self, package: &PackageIdentity) -> Option<&Term> {
        self.terms.iter().find(|t| &t.package == package)
    }

    /// No term can be satisfied: version solving has failed outright.
    pub fn is_terminal(&self, roots: &[PackageIdentity]) -> bool {
        match self.terms.len() {
            0 => true,
            1 => roots.contains(&self.terms[0].package),
            _ => self.terms.iter().all(|t| roots.contains(&t.package)),
        }
    }
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.terms.iter().map(|t| t.to_string()).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}
