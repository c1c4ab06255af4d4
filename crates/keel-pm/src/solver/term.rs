//! Terms: the atoms the solver reasons about.

use std::fmt;

use keel_semver::{Version, VersionSetSpecifier};

use crate::identity::PackageIdentity;

/// A statement about one package: positive means "must lie in the set",
/// negative means "must not".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub package: PackageIdentity,
    pub set: VersionSetSpecifier,
    pub positive: bool,
}

impl Term {
    pub fn positive(package: PackageIdentity, set: VersionSetSpecifier) -> Self {
        Self {
            package,
            set,
            positive: true,
        }
    }

    pub fn negative(package: PackageIdentity, set: VersionSetSpecifier) -> Self {
        Self {
            package,
            set,
            positive: false,
        }
    }

    /// The positive singleton "package is exactly `version`".
    pub fn exactly(package: PackageIdentity, version: Version) -> Self {
        Self::positive(package, VersionSetSpecifier::exact(version))
    }

    pub fn negate(&self) -> Term {
        Term {
            package: self.package.clone(),
            set: self.set.clone(),
            positive: !self.positive,
        }
    }

    /// Constraint conjunction of two terms on the same package, expressed
    /// again as a single term.
    pub fn intersect(&self, other: &Term) -> Term {
        debug_assert_eq!(self.package, other.package);
        match (self.positive, other.positive) {
            (true, true) => Term::positive(self.package.clone(), self.set.intersect(&other.set)),
            (true, false) => Term::positive(self.package.clone(), self.set.difference(&other.set)),
            (false, true) => Term::positive(self.package.clone(), other.set.difference(&self.set)),
            (false, false) => Term::negative(self.package.clone(), self.set.union(&other.set)),
        }
    }

    /// Constraint disjunction, by De Morgan over [`intersect`](Self::intersect).
    pub fn union(&self, other: &Term) -> Term {
        self.negate().intersect(&other.negate()).negate()
    }

    /// States allowed by `self` that `other` forbids.
    pub fn difference(&self, other: &Term) -> Term {
        self.intersect(&other.negate())
    }

    /// Whether every state allowed by `self` is allowed by `other`.
    ///
    /// A negative term also allows "package absent", so it can never
    /// satisfy a positive one.
    pub fn satisfies(&self, other: &Term) -> bool {
        debug_assert_eq!(self.package, other.package);
        match (self.positive, other.positive) {
            (true, true) => self.set.is_subset_of(&other.set),
            (true, false) => self.set.is_disjoint(&other.set),
            (false, true) => false,
            (false, false) => other.set.is_subset_of(&self.set),
        }
    }

    /// A term no assignment can ever satisfy.
    pub fn is_failure(&self) -> bool {
        self.positive && self.set.is_empty()
    }

    /// A term every assignment satisfies; carries no information.
    pub fn is_vacuous(&self) -> bool {
        !self.positive && self.set.is_empty()
    }

    /// How an incompatibility term (`self`) relates to the accumulated
    /// assignment term for its package.
    pub fn relation_to(&self, accumulated: &Term) -> TermRelation {
        if accumulated.satisfies(self) {
            TermRelation::Satisfied
        } else if accumulated.intersect(self).is_failure() {
            TermRelation::Contradicted
        } else {
            TermRelation::Undetermined
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermRelation {
    Satisfied,
    Contradicted,
    Undetermined,
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.positive {
            write!(f, "{} {}", self.package, self.set)
        } else {
            write!(f, "not {} {}", self.package, self.set)
        }
    }
}
