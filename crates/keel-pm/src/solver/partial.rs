//! The partial solution: an ordered prefix of decisions and derivations.

use indexmap::IndexMap;

use keel_semver::{Version, VersionSetSpecifier};

use crate::identity::PackageIdentity;

use super::incompatibility::{Incompatibility, IncompatibilityId};
use super::term::{Term, TermRelation};

/// Why an assignment entered the solution.
#[derive(Debug, Clone)]
pub enum AssignmentKind {
    /// A concrete version committed at a new decision level
    Decision,
    /// A term forced by unit propagation against an incompatibility
    Derivation { cause: IncompatibilityId },
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub term: Term,
    pub kind: AssignmentKind,
    pub decision_level: u32,
}

impl Assignment {
    pub fn is_decision(&self) -> bool {
        matches!(self.kind, AssignmentKind::Decision)
    }

    pub fn cause(&self) -> Option<IncompatibilityId> {
        match self.kind {
            AssignmentKind::Derivation { cause } => Some(cause),
            AssignmentKind::Decision => None,
        }
    }
}

/// How an incompatibility relates to the current partial solution.
#[derive(Debug, Clone)]
pub enum IncompatibilityRelation {
    /// Every term satisfied: the solution contradicts the incompatibility
    Satisfied,
    /// Exactly one term unsatisfied; its negation can be derived
    AlmostSatisfied(Term),
    /// Some term can no longer be satisfied
    Contradicted,
    Undetermined,
}

/// The assignment list plus the indexes derived from it.
#[derive(Debug, Default)]
pub struct PartialSolution {
    assignments: Vec<Assignment>,
    decisions: IndexMap<PackageIdentity, Version>,
    accumulated: IndexMap<PackageIdentity, Term>,
    decision_level: u32,
}

impl PartialSolution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decision_level(&self) -> u32 {
        self.decision_level
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    pub fn decisions(&self) -> &IndexMap<PackageIdentity, Version> {
        &self.decisions
    }

    pub fn decision(&self, package: &PackageIdentity) -> Option<&Version> {
        self.decisions.get(package)
    }

    /// Commit `package := version` at a new decision level.
    pub fn decide(&mut self, package: PackageIdentity, version: Version) {
        self.decision_level += 1;
        let term = Term::exactly(package.clone(), version.clone());
        self.decisions.insert(package, version);
        self.push(Assignment {
            term,
            kind: AssignmentKind::Decision,
            decision_level: self.decision_level,
        });
    }

    /// Record a term forced by unit propagation.
    pub fn derive(&mut self, term: Term, cause: IncompatibilityId) {
        self.push(Assignment {
            term,
            kind: AssignmentKind::Derivation { cause },
            decision_level: self.decision_level,
        });
    }

    fn push(&mut self, assignment: Assignment) {
        let package = assignment.term.package.clone();
        match self.accumulated.get_mut(&package) {
            Some(acc) => *acc = acc.intersect(&assignment.term),
            None => {
                self.accumulated.insert(package, assignment.term.clone());
            }
        }
        self.assignments.push(assignment);
    }

    /// Drop every assignment above `level` and rebuild the indexes.
    pub fn backtrack(&mut self, level: u32) {
        self.assignments.retain(|a| a.decision_level <= level);
        self.decision_level = level;

        self.decisions.clear();
        self.accumulated.clear();
        let assignments = std::mem::take(&mut self.assignments);
        for assignment in &assignments {
            let package = assignment.term.package.clone();
            if assignment.is_decision() {
                if let Some(version) = assignment.term.set.as_exact() {
                    self.decisions.insert(package.clone(), version.clone());
                }
            }
            match self.accumulated.get_mut(&package) {
                Some(acc) => *acc = acc.intersect(&assignment.term),
                None => {
                    self.accumulated.insert(package, assignment.term.clone());
                }
            }
        }
        self.assignments = assignments;
    }

    fn term_relation(&self, term: &Term) -> TermRelation {
        match self.accumulated.get(&term.package) {
            Some(acc) => term.relation_to(acc),
            None => TermRelation::Undetermined,
        }
    }

    /// Whether the solution already satisfies `term`.
    pub fn satisfies(&self, term: &Term) -> bool {
        matches!(self.term_relation(term), TermRelation::Satisfied)
    }

    /// Relation of a whole incompatibility to the solution.
    pub fn relation(&self, incompatibility: &Incompatibility) -> IncompatibilityRelation {
        let mut unsatisfied: Option<&Term> = None;
        for term in incompatibility.terms() {
            match self.term_relation(term) {
                TermRelation::Contradicted => return IncompatibilityRelation::Contradicted,
                TermRelation::Undetermined => {
                    if unsatisfied.is_some() {
                        return IncompatibilityRelation::Undetermined;
                    }
                    unsatisfied = Some(term);
                }
                TermRelation::Satisfied => {}
            }
        }
        match unsatisfied {
            None => IncompatibilityRelation::Satisfied,
            Some(term) => IncompatibilityRelation::AlmostSatisfied(term.clone()),
        }
    }

    /// Index of the earliest assignment at which the accumulated
    /// assignments for `term.package` satisfy `term`.
    pub fn satisfier_index(&self, term: &Term) -> Option<usize> {
        let mut running: Option<Term> = None;
        for (index, assignment) in self.assignments.iter().enumerate() {
            if assignment.term.package != term.package {
                continue;
            }
            let next = match &running {
                Some(acc) => acc.intersect(&assignment.term),
                None => assignment.term.clone(),
            };
            if next.satisfies(term) {
                return Some(index);
            }
            running = Some(next);
        }
        None
    }

    pub fn assignment(&self, index: usize) -> &Assignment {
        &self.assignments[index]
    }

    /// The first package, in insertion order, with a positive accumulated
    /// term and no decision yet. Insertion order starts with the roots, so
    /// ties between equally-valid packages break stably across runs.
    pub fn next_undecided(&self) -> Option<(PackageIdentity, VersionSetSpecifier)> {
        for (package, term) in &self.accumulated {
            if term.positive && !self.decisions.contains_key(package) {
                return Some((package.clone(), term.set.clone()));
            }
        }
        None
    }

    /// The versions currently allowed for `package`, if it has positive
    /// constraints.
    pub fn allowed_set(&self, package: &PackageIdentity) -> Option<VersionSetSpecifier> {
        self.accumulated
            .get(package)
            .filter(|t| t.positive)
            .map(|t| t.set.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::incompatibility::Cause;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn p(s: &str) -> PackageIdentity {
        PackageIdentity::plain(s)
    }

    #[test]
    fn test_decide_and_derive() {
        let mut solution = PartialSolution::new();
        assert_eq!(solution.decision_level(), 0);

        solution.derive(
            Term::positive(p("a"), VersionSetSpecifier::caret(v("1.0.0"))),
            0,
        );
        assert_eq!(solution.decision_level(), 0);
        assert!(solution.decision(&p("a")).is_none());

        solution.decide(p("a"), v("1.2.0"));
        assert_eq!(solution.decision_level(), 1);
        assert_eq!(solution.decision(&p("a")), Some(&v("1.2.0")));
    }

    #[test]
    fn test_next_undecided_prefers_insertion_order() {
        let mut solution = PartialSolution::new();
        solution.derive(Term::positive(p("b"), VersionSetSpecifier::any()), 0);
        solution.derive(Term::positive(p("a"), VersionSetSpecifier::any()), 0);

        let (next, _) = solution.next_undecided().unwrap();
        assert_eq!(next, p("b"));

        solution.decide(p("b"), v("1.0.0"));
        let (next, _) = solution.next_undecided().unwrap();
        assert_eq!(next, p("a"));

        solution.decide(p("a"), v("1.0.0"));
        assert!(solution.next_undecided().is_none());
    }

    #[test]
    fn test_relation() {
        let mut solution = PartialSolution::new();
        solution.decide(p("a"), v("1.0.0"));

        // {a ^1.0, b ^1.0}: a's term satisfied, b undetermined
        let incompat = Incompatibility::new(
            vec![
                Term::positive(p("a"), VersionSetSpecifier::caret(v("1.0.0"))),
                Term::positive(p("b"), VersionSetSpecifier::caret(v("1.0.0"))),
            ],
            Cause::Root,
        );
        match solution.relation(&incompat) {
            IncompatibilityRelation::AlmostSatisfied(term) => assert_eq!(term.package, p("b")),
            other => panic!("unexpected relation {:?}", other),
        }

        // Contradicted once b is decided outside the set
        solution.decide(p("b"), v("2.0.0"));
        assert!(matches!(
            solution.relation(&incompat),
            IncompatibilityRelation::Contradicted
        ));
    }

    #[test]
    fn test_backtrack_restores_indexes() {
        let mut solution = PartialSolution::new();
        solution.derive(Term::positive(p("a"), VersionSetSpecifier::any()), 0);
        solution.decide(p("a"), v("1.0.0"));
        solution.decide(p("b"), v("2.0.0"));
        solution.derive(
            Term::positive(p("c"), VersionSetSpecifier::caret(v("1.0.0"))),
            0,
        );

        solution.backtrack(1);
        assert_eq!(solution.decision_level(), 1);
        assert_eq!(solution.decision(&p("a")), Some(&v("1.0.0")));
        assert!(solution.decision(&p("b")).is_none());
        assert!(solution.allowed_set(&p("c")).is_none());

        // a stays decided; b and c are forgotten entirely
        assert!(solution.next_undecided().is_none());
    }

    #[test]
    fn test_satisfier_index() {
        let mut solution = PartialSolution::new();
        solution.derive(
            Term::positive(p("a"), VersionSetSpecifier::caret(v("1.0.0"))),
            0,
        );
        solution.decide(p("a"), v("1.2.0"));

        // The broad derivation alone satisfies a broad term
        let broad = Term::positive(p("a"), VersionSetSpecifier::at_least(v("0.1.0")));
        assert_eq!(solution.satisfier_index(&broad), Some(0));

        // Only the decision pins it down to an exact version
        let exact = Term::exactly(p("a"), v("1.2.0"));
        assert_eq!(solution.satisfier_index(&exact), Some(1));

        let unmet = Term::exactly(p("a"), v("9.9.9"));
        assert_eq!(solution.satisfier_index(&unmet), None);
    }
}
