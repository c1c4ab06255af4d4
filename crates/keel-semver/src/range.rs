//! Version sets as normalized disjunctions of half-open ranges.

use std::cmp::Ordering;
use std::fmt;

use crate::version::Version;

/// One endpoint of an interval on the version line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Bound {
    Unbounded,
    Included(Version),
    Excluded(Version),
}

impl Bound {
    fn version(&self) -> Option<&Version> {
        match self {
            Bound::Unbounded => None,
            Bound::Included(v) | Bound::Excluded(v) => Some(v),
        }
    }
}

/// A contiguous interval. Canonically `[lower, upper)`; inclusive upper
/// bounds exist only to model exact singletons.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Interval {
    lower: Bound,
    upper: Bound,
}

impl Interval {
    fn contains(&self, version: &Version) -> bool {
        let above_lower = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(v) => version >= v,
            Bound::Excluded(v) => version > v,
        };
        let below_upper = match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(v) => version <= v,
            Bound::Excluded(v) => version < v,
        };
        above_lower && below_upper
    }

    /// An interval is empty when the bounds cross, or touch without both
    /// being inclusive.
    fn is_empty(&self) -> bool {
        match (self.lower.version(), self.upper.version()) {
            (Some(lo), Some(hi)) => match lo.cmp(hi) {
                Ordering::Greater => true,
                Ordering::Equal => !matches!(
                    (&self.lower, &self.upper),
                    (Bound::Included(_), Bound::Included(_))
                ),
                Ordering::Less => false,
            },
            _ => false,
        }
    }
}

/// Total order on lower bounds: `Unbounded < Included(v) < Excluded(v)`.
fn cmp_lower(a: &Bound, b: &Bound) -> Ordering {
    match (a, b) {
        (Bound::Unbounded, Bound::Unbounded) => Ordering::Equal,
        (Bound::Unbounded, _) => Ordering::Less,
        (_, Bound::Unbounded) => Ordering::Greater,
        (Bound::Included(x), Bound::Included(y)) | (Bound::Excluded(x), Bound::Excluded(y)) => {
            x.cmp(y)
        }
        (Bound::Included(x), Bound::Excluded(y)) => x.cmp(y).then(Ordering::Less),
        (Bound::Excluded(x), Bound::Included(y)) => x.cmp(y).then(Ordering::Greater),
    }
}

/// Total order on upper bounds: `Excluded(v) < Included(v) < Unbounded`.
fn cmp_upper(a: &Bound, b: &Bound) -> Ordering {
    match (a, b) {
        (Bound::Unbounded, Bound::Unbounded) => Ordering::Equal,
        (Bound::Unbounded, _) => Ordering::Greater,
        (_, Bound::Unbounded) => Ordering::Less,
        (Bound::Included(x), Bound::Included(y)) | (Bound::Excluded(x), Bound::Excluded(y)) => {
            x.cmp(y)
        }
        (Bound::Included(x), Bound::Excluded(y)) => x.cmp(y).then(Ordering::Greater),
        (Bound::Excluded(x), Bound::Included(y)) => x.cmp(y).then(Ordering::Less),
    }
}

/// How two version sets relate, as seen by the solver's term algebra.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetRelation {
    /// Every version of the left set lies in the right set
    Subset,
    /// No version is shared
    Disjoint,
    /// Some versions shared, some not
    Overlap,
}

/// A set of versions, kept in normal form: sorted, pairwise-disjoint,
/// non-touching intervals.
///
/// Closed under [`union`](Self::union), [`intersect`](Self::intersect),
/// [`complement`](Self::complement) and [`difference`](Self::difference).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VersionSetSpecifier {
    intervals: Vec<Interval>,
}

impl VersionSetSpecifier {
    /// The empty set.
    pub fn empty() -> Self {
        Self { intervals: Vec::new() }
    }

    /// The set of all versions.
    pub fn any() -> Self {
        Self {
            intervals: vec![Interval {
                lower: Bound::Unbounded,
                upper: Bound::Unbounded,
            }],
        }
    }

    /// The singleton set containing exactly `version`.
    pub fn exact(version: Version) -> Self {
        Self {
            intervals: vec![Interval {
                lower: Bound::Included(version.clone()),
                upper: Bound::Included(version),
            }],
        }
    }

    /// `[version, +inf)`
    pub fn at_least(version: Version) -> Self {
        Self {
            intervals: vec![Interval {
                lower: Bound::Included(version),
                upper: Bound::Unbounded,
            }],
        }
    }

    /// `(version, +inf)`
    pub fn higher_than(version: Version) -> Self {
        Self {
            intervals: vec![Interval {
                lower: Bound::Excluded(version),
                upper: Bound::Unbounded,
            }],
        }
    }

    /// `(-inf, version]`
    pub fn at_most(version: Version) -> Self {
        Self {
            intervals: vec![Interval {
                lower: Bound::Unbounded,
                upper: Bound::Included(version),
            }],
        }
    }

    /// `(-inf, version)`
    pub fn lower_than(version: Version) -> Self {
        Self {
            intervals: vec![Interval {
                lower: Bound::Unbounded,
                upper: Bound::Excluded(version),
            }],
        }
    }

    /// The half-open range `[lower, upper)`.
    pub fn between(lower: Version, upper: Version) -> Self {
        let interval = Interval {
            lower: Bound::Included(lower),
            upper: Bound::Excluded(upper),
        };
        if interval.is_empty() {
            Self::empty()
        } else {
            Self { intervals: vec![interval] }
        }
    }

    /// Caret semantics: compatible-with-leftmost-nonzero-component.
    pub fn caret(version: Version) -> Self {
        let upper = if version.major > 0 {
            version.next_major()
        } else if version.minor > 0 {
            version.next_minor()
        } else {
            version.next_patch()
        };
        Self::between(version, upper)
    }

    /// Tilde semantics: patch-level flexibility.
    pub fn tilde(version: Version) -> Self {
        let upper = version.next_minor();
        Self::between(version, upper)
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn is_any(&self) -> bool {
        self.intervals.len() == 1
            && self.intervals[0].lower == Bound::Unbounded
            && self.intervals[0].upper == Bound::Unbounded
    }

    /// If this set is a singleton, the version it contains.
    pub fn as_exact(&self) -> Option<&Version> {
        if self.intervals.len() != 1 {
            return None;
        }
        match (&self.intervals[0].lower, &self.intervals[0].upper) {
            (Bound::Included(a), Bound::Included(b)) if a == b => Some(a),
            _ => None,
        }
    }

    pub fn contains(&self, version: &Version) -> bool {
        self.intervals.iter().any(|i| i.contains(version))
    }

    /// Set complement over the whole version line.
    pub fn complement(&self) -> Self {
        if self.intervals.is_empty() {
            return Self::any();
        }

        let mut out = Vec::new();
        let mut cursor = Bound::Unbounded;

        for interval in &self.intervals {
            let upper = match &interval.lower {
                Bound::Unbounded => None,
                Bound::Included(v) => Some(Bound::Excluded(v.clone())),
                Bound::Excluded(v) => Some(Bound::Included(v.clone())),
            };
            if let Some(upper) = upper {
                let gap = Interval {
                    lower: cursor.clone(),
                    upper,
                };
                if !gap.is_empty() {
                    out.push(gap);
                }
            }
            cursor = match &interval.upper {
                Bound::Unbounded => {
                    // Nothing above the last interval
                    return Self { intervals: out };
                }
                Bound::Included(v) => Bound::Excluded(v.clone()),
                Bound::Excluded(v) => Bound::Included(v.clone()),
            };
        }

        out.push(Interval {
            lower: cursor,
            upper: Bound::Unbounded,
        });
        Self { intervals: out }
    }

    /// Set intersection. Inputs in normal form produce output in normal form.
    pub fn intersect(&self, other: &Self) -> Self {
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);

        while i < self.intervals.len() && j < other.intervals.len() {
            let a = &self.intervals[i];
            let b = &other.intervals[j];

            let lower = if cmp_lower(&a.lower, &b.lower) == Ordering::Greater {
                a.lower.clone()
            } else {
                b.lower.clone()
            };
            let (upper, advance_a) = if cmp_upper(&a.upper, &b.upper) == Ordering::Less {
                (a.upper.clone(), true)
            } else {
                (b.upper.clone(), false)
            };

            let candidate = Interval { lower, upper };
            if !candidate.is_empty() {
                out.push(candidate);
            }

            if advance_a {
                i += 1;
            } else {
                j += 1;
            }
        }

        Self { intervals: out }
    }

    /// Set union, computed as the complement of intersected complements so
    /// touching intervals merge back together.
    pub fn union(&self, other: &Self) -> Self {
        self.complement()
            .intersect(&other.complement())
            .complement()
    }

    /// Versions in `self` but not in `other`.
    pub fn difference(&self, other: &Self) -> Self {
        self.intersect(&other.complement())
    }

    pub fn is_disjoint(&self, other: &Self) -> bool {
        self.intersect(other).is_empty()
    }

    pub fn is_subset_of(&self, other: &Self) -> bool {
        &self.intersect(other) == self
    }

    /// Relation of `self` to `other`, per the solver's term arithmetic.
    pub fn relation(&self, other: &Self) -> SetRelation {
        let shared = self.intersect(other);
        if &shared == self {
            SetRelation::Subset
        } else if shared.is_empty() {
            SetRelation::Disjoint
        } else {
            SetRelation::Overlap
        }
    }
}

impl fmt::Display for VersionSetSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "(empty)");
        }
        if self.is_any() {
            return write!(f, "*");
        }
        let parts: Vec<String> = self
            .intervals
            .iter()
            .map(|interval| {
                if let (Bound::Included(a), Bound::Included(b)) = (&interval.lower, &interval.upper)
                {
                    if a == b {
                        return format!("={}", a);
                    }
                }
                match (&interval.lower, &interval.upper) {
                    (Bound::Unbounded, Bound::Excluded(v)) => format!("<{}", v),
                    (Bound::Unbounded, Bound::Included(v)) => format!("<={}", v),
                    (Bound::Included(v), Bound::Unbounded) => format!(">={}", v),
                    (Bound::Excluded(v), Bound::Unbounded) => format!(">{}", v),
                    (lower, upper) => {
                        let lo = match lower {
                            Bound::Included(v) => format!(">={}", v),
                            Bound::Excluded(v) => format!(">{}", v),
                            Bound::Unbounded => unreachable!(),
                        };
                        let hi = match upper {
                            Bound::Included(v) => format!("<={}", v),
                            Bound::Excluded(v) => format!("<{}", v),
                            Bound::Unbounded => unreachable!(),
                        };
                        format!("{} {}", lo, hi)
                    }
                }
            })
            .collect();
        write!(f, "{}", parts.join(" || "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_contains_basic() {
        let set = VersionSetSpecifier::between(v("1.0.0"), v("2.0.0"));
        assert!(set.contains(&v("1.0.0")));
        assert!(set.contains(&v("1.9.9")));
        assert!(!set.contains(&v("2.0.0")));
        assert!(!set.contains(&v("0.9.9")));
    }

    #[test]
    fn test_half_open_includes_upper_prereleases() {
        // 2.0.0-alpha sorts below 2.0.0, so a [1,2) range admits it
        let set = VersionSetSpecifier::between(v("1.0.0"), v("2.0.0"));
        assert!(set.contains(&v("2.0.0-alpha")));
    }

    #[test]
    fn test_exact() {
        let set = VersionSetSpecifier::exact(v("1.2.3"));
        assert!(set.contains(&v("1.2.3")));
        assert!(!set.contains(&v("1.2.4")));
        assert_eq!(set.as_exact(), Some(&v("1.2.3")));
    }

    #[test]
    fn test_caret() {
        let set = VersionSetSpecifier::caret(v("1.2.3"));
        assert!(set.contains(&v("1.2.3")));
        assert!(set.contains(&v("1.9.0")));
        assert!(!set.contains(&v("2.0.0")));
        assert!(!set.contains(&v("1.2.2")));

        let zero_minor = VersionSetSpecifier::caret(v("0.2.3"));
        assert!(zero_minor.contains(&v("0.2.9")));
        assert!(!zero_minor.contains(&v("0.3.0")));

        let zero_patch = VersionSetSpecifier::caret(v("0.0.3"));
        assert!(zero_patch.contains(&v("0.0.3")));
        assert!(!zero_patch.contains(&v("0.0.4")));
    }

    #[test]
    fn test_complement_round_trip() {
        let sets = [
            VersionSetSpecifier::empty(),
            VersionSetSpecifier::any(),
            VersionSetSpecifier::exact(v("1.0.0")),
            VersionSetSpecifier::between(v("1.0.0"), v("2.0.0")),
            VersionSetSpecifier::at_least(v("3.0.0")),
            VersionSetSpecifier::between(v("1.0.0"), v("2.0.0"))
                .union(&VersionSetSpecifier::at_least(v("3.0.0"))),
        ];
        for set in &sets {
            assert_eq!(&set.complement().complement(), set);
        }
    }

    #[test]
    fn test_complement_of_exact() {
        let set = VersionSetSpecifier::exact(v("1.0.0")).complement();
        assert!(!set.contains(&v("1.0.0")));
        assert!(set.contains(&v("0.9.9")));
        assert!(set.contains(&v("1.0.1")));
        assert!(set.contains(&v("1.0.0-alpha")));
    }

    #[test]
    fn test_union_merges_touching_ranges() {
        let a = VersionSetSpecifier::between(v("1.0.0"), v("2.0.0"));
        let b = VersionSetSpecifier::between(v("2.0.0"), v("3.0.0"));
        let merged = a.union(&b);
        assert_eq!(merged, VersionSetSpecifier::between(v("1.0.0"), v("3.0.0")));
    }

    #[test]
    fn test_union_keeps_gaps() {
        let a = VersionSetSpecifier::between(v("1.0.0"), v("2.0.0"));
        let b = VersionSetSpecifier::between(v("3.0.0"), v("4.0.0"));
        let set = a.union(&b);
        assert!(set.contains(&v("1.5.0")));
        assert!(!set.contains(&v("2.5.0")));
        assert!(set.contains(&v("3.5.0")));
    }

    #[test]
    fn test_intersect() {
        let a = VersionSetSpecifier::between(v("1.0.0"), v("3.0.0"));
        let b = VersionSetSpecifier::between(v("2.0.0"), v("4.0.0"));
        assert_eq!(
            a.intersect(&b),
            VersionSetSpecifier::between(v("2.0.0"), v("3.0.0"))
        );

        let disjoint = VersionSetSpecifier::between(v("5.0.0"), v("6.0.0"));
        assert!(a.intersect(&disjoint).is_empty());
    }

    #[test]
    fn test_difference() {
        let a = VersionSetSpecifier::between(v("1.0.0"), v("3.0.0"));
        let b = VersionSetSpecifier::between(v("2.0.0"), v("4.0.0"));
        let diff = a.difference(&b);
        assert!(diff.contains(&v("1.5.0")));
        assert!(!diff.contains(&v("2.0.0")));
        assert!(!diff.contains(&v("2.5.0")));
    }

    #[test]
    fn test_relation() {
        let caret = VersionSetSpecifier::caret(v("1.0.0"));
        let narrower = VersionSetSpecifier::between(v("1.2.0"), v("1.3.0"));
        let elsewhere = VersionSetSpecifier::at_least(v("2.0.0"));

        assert_eq!(narrower.relation(&caret), SetRelation::Subset);
        assert_eq!(caret.relation(&narrower), SetRelation::Overlap);
        assert_eq!(caret.relation(&elsewhere), SetRelation::Disjoint);
    }

    #[test]
    fn test_any_and_empty_identities() {
        let set = VersionSetSpecifier::caret(v("1.0.0"));
        assert_eq!(set.intersect(&VersionSetSpecifier::any()), set);
        assert!(set.intersect(&VersionSetSpecifier::empty()).is_empty());
        assert_eq!(set.union(&VersionSetSpecifier::empty()), set);
        assert!(set.union(&VersionSetSpecifier::any()).is_any());
    }

    #[test]
    fn test_display() {
        assert_eq!(VersionSetSpecifier::any().to_string(), "*");
        assert_eq!(VersionSetSpecifier::empty().to_string(), "(empty)");
        assert_eq!(
            VersionSetSpecifier::exact(v("1.2.3")).to_string(),
            "=1.2.3"
        );
        assert_eq!(
            VersionSetSpecifier::between(v("1.0.0"), v("2.0.0")).to_string(),
            ">=1.0.0 <2.0.0"
        );
    }
}
