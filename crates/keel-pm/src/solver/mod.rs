//! Conflict-driven version solving over version ranges.

mod incompatibility;
mod partial;
mod term;

pub use incompatibility::{Cause, Incompatibility, IncompatibilityId};
pub use partial::{Assignment, AssignmentKind, IncompatibilityRelation, PartialSolution};
pub use term::{Term, TermRelation};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

use keel_semver::{Version, VersionSetSpecifier};

use crate::error::{Error, Result};
use crate::graph::{Resolution, ResolutionGraph};
use crate::identity::{PackageIdentity, PackageReference, PinState, Requirement};
use crate::pins::PinsStore;
use crate::provider::{PackageContainerProvider, PinnedAt};

/// A root manifest's contribution to the solve: its own reference plus
/// the dependency edges it declares.
#[derive(Debug, Clone)]
pub struct RootPackage {
    pub reference: PackageReference,
    pub edges: Vec<(PackageReference, Requirement)>,
}

/// The resolver. Logically single-threaded and cooperative: container
/// calls are awaited one at a time, and a cancellation flag is checked
/// before each decision and each container call.
pub struct PubGrubResolver<'a> {
    provider: &'a dyn PackageContainerProvider,
    pins: Option<&'a PinsStore>,
    cancel: Arc<AtomicBool>,
}

struct State {
    incompatibilities: Vec<Incompatibility>,
    by_package: HashMap<PackageIdentity, Vec<IncompatibilityId>>,
    solution: PartialSolution,
    /// First-seen reference per identity
    references: IndexMap<PackageIdentity, PackageReference>,
    /// Packages solved outside version solving: roots and revision pins
    synthetic: Vec<PackageIdentity>,
    version_cache: HashMap<PackageIdentity, Vec<Version>>,
    dependency_cache: HashMap<(PackageIdentity, Version), Vec<(PackageReference, Requirement)>>,
    dependency_incompats: HashMap<(PackageIdentity, Version), Vec<IncompatibilityId>>,
    revision_bindings: IndexMap<PackageIdentity, PinState>,
    revision_edges: HashMap<PackageIdentity, Vec<(PackageReference, Requirement)>>,
    pin_hints: HashMap<PackageIdentity, Version>,
    base_level: u32,
}

impl State {
    fn new() -> Self {
        Self {
            incompatibilities: Vec::new(),
            by_package: HashMap::new(),
            solution: PartialSolution::new(),
            references: IndexMap::new(),
            synthetic: Vec::new(),
            version_cache: HashMap::new(),
            dependency_cache: HashMap::new(),
            dependency_incompats: HashMap::new(),
            revision_bindings: IndexMap::new(),
            revision_edges: HashMap::new(),
            pin_hints: HashMap::new(),
            base_level: 0,
        }
    }

    fn add_incompatibility(&mut self, incompatibility: Incompatibility) -> IncompatibilityId {
        let id = self.store(incompatibility);
        self.index(id);
        id
    }

    /// Store without indexing; intermediate conflict-resolution products
    /// participate in cause chains but not in propagation.
    fn store(&mut self, incompatibility: Incompatibility) -> IncompatibilityId {
        self.incompatibilities.push(incompatibility);
        self.incompatibilities.len() - 1
    }

    fn index(&mut self, id: IncompatibilityId) {
        for term in self.incompatibilities[id].terms() {
            self.by_package
                .entry(term.package.clone())
                .or_default()
                .push(id);
        }
    }

    fn register_reference(&mut self, reference: &PackageReference) {
        self.references
            .entry(reference.identity().clone())
            .or_insert_with(|| reference.clone());
    }
}

impl<'a> PubGrubResolver<'a> {
    pub fn new(provider: &'a dyn PackageContainerProvider) -> Self {
        Self {
            provider,
            pins: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Honor previously pinned versions while they remain satisfiable.
    pub fn with_pins(mut self, pins: &'a PinsStore) -> Self {
        self.pins = Some(pins);
        self
    }

    /// Share a cancellation flag; setting it unwinds the resolution with
    /// `Cancelled` without touching persistent state.
    pub fn with_cancellation(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Compute a complete assignment for the given roots, or fail with a
    /// derivation chain explaining why none exists.
    pub async fn solve(&self, roots: &[RootPackage]) -> Result<Resolution> {
        let mut state = State::new();

        for root in roots {
            state.register_reference(&root.reference);
            state.synthetic.push(root.reference.identity().clone());
        }

        // Branch and revision requirements are opaque equality-only
        // constraints; bind them before version solving starts.
        let version_edges = self.bind_revision_requirements(&mut state, roots).await?;

        // Roots and revision-bound packages get synthetic decisions so
        // their dependency incompatibilities can fire. Backjumps never go
        // below the level these occupy.
        for identity in state.synthetic.clone() {
            state.solution.decide(identity, Version::new(0, 0, 0));
        }
        state.base_level = state.solution.decision_level();

        let mut changed: Vec<PackageIdentity> = Vec::new();
        for (from, reference, requirement) in &version_edges {
            if state.revision_bindings.contains_key(reference.identity()) {
                return Err(Error::Unsatisfiable {
                    report: format!(
                        "'{}' requires '{}' {} but '{}' is already required by branch or revision",
                        from,
                        reference.identity(),
                        requirement,
                        reference.identity()
                    ),
                });
            }
            state.register_reference(reference);
            let set = requirement
                .version_set()
                .unwrap_or_else(VersionSetSpecifier::any);
            let cause = if state.synthetic.contains(from) && !state.revision_bindings.contains_key(from) {
                Cause::Root
            } else {
                Cause::Dependency {
                    package: from.clone(),
                    version: None,
                }
            };
            state.add_incompatibility(Incompatibility::new(
                vec![
                    Term::positive(from.clone(), VersionSetSpecifier::any()),
                    Term::negative(reference.identity().clone(), set),
                ],
                cause,
            ));
            if !changed.contains(from) {
                changed.push(from.clone());
            }
        }

        self.seed_pins(&mut state, &version_edges);

        loop {
            self.check_cancel()?;
            self.unit_propagate(&mut state, std::mem::take(&mut changed))?;

            let Some((package, _)) = state.solution.next_undecided() else {
                break;
            };
            changed = self.decide_next(&mut state, package).await?;
        }

        self.build_resolution(&state, roots).await
    }

    /// Resolve branch and revision requirements transitively, recording a
    /// pin state per package and queueing the version edges seen below
    /// them.
    async fn bind_revision_requirements(
        &self,
        state: &mut State,
        roots: &[RootPackage],
    ) -> Result<Vec<(PackageIdentity, PackageReference, Requirement)>> {
        let mut version_edges = Vec::new();
        let mut queue: VecDeque<(PackageIdentity, PackageReference, Requirement)> = VecDeque::new();

        for root in roots {
            let from = root.reference.identity().clone();
            for (reference, requirement) in &root.edges {
                match requirement {
                    Requirement::Branch(_) | Requirement::Revision(_) => {
                        queue.push_back((from.clone(), reference.clone(), requirement.clone()));
                    }
                    _ => version_edges.push((from.clone(), reference.clone(), requirement.clone())),
                }
            }
        }

        while let Some((from, reference, requirement)) = queue.pop_front() {
            self.check_cancel()?;
            let identity = reference.identity().clone();

            if let Some(existing) = state.revision_bindings.get(&identity) {
                let compatible = match (&requirement, existing) {
                    (Requirement::Branch(name), PinState::Branch { name: bound, .. }) => {
                        name == bound
                    }
                    (Requirement::Revision(rev), state) => state.revision() == Some(rev.as_str()),
                    _ => false,
                };
                if !compatible {
                    return Err(Error::Unsatisfiable {
                        report: format!(
                            "'{}' requires '{}' at {} but it is already bound to {}",
                            from, identity, requirement, existing
                        ),
                    });
                }
                continue;
            }

            let revisions = self.provider.revisions(&identity, &requirement).await?;
            let revision = match revisions.into_iter().next() {
                Some(revision) => revision,
                None => match &requirement {
                    Requirement::Revision(rev) => {
                        return Err(Error::RevisionDoesNotExist(rev.clone()))
                    }
                    _ => {
                        return Err(Error::Container {
                            identity: identity.to_string(),
                            reason: format!("{} could not be found", requirement),
                        })
                    }
                },
            };

            let pin_state = match &requirement {
                Requirement::Branch(name) => PinState::Branch {
                    name: name.clone(),
                    revision: revision.clone(),
                },
                _ => PinState::Revision {
                    revision: revision.clone(),
                },
            };

            state.register_reference(&reference);
            state.revision_bindings.insert(identity.clone(), pin_state);
            state.synthetic.push(identity.clone());

            let dependencies = self
                .provider
                .dependencies(&identity, &PinnedAt::Revision(revision))
                .await?;
            state
                .revision_edges
                .insert(identity.clone(), dependencies.clone());

            for (dep_reference, dep_requirement) in dependencies {
                match dep_requirement {
                    Requirement::Branch(_) | Requirement::Revision(_) => {
                        queue.push_back((identity.clone(), dep_reference, dep_requirement));
                    }
                    _ => version_edges.push((identity.clone(), dep_reference, dep_requirement)),
                }
            }
        }

        Ok(version_edges)
    }

    /// Pins whose version still satisfies the root terms become the
    /// preferred choice for their package; contradicted pins are dropped
    /// silently and normal solving proceeds.
    fn seed_pins(
        &self,
        state: &mut State,
        version_edges: &[(PackageIdentity, PackageReference, Requirement)],
    ) {
        let Some(pins) = self.pins else { return };

        let mut root_sets: HashMap<PackageIdentity, VersionSetSpecifier> = HashMap::new();
        for (from, reference, requirement) in version_edges {
            if !state.synthetic.contains(from) {
                continue;
            }
            if let Some(set) = requirement.version_set() {
                let entry = root_sets
                    .entry(reference.identity().clone())
                    .or_insert_with(VersionSetSpecifier::any);
                *entry = entry.intersect(&set);
            }
        }

        for pin in pins.pins() {
            let identity = pin.reference.identity();
            if let PinState::Version { version, .. } = &pin.state {
                if let Some(set) = root_sets.get(identity) {
                    if !set.contains(version) {
                        log::debug!(
                            "discarding pin '{}' {}: contradicted by root requirements",
                            identity,
                            version
                        );
                        continue;
                    }
                }
                state.pin_hints.insert(identity.clone(), version.clone());
            }
        }
    }

    /// Repeatedly scan incompatibilities touching changed packages,
    /// deriving forced terms and resolving conflicts as they surface.
    fn unit_propagate(&self, state: &mut State, seed: Vec<PackageIdentity>) -> Result<()> {
        let mut changed = seed;
        while let Some(package) = changed.pop() {
            let ids = state.by_package.get(&package).cloned().unwrap_or_default();
            for id in ids.into_iter().rev() {
                let incompatibility = state.incompatibilities[id].clone();
                match state.solution.relation(&incompatibility) {
                    IncompatibilityRelation::Satisfied => {
                        let root_cause = self.resolve_conflict(state, id)?;
                        changed.clear();
                        let learned = state.incompatibilities[root_cause].clone();
                        if let IncompatibilityRelation::AlmostSatisfied(term) =
                            state.solution.relation(&learned)
                        {
                            state.solution.derive(term.negate(), root_cause);
                            changed.push(term.package);
                        }
                        break;
                    }
                    IncompatibilityRelation::AlmostSatisfied(term) => {
                        state.solution.derive(term.negate(), id);
                        if !changed.contains(&term.package) {
                            changed.push(term.package.clone());
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Conflict resolution: walk the assignment backward resolving the
    /// conflicting incompatibility against the antecedents of its
    /// satisfiers, then backjump.
    fn resolve_conflict(
        &self,
        state: &mut State,
        incompatibility_id: IncompatibilityId,
    ) -> Result<IncompatibilityId> {
        let mut current_id = incompatibility_id;
        let mut current = state.incompatibilities[incompatibility_id].clone();
        let mut created = false;

        loop {
            if current.is_terminal(&state.synthetic) {
                return Err(Error::Unsatisfiable {
                    report: self.render_report(state, &current),
                });
            }

            let mut most_recent: Option<(usize, Term)> = None;
            let mut previous_level = state.base_level;
            let mut difference: Option<Term> = None;

            for term in current.terms() {
                let satisfier_index =
                    state
                        .solution
                        .satisfier_index(term)
                        .ok_or_else(|| Error::Unsatisfiable {
                            report: self.render_report(state, &current),
                        })?;
                let satisfier_level = state.solution.assignment(satisfier_index).decision_level;

                match &most_recent {
                    Some((index, _)) if *index >= satisfier_index => {
                        previous_level = previous_level.max(satisfier_level);
                        continue;
                    }
                    Some((index, _)) => {
                        let displaced_level = state.solution.assignment(*index).decision_level;
                        previous_level = previous_level.max(displaced_level);
                    }
                    None => {}
                }
                most_recent = Some((satisfier_index, term.clone()));
                difference = None;

                // When the satisfier only partially covers the term, the
                // uncovered remainder has its own satisfier level to honor.
                let satisfier = state.solution.assignment(satisfier_index);
                let diff = satisfier.term.difference(term);
                if !diff.set.is_empty() {
                    if let Some(diff_index) = state.solution.satisfier_index(&diff.negate()) {
                        let diff_level = state.solution.assignment(diff_index).decision_level;
                        previous_level = previous_level.max(diff_level);
                    }
                    difference = Some(diff);
                }
            }

            let (satisfier_index, conflict_term) = most_recent.ok_or_else(|| Error::Unsatisfiable {
                report: self.render_report(state, &current),
            })?;
            let satisfier = state.solution.assignment(satisfier_index).clone();

            if satisfier.is_decision() || previous_level < satisfier.decision_level {
                state.solution.backtrack(previous_level);
                if created {
                    state.index(current_id);
                }
                log::debug!(
                    "backjumped to level {} with {}",
                    previous_level,
                    state.incompatibilities[current_id]
                );
                return Ok(current_id);
            }

            let prior_cause_id = satisfier
                .cause()
                .expect("non-decision assignment carries a cause");
            let prior_cause = state.incompatibilities[prior_cause_id].clone();

            let mut new_terms: Vec<Term> = current
                .terms()
                .iter()
                .filter(|t| **t != conflict_term)
                .cloned()
                .collect();
            new_terms.extend(
                prior_cause
                    .terms()
                    .iter()
                    .filter(|t| t.package != satisfier.term.package)
                    .cloned(),
            );
            if let Some(diff) = &difference {
                new_terms.push(diff.negate());
            }

            current = Incompatibility::new(
                new_terms,
                Cause::Conflict {
                    left: current_id,
                    right: prior_cause_id,
                },
            );
            current_id = state.store(current.clone());
            created = true;
        }
    }

    /// Choose the next version for `package`, derive its dependency
    /// incompatibilities, and decide unless that would immediately
    /// conflict.
    async fn decide_next(
        &self,
        state: &mut State,
        package: PackageIdentity,
    ) -> Result<Vec<PackageIdentity>> {
        self.check_cancel()?;

        let allowed = state
            .solution
            .allowed_set(&package)
            .unwrap_or_else(VersionSetSpecifier::any);

        let versions = match state.version_cache.get(&package) {
            Some(hit) => hit.clone(),
            None => match self.provider.versions(&package).await {
                Ok(fetched) => {
                    state.version_cache.insert(package.clone(), fetched.clone());
                    fetched
                }
                Err(e) => {
                    state.add_incompatibility(Incompatibility::new(
                        vec![Term::positive(package.clone(), allowed)],
                        Cause::Unavailable {
                            reason: e.to_string(),
                        },
                    ));
                    return Ok(vec![package]);
                }
            },
        };

        let mut tools_incompatible: Option<Version> = None;
        let mut candidate: Option<Version> = None;

        // A still-valid pin wins; otherwise highest-first.
        let hinted = match state.pin_hints.get(&package) {
            Some(v) if allowed.contains(v) && versions.contains(v) => Some(v.clone()),
            _ => None,
        };
        let ordered = hinted.into_iter().chain(versions.into_iter());

        for version in ordered {
            if !allowed.contains(&version) {
                continue;
            }
            self.check_cancel()?;
            if self
                .provider
                .is_tools_version_compatible(&package, &version)
                .await
            {
                candidate = Some(version);
                break;
            }
            tools_incompatible.get_or_insert(version);
        }

        let Some(version) = candidate else {
            let cause = match tools_incompatible {
                Some(filtered) => Cause::ToolsVersionIncompatible {
                    version: filtered,
                    have: crate::tools_version::ToolsVersion::CURRENT.to_string(),
                },
                None => Cause::NoAvailableVersion,
            };
            state.add_incompatibility(Incompatibility::new(
                vec![Term::positive(package.clone(), allowed)],
                cause,
            ));
            return Ok(vec![package]);
        };

        let key = (package.clone(), version.clone());
        let dependencies = match state.dependency_cache.get(&key) {
            Some(hit) => hit.clone(),
            None => {
                self.check_cancel()?;
                match self
                    .provider
                    .dependencies(&package, &PinnedAt::Version(version.clone()))
                    .await
                {
                    Ok(fetched) => {
                        state.dependency_cache.insert(key, fetched.clone());
                        fetched
                    }
                    Err(e) => {
                        state.add_incompatibility(Incompatibility::new(
                            vec![Term::exactly(package.clone(), version)],
                            Cause::Unavailable {
                                reason: e.to_string(),
                            },
                        ));
                        return Ok(vec![package]);
                    }
                }
            }
        };

        let key = (package.clone(), version.clone());
        let new_ids = match state.dependency_incompats.get(&key) {
            Some(ids) => ids.clone(),
            None => {
                let mut ids = Vec::new();
                for (dep_reference, dep_requirement) in &dependencies {
                    let set = match dep_requirement.version_set() {
                        Some(set) => set,
                        None => {
                            return Err(Error::Unsatisfiable {
                                report: format!(
                                    "'{}' {} depends on '{}' at {}; only root packages may depend on branches or revisions",
                                    package,
                                    version,
                                    dep_reference.identity(),
                                    dep_requirement
                                ),
                            })
                        }
                    };
                    state.register_reference(dep_reference);
                    let id = state.add_incompatibility(Incompatibility::new(
                        vec![
                            Term::exactly(package.clone(), version.clone()),
                            Term::negative(dep_reference.identity().clone(), set),
                        ],
                        Cause::Dependency {
                            package: package.clone(),
                            version: Some(version.clone()),
                        },
                    ));
                    ids.push(id);
                }
                state.dependency_incompats.insert(key, ids.clone());
                ids
            }
        };

        // Deciding is skipped when one of the fresh incompatibilities
        // would be satisfied outright; propagation then drives the
        // backtracking instead.
        let conflict = new_ids.iter().any(|&id| {
            state.incompatibilities[id]
                .terms()
                .iter()
                .all(|t| t.package == package || state.solution.satisfies(t))
        });

        if !conflict {
            log::debug!("deciding {} {}", package, version);
            state.solution.decide(package.clone(), version);
        }

        Ok(vec![package])
    }

    /// Materialise the final assignment as a resolution graph.
    async fn build_resolution(&self, state: &State, roots: &[RootPackage]) -> Result<Resolution> {
        let mut graph = ResolutionGraph::new();

        for root in roots {
            graph.add_node(root.reference.clone(), true);
        }
        for (identity, pin_state) in &state.revision_bindings {
            let reference = state.references[identity].clone();
            let index = graph.add_node(reference, false);
            graph.set_state(index, pin_state.clone());
        }

        for (package, version) in state.solution.decisions() {
            if state.synthetic.contains(package) {
                continue;
            }
            let reference = state.references[package].clone();
            let revision = self
                .provider
                .revisions(package, &Requirement::Exact(version.clone()))
                .await?
                .into_iter()
                .next();
            let index = graph.add_node(reference, false);
            graph.set_state(
                index,
                PinState::Version {
                    version: version.clone(),
                    revision,
                },
            );
        }

        // Root edges, revision-bound edges, then the chosen versions' edges
        for root in roots {
            let from = graph.add_node(root.reference.clone(), true);
            for (reference, _) in &root.edges {
                if let Some(to) = graph.lookup(reference.identity()) {
                    graph.add_edge(from, to);
                }
            }
        }
        for (identity, edges) in &state.revision_edges {
            if let Some(from) = graph.lookup(identity) {
                for (reference, _) in edges {
                    if let Some(to) = graph.lookup(reference.identity()) {
                        graph.add_edge(from, to);
                    }
                }
            }
        }
        for ((package, version), edges) in &state.dependency_cache {
            if state.solution.decision(package) != Some(version) {
                continue;
            }
            if let Some(from) = graph.lookup(package) {
                for (reference, _) in edges {
                    if let Some(to) = graph.lookup(reference.identity()) {
                        graph.add_edge(from, to);
                    }
                }
            }
        }

        Ok(Resolution { graph })
    }

    /// Render the derivation chain behind a terminal incompatibility,
    /// mapping it back to user-visible requirements.
    fn render_report(&self, state: &State, incompatibility: &Incompatibility) -> String {
        let mut lines = Vec::new();
        let mut seen = HashSet::new();
        self.explain(state, incompatibility, &mut lines, &mut seen);
        lines.push("version solving failed".to_string());
        lines.join("\n")
    }

    fn explain(
        &self,
        state: &State,
        incompatibility: &Incompatibility,
        lines: &mut Vec<String>,
        seen: &mut HashSet<IncompatibilityId>,
    ) {
        match &incompatibility.cause {
            Cause::Conflict { left, right } => {
                for &id in [left, right] {
                    if seen.insert(id) {
                        let inner = state.incompatibilities[id].clone();
                        self.explain(state, &inner, lines, seen);
                    }
                }
                if !incompatibility.terms().is_empty() {
                    lines.push(format!("thus {} is impossible", incompatibility));
                }
            }
            Cause::Root => {
                if let Some(line) = describe_edge(incompatibility, "the root package") {
                    lines.push(line);
                }
            }
            Cause::Dependency { package, version } => {
                let source = match version {
                    Some(version) => format!("'{}' {}", package, version),
                    None => format!("'{}'", package),
                };
                if let Some(line) = describe_edge(incompatibility, &source) {
                    lines.push(line);
                }
            }
            Cause::NoAvailableVersion => {
                if let Some(term) = incompatibility.terms().first() {
                    lines.push(format!(
                        "no version of '{}' satisfies {}",
                        term.package, term.set
                    ));
                }
            }
            Cause::ToolsVersionIncompatible { version, have } => {
                if let Some(term) = incompatibility.terms().first() {
                    lines.push(format!(
                        "every candidate of '{}' in {} (such as {}) declares a tools version incompatible with {}",
                        term.package, term.set, version, have
                    ));
                }
            }
            Cause::Unavailable { reason } => {
                if let Some(term) = incompatibility.terms().first() {
                    lines.push(format!("'{}' is unavailable: {}", term.package, reason));
                }
            }
        }
    }
}

/// "X depends on 'q' set" for a two-term dependency incompatibility.
fn describe_edge(incompatibility: &Incompatibility, source: &str) -> Option<String> {
    let target = incompatibility.terms().iter().find(|t| !t.positive)?;
    Some(format!(
        "{} depends on '{}' {}",
        source, target.package, target.set
    ))
}
