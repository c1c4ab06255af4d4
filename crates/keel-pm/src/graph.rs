//! The node model the resolver's output is expressed in.

use indexmap::IndexMap;

use crate::identity::{PackageIdentity, PackageReference, PinState};

/// Index of a node in the arena. Edges are indices, never owning
/// references, so in-flight cycles need no reference counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIndex(pub usize);

#[derive(Debug, Clone)]
pub struct Node {
    pub reference: PackageReference,
    pub state: Option<PinState>,
    pub edges: Vec<NodeIndex>,
    pub is_root: bool,
}

/// Arena of resolution nodes keyed by identity.
#[derive(Debug, Default)]
pub struct ResolutionGraph {
    nodes: Vec<Node>,
    index: IndexMap<PackageIdentity, NodeIndex>,
}

impl ResolutionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or fetch the node for `reference`.
    pub fn add_node(&mut self, reference: PackageReference, is_root: bool) -> NodeIndex {
        if let Some(&existing) = self.index.get(reference.identity()) {
            if is_root {
                self.nodes[existing.0].is_root = true;
            }
            return existing;
        }
        let index = NodeIndex(self.nodes.len());
        self.index.insert(reference.identity().clone(), index);
        self.nodes.push(Node {
            reference,
            state: None,
            edges: Vec::new(),
            is_root,
        });
        index
    }

    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) {
        let edges = &mut self.nodes[from.0].edges;
        if !edges.contains(&to) {
            edges.push(to);
        }
    }

    pub fn set_state(&mut self, node: NodeIndex, state: PinState) {
        self.nodes[node.0].state = Some(state);
    }

    pub fn lookup(&self, identity: &PackageIdentity) -> Option<NodeIndex> {
        self.index.get(identity).copied()
    }

    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.nodes[index.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes reachable from the roots, in depth-first discovery order.
    pub fn reachable(&self) -> Vec<NodeIndex> {
        let mut seen = vec![false; self.nodes.len()];
        let mut order = Vec::new();
        let mut stack: Vec<NodeIndex> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_root)
            .map(|(i, _)| NodeIndex(i))
            .collect();
        stack.reverse();

        while let Some(index) = stack.pop() {
            if seen[index.0] {
                continue;
            }
            seen[index.0] = true;
            order.push(index);
            for &edge in self.nodes[index.0].edges.iter().rev() {
                if !seen[edge.0] {
                    stack.push(edge);
                }
            }
        }
        order
    }
}

/// A complete assignment produced by the resolver.
#[derive(Debug)]
pub struct Resolution {
    pub graph: ResolutionGraph,
}

impl Resolution {
    /// The non-root bindings reachable from the roots, sorted by identity.
    pub fn bindings(&self) -> Vec<(PackageReference, PinState)> {
        let mut out: Vec<(PackageReference, PinState)> = self
            .graph
            .reachable()
            .into_iter()
            .map(|i| self.graph.node(i))
            .filter(|n| !n.is_root)
            .filter_map(|n| n.state.clone().map(|s| (n.reference.clone(), s)))
            .collect();
        out.sort_by(|(a, _), (b, _)| a.identity().cmp(b.identity()));
        out
    }

    pub fn binding_for(&self, identity: &PackageIdentity) -> Option<PinState> {
        self.graph
            .lookup(identity)
            .and_then(|i| self.graph.node(i).state.clone())
    }
}
