// This module holds the owning containers of the graph IR. A Computation is a slot arena of
// nodes addressed by NodeId with a designated root; removed nodes leave an empty slot so ids
// stay stable while passes rewrite in place. A Graph is the unit of compilation: a name, a
// unique id used for dump and override file names, the entry computation, and the named
// sub-computations targeted by call nodes. Passes receive the graph by exclusive mutable
// reference and use the rewrite helpers here (replace uses, replace node, post order, user
// maps) rather than touching the slots directly.

//! Computations and graphs.

use std::collections::BTreeMap;
use std::ops::Index;

use hashbrown::{HashMap, HashSet};
use thiserror::Error;

use super::node::{Node, NodeId, OpKind};
use super::shape::Shape;

/// Errors raised while building or editing a graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {id} does not exist in computation '{computation}'")]
    UnknownNode { computation: String, id: NodeId },

    #[error("computation '{name}' does not exist")]
    UnknownComputation { name: String },

    #[error("computation '{name}' is defined twice")]
    DuplicateComputation { name: String },

    #[error("computation '{name}' has no root")]
    MissingRoot { name: String },
}

/// A slot arena of nodes with a designated root.
#[derive(Debug, Clone, PartialEq)]
pub struct Computation {
    name: String,
    nodes: Vec<Option<Node>>,
    root: Option<NodeId>,
    names: HashSet<String>,
}

impl Computation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            root: None,
            names: HashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Insert a node, renaming it if its name is already taken.
    pub fn add_node(&mut self, mut node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        if self.names.contains(&node.name) || node.name.is_empty() {
            node.name = self.fresh_name(&node.name, id);
        }
        self.names.insert(node.name.clone());
        self.nodes.push(Some(node));
        id
    }

    /// Convenience wrapper around [`Computation::add_node`].
    pub fn add(
        &mut self,
        name: impl Into<String>,
        kind: OpKind,
        operands: Vec<NodeId>,
        shape: Shape,
    ) -> NodeId {
        self.add_node(Node::new(name, kind, operands, shape))
    }

    fn fresh_name(&self, base: &str, id: NodeId) -> String {
        let base = if base.is_empty() { "node" } else { base };
        let stem = base.split('.').next().unwrap_or(base);
        let mut suffix = id.0;
        loop {
            let candidate = format!("{stem}.{suffix}");
            if !self.names.contains(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn try_node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.node(id).ok_or_else(|| GraphError::UnknownNode {
            computation: self.name.clone(),
            id,
        })
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    pub fn root_node(&self) -> Option<&Node> {
        self.root.and_then(|id| self.node(id))
    }

    /// Live node ids in slot order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| NodeId(i))
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|node| (NodeId(i), node)))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    /// Find a live node by name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes().find(|(_, node)| node.name == name).map(|(id, _)| id)
    }

    /// Remove a node. Uses of it are left dangling; callers replace them first.
    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.get_mut(id.0)?.take()?;
        self.names.remove(&node.name);
        if self.root == Some(id) {
            self.root = None;
        }
        Some(node)
    }

    /// Live nodes that use `id` as an operand, without duplicates.
    pub fn users(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, node)| node.operands.contains(&id))
            .map(|(user, _)| user)
            .collect()
    }

    pub fn user_map(&self) -> HashMap<NodeId, Vec<NodeId>> {
        let mut users: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for (id, node) in self.nodes() {
            for operand in &node.operands {
                let entry = users.entry(*operand).or_default();
                if !entry.contains(&id) {
                    entry.push(id);
                }
            }
        }
        users
    }

    /// Whether the value of `id` is observed (used by a node or is the root).
    pub fn has_uses(&self, id: NodeId) -> bool {
        self.root == Some(id) || self.nodes().any(|(_, node)| node.operands.contains(&id))
    }

    /// Redirect every use of `old`, including the root, to `new`.
    /// Returns whether anything was redirected.
    pub fn replace_all_uses(&mut self, old: NodeId, new: NodeId) -> bool {
        if old == new {
            return false;
        }
        let mut changed = false;
        for (index, slot) in self.nodes.iter_mut().enumerate() {
            // The replacement may be built on top of `old`; keep that edge.
            if index == new.0 {
                continue;
            }
            if let Some(node) = slot {
                for operand in node.operands.iter_mut() {
                    if *operand == old {
                        *operand = new;
                        changed = true;
                    }
                }
            }
        }
        if self.root == Some(old) {
            self.root = Some(new);
            changed = true;
        }
        changed
    }

    /// Replace uses of `old` with `new` and drop `old` once nothing uses it.
    /// Parameters are never dropped.
    pub fn replace_node(&mut self, old: NodeId, new: NodeId) -> bool {
        let changed = self.replace_all_uses(old, new);
        let removable = self
            .node(old)
            .is_some_and(|node| !node.kind.is_parameter());
        if old != new && removable && !self.has_uses(old) {
            self.remove(old);
            return true;
        }
        changed
    }

    /// All live nodes, every node after its operands. Back edges of a
    /// malformed cyclic graph are ignored.
    pub fn post_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = HashSet::new();
        let mut starts: Vec<NodeId> = self.node_ids().collect();
        // Visit the root last so it lands at the end of the order.
        if let Some(root) = self.root {
            starts.retain(|id| *id != root);
            starts.push(root);
        }
        for start in starts {
            if visited.contains(&start) {
                continue;
            }
            let mut stack = vec![(start, false)];
            while let Some((id, expanded)) = stack.pop() {
                if expanded {
                    order.push(id);
                    continue;
                }
                if !visited.insert(id) {
                    continue;
                }
                let Some(node) = self.node(id) else {
                    continue;
                };
                stack.push((id, true));
                for operand in node.operands.iter().rev() {
                    if !visited.contains(operand) && self.contains(*operand) {
                        stack.push((*operand, false));
                    }
                }
            }
        }
        order
    }

    /// Nodes reachable from the root.
    pub fn reachable(&self) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = self.node(id) {
                stack.extend(node.operands.iter().copied());
            }
        }
        seen
    }

    /// Parameter nodes ordered by parameter number.
    pub fn parameters(&self) -> Vec<NodeId> {
        let mut params: Vec<(u32, NodeId)> = self
            .nodes()
            .filter_map(|(id, node)| match node.kind {
                OpKind::Parameter { number } => Some((number, id)),
                _ => None,
            })
            .collect();
        params.sort();
        params.into_iter().map(|(_, id)| id).collect()
    }

    pub fn operand_shape(&self, id: NodeId, index: usize) -> Option<&Shape> {
        let operand = self.node(id)?.operand(index)?;
        self.node(operand).map(|node| &node.shape)
    }
}

impl Index<NodeId> for Computation {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        match self.node(id) {
            Some(node) => node,
            None => panic!("node {id} is not live in computation '{}'", self.name),
        }
    }
}

/// The unit of compilation: an entry computation plus named sub-computations.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    name: String,
    id: u64,
    entry: Computation,
    subcomputations: BTreeMap<String, Computation>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: 0,
            entry: Computation::new("entry"),
            subcomputations: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    /// Stem shared by every file derived from this graph: `module_0007.name`.
    pub fn file_prefix(&self) -> String {
        format!("module_{:04}.{}", self.id, self.name)
    }

    pub fn entry(&self) -> &Computation {
        &self.entry
    }

    pub fn entry_mut(&mut self) -> &mut Computation {
        &mut self.entry
    }

    pub fn subcomputation(&self, name: &str) -> Option<&Computation> {
        self.subcomputations.get(name)
    }

    pub fn subcomputations(&self) -> impl Iterator<Item = &Computation> + '_ {
        self.subcomputations.values()
    }

    pub fn add_subcomputation(&mut self, computation: Computation) -> Result<(), GraphError> {
        let name = computation.name().to_string();
        if name == self.entry.name() || self.subcomputations.contains_key(&name) {
            return Err(GraphError::DuplicateComputation { name });
        }
        self.subcomputations.insert(name, computation);
        Ok(())
    }

    pub fn remove_subcomputation(&mut self, name: &str) -> Option<Computation> {
        self.subcomputations.remove(name)
    }

    /// A sub-computation name not used yet, derived from `base`.
    pub fn fresh_subcomputation_name(&self, base: &str) -> String {
        let mut suffix = self.subcomputations.len() + 1;
        loop {
            let candidate = format!("{base}.{suffix}");
            if !self.subcomputations.contains_key(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }

    /// Entry first, then sub-computations by name.
    pub fn computations(&self) -> impl Iterator<Item = &Computation> + '_ {
        std::iter::once(&self.entry).chain(self.subcomputations.values())
    }

    pub fn computations_mut(&mut self) -> impl Iterator<Item = &mut Computation> + '_ {
        std::iter::once(&mut self.entry).chain(self.subcomputations.values_mut())
    }

    pub fn node_count(&self) -> usize {
        self.computations().map(Computation::node_count).sum()
    }

    /// Every live node of every computation, for whole-graph queries.
    pub fn all_nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.computations()
            .flat_map(|computation| computation.nodes().map(|(_, node)| node))
    }

    /// Number of custom calls with the given target across all computations.
    pub fn count_custom_calls(&self, target: &str) -> usize {
        self.all_nodes()
            .filter(|node| node.kind.custom_call_target() == Some(target))
            .count()
    }
}
