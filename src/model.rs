//! Compiled LVS model: a rooted name-pattern tree with signing references.
//!
//! The model is produced by the compiler or decoded from its TLV form and
//! is immutable afterwards; matching and checking never mutate it.
//!
//! # Invariants (checked by [`LvsModel::validate`])
//! - A node's id equals its index in the node array.
//! - Every edge destination and signing reference is a valid node id.
//! - Parent back-references agree with the edges: the structure reachable
//!   from the start node is a tree.
//! - Pattern tags are strictly positive; ids in `[1, named_pattern_cnt]`
//!   are named patterns, larger ids are temporaries.
//! - The node-level signing-reference graph is acyclic.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::compile::{top_order, TopOrderError};
use crate::name::Component;

/// Model format version emitted by this compiler.
pub const VERSION: u32 = 0x0001_1000;
/// Oldest model format version this crate accepts.
pub const MIN_SUPPORTED_VERSION: u32 = 0x0001_1000;

/// TLV type numbers of the model format.
pub mod typenum {
    pub const COMPONENT_VALUE: u64 = 0x21;
    pub const PATTERN_TAG: u64 = 0x23;
    pub const NODE_ID: u64 = 0x25;
    pub const USER_FN_ID: u64 = 0x27;
    pub const IDENTIFIER: u64 = 0x29;
    pub const USER_FN_CALL: u64 = 0x31;
    pub const FN_ARG: u64 = 0x33;
    pub const CONS_OPTION: u64 = 0x41;
    pub const CONSTRAINT: u64 = 0x43;
    pub const VALUE_EDGE: u64 = 0x51;
    pub const PATTERN_EDGE: u64 = 0x53;
    pub const KEY_NODE_ID: u64 = 0x55;
    pub const VERSION: u64 = 0x61;
    pub const NODE: u64 = 0x63;
    pub const TAG_SYMBOL: u64 = 0x67;
    pub const NAMED_PATTERN_CNT: u64 = 0x69;
}

/// Identifier of a node: its index in the model's node array.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Index into the node array.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a pattern variable. Strictly positive; whether an id is
/// named or temporary depends on the model's `named_pattern_cnt`.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PatternId(u64);

impl PatternId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// True when this id denotes a named pattern of a model with the
    /// given named-pattern count.
    #[inline]
    pub const fn is_named(self, named_pattern_cnt: u64) -> bool {
        1 <= self.0 && self.0 <= named_pattern_cnt
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An argument of a compiled user-function call.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FnArg {
    /// A literal component.
    Value(Component),
    /// The component bound to a named pattern, or unresolved if unbound.
    Pat(PatternId),
}

/// A compiled `$fn(args...)` call.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserFnCall {
    pub fn_id: String,
    pub args: Vec<FnArg>,
}

/// One alternative within a constraint term.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConstraintOption {
    /// Matched component must equal this literal.
    Value(Component),
    /// Matched component must equal the component bound to this pattern;
    /// does not hold while the pattern is unbound.
    Pat(PatternId),
    /// Decided by a host-supplied predicate.
    Call(UserFnCall),
}

/// A disjunction of options; one AND-term of an edge's CNF.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PatternConstraint {
    pub options: Vec<ConstraintOption>,
}

/// Edge consuming exactly one component equal to `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueEdge {
    pub dest: NodeId,
    pub value: Component,
}

/// Edge consuming one component that satisfies `cons` with the component
/// tentatively bound to `tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternEdge {
    pub dest: NodeId,
    pub tag: PatternId,
    /// CNF: every term must have at least one holding option. Empty is
    /// trivially satisfied.
    pub cons: Vec<PatternConstraint>,
}

/// A node of the name-pattern tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Back-reference to the parent; `None` only for the start node.
    /// Used during load-time sanity checking and for backtracking.
    pub parent: Option<NodeId>,
    /// Rule names terminating at this node (diagnostic).
    pub rule_names: Vec<String>,
    pub value_edges: Vec<ValueEdge>,
    pub pattern_edges: Vec<PatternEdge>,
    /// Nodes whose matching names may sign names matching this node.
    pub sign_refs: Vec<NodeId>,
}

impl Node {
    /// Creates an empty node.
    pub fn new(id: NodeId, parent: Option<NodeId>) -> Self {
        Self {
            id,
            parent,
            rule_names: Vec::new(),
            value_edges: Vec::new(),
            pattern_edges: Vec::new(),
            sign_refs: Vec::new(),
        }
    }
}

/// Diagnostic mapping from a named pattern id to its source identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSymbol {
    pub tag: PatternId,
    pub ident: String,
}

/// A compiled model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvsModel {
    pub version: u32,
    pub start: NodeId,
    pub named_pattern_cnt: u64,
    /// Nodes in id order.
    pub nodes: Vec<Node>,
    /// Diagnostic symbol table; absence must not affect matching.
    pub symbols: Vec<TagSymbol>,
}

/// Facts collected while validating a model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelInfo {
    /// Every user-function id the model references.
    pub referenced_fns: BTreeSet<String>,
    /// Nodes referenced as signers whose own signing set is empty.
    pub trust_roots: BTreeSet<NodeId>,
}

/// Error raised when a model fails decoding or validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The version field is outside the supported window.
    UnsupportedVersion { version: u32 },
    /// The TLV input ended inside an element.
    Truncated,
    /// An unrecognized critical TLV type was encountered.
    UnknownCriticalType { typ: u64 },
    /// A field payload could not be decoded (bad integer width, bad
    /// component wire form, wrong option arity, and the like).
    MalformedField { typ: u64 },
    /// A scalar field appeared more often than the layout allows.
    DuplicateField { typ: u64 },
    /// A required field is absent.
    MissingField { what: &'static str },
    /// A node's id does not equal its array index.
    IdMismatch { index: usize },
    /// An edge or signing reference points outside the node array.
    DanglingReference { from: NodeId, to: NodeId },
    /// A destination node's parent back-reference disagrees with the
    /// incoming edge.
    BadParent { node: NodeId },
    /// A node is reachable through two edges; the model is not a tree.
    NotATree { node: NodeId },
    /// A pattern edge carries tag zero.
    BadPatternTag { node: NodeId },
    /// The node-level signing-reference graph has a cycle.
    SigningCycle { nodes: Vec<NodeId> },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::UnsupportedVersion { version } => {
                write!(f, "unsupported LVS model version {version:#010x}")
            }
            ModelError::Truncated => write!(f, "model input is truncated"),
            ModelError::UnknownCriticalType { typ } => {
                write!(f, "unrecognized critical TLV type {typ:#x}")
            }
            ModelError::MalformedField { typ } => {
                write!(f, "malformed field of TLV type {typ:#x}")
            }
            ModelError::DuplicateField { typ } => {
                write!(f, "duplicated field of TLV type {typ:#x}")
            }
            ModelError::MissingField { what } => write!(f, "missing required field: {what}"),
            ModelError::IdMismatch { index } => {
                write!(f, "node at index {index} carries a different id")
            }
            ModelError::DanglingReference { from, to } => {
                write!(f, "node {from} references non-existing node {to}")
            }
            ModelError::BadParent { node } => {
                write!(f, "node {node} has a wrong parent back-reference")
            }
            ModelError::NotATree { node } => {
                write!(f, "node {node} is reachable through more than one edge")
            }
            ModelError::BadPatternTag { node } => {
                write!(f, "node {node} has a pattern edge with tag zero")
            }
            ModelError::SigningCycle { nodes } => {
                write!(f, "signing references form a cycle through nodes {nodes:?}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

impl LvsModel {
    /// Looks up a node by id.
    #[inline]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// The symbol table as a tag → identifier map.
    pub fn symbol_map(&self) -> HashMap<PatternId, &str> {
        self.symbols.iter().map(|s| (s.tag, s.ident.as_str())).collect()
    }

    /// Checks the structural invariants and collects the referenced user
    /// functions and trust roots.
    ///
    /// Nodes not reachable from the start node are tolerated as long as
    /// their indices are consistent; the compiler never produces them.
    pub fn validate(&self) -> Result<ModelInfo, ModelError> {
        if !(MIN_SUPPORTED_VERSION..=VERSION).contains(&self.version) {
            return Err(ModelError::UnsupportedVersion { version: self.version });
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if node.id.index() != index {
                return Err(ModelError::IdMismatch { index });
            }
        }
        let mut info = ModelInfo::default();
        let mut sign_graph: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut signed_targets: BTreeSet<NodeId> = BTreeSet::new();
        let mut visited = vec![false; self.nodes.len()];

        let start = self.node(self.start).ok_or(ModelError::DanglingReference {
            from: self.start,
            to: self.start,
        })?;
        visited[start.id.index()] = true;

        let mut stack = vec![self.start];
        while let Some(cur) = stack.pop() {
            let node = &self.nodes[cur.index()];
            let mut enter = |dest: NodeId| -> Result<(), ModelError> {
                let child = self
                    .node(dest)
                    .ok_or(ModelError::DanglingReference { from: cur, to: dest })?;
                if visited[dest.index()] {
                    return Err(ModelError::NotATree { node: dest });
                }
                if child.parent != Some(cur) {
                    return Err(ModelError::BadParent { node: dest });
                }
                visited[dest.index()] = true;
                stack.push(dest);
                Ok(())
            };
            for edge in &node.value_edges {
                enter(edge.dest)?;
            }
            for edge in &node.pattern_edges {
                enter(edge.dest)?;
            }
            for edge in &node.pattern_edges {
                if edge.tag.as_u64() == 0 {
                    return Err(ModelError::BadPatternTag { node: cur });
                }
                for term in &edge.cons {
                    for opt in &term.options {
                        if let ConstraintOption::Call(call) = opt {
                            info.referenced_fns.insert(call.fn_id.clone());
                        }
                    }
                }
            }
            for &target in &node.sign_refs {
                if self.node(target).is_none() {
                    return Err(ModelError::DanglingReference { from: cur, to: target });
                }
                signed_targets.insert(target);
                sign_graph.entry(cur).or_default().push(target);
            }
        }

        let all_ids: BTreeSet<NodeId> = self.nodes.iter().map(|n| n.id).collect();
        top_order(&all_ids, &sign_graph).map_err(|err| match err {
            TopOrderError::Cycle(nodes) => ModelError::SigningCycle { nodes },
            TopOrderError::UnknownNode { from, to } => ModelError::DanglingReference { from, to },
        })?;

        info.trust_roots = signed_targets
            .into_iter()
            .filter(|id| self.nodes[id.index()].sign_refs.is_empty())
            .collect();

        tracing::debug!(
            nodes = self.nodes.len(),
            named_patterns = self.named_pattern_cnt,
            trust_roots = info.trust_roots.len(),
            "validated LVS model"
        );
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_model() -> LvsModel {
        // root --"a"--> 1
        let mut root = Node::new(NodeId::new(0), None);
        let leaf = Node::new(NodeId::new(1), Some(NodeId::new(0)));
        root.value_edges.push(ValueEdge { dest: NodeId::new(1), value: Component::generic(b"a".to_vec()) });
        LvsModel {
            version: VERSION,
            start: NodeId::new(0),
            named_pattern_cnt: 0,
            nodes: vec![root, leaf],
            symbols: vec![],
        }
    }

    #[test]
    fn validates_well_formed_model() {
        let info = leaf_model().validate().unwrap();
        assert!(info.referenced_fns.is_empty());
        assert!(info.trust_roots.is_empty());
    }

    #[test]
    fn rejects_version_outside_window() {
        let mut model = leaf_model();
        model.version = VERSION + 1;
        assert_eq!(
            model.validate(),
            Err(ModelError::UnsupportedVersion { version: VERSION + 1 })
        );
    }

    #[test]
    fn rejects_id_mismatch() {
        let mut model = leaf_model();
        model.nodes[1].id = NodeId::new(7);
        assert_eq!(model.validate(), Err(ModelError::IdMismatch { index: 1 }));
    }

    #[test]
    fn rejects_dangling_edge() {
        let mut model = leaf_model();
        model.nodes[0].value_edges[0].dest = NodeId::new(9);
        assert_eq!(
            model.validate(),
            Err(ModelError::DanglingReference { from: NodeId::new(0), to: NodeId::new(9) })
        );
    }

    #[test]
    fn rejects_wrong_parent() {
        let mut model = leaf_model();
        model.nodes[1].parent = None;
        assert_eq!(model.validate(), Err(ModelError::BadParent { node: NodeId::new(1) }));
    }

    #[test]
    fn rejects_diamond() {
        let mut model = leaf_model();
        // Second edge into the same destination.
        model.nodes[0].pattern_edges.push(PatternEdge {
            dest: NodeId::new(1),
            tag: PatternId::new(1),
            cons: vec![],
        });
        model.named_pattern_cnt = 1;
        assert_eq!(model.validate(), Err(ModelError::NotATree { node: NodeId::new(1) }));
    }

    #[test]
    fn rejects_signing_cycle() {
        let mut model = leaf_model();
        model.nodes[0].sign_refs.push(NodeId::new(1));
        model.nodes[1].sign_refs.push(NodeId::new(0));
        assert!(matches!(model.validate(), Err(ModelError::SigningCycle { .. })));
    }

    #[test]
    fn collects_fns_and_trust_roots() {
        let mut model = leaf_model();
        model.nodes[0].pattern_edges.push(PatternEdge {
            dest: NodeId::new(1),
            tag: PatternId::new(1),
            cons: vec![PatternConstraint {
                options: vec![ConstraintOption::Call(UserFnCall {
                    fn_id: "isValidID".into(),
                    args: vec![],
                })],
            }],
        });
        model.nodes[0].value_edges.clear();
        model.nodes[0].sign_refs.push(NodeId::new(1));
        model.named_pattern_cnt = 1;
        let info = model.validate().unwrap();
        assert!(info.referenced_fns.contains("isValidID"));
        assert_eq!(info.trust_roots, BTreeSet::from([NodeId::new(1)]));
    }
}
