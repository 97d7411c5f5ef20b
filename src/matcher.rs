//! Name matching against a compiled model.
//!
//! [`Matches`] walks the tree depth-first with explicit backtracking,
//! driven by the parent back-references: at each node the single
//! matching value edge is tried first, then the pattern edges in stored
//! order. Bindings are committed when an edge is taken and undone when
//! the traversal unwinds, so every alternative is enumerated in a
//! deterministic order.

use std::collections::hash_map;
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{ConstraintOption, FnArg, LvsModel, Node, NodeId, PatternConstraint, PatternId};
use crate::name::Component;

/// A host-supplied predicate. Receives the matched component and the
/// call's arguments; an argument is `None` when it refers to a pattern
/// that is unbound at evaluation time.
pub type UserFn = Arc<dyn Fn(&Component, &[Option<&Component>]) -> bool + Send + Sync>;

/// Registry of user functions, keyed by the bare function identifier
/// (no `$`).
pub type UserFnMap = HashMap<String, UserFn>;

/// Wraps a closure into a [`UserFn`].
pub fn user_fn(
    f: impl Fn(&Component, &[Option<&Component>]) -> bool + Send + Sync + 'static,
) -> UserFn {
    Arc::new(f)
}

/// Mapping from named pattern ids to the components they matched on the
/// current path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding {
    map: HashMap<PatternId, Component>,
}

impl Binding {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, tag: PatternId) -> Option<&Component> {
        self.map.get(&tag)
    }

    #[inline]
    pub fn insert(&mut self, tag: PatternId, value: Component) {
        self.map.insert(tag, value);
    }

    #[inline]
    pub fn remove(&mut self, tag: PatternId) {
        self.map.remove(&tag);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, PatternId, Component> {
        self.map.iter()
    }
}

impl FromIterator<(PatternId, Component)> for Binding {
    fn from_iter<I: IntoIterator<Item = (PatternId, Component)>>(iter: I) -> Self {
        Self { map: iter.into_iter().collect() }
    }
}

/// One successful match: the terminal node and the bindings accumulated
/// along its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub node: NodeId,
    pub binding: Binding,
}

/// Evaluates one option under the current binding. An unknown user
/// function or an unbound `Pat` reference makes the option not hold.
fn option_holds(
    option: &ConstraintOption,
    value: &Component,
    binding: &Binding,
    user_fns: &UserFnMap,
) -> bool {
    match option {
        ConstraintOption::Value(expected) => value == expected,
        ConstraintOption::Pat(tag) => binding.get(*tag) == Some(value),
        ConstraintOption::Call(call) => match user_fns.get(call.fn_id.as_str()) {
            None => false,
            Some(f) => {
                let args: Vec<Option<&Component>> = call
                    .args
                    .iter()
                    .map(|arg| match arg {
                        FnArg::Value(v) => Some(v),
                        FnArg::Pat(tag) => binding.get(*tag),
                    })
                    .collect();
                f(value, &args)
            }
        },
    }
}

/// Evaluates a CNF: every term must have at least one holding option.
/// The empty CNF is trivially satisfied.
pub(crate) fn cnf_holds(
    cons: &[PatternConstraint],
    value: &Component,
    binding: &Binding,
    user_fns: &UserFnMap,
) -> bool {
    cons.iter()
        .all(|term| term.options.iter().any(|opt| option_holds(opt, value, binding, user_fns)))
}

/// Where to continue edge enumeration at the current node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    /// Try the value edges, then the pattern edges from the start.
    Enter,
    /// Try pattern edges from this index.
    Pattern(usize),
}

/// Undo information for one taken edge.
#[derive(Debug, Clone, Copy)]
struct Frame {
    /// Cursor to restore at the parent when this subtree is exhausted.
    resume: Cursor,
    /// Named pattern bound by this edge, if any.
    bound: Option<PatternId>,
}

/// Lazy iterator over all matches of a name.
pub struct Matches<'a> {
    model: &'a LvsModel,
    user_fns: &'a UserFnMap,
    name: &'a [Component],
    cur: Option<NodeId>,
    cursor: Cursor,
    trail: Vec<Frame>,
    binding: Binding,
}

impl<'a> Matches<'a> {
    /// Starts a traversal at the model's start node with the given
    /// initial binding.
    pub fn new(
        model: &'a LvsModel,
        user_fns: &'a UserFnMap,
        name: &'a [Component],
        binding: Binding,
    ) -> Self {
        Self {
            model,
            user_fns,
            name,
            cur: Some(model.start),
            cursor: Cursor::Enter,
            trail: Vec::with_capacity(name.len()),
            binding,
        }
    }

    fn unwind(&mut self, node: &Node) {
        if let Some(frame) = self.trail.pop() {
            self.cursor = frame.resume;
            if let Some(tag) = frame.bound {
                self.binding.remove(tag);
            }
        }
        self.cur = node.parent;
    }

    fn descend(&mut self, dest: NodeId, resume: Cursor, bound: Option<PatternId>) {
        self.trail.push(Frame { resume, bound });
        self.cur = Some(dest);
        self.cursor = Cursor::Enter;
    }
}

impl Iterator for Matches<'_> {
    type Item = Match;

    fn next(&mut self) -> Option<Match> {
        loop {
            let cur = self.cur?;
            let node = &self.model.nodes[cur.index()];
            let depth = self.trail.len();
            if depth == self.name.len() {
                let found = Match { node: cur, binding: self.binding.clone() };
                self.unwind(node);
                return Some(found);
            }
            let value = &self.name[depth];
            match self.cursor {
                Cursor::Enter => {
                    // A component has one byte value, so at most one value
                    // edge can match.
                    self.cursor = Cursor::Pattern(0);
                    if let Some(edge) = node.value_edges.iter().find(|e| e.value == *value) {
                        self.descend(edge.dest, Cursor::Pattern(0), None);
                    }
                }
                Cursor::Pattern(i) if i < node.pattern_edges.len() => {
                    self.cursor = Cursor::Pattern(i + 1);
                    let edge = &node.pattern_edges[i];
                    if let Some(existing) = self.binding.get(edge.tag) {
                        // Re-binding a named pattern requires equality;
                        // any CNF here is an additional dynamic check.
                        if existing != value {
                            continue;
                        }
                        if !cnf_holds(&edge.cons, value, &self.binding, self.user_fns) {
                            continue;
                        }
                        self.descend(edge.dest, Cursor::Pattern(i + 1), None);
                    } else {
                        let named = edge.tag.is_named(self.model.named_pattern_cnt);
                        if named {
                            // Tentative binding: the CNF sees it, so a
                            // self-referential option is redundantly true.
                            self.binding.insert(edge.tag, value.clone());
                        }
                        if !cnf_holds(&edge.cons, value, &self.binding, self.user_fns) {
                            if named {
                                self.binding.remove(edge.tag);
                            }
                            continue;
                        }
                        self.descend(
                            edge.dest,
                            Cursor::Pattern(i + 1),
                            named.then_some(edge.tag),
                        );
                    }
                }
                Cursor::Pattern(_) => self.unwind(node),
            }
        }
    }
}
