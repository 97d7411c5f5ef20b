//! Tree construction and signing-reference resolution.
//!
//! Chains merge into a single rooted tree. Walking a chain from the
//! root, an existing edge is reused when it is structurally identical:
//! for value edges the same literal, for pattern edges the same source
//! occurrence and the same canonicalized CNF. Constraints attach at the
//! first occurrence of a pattern along the chain; later occurrences
//! carry none and rely on the binding equality check at match time.
//!
//! Temporary occurrences receive their final pattern ids here, one per
//! created edge, numbered above the named-pattern count.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::model::{
    ConstraintOption, FnArg, LvsModel, Node, NodeId, PatternConstraint, PatternEdge, PatternId,
    TagSymbol, ValueEdge, VERSION,
};

use super::expand::{Chain, ChainComp};
use super::resolve::{PatOcc, RArg, RConstraint, ROption, Resolved};
use super::SemanticError;

/// A pattern edge under construction, remembering the source occurrence
/// that created it for structural comparison.
struct EdgeBuild {
    source: PatOcc,
    edge: PatternEdge,
}

struct NodeBuild {
    parent: Option<NodeId>,
    rule_names: Vec<String>,
    value_edges: Vec<ValueEdge>,
    pattern_edges: Vec<EdgeBuild>,
    sign_names: Vec<String>,
}

impl NodeBuild {
    fn new(parent: Option<NodeId>) -> Self {
        Self {
            parent,
            rule_names: Vec::new(),
            value_edges: Vec::new(),
            pattern_edges: Vec::new(),
            sign_names: Vec::new(),
        }
    }
}

/// Merges all chains into a model. Chains are visited grouped by rule id
/// in ascending order, which fixes edge order deterministically.
pub(crate) fn build(
    resolved: &Resolved,
    chains: &BTreeMap<String, Vec<Chain>>,
) -> Result<LvsModel, SemanticError> {
    let named_cnt = resolved.named_cnt();
    let mut nodes: Vec<NodeBuild> = vec![NodeBuild::new(None)];
    let mut rule_nodes: HashMap<&str, Vec<NodeId>> = HashMap::new();
    let mut next_temp = named_cnt;

    for rule_chains in chains.values() {
        for chain in rule_chains {
            let mut cur = NodeId::new(0);
            let mut prev: HashSet<PatOcc> = HashSet::new();
            for comp in &chain.comps {
                cur = match comp {
                    ChainComp::Value(value) => {
                        let existing = nodes[cur.index()]
                            .value_edges
                            .iter()
                            .find(|e| e.value == *value)
                            .map(|e| e.dest);
                        match existing {
                            Some(dest) => dest,
                            None => {
                                let dest = NodeId::new(nodes.len() as u64);
                                nodes.push(NodeBuild::new(Some(cur)));
                                nodes[cur.index()]
                                    .value_edges
                                    .push(ValueEdge { dest, value: value.clone() });
                                dest
                            }
                        }
                    }
                    ChainComp::Pat(pat) => {
                        let first = prev.insert(*pat);
                        let cons = if first {
                            canonical_cnf(*pat, &chain.cons)
                        } else {
                            Vec::new()
                        };
                        let existing = nodes[cur.index()]
                            .pattern_edges
                            .iter()
                            .find(|e| e.source == *pat && e.edge.cons == cons)
                            .map(|e| e.edge.dest);
                        match existing {
                            Some(dest) => dest,
                            None => {
                                let tag = match pat {
                                    PatOcc::Named(id) => PatternId::new(*id),
                                    PatOcc::Temp(_) => {
                                        next_temp += 1;
                                        PatternId::new(next_temp)
                                    }
                                };
                                let dest = NodeId::new(nodes.len() as u64);
                                nodes.push(NodeBuild::new(Some(cur)));
                                nodes[cur.index()].pattern_edges.push(EdgeBuild {
                                    source: *pat,
                                    edge: PatternEdge { dest, tag, cons },
                                });
                                dest
                            }
                        }
                    }
                };
            }
            let terminal = &mut nodes[cur.index()];
            if !terminal.rule_names.iter().any(|n| n == &chain.rule) {
                terminal.rule_names.push(chain.rule.clone());
            }
            terminal.sign_names.extend(chain.sign_refs.iter().cloned());
            let ids = rule_nodes.entry(chain.rule.as_str()).or_default();
            if !ids.contains(&cur) {
                ids.push(cur);
            }
        }
    }

    // Resolve signing rule names to the terminal nodes of their chains.
    let mut out_nodes = Vec::with_capacity(nodes.len());
    for (index, node) in nodes.into_iter().enumerate() {
        let mut sign_refs: Vec<NodeId> = Vec::new();
        for name in &node.sign_names {
            let ids = rule_nodes
                .get(name.as_str())
                .ok_or_else(|| SemanticError::UnknownSigner { rule: name.clone() })?;
            sign_refs.extend(ids.iter().copied());
        }
        sign_refs.sort();
        sign_refs.dedup();
        out_nodes.push(Node {
            id: NodeId::new(index as u64),
            parent: node.parent,
            rule_names: node.rule_names,
            value_edges: node.value_edges,
            pattern_edges: node.pattern_edges.into_iter().map(|e| e.edge).collect(),
            sign_refs,
        });
    }

    let symbols = resolved
        .named
        .iter()
        .enumerate()
        .map(|(i, ident)| TagSymbol { tag: PatternId::new(i as u64 + 1), ident: ident.clone() })
        .collect();

    Ok(LvsModel {
        version: VERSION,
        start: NodeId::new(0),
        named_pattern_cnt: named_cnt,
        nodes: out_nodes,
        symbols,
    })
}

/// Collects the constraints targeting `pat` as a canonicalized CNF:
/// options sorted within each term, terms sorted among themselves.
fn canonical_cnf(pat: PatOcc, cons: &[RConstraint]) -> Vec<PatternConstraint> {
    let mut cnf: Vec<PatternConstraint> = cons
        .iter()
        .filter(|c| c.targets.contains(&pat))
        .map(|c| {
            let mut options: Vec<ConstraintOption> =
                c.options.iter().map(lower_option).collect();
            options.sort();
            PatternConstraint { options }
        })
        .collect();
    cnf.sort();
    cnf
}

fn lower_option(option: &ROption) -> ConstraintOption {
    match option {
        ROption::Value(value) => ConstraintOption::Value(value.clone()),
        ROption::Pat(id) => ConstraintOption::Pat(PatternId::new(*id)),
        ROption::Call { fn_id, args } => ConstraintOption::Call(crate::model::UserFnCall {
            fn_id: fn_id.clone(),
            args: args
                .iter()
                .map(|arg| match arg {
                    RArg::Value(value) => FnArg::Value(value.clone()),
                    RArg::Pat(id) => FnArg::Pat(PatternId::new(*id)),
                })
                .collect(),
        }),
    }
}
