//! Rule-reference ordering and pattern numbering.
//!
//! Rules are sorted so that every referenced rule precedes its referrers,
//! temporary rules are given unique internal names, and every pattern
//! occurrence is numbered: named patterns receive a stable id on first
//! encounter, each temporary occurrence a fresh provisional id. The pass
//! produces new `R*` structures; the parser output stays untouched.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

use crate::ast::{ConsOption, FnArg, NameComp, Schema};
use crate::name::Component;

use super::SemanticError;

/// Error raised by [`top_order`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopOrderError<T> {
    /// An edge endpoint is not in the node set.
    UnknownNode { from: T, to: T },
    /// The graph has a cycle; carries the nodes still unordered.
    Cycle(Vec<T>),
}

/// Sorts the nodes of a DAG so that every edge target precedes its
/// source. Each round picks the zero-in-degree nodes in ascending order,
/// so the result is stable.
pub fn top_order<T: Ord + Hash + Clone>(
    nodes: &BTreeSet<T>,
    graph: &HashMap<T, Vec<T>>,
) -> Result<Vec<T>, TopOrderError<T>> {
    let mut in_degs: HashMap<&T, i64> = nodes.iter().map(|n| (n, 0)).collect();
    for (src, targets) in graph {
        for dst in targets {
            if !nodes.contains(src) || !nodes.contains(dst) {
                return Err(TopOrderError::UnknownNode { from: src.clone(), to: dst.clone() });
            }
            *in_degs.get_mut(dst).expect("target is in the node set") += 1;
        }
    }
    let mut ordered: Vec<&T> = Vec::with_capacity(nodes.len());
    while ordered.len() < nodes.len() {
        let mut round: Vec<&T> =
            in_degs.iter().filter(|&(_, &d)| d == 0).map(|(&n, _)| n).collect();
        if round.is_empty() {
            let mut remaining: Vec<T> =
                in_degs.iter().filter(|&(_, &d)| d > 0).map(|(&n, _)| n.clone()).collect();
            remaining.sort();
            return Err(TopOrderError::Cycle(remaining));
        }
        round.sort();
        for n in round {
            if let Some(targets) = graph.get(n) {
                for dst in targets {
                    *in_degs.get_mut(dst).expect("target is in the node set") -= 1;
                }
            }
            *in_degs.get_mut(n).expect("node is in the node set") = -1;
            ordered.push(n);
        }
    }
    Ok(ordered.into_iter().rev().cloned().collect())
}

/// One numbered pattern occurrence.
///
/// Temporary ids are provisional: the tree builder assigns final ids
/// above the named-pattern count when it creates the edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum PatOcc {
    Named(u64),
    Temp(u64),
}

/// Resolved name-pattern component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RComp {
    Value(Component),
    Pat(PatOcc),
    /// Reference to the rule with this internal id.
    Rule(String),
}

/// Resolved function-call argument; only named patterns may appear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RArg {
    Value(Component),
    Pat(u64),
}

/// Resolved constraint option; only named patterns may appear on the
/// right-hand side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ROption {
    Value(Component),
    Pat(u64),
    Call { fn_id: String, args: Vec<RArg> },
}

/// A constraint with its numbered targets. A constraint on a temporary
/// pattern targets every occurrence of that identifier in the rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RConstraint {
    pub targets: Vec<PatOcc>,
    pub options: Vec<ROption>,
}

/// A rule with numbered patterns, in topological position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RRule {
    /// Internal id: the source id, or a uniquified form for temporary
    /// rules.
    pub id: String,
    pub comps: Vec<RComp>,
    pub cons_sets: Vec<Vec<RConstraint>>,
    pub sign_refs: Vec<String>,
}

/// Output of the resolve pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Resolved {
    /// Rules in topological order (referenced rules first). Multiple
    /// definitions of one rule id stay adjacent in source order.
    pub rules: Vec<RRule>,
    /// Named-pattern symbol table in id order (`id = position + 1`).
    pub named: Vec<String>,
}

impl Resolved {
    /// Number of named patterns.
    #[inline]
    pub fn named_cnt(&self) -> u64 {
        self.named.len() as u64
    }
}

/// Runs the resolve pass over a parsed schema.
pub(crate) fn resolve(schema: &Schema) -> Result<Resolved, SemanticError> {
    // Uniquify temporary rules; collect the id universe.
    let mut internal_ids: Vec<String> = Vec::with_capacity(schema.rules.len());
    let mut temp_rule_seq = 0u64;
    for rule in &schema.rules {
        if rule.id.starts_with('_') {
            temp_rule_seq += 1;
            internal_ids.push(format!("{}__{}", rule.id, temp_rule_seq));
        } else {
            internal_ids.push(rule.id.clone());
        }
    }
    let id_set: BTreeSet<String> = internal_ids.iter().cloned().collect();

    // Reference graph over rule ids; signing references do not count.
    let mut graph: HashMap<String, Vec<String>> = id_set.iter().map(|id| (id.clone(), Vec::new())).collect();
    for (rule, internal_id) in schema.rules.iter().zip(&internal_ids) {
        for comp in &rule.name.comps {
            if let NameComp::RuleRef(referenced) = comp {
                if referenced.starts_with('_') {
                    return Err(SemanticError::TemporaryRuleRef {
                        rule: rule.id.clone(),
                        referenced: referenced.clone(),
                    });
                }
                if !id_set.contains(referenced) {
                    return Err(SemanticError::UnknownRule {
                        rule: rule.id.clone(),
                        referenced: referenced.clone(),
                    });
                }
                graph.get_mut(internal_id).expect("own id is in the graph").push(referenced.clone());
            }
        }
    }
    let order = top_order(&id_set, &graph).map_err(|err| match err {
        TopOrderError::Cycle(rules) => SemanticError::CyclicReference { rules },
        TopOrderError::UnknownNode { from, to } => {
            SemanticError::UnknownRule { rule: from, referenced: to }
        }
    })?;
    let position: HashMap<&str, usize> =
        order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();

    // Stable sort keeps multiple definitions of one rule in source order.
    let mut rule_order: Vec<usize> = (0..schema.rules.len()).collect();
    rule_order.sort_by_key(|&i| position[internal_ids[i].as_str()]);

    // Number patterns in sorted order.
    let mut named: Vec<String> = Vec::new();
    let mut named_ids: HashMap<String, u64> = HashMap::new();
    let mut next_temp = 0u64;
    let mut rules: Vec<RRule> = Vec::with_capacity(schema.rules.len());
    for &idx in &rule_order {
        let rule = &schema.rules[idx];
        let mut temp_occ: HashMap<&str, Vec<u64>> = HashMap::new();
        let mut comps = Vec::with_capacity(rule.name.comps.len());
        for comp in &rule.name.comps {
            comps.push(match comp {
                NameComp::Value(value) => RComp::Value(value.clone()),
                NameComp::RuleRef(referenced) => RComp::Rule(referenced.clone()),
                NameComp::Pattern(ident) if ident.starts_with('_') => {
                    next_temp += 1;
                    temp_occ.entry(ident).or_default().push(next_temp);
                    RComp::Pat(PatOcc::Temp(next_temp))
                }
                NameComp::Pattern(ident) => {
                    let id = *named_ids.entry(ident.clone()).or_insert_with(|| {
                        named.push(ident.clone());
                        named.len() as u64
                    });
                    RComp::Pat(PatOcc::Named(id))
                }
            });
        }
        let mut cons_sets = Vec::with_capacity(rule.cons_sets.len());
        for set in &rule.cons_sets {
            let mut terms = Vec::with_capacity(set.len());
            for term in set {
                let targets = if term.tag.starts_with('_') {
                    let occs = temp_occ.get(term.tag.as_str()).ok_or_else(|| {
                        SemanticError::UnboundConstraintTarget {
                            rule: rule.id.clone(),
                            pattern: term.tag.clone(),
                        }
                    })?;
                    occs.iter().map(|&t| PatOcc::Temp(t)).collect()
                } else {
                    let id = named_ids.get(term.tag.as_str()).ok_or_else(|| {
                        SemanticError::UnboundConstraintTarget {
                            rule: rule.id.clone(),
                            pattern: term.tag.clone(),
                        }
                    })?;
                    vec![PatOcc::Named(*id)]
                };
                let mut options = Vec::with_capacity(term.options.len());
                for option in &term.options {
                    options.push(resolve_option(&rule.id, option, &named_ids)?);
                }
                terms.push(RConstraint { targets, options });
            }
            cons_sets.push(terms);
        }
        rules.push(RRule {
            id: internal_ids[idx].clone(),
            comps,
            cons_sets,
            sign_refs: rule.sign_refs.clone(),
        });
    }
    Ok(Resolved { rules, named })
}

fn resolve_option(
    rule: &str,
    option: &ConsOption,
    named_ids: &HashMap<String, u64>,
) -> Result<ROption, SemanticError> {
    let lookup = |ident: &str| -> Result<u64, SemanticError> {
        if ident.starts_with('_') {
            return Err(SemanticError::TemporaryOnRhs {
                rule: rule.to_owned(),
                pattern: ident.to_owned(),
            });
        }
        named_ids.get(ident).copied().ok_or_else(|| SemanticError::UnboundConstraintTarget {
            rule: rule.to_owned(),
            pattern: ident.to_owned(),
        })
    };
    Ok(match option {
        ConsOption::Value(value) => ROption::Value(value.clone()),
        ConsOption::Pattern(ident) => ROption::Pat(lookup(ident)?),
        ConsOption::Call(call) => ROption::Call {
            fn_id: call.fn_id.clone(),
            args: call
                .args
                .iter()
                .map(|arg| {
                    Ok(match arg {
                        FnArg::Value(value) => RArg::Value(value.clone()),
                        FnArg::Pattern(ident) => RArg::Pat(lookup(ident)?),
                    })
                })
                .collect::<Result<Vec<_>, SemanticError>>()?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn resolved(src: &str) -> Resolved {
        resolve(&parse(src).unwrap()).unwrap()
    }

    #[test]
    fn orders_referenced_rules_first() {
        let out = resolved(
            r#"
            #root: #platform/#key
            #platform: "ndn"
            #key: "KEY"/_
            "#,
        );
        let ids: Vec<&str> = out.rules.iter().map(|r| r.id.as_str()).collect();
        let pos = |id: &str| ids.iter().position(|&x| x == id).unwrap();
        assert!(pos("platform") < pos("root"));
        assert!(pos("key") < pos("root"));
    }

    #[test]
    fn detects_reference_cycle() {
        let err = resolve(&parse("#a: #b\n#b: #a").unwrap()).unwrap_err();
        match err {
            SemanticError::CyclicReference { rules } => {
                assert_eq!(rules, vec!["a".to_owned(), "b".to_owned()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn detects_unknown_rule() {
        let err = resolve(&parse("#a: #missing").unwrap()).unwrap_err();
        assert_eq!(
            err,
            SemanticError::UnknownRule { rule: "a".into(), referenced: "missing".into() }
        );
    }

    #[test]
    fn rejects_temporary_rule_reference() {
        let err = resolve(&parse("#_t: \"x\"\n#a: #_t").unwrap()).unwrap_err();
        assert_eq!(
            err,
            SemanticError::TemporaryRuleRef { rule: "a".into(), referenced: "_t".into() }
        );
    }

    #[test]
    fn numbers_named_patterns_stably() {
        let out = resolved("#a: x/y/x");
        assert_eq!(out.named, vec!["x".to_owned(), "y".to_owned()]);
        assert_eq!(
            out.rules[0].comps,
            vec![
                RComp::Pat(PatOcc::Named(1)),
                RComp::Pat(PatOcc::Named(2)),
                RComp::Pat(PatOcc::Named(1)),
            ]
        );
    }

    #[test]
    fn temporaries_get_fresh_numbers() {
        let out = resolved("#a: _t/_t/_u");
        let pats: Vec<PatOcc> = out.rules[0]
            .comps
            .iter()
            .map(|c| match c {
                RComp::Pat(p) => *p,
                other => panic!("unexpected comp {other:?}"),
            })
            .collect();
        assert_eq!(pats.len(), 3);
        let unique: BTreeSet<PatOcc> = pats.iter().copied().collect();
        assert_eq!(unique.len(), 3, "every temporary occurrence is distinct");
        assert!(out.named.is_empty());
    }

    #[test]
    fn temporary_constraint_targets_every_occurrence() {
        let out = resolved(r#"#a: _t/_t & {_t: "v"}"#);
        let cons = &out.rules[0].cons_sets[0][0];
        assert_eq!(cons.targets.len(), 2);
        assert!(cons.targets.iter().all(|t| matches!(t, PatOcc::Temp(_))));
    }

    #[test]
    fn constraint_target_must_occur() {
        let err = resolve(&parse(r#"#a: x & {nope: "v"}"#).unwrap()).unwrap_err();
        assert_eq!(
            err,
            SemanticError::UnboundConstraintTarget { rule: "a".into(), pattern: "nope".into() }
        );
    }

    #[test]
    fn rejects_temporary_on_rhs() {
        let err = resolve(&parse("#a: _t/x & {x: _t}").unwrap()).unwrap_err();
        assert_eq!(err, SemanticError::TemporaryOnRhs { rule: "a".into(), pattern: "_t".into() });

        let err = resolve(&parse("#a: _t/x & {x: $f(_t)}").unwrap()).unwrap_err();
        assert_eq!(err, SemanticError::TemporaryOnRhs { rule: "a".into(), pattern: "_t".into() });
    }

    #[test]
    fn named_pattern_from_earlier_rule_is_visible() {
        // `x` occurs only in #a's name, but #b may constrain against it.
        let out = resolved("#a: x\n#b: #a/y & {y: x}");
        let b = out.rules.iter().find(|r| r.id == "b").unwrap();
        assert_eq!(b.cons_sets[0][0].options, vec![ROption::Pat(1)]);
    }

    #[test]
    fn top_order_cycle_reporting() {
        let nodes: BTreeSet<u32> = [1, 2, 3].into_iter().collect();
        let mut graph: HashMap<u32, Vec<u32>> = HashMap::new();
        graph.insert(1, vec![2]);
        graph.insert(2, vec![1]);
        assert_eq!(top_order(&nodes, &graph), Err(TopOrderError::Cycle(vec![1, 2])));
    }

    #[test]
    fn top_order_targets_first() {
        let nodes: BTreeSet<u32> = [1, 2, 3].into_iter().collect();
        let mut graph: HashMap<u32, Vec<u32>> = HashMap::new();
        graph.insert(1, vec![2, 3]);
        graph.insert(2, vec![3]);
        let order = top_order(&nodes, &graph).unwrap();
        assert_eq!(order, vec![3, 2, 1]);
    }
}
