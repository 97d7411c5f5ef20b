//! Chain replication.
//!
//! A chain is a rule fully inlined and narrowed to a single
//! constraint-set choice: a flat sequence of literal components and
//! pattern occurrences plus the rule's signing list. A rule with `k`
//! constraint sets yields `k` chain variants; inlining a referenced rule
//! with several chains multiplies the variants (cartesian product).

use std::collections::BTreeMap;

use crate::name::Component;

use super::resolve::{PatOcc, RComp, RConstraint, Resolved};

/// One position of a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChainComp {
    Value(Component),
    Pat(PatOcc),
}

/// A fully inlined rule variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Chain {
    /// Internal id of the rule this chain came from.
    pub rule: String,
    pub comps: Vec<ChainComp>,
    /// Conjunction of constraints active for this variant, own and
    /// inherited from inlined rules.
    pub cons: Vec<RConstraint>,
    /// Signing rule ids in source order.
    pub sign_refs: Vec<String>,
}

/// Expands every rule into its chains. Rules are processed in the
/// resolver's topological order, so referenced rules are already
/// expanded when a reference is inlined. Multiple definitions of one
/// rule id accumulate their chains.
pub(crate) fn expand(resolved: &Resolved) -> BTreeMap<String, Vec<Chain>> {
    let mut chains: BTreeMap<String, Vec<Chain>> = BTreeMap::new();
    for rule in &resolved.rules {
        let mut variants: Vec<Chain> = if rule.cons_sets.is_empty() {
            vec![Chain {
                rule: rule.id.clone(),
                comps: Vec::new(),
                cons: Vec::new(),
                sign_refs: rule.sign_refs.clone(),
            }]
        } else {
            rule.cons_sets
                .iter()
                .map(|set| Chain {
                    rule: rule.id.clone(),
                    comps: Vec::new(),
                    cons: set.clone(),
                    sign_refs: rule.sign_refs.clone(),
                })
                .collect()
        };
        for comp in &rule.comps {
            match comp {
                RComp::Value(value) => {
                    for chain in &mut variants {
                        chain.comps.push(ChainComp::Value(value.clone()));
                    }
                }
                RComp::Pat(pat) => {
                    for chain in &mut variants {
                        chain.comps.push(ChainComp::Pat(*pat));
                    }
                }
                RComp::Rule(referenced) => {
                    let inlined = &chains[referenced.as_str()];
                    let mut product = Vec::with_capacity(inlined.len() * variants.len());
                    for ref_chain in inlined {
                        for chain in &variants {
                            let mut comps = chain.comps.clone();
                            comps.extend(ref_chain.comps.iter().cloned());
                            let mut cons = chain.cons.clone();
                            cons.extend(ref_chain.cons.iter().cloned());
                            product.push(Chain {
                                rule: chain.rule.clone(),
                                comps,
                                cons,
                                sign_refs: chain.sign_refs.clone(),
                            });
                        }
                    }
                    variants = product;
                }
            }
        }
        chains.entry(rule.id.clone()).or_default().extend(variants);
    }
    chains
}
