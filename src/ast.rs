//! Syntax tree of a parsed LVS schema.
//!
//! Identifiers are stored without their sigils: rule ids without the
//! leading `#`, user-function ids without the leading `$`. An identifier
//! beginning with `_` denotes a temporary pattern (or a temporary rule,
//! for rule ids); the later compiler passes give each textual occurrence
//! its own number.

use serde::{Deserialize, Serialize};

use crate::name::Component;

/// One position of a name pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameComp {
    /// A literal component.
    Value(Component),
    /// A pattern variable, matching one arbitrary component.
    Pattern(String),
    /// A reference to another rule, expanded in place.
    RuleRef(String),
}

/// An ordered name pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamePattern {
    pub comps: Vec<NameComp>,
}

/// An argument of a user-function call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FnArg {
    Value(Component),
    Pattern(String),
}

/// A `$fn(args...)` constraint option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FnCall {
    pub fn_id: String,
    pub args: Vec<FnArg>,
}

/// One alternative of a tag constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsOption {
    /// The constrained component must equal this literal.
    Value(Component),
    /// The constrained component must equal the component bound to this
    /// pattern.
    Pattern(String),
    /// Decided by a user-function call.
    Call(FnCall),
}

/// `tag: opt | opt | ...` — the constrained pattern together with its
/// disjunctive options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagConstraint {
    pub tag: String,
    pub options: Vec<ConsOption>,
}

/// One rule definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule identifier, `#` stripped.
    pub id: String,
    pub name: NamePattern,
    /// Constraint sets in disjunctive normal form: the outer list is
    /// alternatives, each inner list a conjunction of tag constraints.
    pub cons_sets: Vec<Vec<TagConstraint>>,
    /// Rule ids of acceptable signers, `#` stripped, in source order.
    pub sign_refs: Vec<String>,
}

/// A parsed schema file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub rules: Vec<Rule>,
}
