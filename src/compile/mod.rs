//! Compiler from LVS source text to a compiled model.
//!
//! Compilation runs in four passes:
//! 1. parse (see [`crate::parse`]);
//! 2. resolve ([`resolve`]): order rules topologically by reference and
//!    number every pattern occurrence;
//! 3. expand ([`expand`]): replicate each rule into flat chains, one per
//!    constraint-set alternative, with rule references inlined;
//! 4. build ([`tree`]): merge the chains into a single rooted tree and
//!    resolve signing references to node ids.

mod expand;
mod resolve;
mod tree;

use expand::expand;
use resolve::resolve;

pub use resolve::{top_order, TopOrderError};

use std::fmt;

use crate::model::LvsModel;
use crate::parse::{self, SyntaxError};

/// Semantic error found while compiling a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticError {
    /// A name pattern references a rule that is not defined.
    UnknownRule { rule: String, referenced: String },
    /// A name pattern references a temporary rule.
    TemporaryRuleRef { rule: String, referenced: String },
    /// Rule references form a cycle.
    CyclicReference { rules: Vec<String> },
    /// A constraint targets a pattern that never occurs up to this point.
    UnboundConstraintTarget { rule: String, pattern: String },
    /// A temporary pattern appears on the right-hand side of a constraint
    /// option.
    TemporaryOnRhs { rule: String, pattern: String },
    /// A signing reference names a rule with no chains.
    UnknownSigner { rule: String },
}

impl fmt::Display for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticError::UnknownRule { rule, referenced } => {
                write!(f, "rule #{rule} refers to a non-existing rule #{referenced}")
            }
            SemanticError::TemporaryRuleRef { rule, referenced } => {
                write!(f, "rule #{rule} refers to a temporary rule #{referenced}")
            }
            SemanticError::CyclicReference { rules } => {
                write!(f, "cyclic rule references among {rules:?}")
            }
            SemanticError::UnboundConstraintTarget { rule, pattern } => {
                write!(f, "rule #{rule} constrains pattern {pattern} which never occurs before")
            }
            SemanticError::TemporaryOnRhs { rule, pattern } => {
                write!(
                    f,
                    "rule #{rule} uses temporary pattern {pattern} on the right-hand side of a constraint"
                )
            }
            SemanticError::UnknownSigner { rule } => {
                write!(f, "signed by a non-existing key #{rule}")
            }
        }
    }
}

impl std::error::Error for SemanticError {}

/// Error raised by [`compile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    Syntax(SyntaxError),
    Semantic(SemanticError),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Syntax(err) => write!(f, "{err}"),
            CompileError::Semantic(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CompileError::Syntax(err) => Some(err),
            CompileError::Semantic(err) => Some(err),
        }
    }
}

impl From<SyntaxError> for CompileError {
    fn from(err: SyntaxError) -> Self {
        CompileError::Syntax(err)
    }
}

impl From<SemanticError> for CompileError {
    fn from(err: SemanticError) -> Self {
        CompileError::Semantic(err)
    }
}

/// Compiles LVS source text into a model.
pub fn compile(source: &str) -> Result<LvsModel, CompileError> {
    let schema = parse::parse(source)?;
    tracing::debug!(rules = schema.rules.len(), "parsed LVS schema");
    let resolved = resolve(&schema)?;
    tracing::debug!(
        rules = resolved.rules.len(),
        named_patterns = resolved.named_cnt(),
        "resolved rule references and pattern numbers"
    );
    let chains = expand(&resolved);
    tracing::debug!(
        chains = chains.values().map(Vec::len).sum::<usize>(),
        "replicated rules into chains"
    );
    let model = tree::build(&resolved, &chains)?;
    tracing::debug!(nodes = model.nodes.len(), "built name-pattern tree");
    Ok(model)
}
