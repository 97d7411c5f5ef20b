//! Signing-relation checks on top of the matcher.
//!
//! A [`Checker`] owns a validated model and the user-function registry.
//! `check` carries the packet match's bindings into the key match, which
//! is what makes "same author" constraints work across a signing chain.
//!
//! Policy for user functions: an unregistered function makes its
//! constraint option not hold; it never aborts a match. Callers that
//! want strictness run [`Checker::validate_user_fns`] up front.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::codec;
use crate::matcher::{user_fn, Binding, Matches, UserFn, UserFnMap};
use crate::model::{LvsModel, ModelError, ModelInfo, Node, NodeId};
use crate::name::{Component, Name, TYPE_IMPLICIT_SHA256};

/// Error raised by checker verification helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckerError {
    /// The model references a user function that is not registered.
    MissingUserFn { fn_id: String },
}

impl fmt::Display for CheckerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckerError::MissingUserFn { fn_id } => {
                write!(f, "user function ${fn_id} is not registered")
            }
        }
    }
}

impl std::error::Error for CheckerError {}

/// Built-in user functions: `$eq` (every argument byte-equals the
/// matched component) and `$eq_type` (every argument shares its TLV
/// type). Unresolved arguments fail both.
pub fn builtin_user_fns() -> UserFnMap {
    let mut fns = UserFnMap::new();
    fns.insert(
        "eq".to_owned(),
        user_fn(|c, args| args.iter().all(|a| a.map_or(false, |a| a == c))),
    );
    fns.insert(
        "eq_type".to_owned(),
        user_fn(|c, args| args.iter().all(|a| a.map_or(false, |a| a.typ == c.typ))),
    );
    fns
}

/// One match reported by [`Checker::match_name`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameMatch {
    pub node: NodeId,
    /// Rule names of the terminal node; `_<node-id>` for anonymous
    /// nodes.
    pub rule_names: Vec<String>,
    pub binding: Binding,
}

/// Matches names against a model and decides signing authorization.
pub struct Checker {
    model: LvsModel,
    info: ModelInfo,
    user_fns: UserFnMap,
}

impl Checker {
    /// Validates the model and wraps it with the given user functions.
    pub fn new(model: LvsModel, user_fns: UserFnMap) -> Result<Self, ModelError> {
        let info = model.validate()?;
        Ok(Self { model, info, user_fns })
    }

    /// The wrapped model.
    #[inline]
    pub fn model(&self) -> &LvsModel {
        &self.model
    }

    /// Registers a user function. Meant to be called before the first
    /// match; matching itself never mutates the registry.
    pub fn add_user_fn(&mut self, fn_id: impl Into<String>, f: UserFn) {
        self.user_fns.insert(fn_id.into(), f);
    }

    /// Verifies that every user function the model references is
    /// registered.
    pub fn validate_user_fns(&self) -> Result<(), CheckerError> {
        for fn_id in &self.info.referenced_fns {
            if !self.user_fns.contains_key(fn_id.as_str()) {
                return Err(CheckerError::MissingUserFn { fn_id: fn_id.clone() });
            }
        }
        Ok(())
    }

    /// Rule names of the signing-chain roots: nodes referenced as
    /// signers whose own signing set is empty.
    pub fn root_of_trust(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for &id in &self.info.trust_roots {
            for name in node_rule_names(&self.model.nodes[id.index()]) {
                out.insert(name);
            }
        }
        out
    }

    /// Encodes the model. User functions are not part of the wire form.
    pub fn save(&self) -> Vec<u8> {
        codec::encode(&self.model)
    }

    /// Decodes a model and wraps it.
    pub fn load(bytes: &[u8], user_fns: UserFnMap) -> Result<Self, ModelError> {
        let model = codec::decode(bytes)?;
        Self::new(model, user_fns)
    }

    /// Iterates every match of a name. A trailing implicit-digest
    /// component is ignored.
    pub fn match_name<'a>(&'a self, name: &'a Name) -> impl Iterator<Item = NameMatch> + 'a {
        self.matches(name, Binding::new()).map(move |m| {
            let node = &self.model.nodes[m.node.index()];
            NameMatch { node: m.node, rule_names: node_rule_names(node), binding: m.binding }
        })
    }

    /// Renders a binding with source identifiers where the symbol table
    /// knows them, and the bare tag number otherwise.
    pub fn describe_binding(&self, binding: &Binding) -> BTreeMap<String, Component> {
        let symbols = self.model.symbol_map();
        binding
            .iter()
            .map(|(tag, value)| {
                let key = match symbols.get(tag) {
                    Some(ident) => (*ident).to_owned(),
                    None => tag.to_string(),
                };
                (key, value.clone())
            })
            .collect()
    }

    /// Whether `key_name` is authorized to sign `pkt_name`.
    pub fn check(&self, pkt_name: &Name, key_name: &Name) -> bool {
        let key_comps = strip_digest(key_name);
        for pkt_match in self.matches(pkt_name, Binding::new()) {
            let sign_refs = &self.model.nodes[pkt_match.node.index()].sign_refs;
            if sign_refs.is_empty() {
                continue;
            }
            // The packet's bindings seed the key match.
            for key_match in
                Matches::new(&self.model, &self.user_fns, key_comps, pkt_match.binding.clone())
            {
                if sign_refs.contains(&key_match.node) {
                    tracing::trace!(
                        pkt_node = %pkt_match.node,
                        key_node = %key_match.node,
                        "signing relation satisfied"
                    );
                    return true;
                }
            }
        }
        false
    }

    /// Returns the first inventory name allowed to sign the packet.
    ///
    /// The inventory's own signing chains are assumed trusted; no
    /// transitive verification happens here.
    pub fn suggest<'a, I>(&self, pkt_name: &Name, inventory: I) -> Option<&'a Name>
    where
        I: IntoIterator<Item = &'a Name>,
    {
        inventory.into_iter().find(|key| self.check(pkt_name, key))
    }

    fn matches<'a>(&'a self, name: &'a Name, binding: Binding) -> Matches<'a> {
        Matches::new(&self.model, &self.user_fns, strip_digest(name), binding)
    }
}

/// Rule names of a terminal node, with a fallback for anonymous nodes.
fn node_rule_names(node: &Node) -> Vec<String> {
    if node.rule_names.is_empty() {
        vec![format!("_{}", node.id)]
    } else {
        node.rule_names.clone()
    }
}

/// Drops a trailing implicit SHA-256 digest component.
fn strip_digest(name: &Name) -> &[Component] {
    let comps = name.components();
    match comps.last() {
        Some(last) if last.typ == TYPE_IMPLICIT_SHA256 => &comps[..comps.len() - 1],
        _ => comps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;

    const SCHEMA: &str = r#"
        #platform: "ndn"/"blog"
        #KEY: "KEY"/_/_/_
        #root: #platform/#KEY
        #admin: #platform/_role/adminID/#KEY & {_role: "admin"} <= #root
        #author: #platform/_role/ID/#KEY & {_role: "author", ID: $isValidID()} <= #admin
        #article: #platform/ID/"post"/year/articleID & {year: $isValidYear()} <= #admin | #author
    "#;

    fn checker() -> Checker {
        let mut fns = UserFnMap::new();
        fns.insert("isValidID".into(), user_fn(|c, _| c.value.len() == 6));
        fns.insert("isValidYear".into(), user_fn(|c, _| c.value.len() == 4));
        Checker::new(compile(SCHEMA).unwrap(), fns).unwrap()
    }

    fn name(uri: &str) -> Name {
        uri.parse().unwrap()
    }

    #[test]
    fn match_reports_rule_names() {
        let checker = checker();
        let matches: Vec<NameMatch> =
            checker.match_name(&name("/ndn/blog/KEY/1/self/1")).collect();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].rule_names, vec!["root".to_owned()]);
    }

    #[test]
    fn match_strips_trailing_digest() {
        let checker = checker();
        let with_digest = name(
            "/ndn/blog/KEY/1/self/1/sha256digest=0000000000000000000000000000000000000000000000000000000000000000",
        );
        assert_eq!(checker.match_name(&with_digest).count(), 1);
    }

    #[test]
    fn describe_binding_uses_symbols() {
        let checker = checker();
        let matches: Vec<NameMatch> =
            checker.match_name(&name("/ndn/blog/100001/post/2022/7")).collect();
        assert_eq!(matches.len(), 1);
        let named = checker.describe_binding(&matches[0].binding);
        assert_eq!(named["ID"].value, b"100001");
        assert_eq!(named["year"].value, b"2022");
        assert_eq!(named["articleID"].value, b"7");
    }

    #[test]
    fn check_carries_bindings_into_key_match() {
        let checker = checker();
        // Same ID on both sides.
        assert!(checker.check(
            &name("/ndn/blog/100001/post/2022/1"),
            &name("/ndn/blog/author/100001/KEY/1/000001/1"),
        ));
        // Author ID differs from the article ID.
        assert!(!checker.check(
            &name("/ndn/blog/100001/post/2022/1"),
            &name("/ndn/blog/author/100002/KEY/1/000001/1"),
        ));
    }

    #[test]
    fn trust_anchor_has_no_signers() {
        let checker = checker();
        // The root certificate itself cannot be checked against anything.
        assert!(!checker.check(
            &name("/ndn/blog/KEY/1/self/1"),
            &name("/ndn/blog/KEY/1/self/1"),
        ));
    }

    #[test]
    fn suggest_returns_first_authorized() {
        let checker = checker();
        let reader = name("/ndn/blog/KEY/1/self/1");
        let admin = name("/ndn/blog/admin/000001/KEY/1/root/1");
        let pkt = name("/ndn/blog/author/100001/KEY/1/000001/1");
        let inventory = [reader.clone(), admin.clone()];
        assert_eq!(checker.suggest(&pkt, &inventory), Some(&inventory[1]));

        let none: [Name; 0] = [];
        assert_eq!(checker.suggest(&pkt, &none), None);
    }

    #[test]
    fn validate_user_fns_reports_missing() {
        let model = compile(SCHEMA).unwrap();
        let checker_missing_fns = Checker::new(model, UserFnMap::new()).unwrap();
        let err = checker_missing_fns.validate_user_fns().unwrap_err();
        assert_eq!(err, CheckerError::MissingUserFn { fn_id: "isValidID".into() });

        assert!(checker().validate_user_fns().is_ok());
    }

    #[test]
    fn root_of_trust_names_the_root_rule() {
        let checker = checker();
        assert_eq!(checker.root_of_trust(), BTreeSet::from(["root".to_owned()]));
    }

    #[test]
    fn save_load_roundtrip_preserves_behavior() {
        let checker = checker();
        let bytes = checker.save();
        let mut fns = UserFnMap::new();
        fns.insert("isValidID".into(), user_fn(|c, _| c.value.len() == 6));
        fns.insert("isValidYear".into(), user_fn(|c, _| c.value.len() == 4));
        let loaded = Checker::load(&bytes, fns).unwrap();
        assert!(loaded.check(
            &name("/ndn/blog/admin/000001/KEY/1/root/1"),
            &name("/ndn/blog/KEY/1/self/1"),
        ));
        assert_eq!(loaded.root_of_trust(), checker.root_of_trust());
    }

    #[test]
    fn builtin_eq_functions() {
        let model = compile(r#"#a: x/y & {y: $eq(x)}"#).unwrap();
        let checker = Checker::new(model, builtin_user_fns()).unwrap();
        assert_eq!(checker.match_name(&name("/v/v")).count(), 1);
        assert_eq!(checker.match_name(&name("/v/w")).count(), 0);

        let model = compile(r#"#a: x/y & {y: $eq_type(x)}"#).unwrap();
        let checker = Checker::new(model, builtin_user_fns()).unwrap();
        assert_eq!(checker.match_name(&name("/v/w")).count(), 1);
        assert_eq!(checker.match_name(&name("/v/32=w")).count(), 0);
    }

    #[test]
    fn anonymous_match_uses_node_id() {
        let model = compile("#a: \"x\"/\"y\"").unwrap();
        let checker = Checker::new(model, UserFnMap::new()).unwrap();
        // The intermediate node is anonymous; match the prefix name.
        let matches: Vec<NameMatch> = checker.match_name(&name("/x")).collect();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].rule_names, vec![format!("_{}", matches[0].node)]);
    }
}
