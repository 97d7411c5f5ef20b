//! Light VerSec (LVS): a trust-schema language and checker for NDN names.
//!
//! An LVS schema declares name patterns with component-level constraints
//! and a signing relation between them. This crate provides:
//! - a compiler from LVS source text to a compact name-pattern tree
//!   ([`compile`]);
//! - a TLV codec for the compiled model ([`codec::encode`],
//!   [`codec::decode`]);
//! - a backtracking matcher and a checker deciding whether a key name is
//!   authorized to sign a packet name ([`Checker`]).
//!
//! # Example
//!
//! ```
//! use light_versec::{compile, user_fn, Checker, Name, UserFnMap};
//!
//! let schema = r#"
//!     #root: "app"/"KEY"/_
//!     #post: "app"/"post"/id & {id: $isValidID()} <= #root
//! "#;
//! let mut fns = UserFnMap::new();
//! fns.insert("isValidID".into(), user_fn(|c, _| c.value.len() == 6));
//! let checker = Checker::new(compile(schema).unwrap(), fns).unwrap();
//!
//! let pkt: Name = "/app/post/000001".parse().unwrap();
//! let key: Name = "/app/KEY/1".parse().unwrap();
//! assert!(checker.check(&pkt, &key));
//! ```

pub mod ast;
pub mod checker;
pub mod codec;
pub mod compile;
pub mod fingerprint;
pub mod matcher;
pub mod model;
pub mod name;
pub mod parse;
pub mod store;
pub mod tlv;

pub use checker::{builtin_user_fns, Checker, CheckerError, NameMatch};
pub use compile::{compile, CompileError, SemanticError};
pub use matcher::{user_fn, Binding, Match, Matches, UserFn, UserFnMap};
pub use model::{LvsModel, ModelError, NodeId, PatternId, MIN_SUPPORTED_VERSION, VERSION};
pub use name::{Component, Name, NameError};
pub use parse::SyntaxError;

/// Prelude for convenient usage.
pub mod prelude {
    pub use crate::checker::{builtin_user_fns, Checker, CheckerError, NameMatch};
    pub use crate::codec::{decode, encode};
    pub use crate::compile::{compile, CompileError, SemanticError};
    pub use crate::fingerprint::{digest_model, digest_source, Digest};
    pub use crate::matcher::{user_fn, Binding, Match, Matches, UserFn, UserFnMap};
    pub use crate::model::{LvsModel, ModelError, NodeId, PatternId};
    pub use crate::name::{Component, Name, NameError};
    pub use crate::parse::SyntaxError;
    pub use crate::store::{SchemaStore, StoreError};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    /// The blog-tutorial schema exercised by the end-to-end scenarios.
    const TUTORIAL: &str = r#"
        // The platform prefix definition.
        #platform: "ndn"/"blog"
        // The certificate name suffix definition.
        #KEY: "KEY"/_/_/_
        // The root certificate, /ndn/blog/KEY/<key-id>/<issuer>/<cert-id>.
        #root: #platform/#KEY
        #admin: #platform/_role/adminID/#KEY & {_role: "admin"} <= #root
        #author: #platform/_role/ID/#KEY & {_role: "author", ID: $isValidID()} <= #admin
        #user: #platform/_role/ID/#KEY & {_role: "reader"|"author", ID: $isValidID()} <= #admin
        #article: #platform/ID/"post"/year/articleID & {year: $isValidYear()} <= #admin | #author
    "#;

    fn tutorial_fns() -> UserFnMap {
        let mut fns = UserFnMap::new();
        fns.insert("isValidID".into(), user_fn(|c, _| c.value.len() == 6));
        fns.insert("isValidYear".into(), user_fn(|c, _| c.value.len() == 4));
        fns
    }

    fn name(uri: &str) -> Name {
        uri.parse().unwrap()
    }

    /// Both checkers every scenario must agree on: one over the freshly
    /// compiled model, one over its decode(encode(...)) roundtrip.
    fn checkers() -> [Checker; 2] {
        let model = compile(TUTORIAL).unwrap();
        let roundtripped = decode(&encode(&model)).unwrap();
        assert_eq!(roundtripped, model);
        [
            Checker::new(model, tutorial_fns()).unwrap(),
            Checker::new(roundtripped, tutorial_fns()).unwrap(),
        ]
    }

    fn check_both(pkt: &str, key: &str) -> bool {
        let (pkt, key) = (name(pkt), name(key));
        let [fresh, reloaded] = checkers();
        let a = fresh.check(&pkt, &key);
        let b = reloaded.check(&pkt, &key);
        assert_eq!(a, b, "fresh and reloaded models disagree on {pkt} <= {key}");
        a
    }

    #[test]
    fn admin_signed_by_root() {
        assert!(check_both("/ndn/blog/admin/000001/KEY/1/root/1", "/ndn/blog/KEY/1/self/1"));
    }

    #[test]
    fn literal_components_are_case_sensitive() {
        assert!(!check_both("/ndn/blog/admin/000001/key/1/root/1", "/ndn/blog/KEY/1/self/1"));
    }

    #[test]
    fn admin_not_signed_by_admin() {
        assert!(!check_both(
            "/ndn/blog/admin/000002/KEY/1/root/1",
            "/ndn/blog/admin/000001/KEY/1/root/1",
        ));
    }

    #[test]
    fn author_signed_by_admin() {
        assert!(check_both(
            "/ndn/blog/author/100001/KEY/1/000001/1",
            "/ndn/blog/admin/000001/KEY/1/root/1",
        ));
    }

    #[test]
    fn author_id_must_satisfy_user_function() {
        assert!(!check_both(
            "/ndn/blog/author/1000/KEY/1/000001/1",
            "/ndn/blog/admin/000001/KEY/1/root/1",
        ));
    }

    #[test]
    fn article_signed_by_its_author() {
        assert!(check_both(
            "/ndn/blog/100001/post/2022/1",
            "/ndn/blog/author/100001/KEY/1/000001/1",
        ));
    }

    #[test]
    fn article_rejects_other_authors() {
        assert!(!check_both(
            "/ndn/blog/100001/post/2022/1",
            "/ndn/blog/author/100002/KEY/1/000001/1",
        ));
    }

    #[test]
    fn suggest_skips_reader_key() {
        let pkt = name("/ndn/blog/100001/post/2022/1");
        let inventory = [
            name("/ndn/blog/reader/100001/KEY/1/000001/1"),
            name("/ndn/blog/author/100001/KEY/1/000001/1"),
        ];
        for checker in checkers() {
            assert_eq!(checker.suggest(&pkt, &inventory), Some(&inventory[1]));
        }
    }

    /// Signing is not transitive: author <= admin and admin <= root do
    /// not make author <= root.
    #[test]
    fn signing_is_not_transitive() {
        let author_cert = "/ndn/blog/author/100001/KEY/1/000001/1";
        let admin_cert = "/ndn/blog/admin/000001/KEY/1/root/1";
        let root_key = "/ndn/blog/KEY/1/self/1";
        assert!(check_both(author_cert, admin_cert));
        assert!(check_both(admin_cert, root_key));
        assert!(!check_both(author_cert, root_key));
    }

    /// Temporary patterns do not enforce equality across occurrences:
    /// key id, issuer and cert id of #KEY may all differ.
    #[test]
    fn temporaries_do_not_unify() {
        for checker in checkers() {
            assert_eq!(checker.match_name(&name("/ndn/blog/KEY/a/b/c")).count(), 1);
        }
    }

    /// Walking a match's ancestors reproduces the name component by
    /// component under the binding.
    fn assert_path_reconstructs(model: &LvsModel, m: &Match, comps: &[Component]) {
        let mut edges = Vec::new();
        let mut cur = m.node;
        while let Some(parent) = model.nodes[cur.index()].parent {
            let pnode = &model.nodes[parent.index()];
            if let Some(edge) = pnode.value_edges.iter().find(|e| e.dest == cur) {
                edges.push(Some(edge.value.clone()));
            } else {
                let edge = pnode
                    .pattern_edges
                    .iter()
                    .find(|e| e.dest == cur)
                    .expect("child is reachable from its parent");
                edges.push(
                    edge.tag
                        .is_named(model.named_pattern_cnt)
                        .then(|| m.binding.get(edge.tag).expect("named tag is bound").clone()),
                );
            }
            cur = parent;
        }
        edges.reverse();
        assert_eq!(edges.len(), comps.len());
        for (expected, actual) in edges.iter().zip(comps) {
            if let Some(expected) = expected {
                assert_eq!(expected, actual);
            }
        }
    }

    #[test]
    fn matches_reproduce_their_paths() {
        let model = compile(TUTORIAL).unwrap();
        let fns = tutorial_fns();
        for uri in [
            "/ndn/blog/KEY/1/self/1",
            "/ndn/blog/admin/000001/KEY/1/root/1",
            "/ndn/blog/author/100001/KEY/1/000001/1",
            "/ndn/blog/100001/post/2022/1",
        ] {
            let n = name(uri);
            let matches: Vec<Match> =
                Matches::new(&model, &fns, n.components(), Binding::new()).collect();
            assert!(!matches.is_empty(), "{uri} should match");
            for m in &matches {
                assert_path_reconstructs(&model, m, n.components());
            }
        }
    }

    #[test]
    fn match_order_is_deterministic() {
        let model = compile(TUTORIAL).unwrap();
        let fns = tutorial_fns();
        let n = name("/ndn/blog/author/100001/KEY/1/000001/1");
        // #author and #user both match this certificate name.
        let first: Vec<Match> =
            Matches::new(&model, &fns, n.components(), Binding::new()).collect();
        let second: Vec<Match> =
            Matches::new(&model, &fns, n.components(), Binding::new()).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn store_roundtrip_behaves_like_fresh_compile() {
        let dir = tempfile::tempdir().unwrap();
        let store = SchemaStore::open(dir.path()).unwrap();
        let cached = store.load_or_compile(TUTORIAL).unwrap();
        assert_eq!(cached, compile(TUTORIAL).unwrap());
        // Second load comes from disk.
        assert_eq!(store.load(TUTORIAL).unwrap().unwrap(), cached);
    }

    mod random {
        use super::*;
        use proptest::prelude::*;

        const POOL: &[&str] = &[
            "ndn", "blog", "admin", "author", "reader", "KEY", "post", "000001", "100001",
            "2022", "1", "root",
        ];

        fn arb_name() -> impl Strategy<Value = Name> {
            proptest::collection::vec(0..POOL.len(), 0..=8).prop_map(|picks| {
                Name::new(
                    picks
                        .into_iter()
                        .map(|i| Component::generic(POOL[i].as_bytes().to_vec()))
                        .collect(),
                )
            })
        }

        proptest! {
            /// Matching is a pure function of (model, name), and the
            /// roundtripped model behaves identically.
            #[test]
            fn match_results_survive_roundtrip(n in arb_name()) {
                let model = compile(TUTORIAL).unwrap();
                let reloaded = decode(&encode(&model)).unwrap();
                let fns = tutorial_fns();
                let fresh: Vec<Match> =
                    Matches::new(&model, &fns, n.components(), Binding::new()).collect();
                let again: Vec<Match> =
                    Matches::new(&model, &fns, n.components(), Binding::new()).collect();
                let reloaded_matches: Vec<Match> =
                    Matches::new(&reloaded, &fns, n.components(), Binding::new()).collect();
                prop_assert_eq!(&fresh, &again);
                prop_assert_eq!(&fresh, &reloaded_matches);
            }

            /// Every reported match reproduces the input name along its
            /// tree path.
            #[test]
            fn every_match_reconstructs_its_name(n in arb_name()) {
                let model = compile(TUTORIAL).unwrap();
                let fns = tutorial_fns();
                for m in Matches::new(&model, &fns, n.components(), Binding::new()) {
                    assert_path_reconstructs(&model, &m, n.components());
                }
            }

            /// `check` agrees between the fresh and roundtripped model for
            /// arbitrary packet/key pairs.
            #[test]
            fn check_survives_roundtrip(pkt in arb_name(), key in arb_name()) {
                let model = compile(TUTORIAL).unwrap();
                let reloaded = decode(&encode(&model)).unwrap();
                let fresh = Checker::new(model, tutorial_fns()).unwrap();
                let reloaded = Checker::new(reloaded, tutorial_fns()).unwrap();
                prop_assert_eq!(fresh.check(&pkt, &key), reloaded.check(&pkt, &key));
            }
        }
    }
}
