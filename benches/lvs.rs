//! Benchmarks for the LVS pipeline: compiling the tutorial schema,
//! matching a name, and running a full signing check.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use light_versec::codec::{decode, encode};
use light_versec::{compile, user_fn, Binding, Checker, Matches, Name, UserFnMap};

const TUTORIAL: &str = r#"
    #platform: "ndn"/"blog"
    #KEY: "KEY"/_/_/_
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

/// Compiles the tutorial schema from source.
fn bench_compile(c: &mut Criterion) {
    c.bench_function("compile_tutorial", |b| {
        b.iter(|| compile(black_box(TUTORIAL)).unwrap());
    });
}

/// Decodes the tutorial model from its TLV form.
fn bench_decode(c: &mut Criterion) {
    let bytes = encode(&compile(TUTORIAL).unwrap());
    c.bench_function("decode_tutorial", |b| {
        b.iter(|| decode(black_box(&bytes)).unwrap());
    });
}

/// Enumerates all matches of an author certificate name.
fn bench_match(c: &mut Criterion) {
    let model = compile(TUTORIAL).unwrap();
    let fns = tutorial_fns();
    let name: Name = "/ndn/blog/author/100001/KEY/1/000001/1".parse().unwrap();
    c.bench_function("match_author_cert", |b| {
        b.iter(|| {
            Matches::new(&model, &fns, black_box(name.components()), Binding::new()).count()
        });
    });
}

/// Runs a full packet-against-key authorization check.
fn bench_check(c: &mut Criterion) {
    let checker = Checker::new(compile(TUTORIAL).unwrap(), tutorial_fns()).unwrap();
    let pkt: Name = "/ndn/blog/100001/post/2022/1".parse().unwrap();
    let key: Name = "/ndn/blog/author/100001/KEY/1/000001/1".parse().unwrap();
    c.bench_function("check_article_author", |b| {
        b.iter(|| checker.check(black_box(&pkt), black_box(&key)));
    });
}

criterion_group!(benches, bench_compile, bench_decode, bench_match, bench_check);
criterion_main!(benches);
