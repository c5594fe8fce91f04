use criterion::{criterion_group, criterion_main, Criterion};
use papl_test_utils::fixtures::{self, ADMIN_ONLY, ALLOW_TRUE, LIST_ONLY};
use std::hint::black_box;

const DEEP_LEAF: &str = "org/eng/platform/storage/lmdb/notes/2024/q3/review.md";

fn bench_cached_eval(c: &mut Criterion) {
    let (policy, _) = fixtures::folder_policy(fixtures::memory_store(), 64);
    policy.prepare("org/eng/", ADMIN_ONLY, "1", 1);
    let input = r#"{"user": {"admin": true}}"#;
    let rs = policy.eval("data.policy.allow", "org/eng/", input, None);
    assert!(rs.is_decided(), "warm-up should decide");

    c.bench_function("resolver/eval_cached", |b| {
        b.iter(|| {
            let rs = policy.eval(black_box("data.policy.allow"), "org/eng/", black_box(input), None);
            black_box(rs.status);
        });
    });
}

fn bench_fold_deep_path(c: &mut Criterion) {
    let (policy, _) = fixtures::folder_policy(fixtures::memory_store(), 64);
    policy.prepare("org/", ALLOW_TRUE, "1", 1);
    policy.prepare("org/eng/platform/", LIST_ONLY, "1", 1);
    let rs = policy.fold_eval("data.policy.allow", DEEP_LEAF, "", None);
    assert!(rs.is_decided(), "warm-up should decide");

    c.bench_function("resolver/fold_eval_deep", |b| {
        b.iter(|| {
            let rs = policy.fold_eval(black_box("data.policy.allow"), black_box(DEEP_LEAF), "", None);
            black_box(rs.status);
        });
    });
}

criterion_group!(benches, bench_cached_eval, bench_fold_deep_path);
criterion_main!(benches);
