use capgate::config::EngineConfig;
use capgate::perm::{Effect, RuleKind, TrieBuilder};
use capgate::{DeclareOptions, MemoryStore, PermissionService, SubjectType};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;

// Program walks in isolation, then the full service fast path over warm caches.

fn program_benchmark(c: &mut Criterion) {
    let mut builder = TrieBuilder::new();
    builder.set(RuleKind::Star, &[], Effect::Deny);
    for a in 1..=32u32 {
        builder.set(RuleKind::Star, &[a], Effect::Allow);
        for b in 1..=32u32 {
            builder.set(RuleKind::Exact, &[a, b], Effect::Deny);
        }
    }
    let program = builder.freeze();
    let hit: &[u32] = &[17, 23];
    let miss: &[u32] = &[17, 99, 4];

    let mut group = c.benchmark_group("program");
    group.throughput(Throughput::Elements(1));

    group.bench_function("decide_exact_hit", |b| {
        b.iter(|| program.decide(black_box(hit)))
    });
    group.bench_function("decide_star_fallthrough", |b| {
        b.iter(|| program.decide(black_box(miss)))
    });

    group.finish();
}

fn service_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let service = PermissionService::new(Arc::new(MemoryStore::new()), EngineConfig::default());
    let (user, node) = runtime.block_on(async {
        service.bootstrap().await.unwrap();
        service.declare_star("shop", "admin", DeclareOptions::deny()).unwrap();
        service.declare_exact("shop", "buy", DeclareOptions::deny()).unwrap();
        let vip = service.create_role(None, 10, Some("vip")).await.unwrap();
        service
            .grant(SubjectType::Role, &vip.to_string(), Effect::Allow, "shop.buy")
            .await
            .unwrap();
        service.assign_role("u", vip).await.unwrap();
        service.authorize_user("u", "shop.buy").await.unwrap();
        (
            service.auth_user("u").await.unwrap(),
            service.resolve("shop.buy").unwrap(),
        )
    });

    let mut group = c.benchmark_group("service");
    group.throughput(Throughput::Elements(1));

    group.bench_function("authorize_user_fast", |b| {
        b.iter(|| service.authorize_user_fast(black_box(&user), black_box(&node)))
    });
    group.bench_function("authorize_user_sync", |b| {
        b.iter(|| service.authorize_user_sync(black_box("u"), black_box("shop.admin.kick")))
    });

    group.finish();
}

criterion_group!(benches, program_benchmark, service_benchmark);
criterion_main!(benches);
