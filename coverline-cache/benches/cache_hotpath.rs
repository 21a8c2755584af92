use coverline_cache::{CacheConfig, CacheKey, MemoryTier, MultiLevelCache, TierTtl};
use coverline_core::SystemClock;
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn bench_memory_tier(c: &mut Criterion) {
    let tier = MemoryTier::new(10_000, Duration::from_secs(60), Arc::new(SystemClock));
    let payload: Arc<[u8]> = Arc::from(include_str!("../src/multi_level.rs").as_bytes());
    for i in 0..1_000 {
        tier.insert(&format!("cover_letter:u{i}:"), Arc::clone(&payload), Duration::from_secs(60));
    }

    c.bench_function("memory/get_hit", |b| {
        b.iter(|| {
            black_box(tier.get(black_box("cover_letter:u500:")));
        });
    });

    c.bench_function("memory/insert_overwrite", |b| {
        b.iter(|| {
            tier.insert(
                black_box("cover_letter:u1:"),
                Arc::clone(&payload),
                Duration::from_secs(60),
            );
        });
    });
}

fn bench_multi_level_get(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build runtime");
    let cache = MultiLevelCache::memory_only(CacheConfig::default(), Arc::new(SystemClock));
    let key = CacheKey::builder("cover_letter", "u1").page(1).build();
    let letters: Vec<String> = (0..20).map(|i| format!("letter body {i}")).collect();

    rt.block_on(cache.set(&key, &letters, TierTtl::uniform(Duration::from_secs(600))))
        .expect("seed cache");

    c.bench_function("multi_level/get_memory_hit", |b| {
        b.iter(|| {
            let hit: Option<Vec<String>> = rt.block_on(cache.get(black_box(&key)));
            black_box(hit);
        });
    });
}

criterion_group!(benches, bench_memory_tier, bench_multi_level_get);
criterion_main!(benches);
