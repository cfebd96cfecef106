use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::time::{Duration, Instant};

use warden_auth::{CredentialIssuer, TokenConfig};
use warden_core::UserId;
use warden_infra::rate_limit::{KeyStrategy, RateLimitConfig, RateLimiter};

fn limiter() -> RateLimiter {
    RateLimiter::new(RateLimitConfig {
        capacity: 100,
        window: Duration::from_secs(60),
        key: KeyStrategy::ClientIp,
    })
    .unwrap()
}

fn bench_limiter_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("limiter_admission");
    group.throughput(Throughput::Elements(1));

    group.bench_function("hot_key", |b| {
        let rl = limiter();
        let now = Instant::now();
        b.iter(|| black_box(rl.allow_at("203.0.113.7", now)));
    });

    for key_count in [100usize, 10_000] {
        let keys: Vec<String> = (0..key_count).map(|i| format!("10.0.{}.{}", i / 256, i % 256)).collect();
        group.bench_with_input(BenchmarkId::new("spread_keys", key_count), &keys, |b, keys| {
            let rl = limiter();
            let now = Instant::now();
            let mut i = 0usize;
            b.iter(|| {
                i = (i + 1) % keys.len();
                black_box(rl.allow_at(&keys[i], now))
            });
        });
    }

    group.bench_function("sweep_10k_buckets", |b| {
        let rl = limiter();
        let t0 = Instant::now();
        for i in 0..10_000 {
            rl.allow_at(&format!("k{i}"), t0);
        }
        b.iter(|| black_box(rl.sweep_at(t0 + Duration::from_secs(1))));
    });

    group.finish();
}

fn bench_credentials(c: &mut Criterion) {
    let mut group = c.benchmark_group("credentials");
    let issuer = CredentialIssuer::from_key_bytes(b"bench-key-bench-key-bench-key-32", TokenConfig::default()).unwrap();
    let user = UserId::new();

    group.bench_function("issue_access", |b| {
        b.iter(|| black_box(issuer.issue_access(user).unwrap()));
    });

    let token = issuer.issue_access(user).unwrap().token;
    group.bench_function("verify_access", |b| {
        b.iter(|| black_box(issuer.verify_access(&token).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_limiter_admission, bench_credentials);
criterion_main!(benches);
