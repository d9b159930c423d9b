use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::hint::black_box;

use rtt_arbiter::{
    test_utils::{client, target, Harness},
    ArbiterState,
};

fn ranging_throughput(c: &mut Criterion) {
    c.bench_function("100 queued ranging requests", |b| {
        b.iter_batched(
            Harness::enabled,
            |mut harness| {
                for n in 0..100u32 {
                    harness.start(client(u128::from(n % 8)), n, vec![target(1), target(2)]);
                }
                while harness.state() == ArbiterState::Ranging {
                    harness.complete_in_flight();
                }
                black_box(harness.sink.len())
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("disconnect with 20 outstanding", |b| {
        b.iter_batched(
            || {
                let mut harness = Harness::enabled();
                for n in 0..20u32 {
                    harness.start(client(1), n, vec![target(1)]);
                }
                harness
            },
            |mut harness| {
                harness.disconnect(client(1));
                black_box(harness.sink.len())
            },
            BatchSize::SmallInput,
        )
    });
}

fn responder_throughput(c: &mut Criterion) {
    c.bench_function("acquire and release 64 leases", |b| {
        b.iter_batched(
            Harness::enabled,
            |mut harness| {
                for n in 0..64u32 {
                    harness.enable(client(u128::from(n)), n);
                }
                for n in 0..64u32 {
                    harness.disable(client(u128::from(n)), n);
                }
                black_box(harness.driver.disable_count())
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, ranging_throughput, responder_throughput);
criterion_main!(benches);
