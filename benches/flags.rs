use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use condflags::{Action, Condition, ExecutionContext, SerialQueue};

fn make_condition(observers: u32) -> (Arc<SerialQueue>, Condition<u64>, Arc<AtomicUsize>) {
    let queue = Arc::new(SerialQueue::named("bench-default").unwrap());
    let ctx: Arc<dyn ExecutionContext> = Arc::clone(&queue) as Arc<dyn ExecutionContext>;
    let cond = Condition::new(ctx, 0u64);

    let fired = Arc::new(AtomicUsize::new(0));
    for i in 0..observers {
        let f = Arc::clone(&fired);
        cond.observe(
            1u64 << (i % 64),
            Action::new("bench", move || {
                f.fetch_add(1, Ordering::Relaxed);
            }),
        );
    }
    (queue, cond, fired)
}

fn bench_set_on_off(c: &mut Criterion) {
    let mut group = c.benchmark_group("flags/mutation");
    group.throughput(Throughput::Elements(2));

    group.bench_function("set_on_set_off_no_observers", |b| {
        let (_queue, cond, _) = make_condition(0);
        b.iter(|| {
            cond.set_on(&0b1);
            cond.set_off(&0b1);
        });
    });

    group.bench_function("set_on_set_off_64_observers", |b| {
        let (_queue, cond, _) = make_condition(64);
        b.iter(|| {
            cond.set_on(&0b1);
            cond.set_off(&0b1);
        });
    });

    group.finish();
}

fn bench_meets(c: &mut Criterion) {
    let (_queue, cond, _) = make_condition(0);
    cond.set_on(&0xF0F0);
    c.bench_function("flags/meets", |b| {
        b.iter(|| cond.meets(&0x00F0));
    });
}

fn bench_notification_latency(c: &mut Criterion) {
    c.bench_function("flags/set_on_to_fire", |b| {
        b.iter_custom(|iters| {
            // Fresh condition per sample so episodes do not leak between samples.
            let (queue, cond, fired) = make_condition(1);
            let mut total = Duration::ZERO;
            for i in 0..iters {
                let before = fired.load(Ordering::Relaxed);
                let started = Instant::now();
                cond.set_on(&0b1);
                queue.flush(Duration::from_secs(5)).unwrap();
                total += started.elapsed();
                assert_eq!(fired.load(Ordering::Relaxed), before + 1, "iteration {i}");

                cond.set_off(&0b1);
                queue.flush(Duration::from_secs(5)).unwrap();
            }
            total
        });
    });
}

criterion_group!(benches, bench_set_on_off, bench_meets, bench_notification_latency);
criterion_main!(benches);
