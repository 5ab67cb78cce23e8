//! # Change Bus Benchmarks
//!
//! | Path | Expectation |
//! |------|-------------|
//! | Publish, no subscribers | Registry read only |
//! | Publish fan-out | Linear in matching subscribers |
//! | Publish with filters | Criteria cost per candidate |
//! | Subscribe + drop | Write lock plus channel allocation |

use change_bus::{BusConfig, ChangeBus, ChangeEvent, EventKind, EventStream, FilterCriteria, Interest};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::time::Duration;
use tokio::runtime::Runtime;

fn running_bus(runtime: &Runtime, queue: usize) -> ChangeBus {
    let bus = ChangeBus::with_config(BusConfig::default().with_max_queue_size(queue))
        .expect("valid config");
    runtime.block_on(bus.start());
    bus
}

fn drain(streams: &mut [EventStream]) {
    for stream in streams {
        while let Ok(Some(_)) = stream.try_recv() {}
    }
}

fn bench_publish_fan_out(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("publish-fan-out");
    group.measurement_time(Duration::from_secs(5));

    for subscribers in [0usize, 1, 10, 100, 1000] {
        let bus = running_bus(&runtime, 1024);
        let mut streams: Vec<EventStream> =
            (0..subscribers).map(|_| bus.subscribe_all().1).collect();

        group.throughput(Throughput::Elements(subscribers.max(1) as u64));
        group.bench_with_input(
            BenchmarkId::new("global", subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    let delivered =
                        bus.publish(ChangeEvent::created("bench", json!({"n": 1})));
                    drain(&mut streams);
                    black_box(delivered)
                })
            },
        );

        runtime.block_on(bus.stop());
    }

    group.finish();
}

fn bench_publish_kind_routing(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("publish-kind-routing");

    // 1000 subscribers spread over all kinds; only a fifth match each publish
    let bus = running_bus(&runtime, 1024);
    let mut streams: Vec<EventStream> = (0..1000)
        .map(|i| {
            let kind = EventKind::ALL[i % EventKind::ALL.len()];
            bus.subscribe(Interest::only(kind), FilterCriteria::any()).1
        })
        .collect();

    group.bench_function("one_kind_of_five", |b| {
        b.iter(|| {
            let delivered = bus.publish(ChangeEvent::new(EventKind::Updated));
            drain(&mut streams);
            black_box(delivered)
        })
    });

    runtime.block_on(bus.stop());
    group.finish();
}

fn bench_publish_filtered(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("publish-filtered");

    let bus = running_bus(&runtime, 1024);
    let mut streams: Vec<EventStream> = (0..500)
        .map(|i| {
            let criteria = FilterCriteria::any()
                .with_entity_ids([format!("entity-{}", i % 50)])
                .with_attribute("region", if i % 2 == 0 { "eu" } else { "us" });
            bus.subscribe(Interest::All, criteria).1
        })
        .collect();

    group.bench_function("500_subscribers_entity_and_attribute", |b| {
        b.iter(|| {
            let event = ChangeEvent::created("entity-7", json!({}))
                .with_attribute("region", "eu");
            let delivered = bus.publish(event);
            drain(&mut streams);
            black_box(delivered)
        })
    });

    runtime.block_on(bus.stop());
    group.finish();
}

fn bench_subscribe_unsubscribe(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let bus = running_bus(&runtime, 100);
    let _population: Vec<EventStream> = (0..1000).map(|_| bus.subscribe_all().1).collect();

    c.bench_function("subscribe_then_drop", |b| {
        b.iter(|| {
            let (id, stream) =
                bus.subscribe(Interest::only(EventKind::Created), FilterCriteria::any());
            drop(stream);
            black_box(id)
        })
    });

    runtime.block_on(bus.stop());
}

criterion_group!(
    benches,
    bench_publish_fan_out,
    bench_publish_kind_routing,
    bench_publish_filtered,
    bench_subscribe_unsubscribe,
);
criterion_main!(benches);
