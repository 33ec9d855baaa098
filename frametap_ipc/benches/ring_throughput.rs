//! Ring push/read throughput over a real segment.

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use frametap_common::frame::FrameRecord;
use frametap_common::metric::{MetricId, ValueKind};
use frametap_ipc::caps::MetricCapabilities;
use frametap_ipc::stores::{OwnedFrameStore, OwnedSystemStore};

fn bench_frame_push(c: &mut Criterion) {
    let name = format!("ftap_bench_frame_{}", std::process::id());
    let store = OwnedFrameStore::create(&name, 1, 4_096, false).unwrap();
    let view = store.store();
    let frame = FrameRecord::default();

    let mut group = c.benchmark_group("frame_ring");
    group.throughput(Throughput::Elements(1));
    group.bench_function("push", |b| {
        b.iter(|| {
            view.frame_ring().push(std::hint::black_box(frame), None);
        })
    });
    group.bench_function("read_newest", |b| {
        b.iter(|| {
            let (_, last) = view.frame_ring().serial_range();
            std::hint::black_box(view.frame_ring().at(last - 1));
        })
    });
    group.finish();
}

fn bench_history_search(c: &mut Criterion) {
    let name = format!("ftap_bench_hist_{}", std::process::id());
    let mut caps = MetricCapabilities::new();
    caps.set(MetricId::CpuFrequency, 1);
    let store = OwnedSystemStore::create(&name, &caps, 4_096).unwrap();
    let view = store.store();
    view.telemetry()
        .add_ring(MetricId::CpuFrequency, 4_096, 1, ValueKind::F64)
        .unwrap();
    let rings = view
        .telemetry()
        .find_rings::<f64>(MetricId::CpuFrequency)
        .unwrap();
    for i in 0..4_096u64 {
        rings[0].push(i as f64, 1_000 + i * 3, None);
    }

    let mut group = c.benchmark_group("history_ring");
    group.bench_function("nearest_serial", |b| {
        b.iter(|| std::hint::black_box(rings[0].nearest_serial(7_777)))
    });
    group.bench_function("range_walk_64", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            rings[0].for_each_in_timestamp_range(5_000, 5_000 + 64 * 3, |s| acc += s.value);
            std::hint::black_box(acc)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_frame_push, bench_history_search);
criterion_main!(benches);
