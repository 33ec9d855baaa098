//! Ring scenarios over real shared memory segments.

use frametap_common::metric::{MetricId, ValueKind};
use frametap_ipc::caps::MetricCapabilities;
use frametap_ipc::stores::{OwnedFrameStore, OwnedSystemStore, ViewedSystemStore};
use frametap_common::frame::FrameRecord;
use std::time::Duration;

const BASE_TS: u64 = 10_000;

fn unique_name(tag: &str) -> String {
    format!("ftap_ring_scen_{}_{}", tag, std::process::id())
}

fn scalar_caps() -> MetricCapabilities {
    let mut caps = MetricCapabilities::new();
    caps.set(MetricId::CpuFrequency, 1);
    caps
}

fn make_system_store(name: &str, ring_samples: usize) -> OwnedSystemStore {
    let store = OwnedSystemStore::create(name, &scalar_caps(), ring_samples).unwrap();
    store
        .store()
        .telemetry()
        .add_ring(MetricId::CpuFrequency, ring_samples, 1, ValueKind::F64)
        .unwrap();
    store
}

fn push_scalar_batch(store: &OwnedSystemStore, start: usize, count: usize) {
    let view = store.store();
    let rings = view
        .telemetry()
        .find_rings::<f64>(MetricId::CpuFrequency)
        .unwrap();
    for i in start..start + count {
        let ts = BASE_TS + i as u64;
        rings[0].push(3_000.0 + 10.0 * i as f64, ts, None);
    }
}

#[test]
fn history_ring_basic_access() {
    // S1: capacity 32, 12 contiguous samples
    let name = unique_name("s1");
    let owned = make_system_store(&name, 32);
    push_scalar_batch(&owned, 0, 12);

    let viewer = ViewedSystemStore::open(&name).unwrap();
    let view = viewer.store();
    let rings = view
        .telemetry()
        .find_rings::<f64>(MetricId::CpuFrequency)
        .unwrap();
    let ring = &rings[0];

    assert!(!ring.is_empty());
    let (first, last) = ring.serial_range();
    assert_eq!((first, last), (0, 12));

    let newest = ring.newest().unwrap();
    assert_eq!(newest.timestamp, 10_011);
    assert!((newest.value - 3_110.0).abs() < 1e-9);

    assert_eq!(ring.nearest_serial(9_500), 0);
    assert_eq!(ring.nearest_serial(10_500), 11);
    let nearest = ring.at(ring.nearest_serial(10_007));
    assert!((nearest.value - 3_070.0).abs() < 1e-9);

    assert_eq!(ring.at(ring.lower_bound_serial(10_005)).timestamp, 10_005);
    assert_eq!(ring.upper_bound_serial(10_011), last);

    let mut sum = 0.0;
    let visited = ring.for_each_in_timestamp_range(10_003, 10_006, |s| sum += s.value);
    assert_eq!(visited, 4);
    assert!((sum - 12_180.0).abs() < 1e-9);
}

#[test]
fn ring_wrap_no_missing_frames() {
    // S2: capacity 16, push 10, consume all, push 10 more
    let name = unique_name("s2");
    let owned = make_system_store(&name, 16);
    push_scalar_batch(&owned, 0, 10);

    let viewer = ViewedSystemStore::open(&name).unwrap();
    let view = viewer.store();
    let rings = view
        .telemetry()
        .find_rings::<f64>(MetricId::CpuFrequency)
        .unwrap();
    let ring = &rings[0];

    let mut last_processed = 0u64;
    let consume = |ring: &frametap_ipc::HistoryRing<'_, f64>,
                   last_processed: u64,
                   range: (u64, u64)| {
        let start = last_processed.max(range.0);
        for serial in start..range.1 {
            let sample = ring.at(serial);
            assert_eq!(sample.timestamp, BASE_TS + serial);
            assert!((sample.value - (3_000.0 + 10.0 * serial as f64)).abs() < 1e-9);
        }
        ring.mark_next_read(range.1);
        range.1
    };

    let range1 = ring.serial_range();
    assert_eq!(range1, (0, 10));
    last_processed = consume(ring, last_processed, range1);

    push_scalar_batch(&owned, 10, 10);

    let range2 = ring.serial_range();
    assert_eq!(range2.1, 20);
    assert_eq!(range2.0, 20 - 16 + 4);
    assert!(range2.0 <= last_processed);
    last_processed = consume(ring, last_processed, range2);

    assert_eq!(last_processed, 20);
    assert_eq!(ring.newest().unwrap().timestamp, BASE_TS + 19);
}

#[test]
fn ring_wrap_missing_frames() {
    // S3: capacity 16, push 20 without consuming
    let name = unique_name("s3");
    let owned = make_system_store(&name, 16);
    push_scalar_batch(&owned, 0, 20);

    let viewer = ViewedSystemStore::open(&name).unwrap();
    let view = viewer.store();
    let rings = view
        .telemetry()
        .find_rings::<f64>(MetricId::CpuFrequency)
        .unwrap();
    let ring = &rings[0];

    let (first, last) = ring.serial_range();
    assert_eq!(last, 20);
    assert_eq!(first, 8);
    assert!(first > 0);

    assert_eq!(ring.at(first).timestamp, BASE_TS + first);
    for serial in first..last {
        let sample = ring.at(serial);
        assert_eq!(sample.timestamp, BASE_TS + serial);
        assert!((sample.value - (3_000.0 + 10.0 * serial as f64)).abs() < 1e-9);
    }
    assert_eq!(ring.newest().unwrap().timestamp, BASE_TS + 19);
}

#[test]
fn frame_ring_backpressure_blocks_and_resumes() {
    // S4: capacity 8, backpressured, 30 ms per-push timeout
    let name = unique_name("s4");
    let owned = OwnedFrameStore::create(&name, 1_234, 8, true).unwrap();
    let view = owned.store();
    let ring = view.frame_ring();

    let sample = FrameRecord::default();
    let mut pushed = 0u64;
    let mut saw_timeout = false;
    for _ in 0..12 {
        if !ring.push(sample, Some(Duration::from_millis(30))) {
            saw_timeout = true;
            break;
        }
        pushed += 1;
    }

    assert!(saw_timeout, "expected backpressure to block when full");
    assert_eq!(pushed, 8);
    let range_before = ring.serial_range();
    assert_eq!(range_before, (0, 8));

    ring.mark_next_read(range_before.1);

    assert!(ring.push(sample, Some(Duration::from_millis(30))));
    assert_eq!(ring.serial_range().1, 9);
}
