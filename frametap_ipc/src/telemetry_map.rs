//! Telemetry map: history rings keyed by metric id.
//!
//! The map is hosted inside a telemetry segment as a fixed-capacity
//! metric directory followed by a ring arena. The service appends
//! directory entries while registering devices; viewers rebuild typed
//! ring views from the directory without any allocator handshake.

use crate::error::{IpcError, IpcResult};
use crate::history::HistoryRing;
use crate::ring::{init_ring_header, ring_footprint_bytes, BoundedRing, RingHeader};
use frametap_common::metric::{MetricId, ValueKind};
use frametap_common::sample::{sample_bytes, TelemetrySample, TelemetryValue};
use static_assertions::const_assert_eq;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// Maximum metrics one telemetry map can host.
pub const MAX_MAP_METRICS: usize = 64;

/// Directory entry describing one metric's ring set.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MetricDirEntry {
    /// Raw metric id.
    pub metric_id: u32,
    /// Raw `ValueKind` discriminant of the stored samples.
    pub value_kind: u8,
    _pad: [u8; 3],
    /// Per-metric array dimension (1 for scalars).
    pub array_count: u32,
    /// Samples per ring.
    pub ring_capacity: u32,
    /// Offset of the first ring within the arena.
    pub arena_offset: u64,
}

const_assert_eq!(std::mem::size_of::<MetricDirEntry>(), 24);

/// Map bookkeeping hosted at the start of the telemetry region.
#[repr(C)]
pub struct MapHeader {
    entry_count: u64,
    arena_cursor: u64,
    entries: [MetricDirEntry; MAX_MAP_METRICS],
}

/// Type-erased ring set of one metric.
pub enum RingSetVariant<'seg> {
    /// Float samples.
    F64(Vec<HistoryRing<'seg, f64>>),
    /// Unsigned integer samples.
    U64(Vec<HistoryRing<'seg, u64>>),
    /// Boolean samples.
    Bool(Vec<HistoryRing<'seg, bool>>),
}

impl RingSetVariant<'_> {
    /// Array dimension of this ring set.
    pub fn array_size(&self) -> usize {
        match self {
            Self::F64(v) => v.len(),
            Self::U64(v) => v.len(),
            Self::Bool(v) => v.len(),
        }
    }

    /// Scalar kind of the stored samples.
    pub fn value_kind(&self) -> ValueKind {
        match self {
            Self::F64(_) => ValueKind::F64,
            Self::U64(_) => ValueKind::U64,
            Self::Bool(_) => ValueKind::Bool,
        }
    }
}

/// View over a telemetry map hosted in a segment.
///
/// Mutation (`add_ring`) happens only during the service build phase
/// under the introspection exclusive lock; viewers never mutate.
pub struct TelemetryMapView<'seg> {
    hdr: NonNull<MapHeader>,
    arena: NonNull<u8>,
    arena_size: usize,
    _seg: PhantomData<&'seg ()>,
}

unsafe impl Send for TelemetryMapView<'_> {}
unsafe impl Sync for TelemetryMapView<'_> {}

impl<'seg> TelemetryMapView<'seg> {
    /// Initializes an empty map in place and returns its view.
    ///
    /// # Safety
    /// `hdr` must point at zeroed mapped memory with room for a
    /// `MapHeader`; `arena` at `arena_size` bytes of 8-aligned ring
    /// arena, all outliving `'seg`.
    pub unsafe fn init_at(hdr: *mut MapHeader, arena: *mut u8, arena_size: usize) -> Self {
        (*hdr).entry_count = 0;
        (*hdr).arena_cursor = 0;
        Self::from_raw(hdr, arena, arena_size)
    }

    /// Builds a view over an existing map.
    ///
    /// # Safety
    /// Pointers must reference a map previously set up by `init_at` in a
    /// mapping outliving `'seg`.
    pub unsafe fn from_raw(hdr: *mut MapHeader, arena: *mut u8, arena_size: usize) -> Self {
        Self {
            hdr: NonNull::new_unchecked(hdr),
            arena: NonNull::new_unchecked(arena),
            arena_size,
            _seg: PhantomData,
        }
    }

    fn header(&self) -> &MapHeader {
        unsafe { self.hdr.as_ref() }
    }

    fn live_entries(&self) -> &[MetricDirEntry] {
        let hdr = self.header();
        let count = (hdr.entry_count as usize).min(MAX_MAP_METRICS);
        &hdr.entries[..count]
    }

    fn find_entry(&self, metric: MetricId) -> Option<MetricDirEntry> {
        self.live_entries()
            .iter()
            .copied()
            .find(|e| e.metric_id == metric as u32)
    }

    /// Adds a fresh ring set for `metric`.
    ///
    /// Fails with `AlreadyPresent` when the id is already mapped; the map
    /// state is unchanged on any failure.
    pub fn add_ring(
        &self,
        metric: MetricId,
        ring_depth: usize,
        array_count: usize,
        kind: ValueKind,
    ) -> IpcResult<()> {
        if self.find_entry(metric).is_some() {
            return Err(IpcError::AlreadyPresent { metric });
        }
        let hdr = self.header();
        let count = hdr.entry_count as usize;
        if count >= MAX_MAP_METRICS {
            return Err(IpcError::MapFull {
                capacity: MAX_MAP_METRICS,
            });
        }

        let per_ring = std::mem::size_of::<RingHeader>() + ring_depth * sample_bytes(kind);
        let needed = array_count * per_ring;
        let cursor = hdr.arena_cursor as usize;
        let available = self.arena_size - cursor;
        if needed > available {
            return Err(IpcError::ArenaExhausted { needed, available });
        }

        for index in 0..array_count {
            let ring_ptr = unsafe { self.arena.as_ptr().add(cursor + index * per_ring) };
            unsafe { init_ring_header(ring_ptr as *mut RingHeader, ring_depth, false)? };
        }

        let entry = MetricDirEntry {
            metric_id: metric as u32,
            value_kind: kind as u8,
            _pad: [0; 3],
            array_count: array_count as u32,
            ring_capacity: ring_depth as u32,
            arena_offset: cursor as u64,
        };
        unsafe {
            let hdr = self.hdr.as_ptr();
            (*hdr).entries[count] = entry;
            (*hdr).arena_cursor = (cursor + needed) as u64;
            (*hdr).entry_count = (count + 1) as u64;
        }
        tracing::debug!(
            metric = metric as u32,
            ring_depth,
            array_count,
            bytes = needed,
            "telemetry ring set added"
        );
        Ok(())
    }

    /// Typed ring views of `metric`, one per array element.
    pub fn find_rings<T: TelemetryValue>(
        &self,
        metric: MetricId,
    ) -> IpcResult<Vec<HistoryRing<'seg, T>>> {
        let entry = self.find_entry(metric).ok_or(IpcError::NotPresent {
            what: "telemetry metric",
            key: metric as u32 as u64,
        })?;
        if entry.value_kind != T::VALUE_KIND as u8 {
            return Err(IpcError::ValueKindMismatch { metric });
        }
        self.rings_of_entry::<T>(&entry)
    }

    /// Type-erased ring views of `metric`.
    pub fn find_ring_variant(&self, metric: MetricId) -> IpcResult<RingSetVariant<'seg>> {
        let entry = self.find_entry(metric).ok_or(IpcError::NotPresent {
            what: "telemetry metric",
            key: metric as u32 as u64,
        })?;
        self.variant_of_entry(&entry)
    }

    /// Array dimension of `metric`'s ring set; 0 when absent.
    pub fn array_size(&self, metric: MetricId) -> usize {
        self.find_entry(metric)
            .map(|e| e.array_count as usize)
            .unwrap_or(0)
    }

    /// Number of mapped metrics.
    pub fn len(&self) -> usize {
        self.live_entries().len()
    }

    /// True when no metric is mapped.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of `(metric id, ring set)` pairs.
    pub fn rings(&self) -> IpcResult<Vec<(u32, RingSetVariant<'seg>)>> {
        self.live_entries()
            .iter()
            .map(|e| Ok((e.metric_id, self.variant_of_entry(e)?)))
            .collect()
    }

    fn variant_of_entry(&self, entry: &MetricDirEntry) -> IpcResult<RingSetVariant<'seg>> {
        match ValueKind::from_u8(entry.value_kind) {
            Some(ValueKind::F64) => Ok(RingSetVariant::F64(self.rings_of_entry(entry)?)),
            Some(ValueKind::U64) => Ok(RingSetVariant::U64(self.rings_of_entry(entry)?)),
            Some(ValueKind::Bool) => Ok(RingSetVariant::Bool(self.rings_of_entry(entry)?)),
            None => Err(IpcError::InvalidSegment {
                name: String::new(),
                reason: "unknown telemetry value kind",
            }),
        }
    }

    fn rings_of_entry<T: TelemetryValue>(
        &self,
        entry: &MetricDirEntry,
    ) -> IpcResult<Vec<HistoryRing<'seg, T>>> {
        let per_ring = ring_footprint_bytes::<TelemetrySample<T>>(entry.ring_capacity as usize);
        (0..entry.array_count as usize)
            .map(|index| {
                let base = entry.arena_offset as usize + index * per_ring;
                let hdr = unsafe { self.arena.as_ptr().add(base) } as *const RingHeader;
                let slots = unsafe {
                    self.arena
                        .as_ptr()
                        .add(base + std::mem::size_of::<RingHeader>())
                } as *mut TelemetrySample<T>;
                let ring = unsafe { BoundedRing::from_raw(hdr, slots)? };
                Ok(HistoryRing::new(ring))
            })
            .collect()
    }
}

/// Bytes a complete telemetry region (directory plus arena) needs for
/// the given arena payload.
pub const fn map_region_bytes(arena_bytes: usize) -> usize {
    std::mem::size_of::<MapHeader>() + arena_bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    struct HostedMap {
        mem: Box<[u64]>,
        arena_size: usize,
    }

    impl HostedMap {
        fn new(arena_size: usize) -> Self {
            let bytes = std::mem::size_of::<MapHeader>() + arena_size;
            Self {
                mem: vec![0u64; (bytes + 7) / 8].into_boxed_slice(),
                arena_size,
            }
        }

        fn map(&self) -> TelemetryMapView<'_> {
            let hdr = self.mem.as_ptr() as *mut MapHeader;
            let arena =
                unsafe { (self.mem.as_ptr() as *mut u8).add(std::mem::size_of::<MapHeader>()) };
            unsafe { TelemetryMapView::from_raw(hdr, arena, self.arena_size) }
        }
    }

    #[test]
    fn test_add_and_find_typed() {
        let host = HostedMap::new(64 * 1024);
        let map = host.map();
        map.add_ring(MetricId::GpuPower, 32, 1, ValueKind::F64).unwrap();
        map.add_ring(MetricId::GpuFanSpeed, 32, 3, ValueKind::F64)
            .unwrap();
        map.add_ring(MetricId::GpuMemUsed, 32, 1, ValueKind::U64)
            .unwrap();
        map.add_ring(MetricId::GpuPowerLimited, 32, 1, ValueKind::Bool)
            .unwrap();

        assert_eq!(map.len(), 4);
        assert_eq!(map.array_size(MetricId::GpuFanSpeed), 3);
        assert_eq!(map.array_size(MetricId::CpuPower), 0);

        let rings = map.find_rings::<f64>(MetricId::GpuFanSpeed).unwrap();
        assert_eq!(rings.len(), 3);
        rings[1].push(1_200.0, 77, None);
        assert_eq!(rings[1].newest().unwrap().value, 1_200.0);
        assert!(rings[0].is_empty());
        assert!(rings[2].is_empty());
    }

    #[test]
    fn test_duplicate_add_is_rejected_and_state_unchanged() {
        let host = HostedMap::new(64 * 1024);
        let map = host.map();
        map.add_ring(MetricId::CpuPower, 16, 1, ValueKind::F64).unwrap();
        let err = map.add_ring(MetricId::CpuPower, 16, 1, ValueKind::F64);
        assert!(matches!(
            err,
            Err(IpcError::AlreadyPresent {
                metric: MetricId::CpuPower
            })
        ));
        assert_eq!(map.len(), 1);
        assert_eq!(map.array_size(MetricId::CpuPower), 1);
    }

    #[test]
    fn test_value_kind_mismatch() {
        let host = HostedMap::new(64 * 1024);
        let map = host.map();
        map.add_ring(MetricId::GpuMemUsed, 16, 1, ValueKind::U64)
            .unwrap();
        assert!(matches!(
            map.find_rings::<f64>(MetricId::GpuMemUsed),
            Err(IpcError::ValueKindMismatch { .. })
        ));
        assert!(map.find_rings::<u64>(MetricId::GpuMemUsed).is_ok());
    }

    #[test]
    fn test_variant_dispatch() {
        let host = HostedMap::new(64 * 1024);
        let map = host.map();
        map.add_ring(MetricId::GpuPowerLimited, 16, 1, ValueKind::Bool)
            .unwrap();
        match map.find_ring_variant(MetricId::GpuPowerLimited).unwrap() {
            RingSetVariant::Bool(rings) => {
                assert_eq!(rings.len(), 1);
                rings[0].push(true, 5, None);
                assert!(rings[0].newest().unwrap().value);
            }
            _ => panic!("expected bool variant"),
        }
        assert!(matches!(
            map.find_ring_variant(MetricId::GpuPower),
            Err(IpcError::NotPresent { .. })
        ));
    }

    #[test]
    fn test_arena_exhaustion() {
        // room for barely one small ring set
        let host = HostedMap::new(512);
        let map = host.map();
        map.add_ring(MetricId::GpuPower, 16, 1, ValueKind::F64).unwrap();
        assert!(matches!(
            map.add_ring(MetricId::GpuVoltage, 16, 1, ValueKind::F64),
            Err(IpcError::ArenaExhausted { .. })
        ));
    }

    #[test]
    fn test_rings_iteration() {
        let host = HostedMap::new(64 * 1024);
        let map = host.map();
        map.add_ring(MetricId::GpuPower, 16, 1, ValueKind::F64).unwrap();
        map.add_ring(MetricId::GpuMemUsed, 16, 1, ValueKind::U64)
            .unwrap();
        let all = map.rings().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, MetricId::GpuPower as u32);
        assert_eq!(all[1].1.value_kind(), ValueKind::U64);
    }
}
