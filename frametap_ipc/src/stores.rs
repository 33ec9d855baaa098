//! Typed data stores hosted in shared memory segments.
//!
//! Three store shapes exist: the per-target frame store (statics,
//! bookkeeping and the frame ring) and the GPU/system telemetry stores
//! (statics and a telemetry map). Owned handles create and initialize a
//! segment; viewed handles open one and rebuild the same layout.

use crate::error::{IpcError, IpcResult};
use crate::layout::LayoutCursor;
use crate::ring::{BoundedRing, RingHeader};
use crate::segment::{OwnedSegment, StoreKind, ViewedSegment};
use crate::sizing;
use crate::telemetry_map::{MapHeader, TelemetryMapView};
use bitflags::bitflags;
use crate::caps::MetricCapabilities;
use frametap_common::fixed_vec::FixedCapVec;
use frametap_common::frame::FrameRecord;
use frametap_common::inline_str::InlineStr;
use frametap_common::metric::DeviceType;
use std::ptr::NonNull;

bitflags! {
    /// Frame store bookkeeping init flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BookkeepingFlags: u32 {
        /// Statics have been populated from the first frame.
        const STATIC_INIT = 1 << 0;
        /// Bookkeeping has been populated on target acquisition.
        const BOOKKEEPING_INIT = 1 << 1;
        /// Frames originate from log playback, not a live trace.
        const IS_PLAYBACK = 1 << 2;
    }
}

/// Values fixed for the life of a frame target.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStatics {
    /// Executable name of the traced application.
    pub app_name: InlineStr<260>,
}

/// Internal frame-store bookkeeping, initialized on target acquisition.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameBookkeeping {
    /// Target process id.
    pub process_id: u32,
    /// Raw `BookkeepingFlags` bits.
    pub flags: u32,
    /// QPC timestamp at which tracking of this target started.
    pub start_qpc: i64,
}

#[repr(C)]
struct FrameStoreHeader {
    statics: FrameStatics,
    bookkeeping: FrameBookkeeping,
    ring: RingHeader,
}

struct FrameLayout {
    header_off: usize,
    slots_off: usize,
    size: usize,
}

fn frame_layout(capacity: usize) -> FrameLayout {
    let mut cur = LayoutCursor::new();
    let header_off = cur.place::<FrameStoreHeader>();
    let slots_off = cur.place_array::<FrameRecord>(capacity);
    FrameLayout {
        header_off,
        slots_off,
        size: cur.size(),
    }
}

/// Borrowed view over a frame store.
pub struct FrameStoreView<'seg> {
    hdr: NonNull<FrameStoreHeader>,
    ring: BoundedRing<'seg, FrameRecord>,
}

unsafe impl Send for FrameStoreView<'_> {}
unsafe impl Sync for FrameStoreView<'_> {}

impl<'seg> FrameStoreView<'seg> {
    /// The frame broadcast ring.
    pub fn frame_ring(&self) -> &BoundedRing<'seg, FrameRecord> {
        &self.ring
    }

    /// Application name from the statics block.
    pub fn app_name(&self) -> String {
        unsafe { self.hdr.as_ref() }.statics.app_name.to_string_lossy()
    }

    /// Writes the application name. Producer side only.
    pub fn set_app_name(&self, name: &str) {
        unsafe { (*self.hdr.as_ptr()).statics.app_name.assign(name) };
    }

    /// Snapshot of the bookkeeping block.
    pub fn bookkeeping(&self) -> FrameBookkeeping {
        unsafe { self.hdr.as_ref() }.bookkeeping
    }

    /// Mutates the bookkeeping block in place. Producer side only.
    pub fn update_bookkeeping(&self, f: impl FnOnce(&mut FrameBookkeeping)) {
        unsafe { f(&mut (*self.hdr.as_ptr()).bookkeeping) };
    }
}

fn frame_view(
    payload: *mut u8,
    payload_len: usize,
    capacity: usize,
) -> IpcResult<(NonNull<FrameStoreHeader>, usize)> {
    let layout = frame_layout(capacity);
    if layout.size > payload_len {
        return Err(IpcError::LayoutOverflow {
            needed: layout.size,
            available: payload_len,
        });
    }
    let hdr = unsafe { payload.add(layout.header_off) } as *mut FrameStoreHeader;
    Ok((unsafe { NonNull::new_unchecked(hdr) }, layout.slots_off))
}

/// Frame store created and owned by the service.
pub struct OwnedFrameStore {
    seg: OwnedSegment,
    capacity: usize,
}

impl OwnedFrameStore {
    /// Creates the segment for target `pid` and initializes the store.
    pub fn create(name: &str, pid: u32, capacity: usize, backpressured: bool) -> IpcResult<Self> {
        let total = sizing::frame_segment_bytes(capacity);
        let seg = OwnedSegment::create(name, StoreKind::Frame, total)?;
        let (hdr, slots_off) = frame_view(seg.payload_ptr(), seg.payload_len(), capacity)?;
        unsafe {
            // statics arrive zeroed from the fresh mapping
            (*hdr.as_ptr()).bookkeeping.process_id = pid;
            let ring_hdr = std::ptr::addr_of_mut!((*hdr.as_ptr()).ring);
            let slots = seg.payload_ptr().add(slots_off) as *mut FrameRecord;
            BoundedRing::<FrameRecord>::init_at(ring_hdr, slots, capacity, backpressured)?;
        }
        Ok(Self { seg, capacity })
    }

    /// Borrowed store view.
    pub fn store(&self) -> FrameStoreView<'_> {
        let (hdr, slots_off) = frame_view(self.seg.payload_ptr(), self.seg.payload_len(), self.capacity)
            .expect("layout verified at creation");
        let ring = unsafe {
            BoundedRing::from_raw(
                std::ptr::addr_of!((*hdr.as_ptr()).ring),
                self.seg.payload_ptr().add(slots_off) as *mut FrameRecord,
            )
        }
        .expect("ring verified at creation");
        FrameStoreView { hdr, ring }
    }

    /// Segment name hosting this store.
    pub fn segment_name(&self) -> &str {
        self.seg.name()
    }
}

/// Frame store opened by a consumer.
#[derive(Debug)]
pub struct ViewedFrameStore {
    seg: ViewedSegment,
    capacity: usize,
}

impl ViewedFrameStore {
    /// Opens an existing frame segment.
    pub fn open(name: &str) -> IpcResult<Self> {
        let seg = ViewedSegment::open(name, StoreKind::Frame)?;
        // Ring capacity determines the slot layout; read it from the
        // header the producer initialized.
        let probe = frame_layout(0);
        if probe.size > seg.payload_len() {
            return Err(IpcError::InvalidSegment {
                name: name.to_string(),
                reason: "frame store header does not fit",
            });
        }
        let hdr = unsafe { seg.payload_ptr().add(probe.header_off) } as *const FrameStoreHeader;
        let capacity = unsafe { &(*hdr).ring }.capacity as usize;
        if capacity < 2 * frametap_common::consts::READ_MARGIN as usize {
            return Err(IpcError::InvalidSegment {
                name: name.to_string(),
                reason: "frame ring capacity below minimum",
            });
        }
        // validates the slot-array fit
        frame_view(seg.payload_ptr(), seg.payload_len(), capacity)?;
        Ok(Self { seg, capacity })
    }

    /// Borrowed store view.
    pub fn store(&self) -> FrameStoreView<'_> {
        let (hdr, slots_off) = frame_view(self.seg.payload_ptr(), self.seg.payload_len(), self.capacity)
            .expect("layout verified at open");
        let ring = unsafe {
            BoundedRing::from_raw(
                std::ptr::addr_of!((*hdr.as_ptr()).ring),
                self.seg.payload_ptr().add(slots_off) as *mut FrameRecord,
            )
        }
        .expect("ring verified at open");
        FrameStoreView { hdr, ring }
    }
}

/// Statics block of a telemetry store.
pub trait StaticsBlock: Copy + Default + 'static {
    /// Segment kind hosting this store.
    const STORE_KIND: StoreKind;
    /// Device type driving the sizing scale.
    const DEVICE_TYPE: DeviceType;
}

/// GPU device statics.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GpuStatics {
    /// Raw `Vendor` discriminant.
    pub vendor: u32,
    _pad: u32,
    /// Adapter name.
    pub name: InlineStr<64>,
    /// Sustained power limit in watts.
    pub sustained_power_limit: f64,
    /// Dedicated memory size in bytes.
    pub mem_size: u64,
    /// Maximum memory bandwidth in bytes per second.
    pub max_mem_bandwidth: u64,
    /// Maximum fan speeds in RPM, one entry per fan.
    pub max_fan_rpm: FixedCapVec<i32, 5>,
}

impl StaticsBlock for GpuStatics {
    const STORE_KIND: StoreKind = StoreKind::Gpu;
    const DEVICE_TYPE: DeviceType = DeviceType::GraphicsAdapter;
}

/// System device statics.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemStatics {
    /// Raw `Vendor` discriminant.
    pub cpu_vendor: u32,
    _pad: u32,
    /// Processor name.
    pub cpu_name: InlineStr<64>,
    /// Package power limit in watts.
    pub cpu_power_limit: f64,
}

impl StaticsBlock for SystemStatics {
    const STORE_KIND: StoreKind = StoreKind::System;
    const DEVICE_TYPE: DeviceType = DeviceType::System;
}

struct TelemetryLayout {
    statics_off: usize,
    map_off: usize,
    arena_off: usize,
    arena_size: usize,
}

fn telemetry_layout<S: StaticsBlock>(payload_len: usize) -> IpcResult<TelemetryLayout> {
    let mut cur = LayoutCursor::new();
    let statics_off = cur.place::<S>();
    let map_off = cur.place::<MapHeader>();
    cur.align_to(8);
    let arena_off = cur.size();
    if arena_off > payload_len {
        return Err(IpcError::LayoutOverflow {
            needed: arena_off,
            available: payload_len,
        });
    }
    Ok(TelemetryLayout {
        statics_off,
        map_off,
        arena_off,
        arena_size: payload_len - arena_off,
    })
}

/// Borrowed view over a telemetry store.
pub struct TelemetryStoreView<'seg, S: StaticsBlock> {
    statics: NonNull<S>,
    map: TelemetryMapView<'seg>,
}

unsafe impl<S: StaticsBlock> Send for TelemetryStoreView<'_, S> {}
unsafe impl<S: StaticsBlock> Sync for TelemetryStoreView<'_, S> {}

impl<'seg, S: StaticsBlock> TelemetryStoreView<'seg, S> {
    /// Snapshot of the statics block.
    pub fn statics(&self) -> S {
        unsafe { *self.statics.as_ref() }
    }

    /// Mutates the statics block in place. Producer side only, during
    /// device registration.
    pub fn update_statics(&self, f: impl FnOnce(&mut S)) {
        unsafe { f(&mut *self.statics.as_ptr()) };
    }

    /// The telemetry map.
    pub fn telemetry(&self) -> &TelemetryMapView<'seg> {
        &self.map
    }
}

fn telemetry_view<'seg, S: StaticsBlock>(
    payload: *mut u8,
    payload_len: usize,
) -> IpcResult<TelemetryStoreView<'seg, S>> {
    let layout = telemetry_layout::<S>(payload_len)?;
    let statics = unsafe { NonNull::new_unchecked(payload.add(layout.statics_off) as *mut S) };
    let map = unsafe {
        TelemetryMapView::from_raw(
            payload.add(layout.map_off) as *mut MapHeader,
            payload.add(layout.arena_off),
            layout.arena_size,
        )
    };
    Ok(TelemetryStoreView { statics, map })
}

/// Telemetry store created and owned by the service.
pub struct OwnedTelemetryStore<S: StaticsBlock> {
    seg: OwnedSegment,
    _marker: std::marker::PhantomData<S>,
}

impl<S: StaticsBlock> OwnedTelemetryStore<S> {
    /// Creates the segment sized for `caps` and initializes an empty
    /// store; rings are added afterwards per capability.
    pub fn create(name: &str, caps: &MetricCapabilities, ring_samples: usize) -> IpcResult<Self> {
        let total = sizing::telemetry_segment_bytes(caps, ring_samples, S::DEVICE_TYPE);
        let seg = OwnedSegment::create(name, S::STORE_KIND, total)?;
        let layout = telemetry_layout::<S>(seg.payload_len())?;
        unsafe {
            // statics arrive zeroed; directory needs its counters zeroed
            TelemetryMapView::init_at(
                seg.payload_ptr().add(layout.map_off) as *mut MapHeader,
                seg.payload_ptr().add(layout.arena_off),
                layout.arena_size,
            );
        }
        Ok(Self {
            seg,
            _marker: std::marker::PhantomData,
        })
    }

    /// Borrowed store view.
    pub fn store(&self) -> TelemetryStoreView<'_, S> {
        telemetry_view(self.seg.payload_ptr(), self.seg.payload_len())
            .expect("layout verified at creation")
    }

    /// Segment name hosting this store.
    pub fn segment_name(&self) -> &str {
        self.seg.name()
    }
}

/// Telemetry store opened by a consumer.
#[derive(Debug)]
pub struct ViewedTelemetryStore<S: StaticsBlock> {
    seg: ViewedSegment,
    _marker: std::marker::PhantomData<S>,
}

impl<S: StaticsBlock> ViewedTelemetryStore<S> {
    /// Opens an existing telemetry segment.
    pub fn open(name: &str) -> IpcResult<Self> {
        let seg = ViewedSegment::open(name, S::STORE_KIND)?;
        telemetry_layout::<S>(seg.payload_len())?;
        Ok(Self {
            seg,
            _marker: std::marker::PhantomData,
        })
    }

    /// Borrowed store view.
    pub fn store(&self) -> TelemetryStoreView<'_, S> {
        telemetry_view(self.seg.payload_ptr(), self.seg.payload_len())
            .expect("layout verified at open")
    }
}

/// GPU telemetry store owned by the service.
pub type OwnedGpuStore = OwnedTelemetryStore<GpuStatics>;
/// System telemetry store owned by the service.
pub type OwnedSystemStore = OwnedTelemetryStore<SystemStatics>;
/// GPU telemetry store opened by a consumer.
pub type ViewedGpuStore = ViewedTelemetryStore<GpuStatics>;
/// System telemetry store opened by a consumer.
pub type ViewedSystemStore = ViewedTelemetryStore<SystemStatics>;
