//! Service and middleware comms façades.
//!
//! `ServiceComms` owns every segment: it creates the introspection
//! segment with its sync block and root, registers devices (allocating
//! telemetry segments and rings), and manages the per-pid frame segment
//! registry. `MiddlewareComms` opens the same segments from the consumer
//! side and delivers introspection clones after the holdoff handshake.

use crate::caps::{receives_ring, MetricCapabilities};
use crate::error::{IpcError, IpcResult};
use crate::introspection::clone::{clone_flat, IntrospectionClone};
use crate::introspection::{DeviceInfo, IntrospectionRoot};
use crate::layout::LayoutCursor;
use crate::namer::SegmentNamer;
use crate::segment::{OwnedSegment, StoreKind, ViewedSegment};
use crate::sizing;
use crate::stores::{
    FrameStoreView, GpuStatics, OwnedFrameStore, OwnedGpuStore, OwnedSystemStore, SystemStatics,
    TelemetryStoreView, ViewedFrameStore, ViewedGpuStore, ViewedSystemStore,
};
use crate::sync::{SharedRwLock, SharedSemaphore};
use frametap_common::consts::INTROSPECTION_HOLDOFF_POSTS;
use frametap_common::metric::{DeviceType, Vendor};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Default holdoff wait while a consumer constructs, matching the
/// bounded waits used by eager segment discovery.
const CONSTRUCT_HOLDOFF: Duration = Duration::from_millis(1_500);

#[repr(C)]
struct SyncBlock {
    rwlock: SharedRwLock,
    sem: SharedSemaphore,
}

struct IntroLayout {
    sync_off: usize,
    root_off: usize,
    size: usize,
}

fn intro_layout() -> IntroLayout {
    let mut cur = LayoutCursor::new();
    let sync_off = cur.place::<SyncBlock>();
    let root_off = cur.place::<IntrospectionRoot>();
    IntroLayout {
        sync_off,
        root_off,
        size: cur.size(),
    }
}

/// Ring sizing configuration for the service side.
#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    /// Samples per frame ring.
    pub frame_ring_samples: usize,
    /// Samples per telemetry ring.
    pub telemetry_ring_samples: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            frame_ring_samples: frametap_common::consts::DEFAULT_FRAME_RING_SAMPLES,
            telemetry_ring_samples: frametap_common::consts::DEFAULT_TELEMETRY_RING_SAMPLES,
        }
    }
}

/// Service-side comms: segment creator and device registrar.
pub struct ServiceComms {
    namer: SegmentNamer,
    config: RingConfig,
    intro: OwnedSegment,
    sync: NonNull<SyncBlock>,
    root: NonNull<IntrospectionRoot>,
    system: Option<OwnedSystemStore>,
    gpus: HashMap<u32, OwnedGpuStore>,
    frame_weaks: Mutex<HashMap<u32, Weak<OwnedFrameStore>>>,
    next_device_id: u32,
    gpu_complete: bool,
    cpu_complete: bool,
    finalized: bool,
}

unsafe impl Send for ServiceComms {}
unsafe impl Sync for ServiceComms {}

impl ServiceComms {
    /// Creates the introspection segment and pre-populates the tree.
    pub fn new(
        prefix: Option<String>,
        salt: Option<String>,
        config: RingConfig,
    ) -> IpcResult<Self> {
        let namer = SegmentNamer::new(prefix, salt);
        let layout = intro_layout();
        let total = sizing::introspection_segment_bytes(layout.size);
        let intro = OwnedSegment::create(&namer.introspection_name(), StoreKind::Introspection, total)?;

        let sync = unsafe {
            let ptr = intro.payload_ptr().add(layout.sync_off) as *mut SyncBlock;
            SharedRwLock::init_at(std::ptr::addr_of_mut!((*ptr).rwlock))?;
            SharedSemaphore::init_at(std::ptr::addr_of_mut!((*ptr).sem), 0)?;
            NonNull::new_unchecked(ptr)
        };
        let root = unsafe {
            let ptr = intro.payload_ptr().add(layout.root_off) as *mut IntrospectionRoot;
            ptr.write(IntrospectionRoot::default());
            NonNull::new_unchecked(ptr)
        };

        let comms = Self {
            namer,
            config,
            intro,
            sync,
            root,
            system: None,
            gpus: HashMap::new(),
            frame_weaks: Mutex::new(HashMap::new()),
            next_device_id: 1,
            gpu_complete: false,
            cpu_complete: false,
            finalized: false,
        };

        {
            let _guard = comms.sync_block().rwlock.write()?;
            unsafe { (*comms.root.as_ptr()).populate()? };
        }
        tracing::info!(
            segment = %comms.intro.name(),
            salt = comms.namer.salt(),
            "service comms created"
        );
        Ok(comms)
    }

    // The lifetime is decoupled from the &self borrow: the sync block
    // lives in the mapping, which this struct keeps alive. Guards taken
    // on it must not outlive the comms.
    fn sync_block<'a>(&self) -> &'a SyncBlock {
        unsafe { self.sync.as_ref() }
    }

    /// The active segment namer.
    pub fn namer(&self) -> &SegmentNamer {
        &self.namer
    }

    /// Runs `f` on the introspection root under a shared lock.
    pub fn with_introspection<R>(&self, f: impl FnOnce(&IntrospectionRoot) -> R) -> IpcResult<R> {
        let _guard = self.sync_block().rwlock.read()?;
        Ok(f(unsafe { self.root.as_ref() }))
    }

    /// Registers a GPU device: introspection entry, telemetry segment
    /// and one ring set per non-static capability. Returns the device id.
    pub fn register_gpu_device(
        &mut self,
        vendor: Vendor,
        name: &str,
        caps: &MetricCapabilities,
    ) -> IpcResult<u32> {
        let guard = self.sync_block().rwlock.write()?;
        let device_id = self.next_device_id;
        self.next_device_id += 1;

        unsafe {
            let root = &mut *self.root.as_ptr();
            root.add_device(DeviceInfo::new(
                device_id,
                DeviceType::GraphicsAdapter,
                vendor,
                name,
            ))?;
            root.set_device_metric_availability(device_id, caps)?;
        }

        let store = OwnedGpuStore::create(
            &self.namer.gpu_name(device_id),
            caps,
            self.config.telemetry_ring_samples,
        )?;
        self.allocate_rings(store.store().telemetry(), caps)?;
        store.store().update_statics(|s| {
            s.vendor = vendor as u32;
            s.name.assign(name);
        });
        self.gpus.insert(device_id, store);
        drop(guard);

        tracing::info!(device_id, name, "gpu device registered");
        Ok(device_id)
    }

    /// Registers the CPU/system device and creates the system segment.
    pub fn register_cpu_device(
        &mut self,
        vendor: Vendor,
        name: &str,
        caps: &MetricCapabilities,
    ) -> IpcResult<()> {
        let guard = self.sync_block().rwlock.write()?;
        // CPU metrics hang off the device-independent device 0.
        unsafe {
            (*self.root.as_ptr()).set_device_metric_availability(0, caps)?;
        }

        let store = OwnedSystemStore::create(
            &self.namer.system_name(),
            caps,
            self.config.telemetry_ring_samples,
        )?;
        self.allocate_rings(store.store().telemetry(), caps)?;
        store.store().update_statics(|s| {
            s.cpu_vendor = vendor as u32;
            s.cpu_name.assign(name);
        });
        self.system = Some(store);
        drop(guard);
        tracing::info!(name, "cpu device registered");

        self.cpu_complete = true;
        self.try_finalize()
    }

    /// Marks GPU registration complete; called once after the last GPU.
    pub fn finalize_gpu_devices(&mut self) -> IpcResult<()> {
        self.gpu_complete = true;
        self.try_finalize()
    }

    fn try_finalize(&mut self) -> IpcResult<()> {
        if !(self.gpu_complete && self.cpu_complete) || self.finalized {
            return Ok(());
        }
        {
            let _guard = self.sync_block().rwlock.write()?;
            unsafe { (*self.root.as_ptr()).sort() };
        }
        // Release the holdoff; posted repeatedly so straggler readers
        // are never blocked behind the first arrivals.
        for _ in 0..INTROSPECTION_HOLDOFF_POSTS {
            self.sync_block().sem.post()?;
        }
        self.finalized = true;
        tracing::info!("introspection finalized");
        Ok(())
    }

    fn allocate_rings(
        &self,
        map: &crate::telemetry_map::TelemetryMapView<'_>,
        caps: &MetricCapabilities,
    ) -> IpcResult<()> {
        for (metric, count) in caps.iter() {
            if !receives_ring(metric) {
                continue;
            }
            map.add_ring(
                metric,
                self.config.telemetry_ring_samples,
                count,
                metric.value_kind(),
            )?;
        }
        Ok(())
    }

    /// Returns the frame segment for `pid`, creating it if no live
    /// handle exists. Expired registry entries are collected on every
    /// call.
    pub fn create_or_get_frame_segment(
        &self,
        pid: u32,
        backpressured: bool,
    ) -> IpcResult<Arc<OwnedFrameStore>> {
        let mut weaks = self.frame_weaks.lock();
        if let Some(existing) = weaks.get(&pid).and_then(Weak::upgrade) {
            weaks.retain(|_, w| w.strong_count() > 0);
            return Ok(existing);
        }
        let store = Arc::new(OwnedFrameStore::create(
            &self.namer.frame_name(pid),
            pid,
            self.config.frame_ring_samples,
            backpressured,
        )?);
        weaks.insert(pid, Arc::downgrade(&store));
        weaks.retain(|_, w| w.strong_count() > 0);
        tracing::info!(pid, backpressured, "frame segment created");
        Ok(store)
    }

    /// Returns the live frame segment for `pid`, if any.
    pub fn get_frame_segment(&self, pid: u32) -> Option<Arc<OwnedFrameStore>> {
        let mut weaks = self.frame_weaks.lock();
        match weaks.get(&pid).and_then(Weak::upgrade) {
            Some(store) => Some(store),
            None => {
                weaks.remove(&pid);
                None
            }
        }
    }

    /// Pids with live frame segments.
    pub fn frame_pids(&self) -> Vec<u32> {
        self.frame_weaks
            .lock()
            .iter()
            .filter(|(_, w)| w.strong_count() > 0)
            .map(|(pid, _)| *pid)
            .collect()
    }

    /// Store view of a registered GPU device.
    pub fn get_gpu_data_store(&self, device_id: u32) -> IpcResult<TelemetryStoreView<'_, GpuStatics>> {
        self.gpus
            .get(&device_id)
            .map(|s| s.store())
            .ok_or(IpcError::NotPresent {
                what: "gpu data store",
                key: device_id as u64,
            })
    }

    /// Store view of the system device.
    pub fn get_system_data_store(&self) -> IpcResult<TelemetryStoreView<'_, SystemStatics>> {
        self.system
            .as_ref()
            .map(|s| s.store())
            .ok_or(IpcError::NotPresent {
                what: "system data store",
                key: 0,
            })
    }
}

/// Middleware-side comms: segment viewer and introspection consumer.
#[derive(Debug)]
pub struct MiddlewareComms {
    namer: SegmentNamer,
    _intro: ViewedSegment,
    sync: NonNull<SyncBlock>,
    root: NonNull<IntrospectionRoot>,
    system: ViewedSystemStore,
    gpus: HashMap<u32, ViewedGpuStore>,
    frames: HashMap<u32, ViewedFrameStore>,
}

unsafe impl Send for MiddlewareComms {}
unsafe impl Sync for MiddlewareComms {}

impl MiddlewareComms {
    /// Opens the introspection segment, waits for the holdoff, and
    /// eagerly opens the system and per-GPU telemetry segments listed by
    /// the introspection root.
    pub fn new(prefix: Option<String>, salt: String) -> IpcResult<Self> {
        let namer = SegmentNamer::new(prefix, Some(salt));
        let intro = ViewedSegment::open(&namer.introspection_name(), StoreKind::Introspection)?;
        let layout = intro_layout();
        if layout.size > intro.payload_len() {
            return Err(IpcError::InvalidSegment {
                name: intro.name().to_string(),
                reason: "introspection layout does not fit",
            });
        }
        let sync = unsafe {
            NonNull::new_unchecked(intro.payload_ptr().add(layout.sync_off) as *mut SyncBlock)
        };
        let root = unsafe {
            NonNull::new_unchecked(
                intro.payload_ptr().add(layout.root_off) as *mut IntrospectionRoot
            )
        };

        wait_holdoff(unsafe { sync.as_ref() }, CONSTRUCT_HOLDOFF)?;
        let gpu_ids = {
            let _guard = unsafe { sync.as_ref() }.rwlock.read()?;
            unsafe { root.as_ref() }.gpu_device_ids()
        };

        let system = ViewedSystemStore::open(&namer.system_name())?;
        let mut gpus = HashMap::new();
        for id in gpu_ids {
            gpus.insert(id, ViewedGpuStore::open(&namer.gpu_name(id))?);
        }
        tracing::info!(gpu_count = gpus.len(), "middleware comms attached");

        Ok(Self {
            namer,
            _intro: intro,
            sync,
            root,
            system,
            gpus,
            frames: HashMap::new(),
        })
    }

    // Same lifetime decoupling as the service side.
    fn sync_block<'a>(&self) -> &'a SyncBlock {
        unsafe { self.sync.as_ref() }
    }

    /// Waits on the holdoff and delivers a flat introspection clone.
    pub fn get_introspection_root(&self, timeout: Duration) -> IpcResult<IntrospectionClone> {
        wait_holdoff(self.sync_block(), timeout)?;
        let _guard = self.sync_block().rwlock.read()?;
        Ok(clone_flat(unsafe { self.root.as_ref() }))
    }

    /// Opens a viewing mapping over the frame segment of `pid`.
    pub fn open_frame_data_store(&mut self, pid: u32) -> IpcResult<()> {
        if self.frames.contains_key(&pid) {
            return Ok(());
        }
        let store = ViewedFrameStore::open(&self.namer.frame_name(pid))?;
        self.frames.insert(pid, store);
        Ok(())
    }

    /// Closes the viewing mapping over the frame segment of `pid`.
    pub fn close_frame_data_store(&mut self, pid: u32) {
        self.frames.remove(&pid);
    }

    /// Store view over an open frame segment.
    pub fn get_frame_data_store(&self, pid: u32) -> IpcResult<FrameStoreView<'_>> {
        self.frames
            .get(&pid)
            .map(|s| s.store())
            .ok_or(IpcError::NotPresent {
                what: "frame data store",
                key: pid as u64,
            })
    }

    /// Store view over a GPU telemetry segment.
    pub fn get_gpu_data_store(&self, device_id: u32) -> IpcResult<TelemetryStoreView<'_, GpuStatics>> {
        self.gpus
            .get(&device_id)
            .map(|s| s.store())
            .ok_or(IpcError::NotPresent {
                what: "gpu data store",
                key: device_id as u64,
            })
    }

    /// Ids of the GPU devices whose segments are open.
    pub fn gpu_device_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.gpus.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Store view over the system telemetry segment.
    pub fn get_system_data_store(&self) -> TelemetryStoreView<'_, SystemStatics> {
        self.system.store()
    }
}

fn wait_holdoff(sync: &SyncBlock, timeout: Duration) -> IpcResult<()> {
    if !sync.sem.timed_wait(timeout)? {
        return Err(IpcError::IntrospectionTimeout {
            timeout_ms: timeout.as_millis() as u64,
        });
    }
    // Return the slot: the holdoff gates initialization, it does not
    // limit concurrent entry once released.
    sync.sem.post()?;
    Ok(())
}
