//! # Frametap IPC
//!
//! The shared-memory data plane of the frametap telemetry pipeline.
//! A privileged producer ("service") creates named segments under
//! `/dev/shm` and broadcasts per-frame presentation records and hardware
//! telemetry samples on lock-free single-producer rings; consumer
//! processes ("middleware") open the same segments and read under the
//! ring serial discipline, with no locks on the data path.
//!
//! ## Segment topology
//!
//! ```text
//! {prefix}_{salt}_int          introspection tree + rwlock + holdoff sem
//! {prefix}_{salt}_sys          system telemetry store
//! {prefix}_{salt}_gpu_{id}     one telemetry store per GPU device
//! {prefix}_{salt}_tgt_{pid}    one frame store per tracked process
//! ```
//!
//! ## Consistency model
//!
//! - Rings publish by a single atomic serial increment; readers poll
//!   serial ranges and copy slots. The oldest `READ_MARGIN` live slots
//!   are excluded from the advertised safe range as tearing mitigation.
//! - The introspection tree is built under an exclusive process-shared
//!   lock; a holdoff semaphore keeps readers out until finalization,
//!   after which readers take shared locks and receive flattened,
//!   pointer-free clones.
//!
//! Thread safety: ring views are `Sync` for readers; pushing is
//! single-producer by contract. `ServiceComms` registration happens from
//! one thread at a time.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod caps;
pub mod comms;
pub mod error;
pub mod history;
pub mod introspection;
pub mod layout;
pub mod namer;
pub mod platform;
pub mod ring;
pub mod segment;
pub mod sizing;
pub mod stores;
pub mod sync;
pub mod telemetry_map;

pub use caps::{cpu_caps_from_bits, gpu_caps_from_bits, receives_ring, MetricCapabilities};
pub use comms::{MiddlewareComms, RingConfig, ServiceComms};
pub use error::{IpcError, IpcResult};
pub use history::HistoryRing;
pub use introspection::clone::IntrospectionClone;
pub use introspection::IntrospectionRoot;
pub use namer::SegmentNamer;
pub use ring::{BoundedRing, RingHeader};
pub use segment::{OwnedSegment, SegmentInfo, StoreKind, ViewedSegment};
pub use stores::{
    BookkeepingFlags, FrameStoreView, GpuStatics, OwnedFrameStore, OwnedGpuStore,
    OwnedSystemStore, SystemStatics, TelemetryStoreView, ViewedFrameStore, ViewedGpuStore,
    ViewedSystemStore,
};
pub use telemetry_map::{RingSetVariant, TelemetryMapView};
