//! # Frametap Common
//!
//! Shared definitions for the frametap telemetry pipeline: the wire-level
//! frame record and telemetry sample layouts, bounded inline collections,
//! the metric registry, capability bitsets and QPC timestamp math.
//!
//! Everything that crosses a process boundary through shared memory lives
//! here so that producer and consumers compile against a single source of
//! truth for struct layout (all cross-process types are `#[repr(C)]` with
//! their sizes pinned by `static_assertions`).

pub mod caps_bits;
pub mod consts;
pub mod error;
pub mod fixed_vec;
pub mod frame;
pub mod inline_str;
pub mod metric;
pub mod qpc;
pub mod sample;

pub use caps_bits::{CpuCapabilityBits, GpuCapabilityBits};
pub use error::CollectionError;
pub use fixed_vec::FixedCapVec;
pub use frame::{
    DisplayedInstance, FrameRecord, FrameType, InputDeviceType, InputSample, PresentResult,
};
pub use inline_str::InlineStr;
pub use metric::{DeviceType, MetricId, MetricKind, Unit, ValueKind, Vendor};
pub use qpc::QpcConverter;
pub use sample::TelemetrySample;
