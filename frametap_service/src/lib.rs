//! # Frametap Service
//!
//! Producer-side wiring of the telemetry pipeline: present broadcast
//! into per-target frame segments, hardware telemetry sampling into the
//! device stores, client session bookkeeping with prioritized settings,
//! and the periodic trace flusher.
//!
//! The graphics tracing provider and the real hardware drivers are
//! external collaborators; this crate defines their interfaces
//! ([`presents::PresentSource`], [`telemetry::GpuTelemetryProvider`],
//! [`telemetry::CpuTelemetryProvider`]) and ships synthetic
//! implementations that exercise the full data plane.

pub mod broadcaster;
pub mod presents;
pub mod session;
pub mod telemetry;
pub mod trace_log;

pub use broadcaster::FrameBroadcaster;
pub use session::{MetricUse, SessionContext, SessionMap};
pub use telemetry::{
    qpc_now, CpuDeviceInfo, CpuTelemetryProvider, GpuDeviceInfo, GpuTelemetryProvider,
    MetricSample, SampleValue, SyntheticCpuProvider, SyntheticGpuProvider,
};

/// Initializes process-wide tracing from `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
