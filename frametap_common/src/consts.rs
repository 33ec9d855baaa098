//! Pipeline-wide constants.
//!
//! These are the fundamental parameters of the frametap shared memory
//! system. They are the single source of truth - producer and consumer
//! crates import from here.

/// Number of trailing ring slots kept outside the advertised safe range.
///
/// Readers have no atomic snapshot of ring contents; excluding the oldest
/// `READ_MARGIN` slots from the safe range keeps in-flight overwrites away
/// from the serials a reader is told it may touch.
pub const READ_MARGIN: u64 = 4;

/// Poll cadence of a backpressured ring push while the ring is full.
pub const BACKPRESSURE_POLL_MS: u64 = 10;

/// Shared memory segments are sized to a multiple of this alignment.
pub const SEGMENT_ALIGNMENT: usize = 64 * 1024;

/// Minimum spare bytes budgeted into every segment beyond its payload.
pub const SEGMENT_LEEWAY: usize = 4 * 1024;

/// Telemetry segment size scale for GPU devices (numerator / denominator).
pub const GPU_SCALE: (usize, usize) = (3, 1);

/// Telemetry segment size scale for the system device.
pub const SYSTEM_SCALE: (usize, usize) = (2, 1);

/// Frame segment size scale.
pub const FRAME_SCALE: (usize, usize) = (3, 2);

/// Number of times the introspection holdoff semaphore is posted at
/// finalization. Sized generously so straggler readers are never blocked.
pub const INTROSPECTION_HOLDOFF_POSTS: u32 = 8;

/// Default shared memory name prefix (privileged global namespace).
pub const DEFAULT_SEGMENT_PREFIX: &str = "ftap";

/// Default number of samples per frame ring.
pub const DEFAULT_FRAME_RING_SAMPLES: usize = 5_000;

/// Default number of samples per telemetry ring.
pub const DEFAULT_TELEMETRY_RING_SAMPLES: usize = 5_000;

/// Default hardware telemetry sampling period in milliseconds.
pub const DEFAULT_TELEMETRY_PERIOD_MS: u32 = 16;

/// Default trace flush period in milliseconds (0 disables the flusher).
pub const DEFAULT_FLUSH_PERIOD_MS: u32 = 1_000;

/// Maximum displayed instances carried by one frame record.
pub const MAX_DISPLAYED_INSTANCES: usize = 10;

/// Hard cap on postponed presents queued per swap-chain.
pub const MAX_PENDING_PRESENTS: usize = 16;
