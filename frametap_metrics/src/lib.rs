//! # Frametap Metrics
//!
//! The per-swapchain metrics calculation engine: turns a stream of raw
//! present records into one metrics record per displayed frame instance.
//!
//! The central subtlety is *postponement*: the displayed duration of a
//! frame's last displayed instance is only known once the next displayed
//! frame arrives, so that instance is held back and emitted retroactively.
//! Collapsed presents (a later frame pacing-flipped onto an earlier
//! screen slot) are repaired by raising the effective screen time and
//! charging the difference to the flip delay.
//!
//! The engine is pure state-machine code: no IO, no locks, no panics on
//! hostile input. Feed it records in present-start order per swap-chain.

pub mod calculator;
pub mod swap_chain;
pub mod types;

pub use calculator::{compute_metrics_for_present, CalculatorError, MetricsCalculator};
pub use swap_chain::{
    calculate_animation_time, calculate_cpu_start, calculate_sim_start, AnimationErrorSource,
    SwapChainCoreState,
};
pub use types::{DisplayIndexing, FrameMetrics, MetricsRecord};
