//! Capability bit words reported by telemetry providers.
//!
//! Providers advertise what their hardware can sample as a flag word;
//! the service converts these into the metric-id capability map at
//! device registration.

use bitflags::bitflags;

bitflags! {
    /// Capability bits advertised by a GPU telemetry provider.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GpuCapabilityBits: u64 {
        /// GPU package power.
        const POWER = 1 << 0;
        /// GPU voltage.
        const VOLTAGE = 1 << 1;
        /// GPU clock frequency.
        const FREQUENCY = 1 << 2;
        /// GPU temperature.
        const TEMPERATURE = 1 << 3;
        /// Fan 0 tachometer.
        const FAN_0 = 1 << 4;
        /// Fan 1 tachometer.
        const FAN_1 = 1 << 5;
        /// Fan 2 tachometer.
        const FAN_2 = 1 << 6;
        /// Fan 3 tachometer.
        const FAN_3 = 1 << 7;
        /// Fan 4 tachometer.
        const FAN_4 = 1 << 8;
        /// Aggregate GPU utilization.
        const UTILIZATION = 1 << 9;
        /// 3D/compute engine utilization.
        const RENDER_COMPUTE_UTILIZATION = 1 << 10;
        /// Media engine utilization.
        const MEDIA_UTILIZATION = 1 << 11;
        /// Memory power.
        const MEM_POWER = 1 << 12;
        /// Memory voltage.
        const MEM_VOLTAGE = 1 << 13;
        /// Memory clock frequency.
        const MEM_FREQUENCY = 1 << 14;
        /// Memory effective (data-rate) frequency.
        const MEM_EFFECTIVE_FREQUENCY = 1 << 15;
        /// Memory used bytes.
        const MEM_USED = 1 << 16;
        /// Memory write bandwidth.
        const MEM_WRITE_BANDWIDTH = 1 << 17;
        /// Memory read bandwidth.
        const MEM_READ_BANDWIDTH = 1 << 18;
        /// Power-limited throttle flag.
        const POWER_LIMITED = 1 << 19;
        /// Temperature-limited throttle flag.
        const TEMPERATURE_LIMITED = 1 << 20;
        /// Current-limited throttle flag.
        const CURRENT_LIMITED = 1 << 21;
        /// Utilization-limited throttle flag.
        const UTILIZATION_LIMITED = 1 << 22;
        /// Static: memory size known.
        const MEM_SIZE = 1 << 23;
        /// Static: max memory bandwidth known.
        const MEM_MAX_BANDWIDTH = 1 << 24;
        /// Static: sustained power limit known.
        const SUSTAINED_POWER_LIMIT = 1 << 25;
    }
}

bitflags! {
    /// Capability bits advertised by a CPU telemetry provider.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CpuCapabilityBits: u64 {
        /// Aggregate CPU utilization.
        const UTILIZATION = 1 << 0;
        /// Package power.
        const POWER = 1 << 1;
        /// Package temperature.
        const TEMPERATURE = 1 << 2;
        /// Effective frequency.
        const FREQUENCY = 1 << 3;
        /// Static: package power limit known.
        const POWER_LIMIT = 1 << 4;
        /// Per-core utility (array metric, one element per core).
        const CORE_UTILITY = 1 << 5;
    }
}

impl GpuCapabilityBits {
    /// All per-fan bits in index order.
    pub const FAN_BITS: [GpuCapabilityBits; 5] = [
        GpuCapabilityBits::FAN_0,
        GpuCapabilityBits::FAN_1,
        GpuCapabilityBits::FAN_2,
        GpuCapabilityBits::FAN_3,
        GpuCapabilityBits::FAN_4,
    ];

    /// Number of fans advertised.
    pub fn fan_count(self) -> usize {
        Self::FAN_BITS.iter().filter(|b| self.contains(**b)).count()
    }
}
