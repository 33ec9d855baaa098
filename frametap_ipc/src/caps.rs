//! Device metric capabilities.
//!
//! Telemetry providers advertise capability bit words; registration turns
//! them into a `metric id -> array count` map that drives both
//! introspection availability and telemetry ring allocation.

use frametap_common::caps_bits::{CpuCapabilityBits, GpuCapabilityBits};
use frametap_common::metric::{MetricId, MetricKind};
use std::collections::BTreeMap;

/// Mapping from metric id to array count.
///
/// A zero count means "unavailable" and is suppressed at insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricCapabilities {
    caps: BTreeMap<MetricId, usize>,
}

impl MetricCapabilities {
    /// Creates an empty capability set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `metric` available with `array_count` elements.
    ///
    /// Zero-sized capabilities are effectively "not available" and are
    /// ignored rather than stored.
    pub fn set(&mut self, metric: MetricId, array_count: usize) {
        if array_count == 0 {
            return;
        }
        self.caps.insert(metric, array_count);
    }

    /// Union with another capability set; overlaps are overwritten.
    pub fn merge(&mut self, other: &MetricCapabilities) {
        for (&metric, &count) in &other.caps {
            self.set(metric, count);
        }
    }

    /// Array count of `metric`; 0 when unavailable.
    pub fn check(&self, metric: MetricId) -> usize {
        self.caps.get(&metric).copied().unwrap_or(0)
    }

    /// Iterates `(metric, array count)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (MetricId, usize)> + '_ {
        self.caps.iter().map(|(&m, &c)| (m, c))
    }

    /// Number of available metrics.
    pub fn len(&self) -> usize {
        self.caps.len()
    }

    /// True when nothing is available.
    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }
}

/// Whether a metric receives telemetry rings at registration.
///
/// Static metrics live in store statics; middleware-derived metrics are
/// computed client-side from other rings.
pub fn receives_ring(metric: MetricId) -> bool {
    metric.kind() == MetricKind::Dynamic && !metric.is_middleware_derived()
}

/// Converts a GPU provider's capability bits into metric capabilities.
pub fn gpu_caps_from_bits(bits: GpuCapabilityBits) -> MetricCapabilities {
    use GpuCapabilityBits as B;
    let mut caps = MetricCapabilities::new();

    // Name and vendor exist for any registered device.
    caps.set(MetricId::GpuName, 1);
    caps.set(MetricId::GpuVendor, 1);

    let scalar_bits = [
        (B::POWER, MetricId::GpuPower),
        (B::VOLTAGE, MetricId::GpuVoltage),
        (B::FREQUENCY, MetricId::GpuFrequency),
        (B::TEMPERATURE, MetricId::GpuTemperature),
        (B::UTILIZATION, MetricId::GpuUtilization),
        (B::RENDER_COMPUTE_UTILIZATION, MetricId::GpuRenderComputeUtilization),
        (B::MEDIA_UTILIZATION, MetricId::GpuMediaUtilization),
        (B::MEM_POWER, MetricId::GpuMemPower),
        (B::MEM_VOLTAGE, MetricId::GpuMemVoltage),
        (B::MEM_FREQUENCY, MetricId::GpuMemFrequency),
        (B::MEM_EFFECTIVE_FREQUENCY, MetricId::GpuMemEffectiveFrequency),
        (B::MEM_USED, MetricId::GpuMemUsed),
        (B::MEM_WRITE_BANDWIDTH, MetricId::GpuMemWriteBandwidth),
        (B::MEM_READ_BANDWIDTH, MetricId::GpuMemReadBandwidth),
        (B::POWER_LIMITED, MetricId::GpuPowerLimited),
        (B::TEMPERATURE_LIMITED, MetricId::GpuTemperatureLimited),
        (B::CURRENT_LIMITED, MetricId::GpuCurrentLimited),
        (B::UTILIZATION_LIMITED, MetricId::GpuUtilizationLimited),
        (B::MEM_SIZE, MetricId::GpuMemSize),
        (B::MEM_MAX_BANDWIDTH, MetricId::GpuMemMaxBandwidth),
        (B::SUSTAINED_POWER_LIMIT, MetricId::GpuSustainedPowerLimit),
    ];
    for (bit, metric) in scalar_bits {
        if bits.contains(bit) {
            caps.set(metric, 1);
        }
    }

    let fans = bits.fan_count();
    caps.set(MetricId::GpuFanSpeed, fans);
    // Derived percent metric tracks the fan array dimension.
    caps.set(MetricId::GpuFanSpeedPercent, fans);
    if bits.contains(B::MEM_USED) && bits.contains(B::MEM_SIZE) {
        caps.set(MetricId::GpuMemUtilization, 1);
    }

    caps
}

/// Converts a CPU provider's capability bits into metric capabilities.
pub fn cpu_caps_from_bits(bits: CpuCapabilityBits, core_count: usize) -> MetricCapabilities {
    use CpuCapabilityBits as B;
    let mut caps = MetricCapabilities::new();

    caps.set(MetricId::CpuName, 1);
    caps.set(MetricId::CpuVendor, 1);

    let scalar_bits = [
        (B::UTILIZATION, MetricId::CpuUtilization),
        (B::POWER, MetricId::CpuPower),
        (B::TEMPERATURE, MetricId::CpuTemperature),
        (B::FREQUENCY, MetricId::CpuFrequency),
        (B::POWER_LIMIT, MetricId::CpuPowerLimit),
    ];
    for (bit, metric) in scalar_bits {
        if bits.contains(bit) {
            caps.set(metric, 1);
        }
    }
    if bits.contains(B::CORE_UTILITY) {
        caps.set(MetricId::CpuCoreUtility, core_count);
    }

    caps
}
