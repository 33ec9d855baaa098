//! Segment byte-count formulas.
//!
//! Segments are sized from their ring payload scaled per device type,
//! with a fixed leeway floor for headers and directory bookkeeping, then
//! aligned to the 64 KiB segment granularity.

use crate::caps::{receives_ring, MetricCapabilities};
use crate::layout::align_up;
use frametap_common::consts::{
    FRAME_SCALE, GPU_SCALE, SEGMENT_ALIGNMENT, SEGMENT_LEEWAY, SYSTEM_SCALE,
};
use frametap_common::frame::FrameRecord;
use frametap_common::metric::DeviceType;
use frametap_common::sample::sample_bytes;

fn scale_bytes(bytes: usize, (mul, div): (usize, usize)) -> usize {
    (bytes * mul + div - 1) / div
}

fn scale_with_leeway(payload: usize, scale: (usize, usize)) -> usize {
    let scaled = scale_bytes(payload, scale).max(payload + SEGMENT_LEEWAY);
    align_up(scaled, SEGMENT_ALIGNMENT)
}

/// Total bytes for a telemetry segment hosting rings for `caps`.
pub fn telemetry_segment_bytes(
    caps: &MetricCapabilities,
    ring_samples: usize,
    device_type: DeviceType,
) -> usize {
    let mut payload = 0usize;
    let mut ring_count = 0usize;
    for (metric, count) in caps.iter() {
        if !receives_ring(metric) {
            continue;
        }
        let per_sample = sample_bytes(metric.value_kind());
        let metric_bytes = count * ring_samples * per_sample;
        payload += metric_bytes;
        ring_count += count;
        tracing::trace!(
            metric = metric as u32,
            count,
            ring_samples,
            per_sample,
            metric_bytes,
            "telemetry metric sizing"
        );
    }

    let scale = match device_type {
        DeviceType::System => SYSTEM_SCALE,
        _ => GPU_SCALE,
    };
    let total = scale_with_leeway(payload, scale);
    tracing::debug!(
        ring_samples,
        ring_count,
        payload,
        total,
        "telemetry segment sizing"
    );
    total
}

/// Total bytes for a frame segment with `ring_samples` slots.
pub fn frame_segment_bytes(ring_samples: usize) -> usize {
    let payload = ring_samples * std::mem::size_of::<FrameRecord>();
    let total = scale_with_leeway(payload, FRAME_SCALE);
    tracing::debug!(ring_samples, payload, total, "frame segment sizing");
    total
}

/// Total bytes for the introspection segment hosting `payload` bytes of
/// sync block and introspection arenas.
pub fn introspection_segment_bytes(payload: usize) -> usize {
    align_up(payload + SEGMENT_LEEWAY, SEGMENT_ALIGNMENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use frametap_common::metric::MetricId;

    #[test]
    fn test_alignment_and_leeway_floor() {
        // empty capability set still gets the leeway floor, aligned
        let caps = MetricCapabilities::new();
        let total = telemetry_segment_bytes(&caps, 5_000, DeviceType::System);
        assert_eq!(total, SEGMENT_ALIGNMENT);
    }

    #[test]
    fn test_gpu_scaling_dominates_for_real_payloads() {
        let mut caps = MetricCapabilities::new();
        caps.set(MetricId::GpuPower, 1);
        caps.set(MetricId::GpuFanSpeed, 2);
        let ring_samples = 5_000;
        // 3 rings x 5000 samples x 16 bytes
        let payload = 3 * ring_samples * 16;
        let total = telemetry_segment_bytes(&caps, ring_samples, DeviceType::GraphicsAdapter);
        assert_eq!(total, align_up(payload * 3, SEGMENT_ALIGNMENT));
        assert_eq!(total % SEGMENT_ALIGNMENT, 0);
    }

    #[test]
    fn test_system_scale_is_double() {
        let mut caps = MetricCapabilities::new();
        caps.set(MetricId::CpuUtilization, 1);
        let ring_samples = 5_000;
        let payload = ring_samples * 16;
        let total = telemetry_segment_bytes(&caps, ring_samples, DeviceType::System);
        assert_eq!(total, align_up(payload * 2, SEGMENT_ALIGNMENT));
    }

    #[test]
    fn test_static_and_derived_metrics_are_excluded() {
        let mut with_noise = MetricCapabilities::new();
        with_noise.set(MetricId::GpuPower, 1);
        with_noise.set(MetricId::GpuName, 1); // static
        with_noise.set(MetricId::GpuFanSpeedPercent, 2); // derived
        let mut bare = MetricCapabilities::new();
        bare.set(MetricId::GpuPower, 1);
        assert_eq!(
            telemetry_segment_bytes(&with_noise, 5_000, DeviceType::GraphicsAdapter),
            telemetry_segment_bytes(&bare, 5_000, DeviceType::GraphicsAdapter)
        );
    }

    #[test]
    fn test_frame_segment_scale() {
        let samples = 5_000;
        let payload = samples * std::mem::size_of::<FrameRecord>();
        let total = frame_segment_bytes(samples);
        assert_eq!(total, align_up(payload + payload / 2, SEGMENT_ALIGNMENT));
        assert!(total >= payload + SEGMENT_LEEWAY);
    }
}
