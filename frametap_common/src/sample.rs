//! Timestamped telemetry sample layout.

use crate::metric::ValueKind;
use static_assertions::const_assert_eq;

/// Marker for scalar types storable in telemetry rings.
///
/// The three implementations are the exact variant arms of the telemetry
/// map; integer and enum metrics coerce to `f64` before they get here.
pub trait TelemetryValue: Copy + Default + PartialEq + std::fmt::Debug + 'static {
    /// Discriminant matching this scalar type.
    const VALUE_KIND: ValueKind;
}

impl TelemetryValue for f64 {
    const VALUE_KIND: ValueKind = ValueKind::F64;
}

impl TelemetryValue for u64 {
    const VALUE_KIND: ValueKind = ValueKind::U64;
}

impl TelemetryValue for bool {
    const VALUE_KIND: ValueKind = ValueKind::Bool;
}

/// One sample on a telemetry ring: a value and its QPC timestamp.
///
/// Cross-process layout: the value field is padded to 8 bytes so every
/// sample occupies 16 bytes regardless of the scalar type.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetrySample<T> {
    /// Sampled value.
    pub value: T,
    /// QPC timestamp of the sample.
    pub timestamp: u64,
}

impl<T> TelemetrySample<T> {
    /// Creates a sample.
    pub fn new(value: T, timestamp: u64) -> Self {
        Self { value, timestamp }
    }
}

const_assert_eq!(std::mem::size_of::<TelemetrySample<f64>>(), 16);
const_assert_eq!(std::mem::size_of::<TelemetrySample<u64>>(), 16);
const_assert_eq!(std::mem::size_of::<TelemetrySample<bool>>(), 16);

/// Bytes one stored sample of the given scalar kind occupies: the value
/// padded to 8-byte alignment plus 8 bytes of timestamp.
pub const fn sample_bytes(kind: ValueKind) -> usize {
    let value_bytes = match kind {
        ValueKind::F64 => std::mem::size_of::<f64>(),
        ValueKind::U64 => std::mem::size_of::<u64>(),
        ValueKind::Bool => std::mem::size_of::<bool>(),
    };
    let align = std::mem::align_of::<u64>();
    let padded = (value_bytes + align - 1) / align * align;
    padded + std::mem::size_of::<u64>()
}
