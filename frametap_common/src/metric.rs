//! Metric registry: ids, kinds, value types and units.
//!
//! The registry is the compile-time source for introspection population
//! and for telemetry ring allocation; device capabilities reference
//! metrics by these ids.

/// Stable metric identifier used across the shared memory boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum MetricId {
    // GPU statics
    GpuName = 1,
    GpuVendor = 2,
    GpuMemSize = 3,
    GpuMemMaxBandwidth = 4,
    GpuSustainedPowerLimit = 5,

    // GPU telemetry
    GpuPower = 10,
    GpuVoltage = 11,
    GpuFrequency = 12,
    GpuTemperature = 13,
    GpuFanSpeed = 14,
    GpuFanSpeedPercent = 15,
    GpuUtilization = 16,
    GpuRenderComputeUtilization = 17,
    GpuMediaUtilization = 18,
    GpuMemPower = 19,
    GpuMemVoltage = 20,
    GpuMemFrequency = 21,
    GpuMemEffectiveFrequency = 22,
    GpuMemUsed = 23,
    GpuMemWriteBandwidth = 24,
    GpuMemReadBandwidth = 25,
    GpuMemUtilization = 26,
    GpuPowerLimited = 27,
    GpuTemperatureLimited = 28,
    GpuCurrentLimited = 29,
    GpuUtilizationLimited = 30,

    // CPU / system
    CpuName = 40,
    CpuVendor = 41,
    CpuPowerLimit = 42,
    CpuUtilization = 43,
    CpuPower = 44,
    CpuTemperature = 45,
    CpuFrequency = 46,
    CpuCoreUtility = 47,

    // Frame-derived metrics (computed from the frame stream, never
    // allocated telemetry rings)
    MsBetweenPresents = 60,
    MsInPresentApi = 61,
    MsUntilRenderComplete = 62,
    MsUntilDisplayed = 63,
    MsDisplayedTime = 64,
    MsBetweenDisplayChange = 65,
    MsFlipDelay = 66,
}

/// How a metric's values come to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MetricKind {
    /// Fixed for the lifetime of a device; published in store statics.
    Static = 0,
    /// Periodically sampled hardware telemetry.
    Dynamic = 1,
    /// Derived from the frame stream by the metrics calculator.
    FrameEvent = 2,
}

/// Scalar type of a metric's samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueKind {
    /// 64-bit float. Integer and enum metrics coerce here at push.
    F64 = 0,
    /// 64-bit unsigned integer.
    U64 = 1,
    /// Boolean flag.
    Bool = 2,
}

impl ValueKind {
    /// Decodes a raw wire value. Returns `None` for unknown values.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::F64),
            1 => Some(Self::U64),
            2 => Some(Self::Bool),
            _ => None,
        }
    }
}

/// Measurement unit of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Unit {
    Dimensionless = 0,
    Boolean = 1,
    Milliseconds = 2,
    Percent = 3,
    Watts = 4,
    Volts = 5,
    Megahertz = 6,
    Celsius = 7,
    Rpm = 8,
    Bytes = 9,
    BytesPerSecond = 10,
}

impl Unit {
    /// Every unit, in id order.
    pub const ALL: &'static [Unit] = &[
        Unit::Dimensionless,
        Unit::Boolean,
        Unit::Milliseconds,
        Unit::Percent,
        Unit::Watts,
        Unit::Volts,
        Unit::Megahertz,
        Unit::Celsius,
        Unit::Rpm,
        Unit::Bytes,
        Unit::BytesPerSecond,
    ];

    /// Short display symbol.
    pub const fn symbol(self) -> &'static str {
        match self {
            Unit::Dimensionless => "",
            Unit::Boolean => "bool",
            Unit::Milliseconds => "ms",
            Unit::Percent => "%",
            Unit::Watts => "W",
            Unit::Volts => "V",
            Unit::Megahertz => "MHz",
            Unit::Celsius => "C",
            Unit::Rpm => "rpm",
            Unit::Bytes => "B",
            Unit::BytesPerSecond => "B/s",
        }
    }
}

/// Hardware vendor of a registered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Vendor {
    /// Vendor not identified.
    Unknown = 0,
    /// Intel Corporation.
    Intel = 1,
    /// NVIDIA Corporation.
    Nvidia = 2,
    /// Advanced Micro Devices.
    Amd = 3,
}

impl Vendor {
    /// Decodes a raw wire value, falling back to `Unknown`.
    pub const fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::Intel,
            2 => Self::Nvidia,
            3 => Self::Amd,
            _ => Self::Unknown,
        }
    }
}

/// Category of a registered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceType {
    /// Device-independent pseudo device (id 0).
    Independent = 0,
    /// Graphics adapter.
    GraphicsAdapter = 1,
    /// The host system / CPU.
    System = 2,
}

impl MetricId {
    /// Every metric known to the pipeline, in id order.
    pub const ALL: &'static [MetricId] = &[
        MetricId::GpuName,
        MetricId::GpuVendor,
        MetricId::GpuMemSize,
        MetricId::GpuMemMaxBandwidth,
        MetricId::GpuSustainedPowerLimit,
        MetricId::GpuPower,
        MetricId::GpuVoltage,
        MetricId::GpuFrequency,
        MetricId::GpuTemperature,
        MetricId::GpuFanSpeed,
        MetricId::GpuFanSpeedPercent,
        MetricId::GpuUtilization,
        MetricId::GpuRenderComputeUtilization,
        MetricId::GpuMediaUtilization,
        MetricId::GpuMemPower,
        MetricId::GpuMemVoltage,
        MetricId::GpuMemFrequency,
        MetricId::GpuMemEffectiveFrequency,
        MetricId::GpuMemUsed,
        MetricId::GpuMemWriteBandwidth,
        MetricId::GpuMemReadBandwidth,
        MetricId::GpuMemUtilization,
        MetricId::GpuPowerLimited,
        MetricId::GpuTemperatureLimited,
        MetricId::GpuCurrentLimited,
        MetricId::GpuUtilizationLimited,
        MetricId::CpuName,
        MetricId::CpuVendor,
        MetricId::CpuPowerLimit,
        MetricId::CpuUtilization,
        MetricId::CpuPower,
        MetricId::CpuTemperature,
        MetricId::CpuFrequency,
        MetricId::CpuCoreUtility,
        MetricId::MsBetweenPresents,
        MetricId::MsInPresentApi,
        MetricId::MsUntilRenderComplete,
        MetricId::MsUntilDisplayed,
        MetricId::MsDisplayedTime,
        MetricId::MsBetweenDisplayChange,
        MetricId::MsFlipDelay,
    ];

    /// Looks a metric up by its raw id.
    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| *m as u32 == value)
    }

    /// How values of this metric come to exist.
    pub const fn kind(self) -> MetricKind {
        use MetricId::*;
        match self {
            GpuName | GpuVendor | GpuMemSize | GpuMemMaxBandwidth | GpuSustainedPowerLimit
            | CpuName | CpuVendor | CpuPowerLimit => MetricKind::Static,
            MsBetweenPresents | MsInPresentApi | MsUntilRenderComplete | MsUntilDisplayed
            | MsDisplayedTime | MsBetweenDisplayChange | MsFlipDelay => MetricKind::FrameEvent,
            _ => MetricKind::Dynamic,
        }
    }

    /// Scalar type stored in this metric's rings.
    pub const fn value_kind(self) -> ValueKind {
        use MetricId::*;
        match self {
            GpuMemSize | GpuMemMaxBandwidth | GpuMemUsed => ValueKind::U64,
            GpuPowerLimited | GpuTemperatureLimited | GpuCurrentLimited | GpuUtilizationLimited => {
                ValueKind::Bool
            }
            // Name/vendor statics are strings and enums on the statics
            // block; their introspection value kind is the coerced f64.
            _ => ValueKind::F64,
        }
    }

    /// Measurement unit.
    pub const fn unit(self) -> Unit {
        use MetricId::*;
        match self {
            GpuName | GpuVendor | CpuName | CpuVendor => Unit::Dimensionless,
            GpuMemSize | GpuMemUsed => Unit::Bytes,
            GpuMemMaxBandwidth | GpuMemWriteBandwidth | GpuMemReadBandwidth => Unit::BytesPerSecond,
            GpuSustainedPowerLimit | GpuPower | GpuMemPower | CpuPowerLimit | CpuPower => {
                Unit::Watts
            }
            GpuVoltage | GpuMemVoltage => Unit::Volts,
            GpuFrequency | GpuMemFrequency | GpuMemEffectiveFrequency | CpuFrequency => {
                Unit::Megahertz
            }
            GpuTemperature | CpuTemperature => Unit::Celsius,
            GpuFanSpeed => Unit::Rpm,
            GpuFanSpeedPercent | GpuUtilization | GpuRenderComputeUtilization
            | GpuMediaUtilization | GpuMemUtilization | CpuUtilization | CpuCoreUtility => {
                Unit::Percent
            }
            GpuPowerLimited | GpuTemperatureLimited | GpuCurrentLimited | GpuUtilizationLimited => {
                Unit::Boolean
            }
            MsBetweenPresents | MsInPresentApi | MsUntilRenderComplete | MsUntilDisplayed
            | MsDisplayedTime | MsBetweenDisplayChange | MsFlipDelay => Unit::Milliseconds,
        }
    }

    /// Device category this metric belongs to.
    pub const fn device_type(self) -> DeviceType {
        use MetricId::*;
        match self {
            CpuName | CpuVendor | CpuPowerLimit | CpuUtilization | CpuPower | CpuTemperature
            | CpuFrequency | CpuCoreUtility => DeviceType::System,
            MsBetweenPresents | MsInPresentApi | MsUntilRenderComplete | MsUntilDisplayed
            | MsDisplayedTime | MsBetweenDisplayChange | MsFlipDelay => DeviceType::Independent,
            _ => DeviceType::GraphicsAdapter,
        }
    }

    /// Display name used in introspection.
    pub const fn display_name(self) -> &'static str {
        use MetricId::*;
        match self {
            GpuName => "GPU Name",
            GpuVendor => "GPU Vendor",
            GpuMemSize => "GPU Memory Size",
            GpuMemMaxBandwidth => "GPU Memory Max Bandwidth",
            GpuSustainedPowerLimit => "GPU Sustained Power Limit",
            GpuPower => "GPU Power",
            GpuVoltage => "GPU Voltage",
            GpuFrequency => "GPU Frequency",
            GpuTemperature => "GPU Temperature",
            GpuFanSpeed => "GPU Fan Speed",
            GpuFanSpeedPercent => "GPU Fan Speed Percent",
            GpuUtilization => "GPU Utilization",
            GpuRenderComputeUtilization => "3D/Compute Utilization",
            GpuMediaUtilization => "Media Utilization",
            GpuMemPower => "GPU Memory Power",
            GpuMemVoltage => "GPU Memory Voltage",
            GpuMemFrequency => "GPU Memory Frequency",
            GpuMemEffectiveFrequency => "GPU Memory Effective Frequency",
            GpuMemUsed => "GPU Memory Used",
            GpuMemWriteBandwidth => "GPU Memory Write Bandwidth",
            GpuMemReadBandwidth => "GPU Memory Read Bandwidth",
            GpuMemUtilization => "GPU Memory Utilization",
            GpuPowerLimited => "GPU Power Limited",
            GpuTemperatureLimited => "GPU Temperature Limited",
            GpuCurrentLimited => "GPU Current Limited",
            GpuUtilizationLimited => "GPU Utilization Limited",
            CpuName => "CPU Name",
            CpuVendor => "CPU Vendor",
            CpuPowerLimit => "CPU Power Limit",
            CpuUtilization => "CPU Utilization",
            CpuPower => "CPU Power",
            CpuTemperature => "CPU Temperature",
            CpuFrequency => "CPU Frequency",
            CpuCoreUtility => "CPU Core Utility",
            MsBetweenPresents => "Time Between Presents",
            MsInPresentApi => "Time In Present API",
            MsUntilRenderComplete => "Time Until Render Complete",
            MsUntilDisplayed => "Time Until Displayed",
            MsDisplayedTime => "Displayed Time",
            MsBetweenDisplayChange => "Time Between Display Change",
            MsFlipDelay => "Flip Delay",
        }
    }

    /// Middleware-derived metrics are introspectable but never allocated
    /// telemetry rings; clients compute them from other rings.
    pub const fn is_middleware_derived(self) -> bool {
        matches!(self, MetricId::GpuFanSpeedPercent | MetricId::GpuMemUtilization)
    }
}
