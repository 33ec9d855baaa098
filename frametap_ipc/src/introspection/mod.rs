//! Introspection store: the self-describing tree of devices, metrics,
//! enums and units hosted in the introspection segment.
//!
//! The tree is arena-based: fixed-capacity vectors of plain records,
//! cross-referenced by integer ids, so the whole root is one `#[repr(C)]`
//! value living directly in shared memory. The service mutates it only
//! during the build phase under the exclusive lock; after the holdoff
//! semaphore is posted, readers take shared locks and clone (see
//! [`clone`]).

pub mod clone;

use crate::caps::MetricCapabilities;
use crate::error::{IpcError, IpcResult};
use frametap_common::fixed_vec::FixedCapVec;
use frametap_common::frame::{FrameType, PresentResult};
use frametap_common::inline_str::InlineStr;
use frametap_common::metric::{DeviceType, MetricId, Unit, Vendor};

/// Maximum registered devices (including the device-independent 0).
pub const MAX_DEVICES: usize = 8;
/// Maximum metrics in the registry.
pub const MAX_METRICS: usize = 64;
/// Maximum introspected enums.
pub const MAX_ENUMS: usize = 8;
/// Maximum introspected units.
pub const MAX_UNITS: usize = 16;
/// Maximum per-metric device availability records.
pub const MAX_DEVICE_INFOS: usize = 8;
/// Maximum keys per introspected enum.
pub const MAX_ENUM_KEYS: usize = 16;

/// Ids of the enums published through introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EnumId {
    /// `FrameType`.
    FrameType = 1,
    /// `PresentResult`.
    PresentResult = 2,
    /// `Vendor`.
    Vendor = 3,
    /// `DeviceType`.
    DeviceType = 4,
    /// `Unit`.
    Unit = 5,
}

/// One registered device.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceInfo {
    /// Device id; 0 is the device-independent pseudo device.
    pub id: u32,
    /// Raw `DeviceType` discriminant.
    pub device_type: u32,
    /// Raw `Vendor` discriminant.
    pub vendor: u32,
    _pad: u32,
    /// Device display name.
    pub name: InlineStr<64>,
}

impl DeviceInfo {
    /// Creates a device record.
    pub fn new(id: u32, device_type: DeviceType, vendor: Vendor, name: &str) -> Self {
        Self {
            id,
            device_type: device_type as u32,
            vendor: vendor as u32,
            _pad: 0,
            name: InlineStr::from_str_lossy(name),
        }
    }
}

/// Per-device availability of one metric.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceMetricInfo {
    /// Device the metric is available on.
    pub device_id: u32,
    /// Array dimension on that device.
    pub array_count: u32,
    /// Nonzero when available.
    pub available: u32,
}

/// One metric of the registry.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricInfo {
    /// Raw metric id.
    pub id: u32,
    /// Raw `MetricKind` discriminant.
    pub kind: u8,
    /// Raw `ValueKind` discriminant.
    pub value_kind: u8,
    /// Raw `Unit` discriminant.
    pub unit: u8,
    _pad: u8,
    /// Display name.
    pub name: InlineStr<48>,
    /// Per-device availability records.
    pub device_infos: FixedCapVec<DeviceMetricInfo, MAX_DEVICE_INFOS>,
}

/// One key of an introspected enum.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct EnumKeyInfo {
    /// Numeric value of the key.
    pub value: i32,
    _pad: u32,
    /// Key symbol.
    pub symbol: InlineStr<40>,
}

/// One introspected enum.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct EnumInfo {
    /// Raw `EnumId`.
    pub id: u32,
    _pad: u32,
    /// Enum symbol.
    pub symbol: InlineStr<40>,
    /// Enum keys.
    pub keys: FixedCapVec<EnumKeyInfo, MAX_ENUM_KEYS>,
}

/// One introspected unit.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitInfo {
    /// Raw `Unit` discriminant.
    pub id: u32,
    /// Unit symbol.
    pub symbol: InlineStr<12>,
}

/// Root of the introspection tree.
#[repr(C)]
pub struct IntrospectionRoot {
    /// Registered devices.
    pub devices: FixedCapVec<DeviceInfo, MAX_DEVICES>,
    /// Metric registry.
    pub metrics: FixedCapVec<MetricInfo, MAX_METRICS>,
    /// Introspected enums.
    pub enums: FixedCapVec<EnumInfo, MAX_ENUMS>,
    /// Introspected units.
    pub units: FixedCapVec<UnitInfo, MAX_UNITS>,
}

impl Default for IntrospectionRoot {
    fn default() -> Self {
        Self {
            devices: FixedCapVec::new(),
            metrics: FixedCapVec::new(),
            enums: FixedCapVec::new(),
            units: FixedCapVec::new(),
        }
    }
}

fn full(what: &'static str) -> impl FnOnce(frametap_common::error::CollectionError) -> IpcError {
    move |_| IpcError::IntrospectionFull { what }
}

impl IntrospectionRoot {
    /// Populates the static portion of the tree: the metric registry,
    /// enums, units and the device-independent device 0.
    ///
    /// Called once by the service before any device registration.
    pub fn populate(&mut self) -> IpcResult<()> {
        self.devices.clear();
        self.metrics.clear();
        self.enums.clear();
        self.units.clear();

        for &metric in MetricId::ALL {
            self.metrics
                .push(MetricInfo {
                    id: metric as u32,
                    kind: metric.kind() as u8,
                    value_kind: metric.value_kind() as u8,
                    unit: metric.unit() as u8,
                    _pad: 0,
                    name: InlineStr::from_str_lossy(metric.display_name()),
                    device_infos: FixedCapVec::new(),
                })
                .map_err(full("metrics"))?;
        }

        self.populate_enums()?;

        for &unit in Unit::ALL {
            self.units
                .push(UnitInfo {
                    id: unit as u32,
                    symbol: InlineStr::from_str_lossy(unit.symbol()),
                })
                .map_err(full("units"))?;
        }

        self.add_device(DeviceInfo::new(
            0,
            DeviceType::Independent,
            Vendor::Unknown,
            "Device-independent",
        ))?;
        Ok(())
    }

    fn populate_enums(&mut self) -> IpcResult<()> {
        let tables: [(EnumId, &str, &[(i32, &str)]); 5] = [
            (
                EnumId::FrameType,
                "FrameType",
                &[
                    (FrameType::NotSet as i32, "NotSet"),
                    (FrameType::Unspecified as i32, "Unspecified"),
                    (FrameType::Application as i32, "Application"),
                    (FrameType::Repeated as i32, "Repeated"),
                    (FrameType::IntelXefg as i32, "IntelXefg"),
                    (FrameType::AmdAfmf as i32, "AmdAfmf"),
                ],
            ),
            (
                EnumId::PresentResult,
                "PresentResult",
                &[
                    (PresentResult::Unknown as i32, "Unknown"),
                    (PresentResult::Presented as i32, "Presented"),
                    (PresentResult::Discarded as i32, "Discarded"),
                ],
            ),
            (
                EnumId::Vendor,
                "Vendor",
                &[
                    (Vendor::Unknown as i32, "Unknown"),
                    (Vendor::Intel as i32, "Intel"),
                    (Vendor::Nvidia as i32, "Nvidia"),
                    (Vendor::Amd as i32, "Amd"),
                ],
            ),
            (
                EnumId::DeviceType,
                "DeviceType",
                &[
                    (DeviceType::Independent as i32, "Independent"),
                    (DeviceType::GraphicsAdapter as i32, "GraphicsAdapter"),
                    (DeviceType::System as i32, "System"),
                ],
            ),
            (
                EnumId::Unit,
                "Unit",
                &[
                    (Unit::Dimensionless as i32, "Dimensionless"),
                    (Unit::Boolean as i32, "Boolean"),
                    (Unit::Milliseconds as i32, "Milliseconds"),
                    (Unit::Percent as i32, "Percent"),
                    (Unit::Watts as i32, "Watts"),
                    (Unit::Volts as i32, "Volts"),
                    (Unit::Megahertz as i32, "Megahertz"),
                    (Unit::Celsius as i32, "Celsius"),
                    (Unit::Rpm as i32, "Rpm"),
                    (Unit::Bytes as i32, "Bytes"),
                    (Unit::BytesPerSecond as i32, "BytesPerSecond"),
                ],
            ),
        ];

        for (id, symbol, keys) in tables {
            let mut info = EnumInfo {
                id: id as u32,
                _pad: 0,
                symbol: InlineStr::from_str_lossy(symbol),
                keys: FixedCapVec::new(),
            };
            for &(value, key_symbol) in keys {
                info.keys
                    .push(EnumKeyInfo {
                        value,
                        _pad: 0,
                        symbol: InlineStr::from_str_lossy(key_symbol),
                    })
                    .map_err(full("enum keys"))?;
            }
            self.enums.push(info).map_err(full("enums"))?;
        }
        Ok(())
    }

    /// Appends a device record.
    pub fn add_device(&mut self, device: DeviceInfo) -> IpcResult<()> {
        self.devices.push(device).map_err(full("devices"))
    }

    /// Records `caps` as availability of metrics on `device_id`.
    pub fn set_device_metric_availability(
        &mut self,
        device_id: u32,
        caps: &MetricCapabilities,
    ) -> IpcResult<()> {
        for (metric, array_count) in caps.iter() {
            let info = self
                .metrics
                .as_mut_slice()
                .iter_mut()
                .find(|m| m.id == metric as u32)
                .ok_or(IpcError::NotPresent {
                    what: "introspection metric",
                    key: metric as u32 as u64,
                })?;
            info.device_infos
                .push(DeviceMetricInfo {
                    device_id,
                    array_count: array_count as u32,
                    available: 1,
                })
                .map_err(full("device metric infos"))?;
        }
        Ok(())
    }

    /// Finds a metric record by id.
    pub fn find_metric(&self, metric: MetricId) -> Option<&MetricInfo> {
        self.metrics.iter().find(|m| m.id == metric as u32)
    }

    /// Ids of registered GPU devices.
    pub fn gpu_device_ids(&self) -> Vec<u32> {
        self.devices
            .iter()
            .filter(|d| d.device_type == DeviceType::GraphicsAdapter as u32)
            .map(|d| d.id)
            .collect()
    }

    /// Sorts every arena by id. Called once at finalization.
    pub fn sort(&mut self) {
        self.devices.as_mut_slice().sort_by_key(|d| d.id);
        self.metrics.as_mut_slice().sort_by_key(|m| m.id);
        self.enums.as_mut_slice().sort_by_key(|e| e.id);
        self.units.as_mut_slice().sort_by_key(|u| u.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed_root() -> Box<IntrospectionRoot> {
        // ~20 KiB; in production the root lives in the segment.
        Box::default()
    }

    #[test]
    fn test_populate_fills_registry() {
        let mut root = boxed_root();
        root.populate().unwrap();
        assert_eq!(root.metrics.len(), MetricId::ALL.len());
        assert_eq!(root.units.len(), Unit::ALL.len());
        assert_eq!(root.enums.len(), 5);
        assert_eq!(root.devices.len(), 1);
        assert_eq!(root.devices[0].id, 0);
        assert!(root.find_metric(MetricId::GpuPower).is_some());
    }

    #[test]
    fn test_availability_and_gpu_ids() {
        let mut root = boxed_root();
        root.populate().unwrap();
        root.add_device(DeviceInfo::new(
            1,
            DeviceType::GraphicsAdapter,
            Vendor::Intel,
            "Arc",
        ))
        .unwrap();
        let mut caps = MetricCapabilities::new();
        caps.set(MetricId::GpuPower, 1);
        caps.set(MetricId::GpuFanSpeed, 2);
        root.set_device_metric_availability(1, &caps).unwrap();

        let metric = root.find_metric(MetricId::GpuFanSpeed).unwrap();
        assert_eq!(metric.device_infos.len(), 1);
        assert_eq!(metric.device_infos[0].device_id, 1);
        assert_eq!(metric.device_infos[0].array_count, 2);
        assert_eq!(root.gpu_device_ids(), vec![1]);
    }

    #[test]
    fn test_sort_orders_by_id() {
        let mut root = boxed_root();
        root.populate().unwrap();
        root.add_device(DeviceInfo::new(
            2,
            DeviceType::GraphicsAdapter,
            Vendor::Amd,
            "B",
        ))
        .unwrap();
        // push out of order on purpose
        let second = root.devices[1];
        root.devices.as_mut_slice()[0] = second;
        root.devices.as_mut_slice()[1] =
            DeviceInfo::new(0, DeviceType::Independent, Vendor::Unknown, "zero");
        root.sort();
        let ids: Vec<u32> = root.devices.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![0, 2]);
        let metric_ids: Vec<u32> = root.metrics.iter().map(|m| m.id).collect();
        let mut sorted = metric_ids.clone();
        sorted.sort_unstable();
        assert_eq!(metric_ids, sorted);
    }
}
