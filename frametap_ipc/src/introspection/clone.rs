//! Flattened, pointer-free clone of the introspection tree.
//!
//! Consumers must be able to use the introspection data after releasing
//! the shared lock, so they receive a self-contained snapshot: one
//! contiguous buffer where every reference is a byte offset. The clone is
//! produced in two passes over the same walk - a probe pass that only
//! measures, then a bump pass writing into an allocation of exactly the
//! probed size.

use super::{DeviceInfo, EnumInfo, IntrospectionRoot, MetricInfo, UnitInfo};

const ALIGN: usize = 4;

/// Allocation cursor shared by the probe and bump passes.
trait FlatAlloc {
    /// Reserves `bytes` and returns their offset.
    fn alloc(&mut self, bytes: usize) -> usize;
    /// Writes `data` at `offset`. No-op while probing.
    fn write(&mut self, offset: usize, data: &[u8]);

    fn put_u32(&mut self, offset: usize, value: u32) {
        self.write(offset, &value.to_ne_bytes());
    }

    fn put_i32(&mut self, offset: usize, value: i32) {
        self.write(offset, &value.to_ne_bytes());
    }
}

/// Measures the flat size without touching memory.
struct ProbeAllocator {
    size: usize,
}

impl FlatAlloc for ProbeAllocator {
    fn alloc(&mut self, bytes: usize) -> usize {
        let offset = (self.size + ALIGN - 1) & !(ALIGN - 1);
        self.size = offset + bytes;
        offset
    }

    fn write(&mut self, _offset: usize, _data: &[u8]) {}
}

/// Writes into a buffer of exactly the probed size.
struct BumpAllocator {
    buf: Vec<u8>,
    cursor: usize,
}

impl FlatAlloc for BumpAllocator {
    fn alloc(&mut self, bytes: usize) -> usize {
        let offset = (self.cursor + ALIGN - 1) & !(ALIGN - 1);
        self.cursor = offset + bytes;
        debug_assert!(self.cursor <= self.buf.len());
        offset
    }

    fn write(&mut self, offset: usize, data: &[u8]) {
        self.buf[offset..offset + data.len()].copy_from_slice(data);
    }
}

// Flat record sizes in u32 words.
const ROOT_WORDS: usize = 8;
const DEVICE_WORDS: usize = 5;
const METRIC_WORDS: usize = 8;
const DEVICE_INFO_WORDS: usize = 3;
const ENUM_WORDS: usize = 5;
const ENUM_KEY_WORDS: usize = 3;
const UNIT_WORDS: usize = 3;

fn put_str<A: FlatAlloc>(alloc: &mut A, text: &str) -> (u32, u32) {
    let bytes = text.as_bytes();
    let offset = alloc.alloc(bytes.len());
    alloc.write(offset, bytes);
    (offset as u32, bytes.len() as u32)
}

fn put_device<A: FlatAlloc>(alloc: &mut A, offset: usize, device: &DeviceInfo) {
    let (name_off, name_len) = put_str(alloc, device.name.as_str());
    alloc.put_u32(offset, device.id);
    alloc.put_u32(offset + 4, device.device_type);
    alloc.put_u32(offset + 8, device.vendor);
    alloc.put_u32(offset + 12, name_off);
    alloc.put_u32(offset + 16, name_len);
}

fn put_metric<A: FlatAlloc>(alloc: &mut A, offset: usize, metric: &MetricInfo) {
    let (name_off, name_len) = put_str(alloc, metric.name.as_str());
    let infos_off = alloc.alloc(metric.device_infos.len() * DEVICE_INFO_WORDS * 4);
    for (i, info) in metric.device_infos.iter().enumerate() {
        let at = infos_off + i * DEVICE_INFO_WORDS * 4;
        alloc.put_u32(at, info.device_id);
        alloc.put_u32(at + 4, info.array_count);
        alloc.put_u32(at + 8, info.available);
    }
    alloc.put_u32(offset, metric.id);
    alloc.put_u32(offset + 4, metric.kind as u32);
    alloc.put_u32(offset + 8, metric.value_kind as u32);
    alloc.put_u32(offset + 12, metric.unit as u32);
    alloc.put_u32(offset + 16, name_off);
    alloc.put_u32(offset + 20, name_len);
    alloc.put_u32(offset + 24, infos_off as u32);
    alloc.put_u32(offset + 28, metric.device_infos.len() as u32);
}

fn put_enum<A: FlatAlloc>(alloc: &mut A, offset: usize, info: &EnumInfo) {
    let (symbol_off, symbol_len) = put_str(alloc, info.symbol.as_str());
    let keys_off = alloc.alloc(info.keys.len() * ENUM_KEY_WORDS * 4);
    for (i, key) in info.keys.iter().enumerate() {
        let at = keys_off + i * ENUM_KEY_WORDS * 4;
        let (key_sym_off, key_sym_len) = put_str(alloc, key.symbol.as_str());
        alloc.put_i32(at, key.value);
        alloc.put_u32(at + 4, key_sym_off);
        alloc.put_u32(at + 8, key_sym_len);
    }
    alloc.put_u32(offset, info.id);
    alloc.put_u32(offset + 4, symbol_off);
    alloc.put_u32(offset + 8, symbol_len);
    alloc.put_u32(offset + 12, keys_off as u32);
    alloc.put_u32(offset + 16, info.keys.len() as u32);
}

fn put_unit<A: FlatAlloc>(alloc: &mut A, offset: usize, unit: &UnitInfo) {
    let (symbol_off, symbol_len) = put_str(alloc, unit.symbol.as_str());
    alloc.put_u32(offset, unit.id);
    alloc.put_u32(offset + 4, symbol_off);
    alloc.put_u32(offset + 8, symbol_len);
}

fn build<A: FlatAlloc>(alloc: &mut A, root: &IntrospectionRoot) {
    let root_off = alloc.alloc(ROOT_WORDS * 4);
    debug_assert_eq!(root_off, 0);

    let devices_off = alloc.alloc(root.devices.len() * DEVICE_WORDS * 4);
    let metrics_off = alloc.alloc(root.metrics.len() * METRIC_WORDS * 4);
    let enums_off = alloc.alloc(root.enums.len() * ENUM_WORDS * 4);
    let units_off = alloc.alloc(root.units.len() * UNIT_WORDS * 4);

    for (i, device) in root.devices.iter().enumerate() {
        put_device(alloc, devices_off + i * DEVICE_WORDS * 4, device);
    }
    for (i, metric) in root.metrics.iter().enumerate() {
        put_metric(alloc, metrics_off + i * METRIC_WORDS * 4, metric);
    }
    for (i, info) in root.enums.iter().enumerate() {
        put_enum(alloc, enums_off + i * ENUM_WORDS * 4, info);
    }
    for (i, unit) in root.units.iter().enumerate() {
        put_unit(alloc, units_off + i * UNIT_WORDS * 4, unit);
    }

    alloc.put_u32(root_off, root.devices.len() as u32);
    alloc.put_u32(root_off + 4, devices_off as u32);
    alloc.put_u32(root_off + 8, root.metrics.len() as u32);
    alloc.put_u32(root_off + 12, metrics_off as u32);
    alloc.put_u32(root_off + 16, root.enums.len() as u32);
    alloc.put_u32(root_off + 20, enums_off as u32);
    alloc.put_u32(root_off + 24, root.units.len() as u32);
    alloc.put_u32(root_off + 28, units_off as u32);
}

/// Produces the flat clone of `root`.
pub fn clone_flat(root: &IntrospectionRoot) -> IntrospectionClone {
    let mut probe = ProbeAllocator { size: 0 };
    build(&mut probe, root);

    let mut bump = BumpAllocator {
        buf: vec![0; probe.size],
        cursor: 0,
    };
    build(&mut bump, root);
    debug_assert_eq!(bump.cursor, probe.size);

    IntrospectionClone {
        buf: bump.buf.into_boxed_slice(),
    }
}

/// Self-contained introspection snapshot.
///
/// All accessors decode offsets out of the single backing buffer; the
/// clone stays valid with no lock held and no view into shared memory.
pub struct IntrospectionClone {
    buf: Box<[u8]>,
}

impl IntrospectionClone {
    /// Exact byte size of the snapshot.
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    fn u32_at(&self, offset: usize) -> u32 {
        let bytes: [u8; 4] = self.buf[offset..offset + 4].try_into().unwrap_or([0; 4]);
        u32::from_ne_bytes(bytes)
    }

    fn i32_at(&self, offset: usize) -> i32 {
        self.u32_at(offset) as i32
    }

    fn str_at(&self, offset: u32, len: u32) -> &str {
        let (offset, len) = (offset as usize, len as usize);
        std::str::from_utf8(&self.buf[offset..offset + len]).unwrap_or("")
    }

    fn table(&self, slot: usize) -> (usize, usize) {
        let count = self.u32_at(slot * 8) as usize;
        let offset = self.u32_at(slot * 8 + 4) as usize;
        (count, offset)
    }

    /// Devices in the snapshot.
    pub fn devices(&self) -> impl Iterator<Item = DeviceView<'_>> {
        let (count, offset) = self.table(0);
        (0..count).map(move |i| DeviceView {
            clone: self,
            offset: offset + i * DEVICE_WORDS * 4,
        })
    }

    /// Metrics in the snapshot.
    pub fn metrics(&self) -> impl Iterator<Item = MetricView<'_>> {
        let (count, offset) = self.table(1);
        (0..count).map(move |i| MetricView {
            clone: self,
            offset: offset + i * METRIC_WORDS * 4,
        })
    }

    /// Enums in the snapshot.
    pub fn enums(&self) -> impl Iterator<Item = EnumView<'_>> {
        let (count, offset) = self.table(2);
        (0..count).map(move |i| EnumView {
            clone: self,
            offset: offset + i * ENUM_WORDS * 4,
        })
    }

    /// Units in the snapshot.
    pub fn units(&self) -> impl Iterator<Item = UnitView<'_>> {
        let (count, offset) = self.table(3);
        (0..count).map(move |i| UnitView {
            clone: self,
            offset: offset + i * UNIT_WORDS * 4,
        })
    }
}

/// Decoded view of one device.
pub struct DeviceView<'a> {
    clone: &'a IntrospectionClone,
    offset: usize,
}

impl DeviceView<'_> {
    /// Device id.
    pub fn id(&self) -> u32 {
        self.clone.u32_at(self.offset)
    }

    /// Raw `DeviceType` discriminant.
    pub fn device_type(&self) -> u32 {
        self.clone.u32_at(self.offset + 4)
    }

    /// Raw `Vendor` discriminant.
    pub fn vendor(&self) -> u32 {
        self.clone.u32_at(self.offset + 8)
    }

    /// Device name.
    pub fn name(&self) -> &str {
        self.clone.str_at(
            self.clone.u32_at(self.offset + 12),
            self.clone.u32_at(self.offset + 16),
        )
    }
}

/// Decoded view of one metric.
pub struct MetricView<'a> {
    clone: &'a IntrospectionClone,
    offset: usize,
}

impl MetricView<'_> {
    /// Metric id.
    pub fn id(&self) -> u32 {
        self.clone.u32_at(self.offset)
    }

    /// Raw `MetricKind` discriminant.
    pub fn kind(&self) -> u32 {
        self.clone.u32_at(self.offset + 4)
    }

    /// Raw `ValueKind` discriminant.
    pub fn value_kind(&self) -> u32 {
        self.clone.u32_at(self.offset + 8)
    }

    /// Raw `Unit` discriminant.
    pub fn unit(&self) -> u32 {
        self.clone.u32_at(self.offset + 12)
    }

    /// Display name.
    pub fn name(&self) -> &str {
        self.clone.str_at(
            self.clone.u32_at(self.offset + 16),
            self.clone.u32_at(self.offset + 20),
        )
    }

    /// Per-device availability entries as `(device id, array count,
    /// available)` triples.
    pub fn device_infos(&self) -> impl Iterator<Item = (u32, u32, bool)> + '_ {
        let offset = self.clone.u32_at(self.offset + 24) as usize;
        let count = self.clone.u32_at(self.offset + 28) as usize;
        (0..count).map(move |i| {
            let at = offset + i * DEVICE_INFO_WORDS * 4;
            (
                self.clone.u32_at(at),
                self.clone.u32_at(at + 4),
                self.clone.u32_at(at + 8) != 0,
            )
        })
    }
}

/// Decoded view of one enum.
pub struct EnumView<'a> {
    clone: &'a IntrospectionClone,
    offset: usize,
}

impl EnumView<'_> {
    /// Enum id.
    pub fn id(&self) -> u32 {
        self.clone.u32_at(self.offset)
    }

    /// Enum symbol.
    pub fn symbol(&self) -> &str {
        self.clone.str_at(
            self.clone.u32_at(self.offset + 4),
            self.clone.u32_at(self.offset + 8),
        )
    }

    /// Enum keys as `(value, symbol)` pairs.
    pub fn keys(&self) -> impl Iterator<Item = (i32, &str)> + '_ {
        let offset = self.clone.u32_at(self.offset + 12) as usize;
        let count = self.clone.u32_at(self.offset + 16) as usize;
        (0..count).map(move |i| {
            let at = offset + i * ENUM_KEY_WORDS * 4;
            (
                self.clone.i32_at(at),
                self.clone
                    .str_at(self.clone.u32_at(at + 4), self.clone.u32_at(at + 8)),
            )
        })
    }
}

/// Decoded view of one unit.
pub struct UnitView<'a> {
    clone: &'a IntrospectionClone,
    offset: usize,
}

impl UnitView<'_> {
    /// Raw `Unit` discriminant.
    pub fn id(&self) -> u32 {
        self.clone.u32_at(self.offset)
    }

    /// Unit symbol.
    pub fn symbol(&self) -> &str {
        self.clone.str_at(
            self.clone.u32_at(self.offset + 4),
            self.clone.u32_at(self.offset + 8),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::MetricCapabilities;
    use frametap_common::metric::{DeviceType, MetricId, Vendor};

    fn sample_root() -> Box<IntrospectionRoot> {
        let mut root: Box<IntrospectionRoot> = Box::default();
        root.populate().unwrap();
        root.add_device(DeviceInfo::new(
            1,
            DeviceType::GraphicsAdapter,
            Vendor::Nvidia,
            "RTX 4080",
        ))
        .unwrap();
        let mut caps = MetricCapabilities::new();
        caps.set(MetricId::GpuPower, 1);
        caps.set(MetricId::GpuFanSpeed, 3);
        root.set_device_metric_availability(1, &caps).unwrap();
        root.sort();
        root
    }

    #[test]
    fn test_probe_matches_written_size() {
        let root = sample_root();
        let mut probe = ProbeAllocator { size: 0 };
        build(&mut probe, &root);
        let clone = clone_flat(&root);
        assert_eq!(clone.size(), probe.size);
        assert!(clone.size() > 0);
    }

    #[test]
    fn test_clone_preserves_tree() {
        let root = sample_root();
        let clone = clone_flat(&root);

        let devices: Vec<(u32, String)> = clone
            .devices()
            .map(|d| (d.id(), d.name().to_string()))
            .collect();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].0, 0);
        assert_eq!(devices[1], (1, "RTX 4080".to_string()));

        let metric_count = clone.metrics().count();
        assert_eq!(metric_count, root.metrics.len());

        let fan = clone
            .metrics()
            .find(|m| m.id() == MetricId::GpuFanSpeed as u32)
            .unwrap();
        assert_eq!(fan.name(), "GPU Fan Speed");
        let infos: Vec<(u32, u32, bool)> = fan.device_infos().collect();
        assert_eq!(infos, vec![(1, 3, true)]);

        let frame_type = clone.enums().find(|e| e.symbol() == "FrameType").unwrap();
        let keys: Vec<(i32, String)> = frame_type
            .keys()
            .map(|(v, s)| (v, s.to_string()))
            .collect();
        assert!(keys.contains(&(2, "Application".to_string())));
        assert!(keys.contains(&(100, "AmdAfmf".to_string())));

        assert_eq!(clone.units().count(), root.units.len());
    }

    #[test]
    fn test_metric_list_is_sorted() {
        let root = sample_root();
        let clone = clone_flat(&root);
        let ids: Vec<u32> = clone.metrics().map(|m| m.id()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_empty_device_infos_roundtrip() {
        let root = sample_root();
        let clone = clone_flat(&root);
        let power_limit = clone
            .metrics()
            .find(|m| m.id() == MetricId::CpuPowerLimit as u32)
            .unwrap();
        assert_eq!(power_limit.device_infos().count(), 0);
    }
}
