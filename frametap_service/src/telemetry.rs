//! Hardware telemetry provider interfaces and sampling threads.
//!
//! Real drivers (GPU vendor libraries, CPU counters) are external
//! collaborators; the pipeline sees them through the provider traits
//! below. One sampling thread runs per provider, paced by the
//! prioritized telemetry period, pushing timestamped samples into the
//! device's telemetry map.

use frametap_common::caps_bits::{CpuCapabilityBits, GpuCapabilityBits};
use frametap_common::metric::{MetricId, Vendor};
use frametap_ipc::stores::{GpuStatics, SystemStatics};
use frametap_ipc::ServiceComms;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Current value of the session timestamp counter: monotonic
/// nanoseconds, giving a tick frequency of 1e9.
pub fn qpc_now() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // CLOCK_MONOTONIC_RAW cannot fail with a valid timespec pointer
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts) };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

/// One sampled metric value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSample {
    /// Sampled metric.
    pub metric: MetricId,
    /// Array element the value belongs to (0 for scalars).
    pub array_index: usize,
    /// The value.
    pub value: SampleValue,
}

/// Typed sample value matching the telemetry map's variant arms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    /// Float sample (also integer/enum metrics coerced at the provider).
    F64(f64),
    /// Unsigned integer sample.
    U64(u64),
    /// Boolean sample.
    Bool(bool),
}

/// Static description of a GPU device.
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    /// Hardware vendor.
    pub vendor: Vendor,
    /// Adapter name.
    pub name: String,
    /// Dedicated memory size in bytes.
    pub mem_size: u64,
    /// Maximum memory bandwidth in bytes per second.
    pub max_mem_bandwidth: u64,
    /// Sustained power limit in watts.
    pub sustained_power_limit: f64,
    /// Maximum fan speeds in RPM, one per fan.
    pub max_fan_rpm: Vec<i32>,
}

/// Static description of the CPU/system device.
#[derive(Debug, Clone)]
pub struct CpuDeviceInfo {
    /// Hardware vendor.
    pub vendor: Vendor,
    /// Processor name.
    pub name: String,
    /// Package power limit in watts.
    pub power_limit: f64,
    /// Logical core count (array dimension of per-core metrics).
    pub core_count: usize,
}

/// Driver adapter sampling one GPU device.
pub trait GpuTelemetryProvider: Send {
    /// Static device description.
    fn info(&self) -> GpuDeviceInfo;
    /// What this device can sample.
    fn capability_bits(&self) -> GpuCapabilityBits;
    /// Takes one sample of every supported dynamic metric.
    fn sample(&mut self, timestamp: u64) -> Vec<MetricSample>;
}

/// Driver adapter sampling the CPU/system device.
pub trait CpuTelemetryProvider: Send {
    /// Static device description.
    fn info(&self) -> CpuDeviceInfo;
    /// What this device can sample.
    fn capability_bits(&self) -> CpuCapabilityBits;
    /// Takes one sample of every supported dynamic metric.
    fn sample(&mut self, timestamp: u64) -> Vec<MetricSample>;
}

/// Writes GPU statics from the provider description.
pub fn apply_gpu_statics(statics: &mut GpuStatics, info: &GpuDeviceInfo) {
    statics.vendor = info.vendor as u32;
    statics.name.assign(&info.name);
    statics.mem_size = info.mem_size;
    statics.max_mem_bandwidth = info.max_mem_bandwidth;
    statics.sustained_power_limit = info.sustained_power_limit;
    statics.max_fan_rpm.clear();
    for &rpm in info.max_fan_rpm.iter().take(statics.max_fan_rpm.capacity()) {
        let _ = statics.max_fan_rpm.push(rpm);
    }
}

/// Writes system statics from the provider description.
pub fn apply_system_statics(statics: &mut SystemStatics, info: &CpuDeviceInfo) {
    statics.cpu_vendor = info.vendor as u32;
    statics.cpu_name.assign(&info.name);
    statics.cpu_power_limit = info.power_limit;
}

fn push_samples(
    map: &frametap_ipc::TelemetryMapView<'_>,
    samples: &[MetricSample],
    timestamp: u64,
) {
    for sample in samples {
        let pushed = match sample.value {
            SampleValue::F64(value) => map
                .find_rings::<f64>(sample.metric)
                .map(|rings| rings.get(sample.array_index).map(|r| r.push(value, timestamp, None))),
            SampleValue::U64(value) => map
                .find_rings::<u64>(sample.metric)
                .map(|rings| rings.get(sample.array_index).map(|r| r.push(value, timestamp, None))),
            SampleValue::Bool(value) => map
                .find_rings::<bool>(sample.metric)
                .map(|rings| rings.get(sample.array_index).map(|r| r.push(value, timestamp, None))),
        };
        match pushed {
            Ok(Some(_)) => {}
            Ok(None) => tracing::warn!(
                metric = sample.metric as u32,
                array_index = sample.array_index,
                "sample outside the metric's array dimension"
            ),
            Err(err) => tracing::warn!(
                metric = sample.metric as u32,
                %err,
                "sample for unmapped telemetry metric"
            ),
        }
    }
}

fn pace(period_ms: &AtomicU32, stop: &AtomicBool) {
    // sleep in short slices so stop and period changes take effect fast
    let period = period_ms.load(Ordering::Relaxed).max(1) as u64;
    let mut remaining = period;
    while remaining > 0 && !stop.load(Ordering::Relaxed) {
        let slice = remaining.min(20);
        std::thread::sleep(Duration::from_millis(slice));
        remaining -= slice;
    }
}

/// Spawns the sampling thread of one GPU device.
pub fn spawn_gpu_sampler(
    comms: Arc<ServiceComms>,
    device_id: u32,
    mut provider: Box<dyn GpuTelemetryProvider>,
    period_ms: Arc<AtomicU32>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("gpu-telemetry-{device_id}"))
        .spawn(move || {
            tracing::debug!(device_id, "gpu sampling thread started");
            while !stop.load(Ordering::Relaxed) {
                let timestamp = qpc_now();
                let samples = provider.sample(timestamp);
                match comms.get_gpu_data_store(device_id) {
                    Ok(store) => push_samples(store.telemetry(), &samples, timestamp),
                    Err(err) => {
                        tracing::warn!(device_id, %err, "gpu store unavailable, sampler exiting");
                        break;
                    }
                }
                pace(&period_ms, &stop);
            }
            tracing::debug!(device_id, "gpu sampling thread stopped");
        })
        .expect("spawn gpu sampling thread")
}

/// Spawns the sampling thread of the system device.
pub fn spawn_cpu_sampler(
    comms: Arc<ServiceComms>,
    mut provider: Box<dyn CpuTelemetryProvider>,
    period_ms: Arc<AtomicU32>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("cpu-telemetry".into())
        .spawn(move || {
            tracing::debug!("cpu sampling thread started");
            while !stop.load(Ordering::Relaxed) {
                let timestamp = qpc_now();
                let samples = provider.sample(timestamp);
                match comms.get_system_data_store() {
                    Ok(store) => push_samples(store.telemetry(), &samples, timestamp),
                    Err(err) => {
                        tracing::warn!(%err, "system store unavailable, sampler exiting");
                        break;
                    }
                }
                pace(&period_ms, &stop);
            }
            tracing::debug!("cpu sampling thread stopped");
        })
        .expect("spawn cpu sampling thread")
}

/// Synthetic GPU provider: plausible waveforms, no hardware access.
pub struct SyntheticGpuProvider {
    tick: u64,
}

impl SyntheticGpuProvider {
    /// Creates the provider.
    pub fn new() -> Self {
        Self { tick: 0 }
    }
}

impl Default for SyntheticGpuProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuTelemetryProvider for SyntheticGpuProvider {
    fn info(&self) -> GpuDeviceInfo {
        GpuDeviceInfo {
            vendor: Vendor::Intel,
            name: "Synthetic Arc".into(),
            mem_size: 12 << 30,
            max_mem_bandwidth: 456 << 30,
            sustained_power_limit: 190.0,
            max_fan_rpm: vec![3_600, 3_600],
        }
    }

    fn capability_bits(&self) -> GpuCapabilityBits {
        GpuCapabilityBits::POWER
            | GpuCapabilityBits::FREQUENCY
            | GpuCapabilityBits::TEMPERATURE
            | GpuCapabilityBits::UTILIZATION
            | GpuCapabilityBits::FAN_0
            | GpuCapabilityBits::FAN_1
            | GpuCapabilityBits::MEM_USED
            | GpuCapabilityBits::MEM_SIZE
            | GpuCapabilityBits::MEM_MAX_BANDWIDTH
            | GpuCapabilityBits::SUSTAINED_POWER_LIMIT
            | GpuCapabilityBits::POWER_LIMITED
    }

    fn sample(&mut self, _timestamp: u64) -> Vec<MetricSample> {
        self.tick += 1;
        let phase = (self.tick % 600) as f64 / 600.0;
        let wave = (phase * std::f64::consts::TAU).sin();
        vec![
            MetricSample {
                metric: MetricId::GpuPower,
                array_index: 0,
                value: SampleValue::F64(150.0 + 30.0 * wave),
            },
            MetricSample {
                metric: MetricId::GpuFrequency,
                array_index: 0,
                value: SampleValue::F64(2_400.0 + 200.0 * wave),
            },
            MetricSample {
                metric: MetricId::GpuTemperature,
                array_index: 0,
                value: SampleValue::F64(62.0 + 6.0 * wave),
            },
            MetricSample {
                metric: MetricId::GpuUtilization,
                array_index: 0,
                value: SampleValue::F64(80.0 + 15.0 * wave),
            },
            MetricSample {
                metric: MetricId::GpuFanSpeed,
                array_index: 0,
                value: SampleValue::F64(1_800.0 + 300.0 * wave),
            },
            MetricSample {
                metric: MetricId::GpuFanSpeed,
                array_index: 1,
                value: SampleValue::F64(1_750.0 + 280.0 * wave),
            },
            MetricSample {
                metric: MetricId::GpuMemUsed,
                array_index: 0,
                value: SampleValue::U64((6u64 << 30) + self.tick % (1 << 30)),
            },
            MetricSample {
                metric: MetricId::GpuPowerLimited,
                array_index: 0,
                value: SampleValue::Bool(wave > 0.9),
            },
        ]
    }
}

/// Synthetic CPU provider.
pub struct SyntheticCpuProvider {
    tick: u64,
    core_count: usize,
}

impl SyntheticCpuProvider {
    /// Creates the provider with the given core count.
    pub fn new(core_count: usize) -> Self {
        Self {
            tick: 0,
            core_count,
        }
    }
}

impl CpuTelemetryProvider for SyntheticCpuProvider {
    fn info(&self) -> CpuDeviceInfo {
        CpuDeviceInfo {
            vendor: Vendor::Amd,
            name: "Synthetic Ryzen".into(),
            power_limit: 170.0,
            core_count: self.core_count,
        }
    }

    fn capability_bits(&self) -> CpuCapabilityBits {
        CpuCapabilityBits::UTILIZATION
            | CpuCapabilityBits::POWER
            | CpuCapabilityBits::TEMPERATURE
            | CpuCapabilityBits::FREQUENCY
            | CpuCapabilityBits::POWER_LIMIT
            | CpuCapabilityBits::CORE_UTILITY
    }

    fn sample(&mut self, _timestamp: u64) -> Vec<MetricSample> {
        self.tick += 1;
        let phase = (self.tick % 400) as f64 / 400.0;
        let wave = (phase * std::f64::consts::TAU).cos();
        let mut samples = vec![
            MetricSample {
                metric: MetricId::CpuUtilization,
                array_index: 0,
                value: SampleValue::F64(35.0 + 20.0 * wave),
            },
            MetricSample {
                metric: MetricId::CpuPower,
                array_index: 0,
                value: SampleValue::F64(95.0 + 25.0 * wave),
            },
            MetricSample {
                metric: MetricId::CpuTemperature,
                array_index: 0,
                value: SampleValue::F64(55.0 + 8.0 * wave),
            },
            MetricSample {
                metric: MetricId::CpuFrequency,
                array_index: 0,
                value: SampleValue::F64(4_600.0 + 300.0 * wave),
            },
        ];
        for core in 0..self.core_count {
            samples.push(MetricSample {
                metric: MetricId::CpuCoreUtility,
                array_index: core,
                value: SampleValue::F64(30.0 + (core as f64 * 7.0 + 25.0 * wave).abs() % 60.0),
            });
        }
        samples
    }
}

/// Registers both synthetic devices on `comms` and returns the GPU id.
pub fn register_synthetic_devices(comms: &mut ServiceComms) -> frametap_ipc::IpcResult<u32> {
    let gpu = SyntheticGpuProvider::new();
    let cpu = SyntheticCpuProvider::new(8);

    let gpu_info = gpu.info();
    let gpu_caps = frametap_ipc::gpu_caps_from_bits(gpu.capability_bits());
    let device_id = comms.register_gpu_device(gpu_info.vendor, &gpu_info.name, &gpu_caps)?;
    comms
        .get_gpu_data_store(device_id)?
        .update_statics(|s| apply_gpu_statics(s, &gpu_info));

    let cpu_info = cpu.info();
    let cpu_caps =
        frametap_ipc::cpu_caps_from_bits(cpu.capability_bits(), cpu_info.core_count);
    comms.register_cpu_device(cpu_info.vendor, &cpu_info.name, &cpu_caps)?;
    comms
        .get_system_data_store()?
        .update_statics(|s| apply_system_statics(s, &cpu_info));

    comms.finalize_gpu_devices()?;
    Ok(device_id)
}
