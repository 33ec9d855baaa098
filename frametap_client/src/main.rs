//! Frametap middleware sample client.
//!
//! Attaches to a running service, dumps the introspection snapshot,
//! samples live telemetry, and optionally streams a tracked process's
//! frame ring through the metrics calculator.

use clap::Parser;
use frametap_common::metric::MetricId;
use frametap_common::qpc::QpcConverter;
use frametap_ipc::comms::MiddlewareComms;
use frametap_ipc::telemetry_map::RingSetVariant;
use frametap_ipc::IpcResult;
use frametap_metrics::MetricsCalculator;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Nanosecond monotonic timestamps: 1e9 ticks per second.
const QPC_FREQUENCY: u64 = 1_000_000_000;

/// Frametap middleware sample client.
#[derive(Parser, Debug)]
#[command(name = "frametap_client", version, about)]
struct Args {
    /// Shared memory name prefix.
    #[arg(long)]
    prefix: Option<String>,

    /// Shared memory name salt of the running service.
    #[arg(long)]
    salt: String,

    /// Stream the frame ring of this tracked pid.
    #[arg(long)]
    pid: Option<u32>,

    /// Seconds to stream frames and telemetry for.
    #[arg(long, default_value_t = 5)]
    duration_secs: u64,
}

fn dump_introspection(comms: &MiddlewareComms) -> IpcResult<()> {
    let clone = comms.get_introspection_root(Duration::from_secs(2))?;
    info!(bytes = clone.size(), "introspection snapshot");

    for device in clone.devices() {
        info!(
            id = device.id(),
            device_type = device.device_type(),
            vendor = device.vendor(),
            name = device.name(),
            "device"
        );
    }
    let available = clone
        .metrics()
        .filter(|m| m.device_infos().any(|(_, _, available)| available))
        .count();
    info!(
        metrics = clone.metrics().count(),
        available,
        enums = clone.enums().count(),
        units = clone.units().count(),
        "introspection summary"
    );
    Ok(())
}

fn dump_telemetry(comms: &MiddlewareComms) {
    let system = comms.get_system_data_store();
    let statics = system.statics();
    info!(
        cpu = %statics.cpu_name,
        power_limit = statics.cpu_power_limit,
        "system statics"
    );
    if let Ok(rings) = system.telemetry().rings() {
        for (metric_id, variant) in rings {
            log_newest(metric_id, &variant);
        }
    }

    for device_id in comms.gpu_device_ids() {
        let Ok(gpu) = comms.get_gpu_data_store(device_id) else {
            continue;
        };
        let statics = gpu.statics();
        info!(
            device_id,
            name = %statics.name,
            mem_size = statics.mem_size,
            "gpu statics"
        );
        if let Ok(rings) = gpu.telemetry().rings() {
            for (metric_id, variant) in rings {
                log_newest(metric_id, &variant);
            }
        }
    }
}

fn log_newest(metric_id: u32, variant: &RingSetVariant<'_>) {
    let name = MetricId::from_u32(metric_id)
        .map(|m| m.display_name())
        .unwrap_or("unknown metric");
    match variant {
        RingSetVariant::F64(rings) => {
            for (index, ring) in rings.iter().enumerate() {
                if let Some(sample) = ring.newest() {
                    info!(metric = name, index, value = sample.value, ts = sample.timestamp, "telemetry");
                }
            }
        }
        RingSetVariant::U64(rings) => {
            for (index, ring) in rings.iter().enumerate() {
                if let Some(sample) = ring.newest() {
                    info!(metric = name, index, value = sample.value, ts = sample.timestamp, "telemetry");
                }
            }
        }
        RingSetVariant::Bool(rings) => {
            for (index, ring) in rings.iter().enumerate() {
                if let Some(sample) = ring.newest() {
                    info!(metric = name, index, value = sample.value, ts = sample.timestamp, "telemetry");
                }
            }
        }
    }
}

fn stream_frames(comms: &MiddlewareComms, pid: u32, duration: Duration) -> IpcResult<()> {
    let store = comms.get_frame_data_store(pid)?;
    info!(pid, app = %store.app_name(), "streaming frames");

    let mut calculator = MetricsCalculator::new(QpcConverter::new(QPC_FREQUENCY, 0));
    let ring = store.frame_ring();
    let (mut next_serial, _) = ring.serial_range();

    let mut frames = 0u64;
    let mut records = 0u64;
    let mut sum_between_presents = 0.0;
    let mut sum_displayed_time = 0.0;

    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        let (first, last) = ring.serial_range();
        if next_serial < first {
            warn!(
                missed = first - next_serial,
                "fell behind the frame ring, skipping ahead"
            );
            next_serial = first;
        }
        while next_serial < last {
            let frame = ring.at(next_serial);
            next_serial += 1;
            frames += 1;
            match calculator.process_frame(&frame) {
                Ok(released) => {
                    for record in &released {
                        records += 1;
                        sum_between_presents += record.metrics.ms_between_presents;
                        sum_displayed_time += record.metrics.ms_displayed_time;
                    }
                }
                Err(err) => warn!(%err, "frame stream error"),
            }
        }
        ring.mark_next_read(next_serial);
        std::thread::sleep(Duration::from_millis(5));
    }

    if records > 0 {
        info!(
            frames,
            records,
            avg_ms_between_presents = sum_between_presents / records as f64,
            avg_ms_displayed_time = sum_displayed_time / records as f64,
            "frame stream summary"
        );
    } else {
        info!(frames, "frame stream summary: no metrics released");
    }
    Ok(())
}

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();
    let args = Args::parse();

    let mut comms = match MiddlewareComms::new(args.prefix.clone(), args.salt.clone()) {
        Ok(comms) => comms,
        Err(err) => {
            tracing::error!(%err, "cannot attach to service data plane");
            return std::process::ExitCode::FAILURE;
        }
    };

    if let Err(err) = dump_introspection(&comms) {
        tracing::error!(%err, "introspection unavailable");
        return std::process::ExitCode::FAILURE;
    }
    dump_telemetry(&comms);

    if let Some(pid) = args.pid {
        if let Err(err) = comms.open_frame_data_store(pid) {
            tracing::error!(pid, %err, "cannot open frame data store");
            return std::process::ExitCode::FAILURE;
        }
        let result = stream_frames(&comms, pid, Duration::from_secs(args.duration_secs));
        comms.close_frame_data_store(pid);
        if let Err(err) = result {
            tracing::error!(%err, "frame streaming failed");
            return std::process::ExitCode::FAILURE;
        }
    }

    std::process::ExitCode::SUCCESS
}
