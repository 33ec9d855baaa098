//! Frametap telemetry producer service.
//!
//! Creates the shared memory data plane, registers the telemetry
//! devices, and runs the sampling, present-pump and flush threads until
//! SIGINT/SIGTERM.

use clap::Parser;
use frametap_common::consts::{
    DEFAULT_FLUSH_PERIOD_MS, DEFAULT_FRAME_RING_SAMPLES, DEFAULT_TELEMETRY_PERIOD_MS,
    DEFAULT_TELEMETRY_RING_SAMPLES,
};
use frametap_ipc::comms::{RingConfig, ServiceComms};
use frametap_service::presents::{spawn_present_pump, SyntheticPresentSource};
use frametap_service::telemetry::{
    register_synthetic_devices, spawn_cpu_sampler, spawn_gpu_sampler, SyntheticCpuProvider,
    SyntheticGpuProvider,
};
use frametap_service::trace_log::{spawn_flush_loop, FlushStats};
use frametap_service::{init_tracing, FrameBroadcaster, SessionMap};
use nix::sys::signal::{self, SigHandler, Signal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Frametap telemetry producer.
#[derive(Parser, Debug)]
#[command(name = "frametap_service", version, about)]
struct Args {
    /// Shared memory name prefix.
    #[arg(long)]
    prefix: Option<String>,

    /// Shared memory name salt; random when omitted.
    #[arg(long)]
    salt: Option<String>,

    /// Samples per frame ring.
    #[arg(long, default_value_t = DEFAULT_FRAME_RING_SAMPLES)]
    frame_ring_samples: usize,

    /// Samples per telemetry ring.
    #[arg(long, default_value_t = DEFAULT_TELEMETRY_RING_SAMPLES)]
    telemetry_ring_samples: usize,

    /// Default hardware telemetry period in milliseconds.
    #[arg(long, default_value_t = DEFAULT_TELEMETRY_PERIOD_MS)]
    telemetry_period_ms: u32,

    /// Default trace flush period in milliseconds (0 disables).
    #[arg(long, default_value_t = DEFAULT_FLUSH_PERIOD_MS)]
    flush_period_ms: u32,

    /// Target pids to track with a synthetic present stream.
    #[arg(long = "track-pid")]
    track_pids: Vec<u32>,
}

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_stop_signal(_sig: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    let handler = SigHandler::Handler(handle_stop_signal);
    unsafe {
        let _ = signal::signal(Signal::SIGINT, handler);
        let _ = signal::signal(Signal::SIGTERM, handler);
    }
}

fn main() -> std::process::ExitCode {
    init_tracing();
    let args = Args::parse();
    install_signal_handlers();

    let config = RingConfig {
        frame_ring_samples: args.frame_ring_samples,
        telemetry_ring_samples: args.telemetry_ring_samples,
    };

    let mut comms = match ServiceComms::new(args.prefix.clone(), args.salt.clone(), config) {
        Ok(comms) => comms,
        Err(err) => {
            error!(%err, "cannot create shared memory data plane");
            STOP_REQUESTED.store(true, Ordering::SeqCst);
            return std::process::ExitCode::FAILURE;
        }
    };

    let gpu_device_id = match register_synthetic_devices(&mut comms) {
        Ok(id) => id,
        Err(err) => {
            error!(%err, "device registration failed");
            STOP_REQUESTED.store(true, Ordering::SeqCst);
            return std::process::ExitCode::FAILURE;
        }
    };
    info!(salt = comms.namer().salt(), gpu_device_id, "data plane ready");

    let comms = Arc::new(comms);
    let broadcaster = Arc::new(FrameBroadcaster::new(comms.clone()));
    let sessions = SessionMap::new(args.telemetry_period_ms, args.flush_period_ms);

    let stop = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::new();

    handles.push(spawn_gpu_sampler(
        comms.clone(),
        gpu_device_id,
        Box::new(SyntheticGpuProvider::new()),
        sessions.telemetry_period_cell(),
        stop.clone(),
    ));
    handles.push(spawn_cpu_sampler(
        comms.clone(),
        Box::new(SyntheticCpuProvider::new(8)),
        sessions.telemetry_period_cell(),
        stop.clone(),
    ));

    let flush_stats = Arc::new(FlushStats::default());
    handles.push(spawn_flush_loop(
        sessions.flush_period_cell(),
        stop.clone(),
        flush_stats.clone(),
    ));

    // Tracking requests normally arrive over the control channel; pids
    // given on the command line are tracked by a local pseudo session.
    const LOCAL_SESSION: u32 = 0;
    sessions.open_session(LOCAL_SESSION, std::process::id());
    for &pid in &args.track_pids {
        if let Err(err) = sessions.track_pid(LOCAL_SESSION, pid, &broadcaster) {
            error!(pid, %err, "cannot track target");
            stop.store(true, Ordering::SeqCst);
            return std::process::ExitCode::FAILURE;
        }
        handles.push(spawn_present_pump(
            broadcaster.clone(),
            Box::new(SyntheticPresentSource::new(pid)),
            stop.clone(),
        ));
        info!(pid, "tracking target");
    }

    info!("service running; Ctrl-C to stop");
    while !STOP_REQUESTED.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("stop requested, shutting down");
    stop.store(true, Ordering::SeqCst);
    for handle in handles {
        let _ = handle.join();
    }
    sessions.dispose(LOCAL_SESSION);
    info!(flushes = flush_stats.flushes(), "service stopped");

    std::process::ExitCode::SUCCESS
}
