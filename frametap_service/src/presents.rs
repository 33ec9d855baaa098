//! Present event source interface and broadcast pump.
//!
//! The OS graphics tracing integration is an external collaborator; it
//! reaches the data plane through `PresentSource`. The synthetic source
//! fabricates a steady present stream so the pipeline can be exercised
//! end to end without a tracing session.

use crate::broadcaster::FrameBroadcaster;
use crate::telemetry::qpc_now;
use frametap_common::frame::{DisplayedInstance, FrameRecord, FrameType, PresentResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Source of present records in present-start order.
pub trait PresentSource: Send {
    /// Returns the next present, or `None` when no event is ready yet.
    fn next_present(&mut self) -> Option<FrameRecord>;
}

/// Pumps a present source into the broadcaster until stopped.
pub fn spawn_present_pump(
    broadcaster: Arc<FrameBroadcaster>,
    mut source: Box<dyn PresentSource>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("present-pump".into())
        .spawn(move || {
            tracing::debug!("present pump started");
            while !stop.load(Ordering::Relaxed) {
                match source.next_present() {
                    Some(frame) => {
                        broadcaster.broadcast(&frame);
                    }
                    None => std::thread::sleep(Duration::from_millis(2)),
                }
            }
            tracing::debug!("present pump stopped");
        })
        .expect("spawn present pump thread")
}

/// Synthetic 60 Hz present stream for one target process.
pub struct SyntheticPresentSource {
    pid: u32,
    swap_chain: u64,
    frame_id: u32,
    next_due: u64,
    last_screen_time: u64,
    period_ns: u64,
}

impl SyntheticPresentSource {
    /// Creates a source presenting for `pid` at roughly 60 Hz.
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            swap_chain: 0xd3d0_0000 + pid as u64,
            frame_id: 0,
            next_due: qpc_now(),
            last_screen_time: 0,
            period_ns: 16_666_667,
        }
    }
}

impl PresentSource for SyntheticPresentSource {
    fn next_present(&mut self) -> Option<FrameRecord> {
        let now = qpc_now();
        if now < self.next_due {
            return None;
        }
        self.next_due += self.period_ns;
        self.frame_id += 1;

        let present_start = now;
        let mut frame = FrameRecord::default();
        frame.present_start_time = present_start;
        frame.time_in_present = 200_000;
        frame.ready_time = present_start + 4_000_000;
        frame.gpu_start_time = present_start + 500_000;
        frame.gpu_duration = 6_000_000;
        frame.process_id = self.pid;
        frame.thread_id = self.pid + 1;
        frame.swap_chain_address = self.swap_chain;
        frame.frame_id = self.frame_id;
        frame.app_frame_id = self.frame_id;

        // one in sixteen presents drops
        if self.frame_id % 16 == 0 {
            frame.set_final_state(PresentResult::Discarded);
        } else {
            frame.set_final_state(PresentResult::Presented);
            let screen_time = present_start + 12_000_000;
            self.last_screen_time = self.last_screen_time.max(screen_time);
            frame
                .displayed
                .push(DisplayedInstance::new(
                    FrameType::Application,
                    self.last_screen_time,
                ))
                .ok()?;
        }
        Some(frame)
    }
}
