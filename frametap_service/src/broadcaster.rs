//! Present broadcast into per-target frame segments.

use frametap_common::frame::FrameRecord;
use frametap_ipc::error::IpcResult;
use frametap_ipc::stores::OwnedFrameStore;
use frametap_ipc::ServiceComms;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Routes present records to the frame segment of their process.
///
/// Segments are tracked weakly here; strong ownership lives with the
/// client session that requested tracking (plus the comms registry),
/// so a segment disappears as soon as no session wants it. Expired
/// entries are collected before every mutation.
pub struct FrameBroadcaster {
    comms: Arc<ServiceComms>,
    segments: Mutex<HashMap<u32, Weak<OwnedFrameStore>>>,
}

impl FrameBroadcaster {
    /// Creates a broadcaster over the service comms.
    pub fn new(comms: Arc<ServiceComms>) -> Self {
        Self {
            comms,
            segments: Mutex::new(HashMap::new()),
        }
    }

    /// Ensures a frame segment exists for `pid` and returns the strong
    /// handle the requesting session must hold.
    pub fn register_target(&self, pid: u32) -> IpcResult<Arc<OwnedFrameStore>> {
        let mut segments = self.segments.lock();
        // collect garbage first so it doesn't accumulate in the map
        segments.retain(|_, weak| weak.strong_count() > 0);

        let segment = self.comms.create_or_get_frame_segment(pid, false)?;
        segments.insert(pid, Arc::downgrade(&segment));
        Ok(segment)
    }

    /// Pushes one present record to its target's frame ring.
    ///
    /// Returns `false` when the target is not tracked (or its segment
    /// expired); the record is then dropped.
    pub fn broadcast(&self, frame: &FrameRecord) -> bool {
        let mut segments = self.segments.lock();
        match segments.get(&frame.process_id) {
            Some(weak) => match weak.upgrade() {
                Some(segment) => {
                    let store = segment.store();
                    if store.bookkeeping().process_id != frame.process_id {
                        tracing::warn!(
                            pid = frame.process_id,
                            "frame segment bookkeeping does not match target"
                        );
                    }
                    store.frame_ring().push(*frame, None)
                }
                None => {
                    segments.remove(&frame.process_id);
                    false
                }
            },
            None => false,
        }
    }

    /// Pids with live tracked segments.
    pub fn pids(&self) -> Vec<u32> {
        self.segments
            .lock()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(pid, _)| *pid)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frametap_ipc::comms::RingConfig;

    fn test_comms(tag: &str) -> Arc<ServiceComms> {
        let mut hash: u32 = 0x811c_9dc5;
        for byte in tag.bytes() {
            hash = (hash ^ byte as u32).wrapping_mul(0x0100_0193);
        }
        let salt = format!("{:08x}", hash ^ std::process::id());
        Arc::new(
            ServiceComms::new(
                None,
                Some(salt),
                RingConfig {
                    frame_ring_samples: 32,
                    telemetry_ring_samples: 32,
                },
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_broadcast_reaches_tracked_target_only() {
        let comms = test_comms("bcast");
        let broadcaster = FrameBroadcaster::new(comms);
        let handle = broadcaster.register_target(1_111).unwrap();

        let mut frame = FrameRecord::default();
        frame.process_id = 1_111;
        frame.present_start_time = 99;
        assert!(broadcaster.broadcast(&frame));

        frame.process_id = 2_222;
        assert!(!broadcaster.broadcast(&frame));

        let (first, last) = handle.store().frame_ring().serial_range();
        assert_eq!((first, last), (0, 1));
        assert_eq!(handle.store().frame_ring().at(0).present_start_time, 99);
    }

    #[test]
    fn test_expired_targets_are_collected() {
        let comms = test_comms("gc");
        let broadcaster = FrameBroadcaster::new(comms);
        let handle = broadcaster.register_target(3_333).unwrap();
        assert_eq!(broadcaster.pids(), vec![3_333]);

        drop(handle);
        let mut frame = FrameRecord::default();
        frame.process_id = 3_333;
        assert!(!broadcaster.broadcast(&frame));
        assert!(broadcaster.pids().is_empty());
    }

    #[test]
    fn test_reregistration_reuses_live_segment() {
        let comms = test_comms("reuse");
        let broadcaster = FrameBroadcaster::new(comms);
        let first = broadcaster.register_target(4_444).unwrap();
        let second = broadcaster.register_target(4_444).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
