//! Client session bookkeeping and prioritized settings.
//!
//! Each connected client holds a session: the pids it tracks (strong
//! frame segment handles), its requested telemetry and flush periods,
//! and the metrics it queries. Service-wide settings are reduced across
//! sessions - the smallest requested period wins - and session disposal
//! reapplies the reducers so departed clients stop pinning resources.

use crate::broadcaster::FrameBroadcaster;
use frametap_common::metric::MetricId;
use frametap_ipc::error::IpcResult;
use frametap_ipc::stores::OwnedFrameStore;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// One metric element a client queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricUse {
    /// Queried metric.
    pub metric: MetricId,
    /// Device the metric is read from.
    pub device_id: u32,
    /// Array element index.
    pub array_index: u32,
}

/// Per-client control state.
#[derive(Default)]
pub struct SessionContext {
    /// Client process id.
    pub remote_pid: u32,
    /// Tracked targets and the strong segment handles keeping them
    /// alive.
    pub tracked_pids: HashMap<u32, Arc<OwnedFrameStore>>,
    /// Telemetry period this client asked for, if any.
    pub requested_telemetry_period_ms: Option<u32>,
    /// Trace flush period this client asked for, if any.
    pub requested_flush_period_ms: Option<u32>,
    /// Metric elements this client queries.
    pub metric_usage: HashSet<MetricUse>,
}

/// Session registry plus the reduced service-wide settings.
pub struct SessionMap {
    sessions: Mutex<HashMap<u32, SessionContext>>,
    telemetry_period_ms: Arc<AtomicU32>,
    flush_period_ms: Arc<AtomicU32>,
    default_telemetry_period_ms: u32,
    default_flush_period_ms: u32,
}

impl SessionMap {
    /// Creates the registry with default periods; the shared cells are
    /// handed to the sampling and flush threads.
    pub fn new(default_telemetry_period_ms: u32, default_flush_period_ms: u32) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            telemetry_period_ms: Arc::new(AtomicU32::new(default_telemetry_period_ms)),
            flush_period_ms: Arc::new(AtomicU32::new(default_flush_period_ms)),
            default_telemetry_period_ms,
            default_flush_period_ms,
        }
    }

    /// Shared cell carrying the reduced telemetry period.
    pub fn telemetry_period_cell(&self) -> Arc<AtomicU32> {
        self.telemetry_period_ms.clone()
    }

    /// Shared cell carrying the reduced flush period.
    pub fn flush_period_cell(&self) -> Arc<AtomicU32> {
        self.flush_period_ms.clone()
    }

    /// Opens a session for a client process.
    pub fn open_session(&self, session_id: u32, remote_pid: u32) {
        let mut sessions = self.sessions.lock();
        sessions.insert(
            session_id,
            SessionContext {
                remote_pid,
                ..Default::default()
            },
        );
        tracing::info!(session_id, remote_pid, "session opened");
    }

    /// Starts tracking `pid` on behalf of a session.
    pub fn track_pid(
        &self,
        session_id: u32,
        pid: u32,
        broadcaster: &FrameBroadcaster,
    ) -> IpcResult<()> {
        let segment = broadcaster.register_target(pid)?;
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(&session_id) {
            session.tracked_pids.insert(pid, segment);
        }
        Ok(())
    }

    /// Stops tracking `pid` for a session; the segment disappears once
    /// no other session holds it.
    pub fn untrack_pid(&self, session_id: u32, pid: u32) {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(&session_id) {
            session.tracked_pids.remove(&pid);
        }
    }

    /// Records a session's telemetry period request and reapplies the
    /// reducer.
    pub fn request_telemetry_period(&self, session_id: u32, period_ms: Option<u32>) {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(&session_id) {
            session.requested_telemetry_period_ms = period_ms;
        }
        self.apply_telemetry_period(&sessions);
    }

    /// Records a session's flush period request and reapplies the
    /// reducer.
    pub fn request_flush_period(&self, session_id: u32, period_ms: Option<u32>) {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(&session_id) {
            session.requested_flush_period_ms = period_ms;
        }
        self.apply_flush_period(&sessions);
    }

    /// Replaces a session's metric-use set.
    pub fn set_metric_usage(&self, session_id: u32, usage: HashSet<MetricUse>) {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(&session_id) {
            session.metric_usage = usage;
        }
    }

    /// Union of every session's metric usage.
    pub fn aggregate_metric_usage(&self) -> HashSet<MetricUse> {
        let sessions = self.sessions.lock();
        let mut aggregate = HashSet::new();
        for session in sessions.values() {
            aggregate.extend(session.metric_usage.iter().copied());
        }
        aggregate
    }

    /// Devices any session currently queries.
    pub fn devices_in_use(&self) -> HashSet<u32> {
        self.aggregate_metric_usage()
            .into_iter()
            .map(|u| u.device_id)
            .collect()
    }

    /// Tears a session down: releases tracked segments, clears its
    /// requests and usage, and reapplies every reducer.
    pub fn dispose(&self, session_id: u32) {
        let mut sessions = self.sessions.lock();
        if let Some(mut session) = sessions.remove(&session_id) {
            session.tracked_pids.clear();
            session.requested_telemetry_period_ms = None;
            session.requested_flush_period_ms = None;
            session.metric_usage.clear();
            tracing::info!(session_id, remote_pid = session.remote_pid, "session disposed");
        }
        self.apply_telemetry_period(&sessions);
        self.apply_flush_period(&sessions);
    }

    /// Pids tracked by any live session.
    pub fn tracked_pids(&self) -> HashSet<u32> {
        let sessions = self.sessions.lock();
        sessions
            .values()
            .flat_map(|s| s.tracked_pids.keys().copied())
            .collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// True when no session is connected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn apply_telemetry_period(&self, sessions: &HashMap<u32, SessionContext>) {
        let prioritized = sessions
            .values()
            .filter_map(|s| s.requested_telemetry_period_ms)
            .min()
            .unwrap_or(self.default_telemetry_period_ms);
        self.telemetry_period_ms.store(prioritized, Ordering::Relaxed);
        tracing::debug!(period_ms = prioritized, "telemetry period applied");
    }

    fn apply_flush_period(&self, sessions: &HashMap<u32, SessionContext>) {
        let prioritized = sessions
            .values()
            .filter_map(|s| s.requested_flush_period_ms)
            .min()
            .unwrap_or(self.default_flush_period_ms);
        self.flush_period_ms.store(prioritized, Ordering::Relaxed);
        tracing::debug!(period_ms = prioritized, "flush period applied");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> SessionMap {
        SessionMap::new(16, 1_000)
    }

    #[test]
    fn test_min_reducer_over_requested_periods() {
        let sessions = map();
        let cell = sessions.telemetry_period_cell();
        assert_eq!(cell.load(Ordering::Relaxed), 16);

        sessions.open_session(1, 100);
        sessions.open_session(2, 200);
        sessions.request_telemetry_period(1, Some(8));
        assert_eq!(cell.load(Ordering::Relaxed), 8);
        sessions.request_telemetry_period(2, Some(4));
        assert_eq!(cell.load(Ordering::Relaxed), 4);
        // the slower request does not win
        sessions.request_telemetry_period(1, Some(12));
        assert_eq!(cell.load(Ordering::Relaxed), 4);
        // clearing the fastest request falls back to the next
        sessions.request_telemetry_period(2, None);
        assert_eq!(cell.load(Ordering::Relaxed), 12);
    }

    #[test]
    fn test_dispose_reapplies_reducers() {
        let sessions = map();
        let telemetry = sessions.telemetry_period_cell();
        let flush = sessions.flush_period_cell();

        sessions.open_session(1, 100);
        sessions.request_telemetry_period(1, Some(2));
        sessions.request_flush_period(1, Some(250));
        assert_eq!(telemetry.load(Ordering::Relaxed), 2);
        assert_eq!(flush.load(Ordering::Relaxed), 250);

        sessions.dispose(1);
        assert_eq!(telemetry.load(Ordering::Relaxed), 16);
        assert_eq!(flush.load(Ordering::Relaxed), 1_000);
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_metric_usage_aggregation() {
        let sessions = map();
        sessions.open_session(1, 100);
        sessions.open_session(2, 200);

        let use_a = MetricUse {
            metric: MetricId::GpuPower,
            device_id: 1,
            array_index: 0,
        };
        let use_b = MetricUse {
            metric: MetricId::CpuUtilization,
            device_id: 0,
            array_index: 0,
        };
        sessions.set_metric_usage(1, HashSet::from([use_a]));
        sessions.set_metric_usage(2, HashSet::from([use_a, use_b]));

        let aggregate = sessions.aggregate_metric_usage();
        assert_eq!(aggregate.len(), 2);
        assert_eq!(sessions.devices_in_use(), HashSet::from([0, 1]));

        sessions.dispose(2);
        assert_eq!(sessions.aggregate_metric_usage(), HashSet::from([use_a]));
    }
}
