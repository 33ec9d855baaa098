//! Timestamp-indexed history over a bounded ring.
//!
//! Telemetry samples are pushed with monotonically non-decreasing
//! timestamps; lookups binary-search the safe serial range. Pushing out
//! of order leaves searches meaningless but harmless.

use crate::ring::BoundedRing;
use frametap_common::sample::{TelemetrySample, TelemetryValue};
use std::time::Duration;

/// Wrapper around `BoundedRing` adding timestamp addressing.
pub struct HistoryRing<'seg, T: TelemetryValue> {
    samples: BoundedRing<'seg, TelemetrySample<T>>,
}

enum BoundKind {
    Lower,
    Upper,
}

impl<'seg, T: TelemetryValue> HistoryRing<'seg, T> {
    pub(crate) fn new(samples: BoundedRing<'seg, TelemetrySample<T>>) -> Self {
        Self { samples }
    }

    /// Publishes a value with its timestamp.
    pub fn push(&self, value: T, timestamp: u64, timeout: Option<Duration>) -> bool {
        self.push_sample(TelemetrySample::new(value, timestamp), timeout)
    }

    /// Publishes an already-built sample.
    pub fn push_sample(&self, sample: TelemetrySample<T>, timeout: Option<Duration>) -> bool {
        self.samples.push(sample, timeout)
    }

    /// The most recent sample, or `None` before the first push.
    pub fn newest(&self) -> Option<TelemetrySample<T>> {
        let (first, last) = self.samples.serial_range();
        if first == last {
            return None;
        }
        Some(self.samples.at(last - 1))
    }

    /// Reads the sample at `serial`.
    pub fn at(&self, serial: u64) -> TelemetrySample<T> {
        self.samples.at(serial)
    }

    /// True until the first push.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples in the safe range.
    pub fn len(&self) -> u64 {
        let (first, last) = self.samples.serial_range();
        last - first
    }

    /// The safe readable serial range.
    pub fn serial_range(&self) -> (u64, u64) {
        self.samples.serial_range()
    }

    /// Advances the advisory read cursor.
    pub fn mark_next_read(&self, serial: u64) {
        self.samples.mark_next_read(serial)
    }

    /// First serial with timestamp `>= timestamp`; `last` if none.
    pub fn lower_bound_serial(&self, timestamp: u64) -> u64 {
        self.bound_serial(timestamp, BoundKind::Lower)
    }

    /// First serial with timestamp `> timestamp`; `last` if none.
    pub fn upper_bound_serial(&self, timestamp: u64) -> u64 {
        self.bound_serial(timestamp, BoundKind::Upper)
    }

    /// Serial whose timestamp is closest to `timestamp`, clamped to
    /// `[first, last - 1]`. Ties break toward the smaller serial.
    pub fn nearest_serial(&self, timestamp: u64) -> u64 {
        let (first, last) = self.samples.serial_range();
        if first == last {
            tracing::trace!("reading from empty history ring");
            return first;
        }

        let serial = self.lower_bound_serial(timestamp);

        // Requested timestamp is newer than the newest sample.
        if serial >= last {
            tracing::trace!(
                timestamp,
                newest = self.at(last - 1).timestamp,
                "target timestamp past end of history ring"
            );
            return last - 1;
        }

        // The previous sample may be closer, when one exists.
        if serial > first {
            let next_ts = self.at(serial).timestamp;
            let prev_ts = self.at(serial - 1).timestamp;
            // lower bound guarantees prev_ts < timestamp <= next_ts
            if timestamp - prev_ts <= next_ts - timestamp {
                return serial - 1;
            }
        }
        serial
    }

    /// Calls `f` on every sample with timestamp in `[start, end]`, in
    /// ascending serial order. Returns the number of samples visited.
    pub fn for_each_in_timestamp_range<F>(&self, start: u64, end: u64, mut f: F) -> usize
    where
        F: FnMut(&TelemetrySample<T>),
    {
        let (_, last) = self.samples.serial_range();
        let mut serial = self.lower_bound_serial(start);
        let mut count = 0;
        while serial < last {
            let sample = self.at(serial);
            if sample.timestamp > end {
                break;
            }
            // timestamp >= start is guaranteed by the lower bound
            f(&sample);
            count += 1;
            serial += 1;
        }
        count
    }

    fn bound_serial(&self, timestamp: u64, kind: BoundKind) -> u64 {
        let (first, last) = self.samples.serial_range();
        let mut lo = first;
        let mut hi = last;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let ts = self.at(mid).timestamp;
            let descend = match kind {
                BoundKind::Lower => ts < timestamp,
                BoundKind::Upper => ts <= timestamp,
            };
            if descend {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }
}
