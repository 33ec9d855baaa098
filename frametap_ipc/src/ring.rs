//! Lock-free single-producer / many-reader ring buffer.
//!
//! The ring lives entirely inside a shared memory segment: a `RingHeader`
//! with atomic serial counters followed by `capacity` slots of `T`.
//! Producer and readers hold `BoundedRing` views over the same bytes.
//!
//! Readers have no atomic snapshot of slot contents. Tearing is mitigated
//! statistically: the advertised safe range keeps the oldest `READ_MARGIN`
//! slots off limits once the ring has wrapped, so a reader staying inside
//! the range it was given is very unlikely to race the writer.

use crate::error::{IpcError, IpcResult};
use frametap_common::consts::{BACKPRESSURE_POLL_MS, READ_MARGIN};
use static_assertions::{assert_eq_size, const_assert_eq};
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

// Cross-process serials must be lock-free plain words.
assert_eq_size!(AtomicU64, u64);

/// Ring bookkeeping at the start of the ring's in-segment footprint.
#[repr(C)]
pub struct RingHeader {
    /// Number of slots.
    pub capacity: u64,
    /// Nonzero when the producer is gated by the slowest reader.
    pub backpressured: u32,
    _reserved: u32,
    /// Serial the producer will write next. Monotonic.
    pub next_write_serial: AtomicU64,
    /// Advisory read cursor advanced by readers via `mark_next_read`.
    pub next_read_serial: AtomicU64,
}

const_assert_eq!(std::mem::size_of::<RingHeader>(), 32);

/// View over a ring hosted in a shared memory segment.
///
/// `T` must be `Copy`: slots are republished by plain memory writes and
/// reads, and a stale read yields a possibly-torn but valid-to-copy value,
/// never undefined behavior.
///
/// Writing is single-producer by contract; concurrent `push` from more
/// than one thread is a logic error the ring does not detect.
pub struct BoundedRing<'seg, T: Copy> {
    hdr: &'seg RingHeader,
    slots: NonNull<T>,
    _seg: PhantomData<&'seg [T]>,
}

unsafe impl<T: Copy + Send> Send for BoundedRing<'_, T> {}
unsafe impl<T: Copy + Send> Sync for BoundedRing<'_, T> {}

impl<'seg, T: Copy> BoundedRing<'seg, T> {
    /// Initializes a ring header in place and returns a view over it.
    ///
    /// # Safety
    /// `hdr` and `slots` must point into a mapping that outlives `'seg`,
    /// with room for one header and `capacity` slots, and no other ring
    /// may already be initialized there.
    pub unsafe fn init_at(
        hdr: *mut RingHeader,
        slots: *mut T,
        capacity: usize,
        backpressured: bool,
    ) -> IpcResult<Self> {
        init_ring_header(hdr, capacity, backpressured)?;
        Self::from_raw(hdr, slots)
    }

    /// Builds a view over an already-initialized ring.
    ///
    /// # Safety
    /// `hdr` must point at a ring header initialized by `init_at` within
    /// a mapping that outlives `'seg`; `slots` must point at its slot
    /// array.
    pub unsafe fn from_raw(hdr: *const RingHeader, slots: *mut T) -> IpcResult<Self> {
        let hdr = &*hdr;
        let min = (2 * READ_MARGIN) as usize;
        if (hdr.capacity as usize) < min {
            return Err(IpcError::RingCapacity {
                capacity: hdr.capacity as usize,
                min,
            });
        }
        Ok(Self {
            hdr,
            slots: NonNull::new_unchecked(slots),
            _seg: PhantomData,
        })
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.hdr.capacity
    }

    /// True when the producer is gated by the read cursor.
    #[inline]
    pub fn backpressured(&self) -> bool {
        self.hdr.backpressured != 0
    }

    /// True until the first push.
    pub fn is_empty(&self) -> bool {
        self.hdr.next_write_serial.load(Ordering::Acquire) == 0
    }

    /// Publishes one value.
    ///
    /// Broadcast mode always overwrites the oldest slot and returns
    /// `true`. In backpressured mode the producer sleeps in 10 ms steps
    /// while the ring holds `capacity` unconsumed elements; when
    /// `timeout` elapses first, `false` is returned and nothing is
    /// written.
    pub fn push(&self, value: T, timeout: Option<Duration>) -> bool {
        if self.backpressured() {
            let start = Instant::now();
            loop {
                let nwr = self.hdr.next_write_serial.load(Ordering::Acquire);
                let nrs = self.hdr.next_read_serial.load(Ordering::Acquire);
                if nwr < nrs + self.hdr.capacity {
                    break;
                }
                if let Some(limit) = timeout {
                    if start.elapsed() >= limit {
                        return false;
                    }
                }
                std::thread::sleep(Duration::from_millis(BACKPRESSURE_POLL_MS));
            }
        }
        // Single producer: the serial is ours to read non-atomically and
        // bump after the slot write. The Release store is the publication.
        let serial = self.hdr.next_write_serial.load(Ordering::Relaxed);
        unsafe {
            self.slot_ptr(serial).write(value);
        }
        self.hdr
            .next_write_serial
            .store(serial + 1, Ordering::Release);
        true
    }

    /// Reads the value at `serial`.
    ///
    /// Serials outside the live window are logged and still read: the
    /// slot holds whatever bytes are there, which for `Copy` data is a
    /// stale or torn value, not a fault.
    pub fn at(&self, serial: u64) -> T {
        let nwr = self.hdr.next_write_serial.load(Ordering::Acquire);
        if serial + self.hdr.capacity <= nwr {
            tracing::warn!(serial, next_write_serial = nwr, "reading stale serial");
        } else if nwr <= serial {
            tracing::warn!(serial, next_write_serial = nwr, "reading nonexistent serial");
        }
        unsafe { self.slot_ptr(serial).read() }
    }

    /// The safe readable serial range `[first, last)`.
    ///
    /// `last` is the next write serial. Before the ring wraps `first` is
    /// zero; afterwards the oldest `READ_MARGIN` live slots are excluded
    /// in broadcast mode. A backpressured producer never overwrites
    /// unconsumed slots, so every live slot is safe there.
    pub fn serial_range(&self) -> (u64, u64) {
        let nwr = self.hdr.next_write_serial.load(Ordering::Acquire);
        if nwr < self.hdr.capacity {
            (0, nwr)
        } else if self.backpressured() {
            (nwr - self.hdr.capacity, nwr)
        } else {
            (nwr - self.hdr.capacity + READ_MARGIN, nwr)
        }
    }

    /// Advances the advisory read cursor; it never moves backwards.
    pub fn mark_next_read(&self, serial: u64) {
        self.hdr
            .next_read_serial
            .fetch_max(serial, Ordering::AcqRel);
    }

    #[inline]
    fn slot_ptr(&self, serial: u64) -> *mut T {
        let index = (serial % self.hdr.capacity) as usize;
        unsafe { self.slots.as_ptr().add(index) }
    }
}

/// Bytes a ring of `capacity` slots of `T` occupies in a segment.
pub const fn ring_footprint_bytes<T>(capacity: usize) -> usize {
    std::mem::size_of::<RingHeader>() + capacity * std::mem::size_of::<T>()
}

/// Initializes a bare ring header in place.
///
/// # Safety
/// Same placement contract as [`BoundedRing::init_at`]; used where the
/// slot type is only known as a runtime discriminant.
pub(crate) unsafe fn init_ring_header(
    hdr: *mut RingHeader,
    capacity: usize,
    backpressured: bool,
) -> IpcResult<()> {
    let min = (2 * READ_MARGIN) as usize;
    if capacity < min {
        return Err(IpcError::RingCapacity { capacity, min });
    }
    hdr.write(RingHeader {
        capacity: capacity as u64,
        backpressured: backpressured as u32,
        _reserved: 0,
        next_write_serial: AtomicU64::new(0),
        next_read_serial: AtomicU64::new(0),
    });
    Ok(())
}

#[cfg(test)]
pub(crate) mod testhost {
    //! Heap-hosted ring for unit tests; segment-hosted paths are covered
    //! by the integration tests.

    use super::*;

    pub struct HostedRing<T: Copy> {
        // 8-byte-aligned backing words; reconstructed for deallocation
        base: *mut u64,
        words: usize,
        _marker: PhantomData<T>,
    }

    impl<T: Copy> HostedRing<T> {
        pub fn new(capacity: usize, backpressured: bool) -> Self {
            assert!(std::mem::align_of::<T>() <= 8);
            let bytes = ring_footprint_bytes::<T>(capacity).max(1);
            let words = (bytes + 7) / 8;
            let base = Box::into_raw(vec![0u64; words].into_boxed_slice()) as *mut u64;
            let host = Self {
                base,
                words,
                _marker: PhantomData,
            };
            unsafe {
                BoundedRing::<T>::init_at(
                    host.hdr_ptr(),
                    host.slots_ptr(),
                    capacity,
                    backpressured,
                )
                .expect("test ring init");
            }
            host
        }

        fn hdr_ptr(&self) -> *mut RingHeader {
            self.base as *mut RingHeader
        }

        fn slots_ptr(&self) -> *mut T {
            unsafe { (self.base as *mut u8).add(std::mem::size_of::<RingHeader>()) as *mut T }
        }

        pub fn ring(&self) -> BoundedRing<'_, T> {
            unsafe { BoundedRing::from_raw(self.hdr_ptr(), self.slots_ptr()).unwrap() }
        }
    }

    impl<T: Copy> Drop for HostedRing<T> {
        fn drop(&mut self) {
            unsafe {
                drop(Box::from_raw(std::slice::from_raw_parts_mut(
                    self.base, self.words,
                )));
            }
        }
    }
}
