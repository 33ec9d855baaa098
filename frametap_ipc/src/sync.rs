//! Process-shared synchronization primitives hosted in shared memory.
//!
//! The introspection segment carries one shared/exclusive lock and one
//! counting semaphore. Both are POSIX primitives initialized with
//! `PTHREAD_PROCESS_SHARED` / `pshared` so any process mapping the
//! segment participates.

use crate::error::{IpcError, IpcResult};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::time::Duration;

fn check(code: libc::c_int) -> IpcResult<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(IpcError::Sync {
            source: std::io::Error::from_raw_os_error(code),
        })
    }
}

fn check_errno(ret: libc::c_int) -> IpcResult<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(IpcError::Sync {
            source: std::io::Error::last_os_error(),
        })
    }
}

/// Shared/exclusive lock usable across processes.
#[repr(C)]
pub struct SharedRwLock {
    inner: UnsafeCell<libc::pthread_rwlock_t>,
}

unsafe impl Send for SharedRwLock {}
unsafe impl Sync for SharedRwLock {}

impl SharedRwLock {
    /// Initializes the lock in place.
    ///
    /// # Safety
    /// `ptr` must point at uninitialized, mapped memory that outlives
    /// every process using the lock; called exactly once per segment.
    pub unsafe fn init_at(ptr: *mut SharedRwLock) -> IpcResult<()> {
        let mut attr = MaybeUninit::<libc::pthread_rwlockattr_t>::uninit();
        check(libc::pthread_rwlockattr_init(attr.as_mut_ptr()))?;
        check(libc::pthread_rwlockattr_setpshared(
            attr.as_mut_ptr(),
            libc::PTHREAD_PROCESS_SHARED,
        ))?;
        let result = check(libc::pthread_rwlock_init(
            (*ptr).inner.get(),
            attr.as_ptr(),
        ));
        libc::pthread_rwlockattr_destroy(attr.as_mut_ptr());
        result
    }

    /// Takes the lock shared; blocks while a writer holds it.
    pub fn read(&self) -> IpcResult<SharedReadGuard<'_>> {
        check(unsafe { libc::pthread_rwlock_rdlock(self.inner.get()) })?;
        Ok(SharedReadGuard { lock: self })
    }

    /// Takes the lock exclusive; blocks while any holder exists.
    pub fn write(&self) -> IpcResult<SharedWriteGuard<'_>> {
        check(unsafe { libc::pthread_rwlock_wrlock(self.inner.get()) })?;
        Ok(SharedWriteGuard { lock: self })
    }

    fn unlock(&self) {
        // Unlock of a held lock only fails on corruption; nothing to do.
        let _ = unsafe { libc::pthread_rwlock_unlock(self.inner.get()) };
    }
}

/// Guard for a shared acquisition.
pub struct SharedReadGuard<'a> {
    lock: &'a SharedRwLock,
}

impl Drop for SharedReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// Guard for an exclusive acquisition.
pub struct SharedWriteGuard<'a> {
    lock: &'a SharedRwLock,
}

impl Drop for SharedWriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// Counting semaphore usable across processes.
#[repr(C)]
pub struct SharedSemaphore {
    inner: UnsafeCell<libc::sem_t>,
}

unsafe impl Send for SharedSemaphore {}
unsafe impl Sync for SharedSemaphore {}

impl SharedSemaphore {
    /// Initializes the semaphore in place with `initial` permits.
    ///
    /// # Safety
    /// Same contract as [`SharedRwLock::init_at`].
    pub unsafe fn init_at(ptr: *mut SharedSemaphore, initial: u32) -> IpcResult<()> {
        check_errno(libc::sem_init((*ptr).inner.get(), 1, initial))
    }

    /// Releases one permit.
    pub fn post(&self) -> IpcResult<()> {
        check_errno(unsafe { libc::sem_post(self.inner.get()) })
    }

    /// Waits for a permit, giving up after `timeout`.
    ///
    /// Returns `Ok(true)` when a permit was taken, `Ok(false)` on
    /// timeout.
    pub fn timed_wait(&self, timeout: Duration) -> IpcResult<bool> {
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        check_errno(unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) })?;

        let nanos = now.tv_nsec as i64 + timeout.subsec_nanos() as i64;
        let deadline = libc::timespec {
            tv_sec: now.tv_sec + timeout.as_secs() as libc::time_t + (nanos / 1_000_000_000),
            tv_nsec: nanos % 1_000_000_000,
        };

        loop {
            let ret = unsafe { libc::sem_timedwait(self.inner.get(), &deadline) };
            if ret == 0 {
                return Ok(true);
            }
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) => return Ok(false),
                _ => return Err(IpcError::Sync { source: err }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    // Tests host the primitives in heap memory; placement in a mapping is
    // byte-for-byte the same.

    #[test]
    fn test_rwlock_many_readers_one_writer() {
        let lock = Box::new(MaybeUninit::<SharedRwLock>::uninit());
        let lock: &SharedRwLock = unsafe {
            let ptr = lock.as_ptr() as *mut SharedRwLock;
            SharedRwLock::init_at(ptr).unwrap();
            &*ptr
        };
        let counter = AtomicU32::new(0);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        let _g = lock.read().unwrap();
                        counter.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..20 {
                    let _g = lock.write().unwrap();
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            });
        });
        assert_eq!(counter.load(Ordering::Relaxed), 4 * 50 + 20);
    }

    #[test]
    fn test_semaphore_timed_wait() {
        let sem = Box::new(MaybeUninit::<SharedSemaphore>::uninit());
        let sem: &SharedSemaphore = unsafe {
            let ptr = sem.as_ptr() as *mut SharedSemaphore;
            SharedSemaphore::init_at(ptr, 0).unwrap();
            &*ptr
        };

        // no permit yet: times out
        assert!(!sem.timed_wait(Duration::from_millis(20)).unwrap());

        sem.post().unwrap();
        sem.post().unwrap();
        assert!(sem.timed_wait(Duration::from_millis(20)).unwrap());
        assert!(sem.timed_wait(Duration::from_millis(20)).unwrap());
        assert!(!sem.timed_wait(Duration::from_millis(20)).unwrap());
    }

    #[test]
    fn test_semaphore_wakes_waiter() {
        let sem = Box::new(MaybeUninit::<SharedSemaphore>::uninit());
        let sem: &SharedSemaphore = unsafe {
            let ptr = sem.as_ptr() as *mut SharedSemaphore;
            SharedSemaphore::init_at(ptr, 0).unwrap();
            &*ptr
        };

        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| sem.timed_wait(Duration::from_secs(5)).unwrap());
            std::thread::sleep(Duration::from_millis(10));
            sem.post().unwrap();
            assert!(waiter.join().unwrap());
        });
    }
}
