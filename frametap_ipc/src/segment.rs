//! Named shared memory segments.
//!
//! A segment is a `/dev/shm` file beginning with a cache-line aligned
//! `SegmentHeader`; the rest of the mapping is the payload hosting one
//! data store. Two handle kinds exist: `OwnedSegment` (creator; unlinks
//! the backing file on drop) and `ViewedSegment` (opener).

use crate::error::{IpcError, IpcResult};
use crate::platform;
use memmap2::MmapMut;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use std::time::{SystemTime, UNIX_EPOCH};

/// Magic bytes identifying a frametap segment.
pub const SEGMENT_MAGIC: [u8; 8] = *b"FTAPSEG\0";

/// Discriminant of the data store a segment hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StoreKind {
    /// Introspection tree plus sync primitives.
    Introspection = 1,
    /// Per-target frame data store.
    Frame = 2,
    /// Per-GPU telemetry store.
    Gpu = 3,
    /// System telemetry store.
    System = 4,
}

impl StoreKind {
    /// Decodes a raw value.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Introspection),
            2 => Some(Self::Frame),
            3 => Some(Self::Gpu),
            4 => Some(Self::System),
            _ => None,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Introspection => "introspection",
            Self::Frame => "frame",
            Self::Gpu => "gpu",
            Self::System => "system",
        }
    }
}

/// Header at the start of every segment.
#[repr(C, align(64))]
pub struct SegmentHeader {
    /// Magic bytes, `SEGMENT_MAGIC`.
    pub magic: [u8; 8],
    /// Raw `StoreKind` discriminant.
    pub store_kind: u8,
    _reserved: [u8; 3],
    /// Creating process id.
    pub writer_pid: u32,
    /// Total mapped size including this header.
    pub total_size: u64,
    /// Creation timestamp, nanoseconds since the UNIX epoch.
    pub created_ns: u64,
    _padding: [u8; 32],
}

const_assert_eq!(std::mem::size_of::<SegmentHeader>(), 64);
const_assert_eq!(std::mem::align_of::<SegmentHeader>(), 64);

impl SegmentHeader {
    fn new(kind: StoreKind, total_size: usize, writer_pid: u32) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        Self {
            magic: SEGMENT_MAGIC,
            store_kind: kind as u8,
            _reserved: [0; 3],
            writer_pid,
            total_size: total_size as u64,
            created_ns: now,
            _padding: [0; 32],
        }
    }

    fn validate(&self, name: &str, expected: StoreKind) -> IpcResult<()> {
        if self.magic != SEGMENT_MAGIC {
            return Err(IpcError::InvalidSegment {
                name: name.to_string(),
                reason: "bad magic",
            });
        }
        if self.store_kind != expected as u8 {
            return Err(IpcError::InvalidSegment {
                name: name.to_string(),
                reason: "store kind mismatch",
            });
        }
        Ok(())
    }
}

/// Discovery metadata written next to each segment as JSON.
#[derive(Debug, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// Segment name.
    pub name: String,
    /// Hosted store kind.
    pub kind: String,
    /// Total mapped size in bytes.
    pub size: usize,
    /// Creating process id.
    pub writer_pid: u32,
    /// Creation time.
    pub created_at: SystemTime,
}

/// Exclusively created segment; the backing file is removed on drop.
pub struct OwnedSegment {
    name: String,
    base: *mut u8,
    len: usize,
    _mmap: MmapMut,
}

impl OwnedSegment {
    /// Creates a segment of `total_size` bytes (must already be aligned
    /// per the sizing rules) hosting a store of the given kind.
    pub fn create(name: &str, kind: StoreKind, total_size: usize) -> IpcResult<Self> {
        let writer_pid = platform::current_pid();
        let mut mmap = platform::create_segment_mapping(name, total_size)?;

        let header = SegmentHeader::new(kind, total_size, writer_pid);
        let base = mmap.as_mut_ptr();
        // The mapping is fresh and private to us until the sidecar lands.
        unsafe {
            (base as *mut SegmentHeader).write(header);
        }

        Self::write_sidecar(name, kind, total_size, writer_pid)?;
        tracing::debug!(name, kind = kind.as_str(), total_size, "segment created");

        Ok(Self {
            name: name.to_string(),
            base,
            len: total_size,
            _mmap: mmap,
        })
    }

    fn write_sidecar(
        name: &str,
        kind: StoreKind,
        size: usize,
        writer_pid: u32,
    ) -> IpcResult<()> {
        let info = SegmentInfo {
            name: name.to_string(),
            kind: kind.as_str().to_string(),
            size,
            writer_pid,
            created_at: SystemTime::now(),
        };
        let json = serde_json::to_string_pretty(&info).map_err(|e| IpcError::Io {
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        std::fs::write(platform::sidecar_path(name), json)?;
        Ok(())
    }

    /// Segment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pointer to the payload area after the header.
    pub fn payload_ptr(&self) -> *mut u8 {
        unsafe { self.base.add(std::mem::size_of::<SegmentHeader>()) }
    }

    /// Payload bytes available after the header.
    pub fn payload_len(&self) -> usize {
        self.len - std::mem::size_of::<SegmentHeader>()
    }
}

impl Drop for OwnedSegment {
    fn drop(&mut self) {
        platform::remove_segment_files(&self.name);
        tracing::debug!(name = %self.name, "segment removed");
    }
}

// The mapping is plain memory; concurrent access discipline lives in the
// structures hosted inside it.
unsafe impl Send for OwnedSegment {}
unsafe impl Sync for OwnedSegment {}

/// Non-owning view over an existing segment.
#[derive(Debug)]
pub struct ViewedSegment {
    name: String,
    base: *mut u8,
    len: usize,
    _mmap: MmapMut,
}

impl ViewedSegment {
    /// Opens an existing segment and validates its header.
    pub fn open(name: &str, expected: StoreKind) -> IpcResult<Self> {
        let mut mmap = platform::open_segment_mapping(name)?;
        if mmap.len() < std::mem::size_of::<SegmentHeader>() {
            return Err(IpcError::InvalidSegment {
                name: name.to_string(),
                reason: "mapping smaller than header",
            });
        }
        let header = unsafe { &*(mmap.as_ptr() as *const SegmentHeader) };
        header.validate(name, expected)?;
        if header.total_size as usize != mmap.len() {
            return Err(IpcError::InvalidSegment {
                name: name.to_string(),
                reason: "size mismatch",
            });
        }
        let base = mmap.as_mut_ptr();
        let len = mmap.len();
        Ok(Self {
            name: name.to_string(),
            base,
            len,
            _mmap: mmap,
        })
    }

    /// Segment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pointer to the payload area after the header.
    pub fn payload_ptr(&self) -> *mut u8 {
        unsafe { self.base.add(std::mem::size_of::<SegmentHeader>()) }
    }

    /// Payload bytes available after the header.
    pub fn payload_len(&self) -> usize {
        self.len - std::mem::size_of::<SegmentHeader>()
    }
}

unsafe impl Send for ViewedSegment {}
unsafe impl Sync for ViewedSegment {}
