//! Linux shared memory plumbing.
//!
//! Segments are files under `/dev/shm` mapped with `memmap2`. Creation is
//! exclusive (`create_new`); permissive mode 0o666 mirrors the service's
//! world-readable access policy, leaving access control to the segment
//! name salt and filesystem ACLs.

use crate::error::{IpcError, IpcResult};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

/// Filesystem path backing a named segment.
pub fn segment_path(name: &str) -> PathBuf {
    PathBuf::from(format!("/dev/shm/{name}"))
}

/// Filesystem path of a segment's discovery sidecar.
pub fn sidecar_path(name: &str) -> PathBuf {
    PathBuf::from(format!("/dev/shm/{name}.meta"))
}

/// Creates the backing file for a new segment and maps it read-write.
///
/// Fails with `SegmentUnavailable` if the file already exists or cannot
/// be created. The fresh mapping is zero-filled by the kernel.
pub fn create_segment_mapping(name: &str, size: usize) -> IpcResult<MmapMut> {
    let path = segment_path(name);
    let file = OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .mode(0o666)
        .open(&path)
        .map_err(|source| IpcError::SegmentUnavailable {
            name: name.to_string(),
            source,
        })?;
    file.set_len(size as u64)
        .map_err(|source| IpcError::SegmentUnavailable {
            name: name.to_string(),
            source,
        })?;
    let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|source| {
        IpcError::SegmentUnavailable {
            name: name.to_string(),
            source,
        }
    })?;
    Ok(mmap)
}

/// Maps an existing segment read-write.
///
/// Viewers need write access: ring read cursors and the introspection
/// sync primitives live inside the mapping.
pub fn open_segment_mapping(name: &str) -> IpcResult<MmapMut> {
    let path = segment_path(name);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|source| IpcError::SegmentUnavailable {
            name: name.to_string(),
            source,
        })?;
    let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|source| {
        IpcError::SegmentUnavailable {
            name: name.to_string(),
            source,
        }
    })?;
    Ok(mmap)
}

/// Removes a segment's backing file and sidecar. Missing files are fine.
pub fn remove_segment_files(name: &str) {
    let _ = std::fs::remove_file(segment_path(name));
    let _ = std::fs::remove_file(sidecar_path(name));
}

/// Current process id.
pub fn current_pid() -> u32 {
    nix::unistd::getpid().as_raw() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_open_remove() {
        let name = format!("ftap_platform_test_{}", current_pid());
        let mmap = create_segment_mapping(&name, 64 * 1024).unwrap();
        assert_eq!(mmap.len(), 64 * 1024);
        // second exclusive create must fail
        assert!(matches!(
            create_segment_mapping(&name, 64 * 1024),
            Err(IpcError::SegmentUnavailable { .. })
        ));
        let view = open_segment_mapping(&name).unwrap();
        assert_eq!(view.len(), 64 * 1024);
        remove_segment_files(&name);
        assert!(matches!(
            open_segment_mapping(&name),
            Err(IpcError::SegmentUnavailable { .. })
        ));
    }
}
