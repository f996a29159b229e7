//! BLOB payload storage.
//!
//! A payload is either owned bytes ([`BlobData::Inline`]) or a [`SharedBlob`]:
//! an anonymous shared-memory file that is mapped into this process and whose
//! descriptor can be handed to the hub over a local socket without copying the
//! bytes. On Linux the backing file is a `memfd`; elsewhere it is a temporary
//! file that is unlinked immediately after creation.

use std::fmt;
use std::fs::File;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use bytes::Bytes;
use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::error::{AppResult, IndiError};

/// Bytes of a BLOB member.
#[derive(Clone)]
pub enum BlobData {
    /// Owned bytes, sent as base64 on a stream or copied into shared memory on a socket.
    Inline(Bytes),
    /// Descriptor-backed shared memory, attached without copying.
    Shared(Arc<SharedBlob>),
}

impl BlobData {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            BlobData::Inline(bytes) => bytes.len(),
            BlobData::Shared(blob) => blob.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload bytes.
    pub fn as_slice(&self) -> &[u8] {
        match self {
            BlobData::Inline(bytes) => bytes,
            BlobData::Shared(blob) => blob.as_slice(),
        }
    }

    /// Descriptor of the backing shared memory, if any.
    pub fn raw_fd(&self) -> Option<RawFd> {
        match self {
            BlobData::Inline(_) => None,
            BlobData::Shared(blob) => Some(blob.as_raw_fd()),
        }
    }
}

impl fmt::Debug for BlobData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobData::Inline(bytes) => write!(f, "Inline({} bytes)", bytes.len()),
            BlobData::Shared(blob) => write!(f, "Shared(fd {}, {} bytes)", blob.as_raw_fd(), blob.len()),
        }
    }
}

impl PartialEq for BlobData {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl From<Vec<u8>> for BlobData {
    fn from(value: Vec<u8>) -> Self {
        BlobData::Inline(Bytes::from(value))
    }
}

impl From<Bytes> for BlobData {
    fn from(value: Bytes) -> Self {
        BlobData::Inline(value)
    }
}

impl From<&'static [u8]> for BlobData {
    fn from(value: &'static [u8]) -> Self {
        BlobData::Inline(Bytes::from_static(value))
    }
}

impl From<SharedBlob> for BlobData {
    fn from(value: SharedBlob) -> Self {
        BlobData::Shared(Arc::new(value))
    }
}

enum Mapping {
    // zero-length files cannot be mapped
    Empty,
    Writable(MmapMut),
    ReadOnly(Mmap),
}

/// Memory-mapped, descriptor-backed buffer.
pub struct SharedBlob {
    file: File,
    map: Mapping,
    len: usize,
}

impl SharedBlob {
    /// Allocate a zero-filled shared buffer of `len` bytes.
    pub fn create(len: usize) -> AppResult<Self> {
        let file = anonymous_file().map_err(IndiError::SharedMemory)?;
        file.set_len(len as u64).map_err(IndiError::SharedMemory)?;

        let map = if len == 0 {
            Mapping::Empty
        } else {
            // SAFETY: the file is private to this process until its descriptor is
            // sent, and was just sized to `len`.
            let mmap = unsafe { MmapOptions::new().len(len).map_mut(&file) }.map_err(IndiError::SharedMemory)?;
            Mapping::Writable(mmap)
        };

        Ok(Self { file, map, len })
    }

    /// Copy `bytes` into a fresh shared buffer.
    pub fn from_bytes(bytes: &[u8]) -> AppResult<Self> {
        let mut blob = Self::create(bytes.len())?;
        if let Some(dst) = blob.as_mut_slice() {
            dst.copy_from_slice(bytes);
        }
        Ok(blob)
    }

    /// Map a descriptor received from a peer, read-only.
    ///
    /// Fails if the backing file is shorter than `len`.
    pub fn from_fd(fd: OwnedFd, len: usize) -> AppResult<Self> {
        let file = File::from(fd);
        let actual = file.metadata().map_err(IndiError::SharedMemory)?.len();
        if actual < len as u64 {
            return Err(IndiError::SharedMemory(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("shared buffer holds {actual} bytes, {len} announced"),
            )));
        }

        let map = if len == 0 {
            Mapping::Empty
        } else {
            // SAFETY: the sender no longer writes to a buffer once its descriptor is sent.
            let mmap = unsafe { MmapOptions::new().len(len).map(&file) }.map_err(IndiError::SharedMemory)?;
            Mapping::ReadOnly(mmap)
        };

        Ok(Self { file, map, len })
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mapped bytes.
    pub fn as_slice(&self) -> &[u8] {
        match &self.map {
            Mapping::Empty => &[],
            Mapping::Writable(m) => &m[..],
            Mapping::ReadOnly(m) => &m[..],
        }
    }

    /// Mutable view, only for buffers created locally.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match &mut self.map {
            Mapping::Empty => Some(Default::default()),
            Mapping::Writable(m) => Some(&mut m[..]),
            Mapping::ReadOnly(_) => None,
        }
    }
}

impl AsRawFd for SharedBlob {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsFd for SharedBlob {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl fmt::Debug for SharedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBlob")
            .field("fd", &self.file.as_raw_fd())
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(target_os = "linux")]
fn anonymous_file() -> io::Result<File> {
    let name = b"rust_indi_blob\0";
    // SAFETY: `name` is NUL-terminated and outlives the call.
    let fd = unsafe { libc::memfd_create(name.as_ptr().cast(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: memfd_create returned a fresh descriptor that nothing else owns.
    Ok(File::from(unsafe { OwnedFd::from_raw_fd(fd) }))
}

#[cfg(not(target_os = "linux"))]
fn anonymous_file() -> io::Result<File> {
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let path = std::env::temp_dir().join(format!(
        "rust_indi_blob_{}_{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(&path)?;
    std::fs::remove_file(&path)?;
    Ok(file)
}
