//! Named, reference-counted, lazily-initialized shared-memory region.
//!
//! The OS-level mapping (`shm_open`+`mmap` on POSIX, `CreateFileMapping` on
//! Windows) is delegated to the `shared_memory` crate; this module owns
//! everything inside the mapping: the compatibility header, the
//! first-writer race between the owner and any joiners, and the split of
//! "who tears the object down" between owner and joiner.

use crate::error::{IpcError, Result};
use shared_memory::ShmemConf;
use std::io;
use std::marker::PhantomData;
use std::mem;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SegmentParams {
    pub physical_name: String,
    pub logical_name: String,
    pub kind: u16,
    pub version: u16,
}

/// Leading bytes of every segment, written once by the owner and checked by
/// every joiner before the rest of the body is trusted.
#[repr(C)]
struct SegmentHeader {
    kind: u16,
    version: u16,
    initialized: AtomicU8,
}

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
const JOIN_POLL_ATTEMPTS: u32 = 5_000;

/// A shared-memory region holding a body of type `H` after a
/// [`SegmentHeader`]. `H` is never moved or copied out of the mapping; all
/// access goes through [`Segment::body`]/[`Segment::body_ptr`].
pub struct Segment<H> {
    shmem: shared_memory::Shmem,
    params: SegmentParams,
    owner: bool,
    trailing_len: usize,
    _marker: PhantomData<H>,
}

unsafe impl<H: Send> Send for Segment<H> {}
unsafe impl<H: Sync> Sync for Segment<H> {}

impl<H> Segment<H> {
    fn total_size(trailing_len: usize) -> usize {
        mem::size_of::<SegmentHeader>() + mem::size_of::<H>() + trailing_len
    }

    /// Creates the backing object and claims ownership. `trailing_len` bytes
    /// are reserved after the body `H` for a variable-length payload (the
    /// channel's message buffer, sized to the message type's `MAX_SIZE`).
    /// The caller is responsible for initializing the body (`body_ptr`)
    /// before any other thread in this process publishes the segment's
    /// existence to a peer.
    pub fn create(params: SegmentParams, trailing_len: usize) -> Result<Self> {
        let shmem = ShmemConf::new()
            .size(Self::total_size(trailing_len))
            .os_id(&params.physical_name)
            .create()
            .map_err(|e| IpcError::Os(io::Error::other(e.to_string())))?;

        let header = unsafe { &*(shmem.as_ptr() as *const SegmentHeader) };
        header.initialized.store(0, Ordering::Relaxed);

        let header_mut = unsafe { &mut *(shmem.as_ptr() as *mut SegmentHeader) };
        header_mut.kind = params.kind;
        header_mut.version = params.version;
        header_mut.initialized.store(1, Ordering::Release);

        Ok(Segment {
            shmem,
            params,
            owner: true,
            trailing_len,
            _marker: PhantomData,
        })
    }

    /// Attaches to an already-created segment. Blocks briefly for the owner
    /// to finish initializing the header, then checks `(kind, version)`
    /// compatibility before returning.
    pub fn open(params: SegmentParams, trailing_len: usize) -> Result<Self> {
        let shmem = ShmemConf::new()
            .size(Self::total_size(trailing_len))
            .os_id(&params.physical_name)
            .open()
            .map_err(|e| IpcError::Os(io::Error::other(e.to_string())))?;

        let header = unsafe { &*(shmem.as_ptr() as *const SegmentHeader) };

        let mut attempts = 0;
        while header.initialized.load(Ordering::Acquire) == 0 {
            attempts += 1;
            if attempts > JOIN_POLL_ATTEMPTS {
                return Err(IpcError::Os(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "owner never finished initializing segment",
                )));
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        if header.kind != params.kind || header.version != params.version {
            return Err(IpcError::IncompatibleSegment {
                expected: (params.kind, params.version),
                found: (header.kind, header.version),
            });
        }

        Ok(Segment {
            shmem,
            params,
            owner: false,
            trailing_len,
            _marker: PhantomData,
        })
    }

    pub fn params(&self) -> &SegmentParams {
        &self.params
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn body_ptr(&self) -> *mut H {
        unsafe { self.shmem.as_ptr().add(mem::size_of::<SegmentHeader>()) as *mut H }
    }

    pub fn body(&self) -> &H {
        unsafe { &*self.body_ptr() }
    }

    /// Pointer to the `trailing_len`-byte region following the body.
    pub fn trailing_ptr(&self) -> *mut u8 {
        unsafe {
            self.shmem
                .as_ptr()
                .add(mem::size_of::<SegmentHeader>() + mem::size_of::<H>())
        }
    }

    pub fn trailing_len(&self) -> usize {
        self.trailing_len
    }
}
