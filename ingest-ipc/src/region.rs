// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A single named, host-local shared-memory region: a 64-byte control header
//! followed by a fixed-capacity payload area.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use shared_memory::{Shmem, ShmemConf};
use tracing::warn;

use crate::error::IpcError;
use crate::frame::{pack, unpack, Header, HEADER_SIZE};

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// A mapped region plus the mutex that serializes header read-modify-write
/// cycles performed by this process.
pub struct Region {
    name: String,
    shmem: Mutex<Shmem>,
}

// SAFETY: `Shmem` wraps a raw pointer into OS-managed shared memory; all
// access in this module goes through `self.shmem.lock()`, so concurrent
// access from multiple threads in this process is serialized here. Cross
// process synchronization is the Status Machine's job, not this type's.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Allocates a new OS-named region of `HEADER_SIZE + payload_size` bytes
    /// and writes the initial header.
    pub fn create(name: &str, payload_size: u32, data_type: u32) -> Result<Self, IpcError> {
        let shmem = ShmemConf::new()
            .size(HEADER_SIZE + payload_size as usize)
            .os_id(name)
            .create()
            .map_err(|e| IpcError::io(name, e))?;
        let region = Region {
            name: name.to_owned(),
            shmem: Mutex::new(shmem),
        };
        region.write_header(&Header::new(payload_size, data_type, now_secs()))?;
        Ok(region)
    }

    /// Attaches to an existing region by name without touching its header.
    pub fn open(name: &str) -> Result<Self, IpcError> {
        let shmem = ShmemConf::new()
            .os_id(name)
            .open()
            .map_err(|e| IpcError::io(name, e))?;
        Ok(Region {
            name: name.to_owned(),
            shmem: Mutex::new(shmem),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.shmem.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: the mapping is valid for `guard.len()` bytes for the
        // lifetime of `guard`, and we hold the lock for the duration of `f`.
        let slice = unsafe { std::slice::from_raw_parts(guard.as_ptr(), guard.len()) };
        f(slice)
    }

    fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.shmem.lock().unwrap_or_else(|e| e.into_inner());
        let len = guard.len();
        // SAFETY: see `with_bytes`; `&mut` access is exclusive because we
        // hold the only lock on `self.shmem`.
        let slice = unsafe { std::slice::from_raw_parts_mut(guard.as_mut_ptr(), len) };
        f(slice)
    }

    /// Reads and decodes the 64-byte control header.
    pub fn read_header(&self) -> Result<Header, IpcError> {
        self.with_bytes(|buf| unpack(&buf[..HEADER_SIZE]))
    }

    /// Encodes and persists a full header, never touching the payload area.
    pub fn write_header(&self, header: &Header) -> Result<(), IpcError> {
        let frame = pack(header);
        self.with_bytes_mut(|buf| {
            buf[..HEADER_SIZE].copy_from_slice(&frame);
        });
        Ok(())
    }

    /// Sets only the `status` field, refreshing the timestamp.
    pub fn set_status(&self, status: u32) -> Result<(), IpcError> {
        let mut header = self.read_header()?;
        header.status = status;
        header.timestamp = now_secs();
        self.write_header(&header)
    }

    /// Reads `size` bytes of payload starting at `offset`, never touching the header.
    pub fn read_data(&self, offset: u32, size: u32) -> Result<Bytes, IpcError> {
        let header = self.read_header()?;
        let end = offset.checked_add(size).ok_or_else(|| IpcError::Integrity("offset overflow".into()))?;
        if end > header.buffer_size {
            return Err(IpcError::Integrity(format!(
                "read of {size} bytes at offset {offset} exceeds buffer_size {}",
                header.buffer_size
            )));
        }
        let start = HEADER_SIZE + offset as usize;
        Ok(self.with_bytes(|buf| Bytes::copy_from_slice(&buf[start..start + size as usize])))
    }

    /// Writes `bytes` at `offset`, refusing writes that would extend past
    /// `buffer_size`; on success, updates `data_size` and the timestamp.
    pub fn write_data(&self, offset: u32, bytes: &[u8]) -> Result<(), IpcError> {
        let mut header = self.read_header()?;
        let len = bytes.len() as u32;
        let end = offset
            .checked_add(len)
            .ok_or_else(|| IpcError::Integrity("offset overflow".into()))?;
        if end > header.buffer_size {
            return Err(IpcError::Overflow {
                offset,
                len,
                buffer_size: header.buffer_size,
            });
        }
        let start = HEADER_SIZE + offset as usize;
        self.with_bytes_mut(|buf| {
            buf[start..start + bytes.len()].copy_from_slice(bytes);
        });
        header.data_size = header.data_size.max(end);
        header.timestamp = now_secs();
        self.write_header(&header)
    }

    /// Detaches the local mapping and unlinks the OS name. Idempotent from
    /// the caller's point of view: `shared_memory`'s own unlink-on-drop
    /// suppresses the underlying OS error rather than returning it, so this
    /// cannot surface a real unlink failure to the caller. It logs the
    /// attempt at `warn` level so an operator can at least correlate a
    /// lingering OS object with the region that was closed.
    pub fn close(self) {
        let name = self.name.clone();
        drop(self.shmem); // Shmem's Drop unmaps and, if owner, unlinks the OS object.
        warn!(region = %name, "closed shared-memory region; unlink errors, if any, are not observable here");
    }
}
