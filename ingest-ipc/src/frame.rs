// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The 64-byte control header that precedes every region's payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::IpcError;

/// Magic constant identifying a valid region header (`"SHME"` read little-endian).
pub const MAGIC: u32 = 0x5348_4D45;

/// The only wire version this crate understands.
pub const VERSION: u32 = 1;

/// Size in bytes of the control header prepended to every region.
pub const HEADER_SIZE: usize = 64;

/// Numeric discriminant stored in the header's `data_type` field.
///
/// Unknown values decode as [`DataKind::Binary`], matching the orchestrator's
/// fallback when dispatching by header-declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Binary,
    Text,
    Image,
    Json,
}

impl DataKind {
    pub fn as_u32(self) -> u32 {
        match self {
            DataKind::Binary => 0,
            DataKind::Text => 1,
            DataKind::Image => 2,
            DataKind::Json => 3,
        }
    }
}

impl From<u32> for DataKind {
    fn from(value: u32) -> Self {
        match value {
            1 => DataKind::Text,
            2 => DataKind::Image,
            3 => DataKind::Json,
            _ => DataKind::Binary,
        }
    }
}

/// In-memory representation of a region's 64-byte control header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub magic: u32,
    pub version: u32,
    pub status: u32,
    pub data_size: u32,
    pub buffer_size: u32,
    pub data_type: u32,
    /// Reserved: producer sets, consumer may verify. Always written as 0 today.
    // TODO: hook CRC32 verification here once a caller needs integrity checking.
    pub checksum: u32,
    /// Seconds since epoch of the last header write.
    pub timestamp: f64,
    /// Reserved for future use; round-trips unchanged.
    pub flags: u64,
}

impl Header {
    /// Builds the initial header for a freshly created region.
    pub fn new(buffer_size: u32, data_type: u32, timestamp: f64) -> Self {
        Header {
            magic: MAGIC,
            version: VERSION,
            status: 0,
            data_size: 0,
            buffer_size,
            data_type,
            checksum: 0,
            timestamp,
            flags: 0,
        }
    }

    /// A header is valid iff the magic and version fields match this crate's constants.
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC && self.version == VERSION
    }
}

/// Packs a [`Header`] into a 64-byte little-endian frame.
pub fn pack(header: &Header) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE);
    buf.put_u32_le(header.magic);
    buf.put_u32_le(header.version);
    buf.put_u32_le(header.status);
    buf.put_u32_le(header.data_size);
    buf.put_u32_le(header.buffer_size);
    buf.put_u32_le(header.data_type);
    buf.put_u32_le(header.checksum);
    buf.put_f64_le(header.timestamp);
    buf.put_u64_le(header.flags);
    buf.resize(HEADER_SIZE, 0);
    buf.freeze()
}

/// Unpacks a 64-byte little-endian frame into a [`Header`].
///
/// Fails only on short input; the caller checks [`Header::is_valid`] for
/// magic/version mismatches.
pub fn unpack(frame: &[u8]) -> Result<Header, IpcError> {
    if frame.len() < HEADER_SIZE {
        return Err(IpcError::Integrity(format!(
            "frame too short: {} bytes, need at least {HEADER_SIZE}",
            frame.len()
        )));
    }
    let mut buf = frame;
    Ok(Header {
        magic: buf.get_u32_le(),
        version: buf.get_u32_le(),
        status: buf.get_u32_le(),
        data_size: buf.get_u32_le(),
        buffer_size: buf.get_u32_le(),
        data_type: buf.get_u32_le(),
        checksum: buf.get_u32_le(),
        timestamp: buf.get_f64_le(),
        flags: buf.get_u64_le(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_fields() {
        let header = Header::new(4096, DataKind::Json.as_u32(), 1_700_000_000.5);
        let frame = pack(&header);
        assert_eq!(frame.len(), HEADER_SIZE);
        let decoded = unpack(&frame).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.is_valid());
    }

    #[test]
    fn unpack_rejects_short_frames() {
        let short = [0u8; 10];
        assert!(unpack(&short).is_err());
    }

    #[test]
    fn unpack_rejects_frames_shorter_than_header_size() {
        let almost = [0u8; HEADER_SIZE - 1];
        assert!(unpack(&almost).is_err());
    }

    #[test]
    fn unknown_data_type_decodes_as_binary() {
        assert_eq!(DataKind::from(99), DataKind::Binary);
    }

    #[test]
    fn invalid_magic_fails_is_valid() {
        let mut header = Header::new(10, 0, 0.0);
        header.magic = 0xDEAD_BEEF;
        assert!(!header.is_valid());
    }
}
