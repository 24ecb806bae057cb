// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the shared-memory exchange subsystem.

use thiserror::Error;

/// Errors raised by the frame codec, region registry, and status machine.
#[derive(Debug, Error)]
pub enum IpcError {
    /// A region of this name already exists and `exist_ok` was not set.
    #[error("region '{0}' already exists")]
    AlreadyExists(String),

    /// No region of this name is known to the OS namespace.
    #[error("region '{0}' not found")]
    NotFound(String),

    /// A header failed to decode, or decoded with a bad magic/version, or an
    /// offset/length fell outside the region's payload capacity.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// `write_data` would have written past `buffer_size`.
    #[error("write of {len} bytes at offset {offset} exceeds buffer_size {buffer_size}")]
    Overflow {
        offset: u32,
        len: u32,
        buffer_size: u32,
    },

    /// `wait_for_status` did not observe the target status before its deadline.
    #[error("timed out waiting for status {target} on region '{region}'")]
    Timeout { region: String, target: u32 },

    /// The underlying OS shared-memory mapping failed.
    #[error("shared-memory I/O error on region '{region}': {source}")]
    Io {
        region: String,
        #[source]
        source: shared_memory::ShmemError,
    },
}

impl IpcError {
    pub fn io(region: impl Into<String>, source: shared_memory::ShmemError) -> Self {
        IpcError::Io {
            region: region.into(),
            source,
        }
    }
}
