// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the ingestion router, session manager, and exchange
//! orchestrator.

use thiserror::Error;

/// Errors the core distinguishes, one variant family per kind.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Missing required header/parameter, unknown operation, unknown data type.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A resource (region, session) already exists under contested terms.
    #[error("contention: {0}")]
    Contention(String),

    /// A status-wait expired before the expected transition was observed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Header magic/version mismatch, or a decoding failure inside a handler.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// An OS shared-memory, filesystem, or network failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// Request body larger than the configured maximum.
    #[error("payload of {actual} bytes exceeds the {max} byte limit")]
    Overflow { actual: u64, max: u64 },
}

impl From<ingest_ipc::IpcError> for CoreError {
    fn from(err: ingest_ipc::IpcError) -> Self {
        use ingest_ipc::IpcError::*;
        match err {
            AlreadyExists(name) => CoreError::Contention(format!("region '{name}' already exists")),
            NotFound(name) => CoreError::Protocol(format!("region '{name}' not found")),
            Integrity(msg) => CoreError::Integrity(msg),
            Overflow { offset, len, buffer_size } => CoreError::Integrity(format!(
                "write of {len} bytes at offset {offset} exceeds buffer_size {buffer_size}"
            )),
            Timeout { region, target } => {
                CoreError::Timeout(format!("region '{region}' never reached status {target}"))
            }
            Io { region, source } => CoreError::Io(format!("region '{region}': {source}")),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Io(err.to_string())
    }
}

impl CoreError {
    /// The HTTP status code an adapter should report for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::Protocol(_) => 400,
            CoreError::Contention(_) => 409,
            CoreError::Timeout(_) => 504,
            CoreError::Integrity(_) => 422,
            CoreError::Io(_) => 500,
            CoreError::Overflow { .. } => 413,
        }
    }
}
