// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Named, header-framed, status-machine-coordinated shared-memory regions.
//!
//! This crate is the wire layer of the ingestion server's shared-memory
//! exchange subsystem: the [`frame`] codec for the 64-byte control header,
//! the [`status`] machine that sequences producer and consumer, and the
//! [`registry`] that tracks every region this process has created or opened.
//! Higher-level IPC operations (read-from-client, write-to-client,
//! bidirectional) live in `ingest-core`, on top of these primitives.

pub mod error;
pub mod frame;
pub mod region;
pub mod registry;
pub mod status;

pub use error::IpcError;
pub use frame::{DataKind, Header, HEADER_SIZE};
pub use region::Region;
pub use registry::{Owner, RegionRegistry};
pub use status::{wait_for_status, Status};
