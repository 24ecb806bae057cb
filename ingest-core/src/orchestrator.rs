// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The three high-level IPC operations built on top of the region registry
//! and status machine: read-from-client, write-to-client, and bidirectional.

use std::sync::Arc;

use bytes::Bytes;
use ingest_ipc::{wait_for_status, DataKind, RegionRegistry, Status};
use serde_json::{json, Map, Value};
use tracing::error;

use crate::config::Config;
use crate::error::CoreError;
use crate::handler::{HandlerKind, HandlerRegistry};
use crate::metadata::Metadata;

/// Maps the header's `data_type` field onto a content handler, defaulting
/// unknown values to `binary`.
fn handler_kind_for(data_type: u32) -> HandlerKind {
    match DataKind::from(data_type) {
        DataKind::Text => HandlerKind::Text,
        DataKind::Image => HandlerKind::Image,
        DataKind::Json => HandlerKind::Json,
        DataKind::Binary => HandlerKind::Binary,
    }
}

/// Implements the three exchange operations, sharing a
/// [`RegionRegistry`] and [`HandlerRegistry`] with the ingestion router.
pub struct ExchangeOrchestrator {
    registry: Arc<RegionRegistry>,
    handlers: Arc<HandlerRegistry>,
    config: Arc<Config>,
}

impl ExchangeOrchestrator {
    pub fn new(registry: Arc<RegionRegistry>, handlers: Arc<HandlerRegistry>, config: Arc<Config>) -> Self {
        ExchangeOrchestrator {
            registry,
            handlers,
            config,
        }
    }

    /// Opens `shm_name`, waits for `CLIENT_WRITING`, dispatches the payload
    /// to the handler selected by the header's `data_type`, and resets the
    /// region to `IDLE`.
    pub async fn read_from_client(
        &self,
        shm_name: &str,
        metadata: &Metadata,
    ) -> Result<Map<String, Value>, CoreError> {
        let region = self.registry.open(shm_name)?;

        let observed = wait_for_status(Status::ClientWriting, self.config.read_timeout(), || {
            region.read_header().map(|h| h.status).unwrap_or(Status::Error.as_u32())
        })
        .await;
        if !observed {
            // A status-wait timeout is a grace period, not a
            // poisoning event. The region is left exactly as observed.
            return Err(CoreError::Timeout(format!(
                "region '{shm_name}' never reached CLIENT_WRITING"
            )));
        }

        let result = (|| -> Result<Map<String, Value>, CoreError> {
            region.set_status(Status::ServerReading.as_u32())?;
            let header = region.read_header()?;
            let bytes = region.read_data(0, header.data_size)?;
            let kind = handler_kind_for(header.data_type);
            let mut result = self.handlers.dispatch(kind, &bytes, metadata, &self.config)?;
            result.insert("shm_operation".into(), json!("read"));
            result.insert("shm_name".into(), json!(shm_name));
            result.insert("data_type".into(), json!(kind.as_str()));
            region.set_status(Status::Idle.as_u32())?;
            Ok(result)
        })();

        if let Err(ref err) = result {
            error!(shm_name, %err, "read-from-client failed, poisoning region");
            let _ = region.set_status(Status::Error.as_u32());
        }
        result
    }

    /// Creates a new region of `size` bytes (defaulting to `len(bytes)` or
    /// the configured default), writes any inbound bytes, and marks it
    /// `READY` without waiting for the peer.
    pub fn write_to_client(
        &self,
        shm_name: &str,
        size: Option<u32>,
        bytes: Option<&Bytes>,
    ) -> Result<Map<String, Value>, CoreError> {
        let size = size
            .or_else(|| bytes.map(|b| b.len() as u32))
            .unwrap_or(self.config.default_shm_size());
        let region = self.registry.create(shm_name, size, DataKind::Binary.as_u32(), false)?;
        if let Some(bytes) = bytes {
            region.write_data(0, bytes)?;
        }
        region.set_status(Status::Ready.as_u32())?;
        Ok(Map::from_iter([
            ("shm_operation".into(), json!("write")),
            ("shm_name".into(), json!(shm_name)),
            ("size".into(), json!(size)),
        ]))
    }

    /// Opens `shm_name`, waits for `CLIENT_WRITING`, computes a response via
    /// `transform`, and either overwrites the same region or relocates the
    /// response into a `"{shm_name}_result"` companion region.
    pub async fn bidirectional(
        &self,
        shm_name: &str,
        transform: impl FnOnce(&Bytes, u32) -> Bytes,
    ) -> Result<Map<String, Value>, CoreError> {
        let region = self.registry.open(shm_name)?;

        let observed = wait_for_status(Status::ClientWriting, self.config.bidirectional_timeout(), || {
            region.read_header().map(|h| h.status).unwrap_or(Status::Error.as_u32())
        })
        .await;
        if !observed {
            return Err(CoreError::Timeout(format!(
                "region '{shm_name}' never reached CLIENT_WRITING"
            )));
        }

        let result = (|| -> Result<Map<String, Value>, CoreError> {
            region.set_status(Status::ServerReading.as_u32())?;
            let header = region.read_header()?;
            let input = region.read_data(0, header.data_size)?;
            region.set_status(Status::Processing.as_u32())?;

            let response = transform(&input, header.data_type);
            let input_size = input.len();
            let output_size = response.len();

            if (response.len() as u32) <= header.buffer_size {
                region.write_data(0, &response)?;
                region.set_status(Status::Ready.as_u32())?;
                Ok(Map::from_iter([
                    ("shm_operation".into(), json!("bidirectional")),
                    ("shm_name".into(), json!(shm_name)),
                    ("input_size".into(), json!(input_size)),
                    ("output_size".into(), json!(output_size)),
                ]))
            } else {
                let companion_name = format!("{shm_name}_result");
                let companion =
                    self.registry
                        .create(&companion_name, 2 * response.len() as u32, header.data_type, false)?;
                companion.write_data(0, &response)?;
                companion.set_status(Status::Ready.as_u32())?;
                // The input region is poisoned to ERROR to signal relocation;
                // a client distinguishes this from a genuine fault by
                // checking whether the companion region exists.
                region.set_status(Status::Error.as_u32())?;
                Ok(Map::from_iter([
                    ("shm_operation".into(), json!("bidirectional")),
                    ("shm_name".into(), json!(shm_name)),
                    ("output_shm".into(), json!(companion_name)),
                    ("input_size".into(), json!(input_size)),
                    ("output_size".into(), json!(output_size)),
                ]))
            }
        })();

        if let Err(ref err) = result {
            error!(shm_name, %err, "bidirectional exchange failed, poisoning region");
            let _ = region.set_status(Status::Error.as_u32());
        }
        result
    }
}

/// The default bidirectional transform: a JSON summary of the input.
pub fn default_transform(input: &Bytes, data_type: u32) -> Bytes {
    let summary = json!({
        "echoed_bytes": input.len(),
        "data_type": handler_kind_for(data_type).as_str(),
        "summary": format!("{} bytes received", input.len()),
    });
    Bytes::from(serde_json::to_vec(&summary).unwrap_or_default())
}
