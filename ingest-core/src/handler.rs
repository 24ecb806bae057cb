// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The fixed `{text, image, binary, json, file, shm}` handler registry.
//!
//! The per-kind payload analyzers (real image decoding, JSON schema
//! validation) are external collaborators: the `image` and `json` handlers
//! here do only the structural work size/md5 reporting requires, and are
//! deliberately small enough
//! that a caller can swap in a real analyzer by registering a different
//! closure through [`HandlerRegistry::register`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::Config;
use crate::error::CoreError;
use crate::metadata::Metadata;

/// The closed set of declared payload kinds a client may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Text,
    Image,
    Binary,
    Json,
    File,
    /// Not dispatched through [`HandlerRegistry::dispatch`]: the router
    /// intercepts `type=shm` before consulting the registry and hands the
    /// request to the exchange orchestrator instead. Kept in this enum so
    /// every error message that lists "supported types" stays exhaustive.
    Shm,
}

impl HandlerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HandlerKind::Text => "text",
            HandlerKind::Image => "image",
            HandlerKind::Binary => "binary",
            HandlerKind::Json => "json",
            HandlerKind::File => "file",
            HandlerKind::Shm => "shm",
        }
    }

    pub const ALL: [HandlerKind; 6] = [
        HandlerKind::Text,
        HandlerKind::Image,
        HandlerKind::Binary,
        HandlerKind::Json,
        HandlerKind::File,
        HandlerKind::Shm,
    ];
}

impl std::str::FromStr for HandlerKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(HandlerKind::Text),
            "image" => Ok(HandlerKind::Image),
            "binary" => Ok(HandlerKind::Binary),
            "json" => Ok(HandlerKind::Json),
            "file" => Ok(HandlerKind::File),
            "shm" => Ok(HandlerKind::Shm),
            other => Err(CoreError::Protocol(format!(
                "unknown type '{other}', supported types are: {}",
                HandlerKind::ALL.map(HandlerKind::as_str).join(", ")
            ))),
        }
    }
}

/// A handler turns bytes plus request metadata into a structured JSON result.
pub type Handler = dyn Fn(&Bytes, &Metadata, &Config) -> Result<Map<String, Value>, CoreError>
    + Send
    + Sync;

/// Dispatch table keyed by [`HandlerKind`]. `Shm` is never registered here;
/// see [`HandlerKind::Shm`].
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKind, Arc<Handler>>,
}

impl HandlerRegistry {
    /// Builds the default registry: `text`, `binary`, `image`, `json`, `file`.
    pub fn with_defaults() -> Self {
        let mut registry = HandlerRegistry {
            handlers: HashMap::new(),
        };
        registry.register(HandlerKind::Text, Arc::new(text_handler));
        registry.register(HandlerKind::Binary, Arc::new(binary_handler));
        registry.register(HandlerKind::Image, Arc::new(image_handler));
        registry.register(HandlerKind::Json, Arc::new(json_handler));
        registry.register(HandlerKind::File, Arc::new(file_handler));
        registry
    }

    /// Replaces (or installs) the handler for `kind`, e.g. to plug in a real
    /// image decoder in place of the structural default.
    pub fn register(&mut self, kind: HandlerKind, handler: Arc<Handler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn dispatch(
        &self,
        kind: HandlerKind,
        bytes: &Bytes,
        metadata: &Metadata,
        config: &Config,
    ) -> Result<Map<String, Value>, CoreError> {
        let handler = self.handlers.get(&kind).ok_or_else(|| {
            CoreError::Protocol(format!(
                "no handler registered for type '{}', supported types are: {}",
                kind.as_str(),
                HandlerKind::ALL.map(HandlerKind::as_str).join(", ")
            ))
        })?;
        handler(bytes, metadata, config)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn base_result(kind: &str, size: usize) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("status".into(), json!("success"));
    map.insert("type".into(), json!(kind));
    map.insert("size".into(), json!(size));
    map
}

fn text_handler(bytes: &Bytes, _metadata: &Metadata, _config: &Config) -> Result<Map<String, Value>, CoreError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| CoreError::Integrity(format!("invalid UTF-8 text payload: {e}")))?;
    debug!(chars = text.chars().count(), "handled text payload");
    Ok(base_result("text", bytes.len()))
}

fn binary_handler(bytes: &Bytes, _metadata: &Metadata, _config: &Config) -> Result<Map<String, Value>, CoreError> {
    let mut result = base_result("binary", bytes.len());
    let digest = md5::compute(bytes.as_ref());
    result.insert("md5".into(), json!(format!("{digest:x}")));
    Ok(result)
}

fn image_handler(bytes: &Bytes, _metadata: &Metadata, _config: &Config) -> Result<Map<String, Value>, CoreError> {
    // Real decoding (format sniffing, dimension extraction) is an external
    // collaborator; this reports only the structural facts the
    // ingestion path itself can vouch for.
    let mut result = base_result("image", bytes.len());
    let digest = md5::compute(bytes.as_ref());
    result.insert("md5".into(), json!(format!("{digest:x}")));
    Ok(result)
}

fn json_handler(bytes: &Bytes, _metadata: &Metadata, _config: &Config) -> Result<Map<String, Value>, CoreError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| CoreError::Integrity(format!("invalid JSON payload: {e}")))?;
    let mut result = base_result("json", bytes.len());
    result.insert("valid".into(), json!(value.is_object() || value.is_array()));
    Ok(result)
}

fn file_handler(bytes: &Bytes, metadata: &Metadata, config: &Config) -> Result<Map<String, Value>, CoreError> {
    let filename = metadata
        .filename
        .as_deref()
        .ok_or_else(|| CoreError::Protocol("file upload is missing X-Filename".into()))?;
    let sanitized = sanitize_filename(filename)?;
    let path = config.upload_dir().join(&sanitized);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, bytes.as_ref())?;
    let mut result = base_result("file", bytes.len());
    result.insert("filename".into(), json!(sanitized));
    Ok(result)
}

/// Rejects path traversal / absolute paths so `uploads/{filename}` never
/// escapes the configured upload directory.
fn sanitize_filename(filename: &str) -> Result<String, CoreError> {
    let path = Path::new(filename);
    if path.is_absolute() || path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(CoreError::Protocol(format!(
            "unsafe filename '{filename}'"
        )));
    }
    Ok(filename.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_scenario_matches_literal_example() {
        let registry = HandlerRegistry::with_defaults();
        let config = Config::default();
        let result = registry
            .dispatch(HandlerKind::Text, &Bytes::from_static(b"hello"), &Metadata::default(), &config)
            .unwrap();
        assert_eq!(result["status"], json!("success"));
        assert_eq!(result["type"], json!("text"));
        assert_eq!(result["size"], json!(5));
    }

    #[test]
    fn binary_scenario_matches_literal_example() {
        let registry = HandlerRegistry::with_defaults();
        let config = Config::default();
        let result = registry
            .dispatch(
                HandlerKind::Binary,
                &Bytes::from_static(&[0x00, 0x01, 0x02]),
                &Metadata::default(),
                &config,
            )
            .unwrap();
        assert_eq!(result["size"], json!(3));
        assert_eq!(result["md5"], json!("5289df737df57326fcdd22597afb1fac"));
    }

    #[test]
    fn file_handler_writes_under_upload_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::builder().upload_dir(dir.path()).build();
        let registry = HandlerRegistry::with_defaults();
        let metadata = Metadata::default().with_filename("v.bin");
        let result = registry
            .dispatch(HandlerKind::File, &Bytes::from_static(b"abc"), &metadata, &config)
            .unwrap();
        assert_eq!(result["filename"], json!("v.bin"));
        assert_eq!(std::fs::read(dir.path().join("v.bin")).unwrap(), b"abc");
    }

    #[test]
    fn file_handler_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::builder().upload_dir(dir.path()).build();
        let registry = HandlerRegistry::with_defaults();
        let metadata = Metadata::default().with_filename("../../etc/passwd");
        let err = registry
            .dispatch(HandlerKind::File, &Bytes::from_static(b"x"), &metadata, &config)
            .unwrap_err();
        assert!(matches!(err, CoreError::Protocol(_)));
    }

    #[test]
    fn unknown_type_lists_supported_kinds() {
        let err = "bogus".parse::<HandlerKind>().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("text"));
        assert!(message.contains("shm"));
    }
}
