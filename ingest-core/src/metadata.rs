// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The metadata record passed alongside bytes to every handler.

use ingest_ipc::DataKind;

/// Request-derived context a handler needs beyond the raw bytes.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub filename: Option<String>,
    pub upload_id: Option<String>,
    pub shm_name: Option<String>,
    /// The region size requested for a shm write/bidirectional overflow region.
    pub shm_size: Option<u32>,
}

impl Metadata {
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_upload_id(mut self, upload_id: impl Into<String>) -> Self {
        self.upload_id = Some(upload_id.into());
        self
    }

    pub fn with_shm_name(mut self, shm_name: impl Into<String>) -> Self {
        self.shm_name = Some(shm_name.into());
        self
    }
}

/// Parses the `type=<kind>` query parameter into a [`DataKind`] plus the raw
/// kind name a handler result should echo back.
pub fn parse_data_kind(type_param: &str) -> (DataKind, &'static str) {
    match type_param {
        "text" => (DataKind::Text, "text"),
        "image" => (DataKind::Image, "image"),
        "json" => (DataKind::Json, "json"),
        "file" => (DataKind::Binary, "file"),
        _ => (DataKind::Binary, "binary"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_param_keeps_its_own_kind_name() {
        let (kind, name) = parse_data_kind("file");
        assert_eq!(kind, DataKind::Binary);
        assert_eq!(name, "file");
    }
}
