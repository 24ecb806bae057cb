// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration for the ingestion router and exchange orchestrator.
//!
//! No environment variables are consumed by the core; a binary that
//! embeds this crate is responsible for turning CLI flags or a config file
//! into a [`Config`].

use std::path::PathBuf;
use std::time::Duration;

use ingest_ipc::status::{DEFAULT_BIDIRECTIONAL_TIMEOUT, DEFAULT_READ_TIMEOUT};

/// Threshold above which the normal upload path reads the body in chunks
/// instead of a single call.
pub const DEFAULT_STREAM_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Chunk size used by both the streamed-to-disk path and the chunked
/// in-memory fallback read.
pub const DEFAULT_IO_CHUNK_SIZE: usize = 8 * 1024;

/// The configured cap on request body size: 16 GiB by default.
pub const DEFAULT_MAX_BODY_SIZE: u64 = 16 * 1024 * 1024 * 1024;

/// Default shared-memory region size when a caller doesn't specify one.
pub const DEFAULT_SHM_SIZE: u32 = 1024 * 1024;

/// Runtime configuration for the ingestion server's core.
#[derive(Debug, Clone)]
pub struct Config {
    upload_dir: PathBuf,
    spool_dir: PathBuf,
    max_body_size: u64,
    stream_threshold: u64,
    io_chunk_size: usize,
    read_timeout: Duration,
    bidirectional_timeout: Duration,
    default_shm_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            upload_dir: PathBuf::from("uploads"),
            spool_dir: std::env::temp_dir(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            stream_threshold: DEFAULT_STREAM_THRESHOLD,
            io_chunk_size: DEFAULT_IO_CHUNK_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            bidirectional_timeout: DEFAULT_BIDIRECTIONAL_TIMEOUT,
            default_shm_size: DEFAULT_SHM_SIZE,
        }
    }
}

impl Config {
    /// Starts a builder pre-populated with every documented default.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn upload_dir(&self) -> &std::path::Path {
        &self.upload_dir
    }

    pub fn spool_dir(&self) -> &std::path::Path {
        &self.spool_dir
    }

    pub fn max_body_size(&self) -> u64 {
        self.max_body_size
    }

    pub fn stream_threshold(&self) -> u64 {
        self.stream_threshold
    }

    pub fn io_chunk_size(&self) -> usize {
        self.io_chunk_size
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn bidirectional_timeout(&self) -> Duration {
        self.bidirectional_timeout
    }

    pub fn default_shm_size(&self) -> u32 {
        self.default_shm_size
    }
}

/// Builder for [`Config`]. Obtain via [`Config::builder`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    upload_dir: Option<PathBuf>,
    spool_dir: Option<PathBuf>,
    max_body_size: Option<u64>,
    stream_threshold: Option<u64>,
    io_chunk_size: Option<usize>,
    read_timeout: Option<Duration>,
    bidirectional_timeout: Option<Duration>,
    default_shm_size: Option<u32>,
}

impl ConfigBuilder {
    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = Some(dir.into());
        self
    }

    pub fn spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spool_dir = Some(dir.into());
        self
    }

    pub fn max_body_size(mut self, bytes: u64) -> Self {
        self.max_body_size = Some(bytes);
        self
    }

    pub fn stream_threshold(mut self, bytes: u64) -> Self {
        self.stream_threshold = Some(bytes);
        self
    }

    pub fn io_chunk_size(mut self, bytes: usize) -> Self {
        self.io_chunk_size = Some(bytes);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn bidirectional_timeout(mut self, timeout: Duration) -> Self {
        self.bidirectional_timeout = Some(timeout);
        self
    }

    pub fn default_shm_size(mut self, bytes: u32) -> Self {
        self.default_shm_size = Some(bytes);
        self
    }

    pub fn build(self) -> Config {
        let defaults = Config::default();
        Config {
            upload_dir: self.upload_dir.unwrap_or(defaults.upload_dir),
            spool_dir: self.spool_dir.unwrap_or(defaults.spool_dir),
            max_body_size: self.max_body_size.unwrap_or(defaults.max_body_size),
            stream_threshold: self.stream_threshold.unwrap_or(defaults.stream_threshold),
            io_chunk_size: self.io_chunk_size.unwrap_or(defaults.io_chunk_size),
            read_timeout: self.read_timeout.unwrap_or(defaults.read_timeout),
            bidirectional_timeout: self
                .bidirectional_timeout
                .unwrap_or(defaults.bidirectional_timeout),
            default_shm_size: self.default_shm_size.unwrap_or(defaults.default_shm_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let config = Config::default();
        assert_eq!(config.max_body_size(), DEFAULT_MAX_BODY_SIZE);
        assert_eq!(config.stream_threshold(), DEFAULT_STREAM_THRESHOLD);
        assert_eq!(config.default_shm_size(), DEFAULT_SHM_SIZE);
    }

    #[test]
    fn builder_overrides_take_effect() {
        let config = Config::builder()
            .max_body_size(42)
            .upload_dir("/tmp/custom-uploads")
            .build();
        assert_eq!(config.max_body_size(), 42);
        assert_eq!(config.upload_dir(), std::path::Path::new("/tmp/custom-uploads"));
        // Unspecified fields keep their defaults.
        assert_eq!(config.stream_threshold(), DEFAULT_STREAM_THRESHOLD);
    }
}
