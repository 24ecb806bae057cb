// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory bookkeeping for chunked uploads, keyed by upload_id.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use bytes::Bytes;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::metadata::Metadata;

/// A single chunked upload in progress.
pub struct Session {
    pub total_chunks: u32,
    pub data_type: &'static str,
    pub metadata: Metadata,
    chunks: BTreeMap<u32, Bytes>,
}

impl Session {
    fn new(total_chunks: u32, data_type: &'static str, metadata: Metadata) -> Self {
        Session {
            total_chunks,
            data_type,
            metadata,
            chunks: BTreeMap::new(),
        }
    }

    fn missing(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.chunks.contains_key(i))
            .collect()
    }

    /// Concatenates chunks `0..total_chunks` in index order.
    ///
    /// # Panics
    /// Only called once `self.chunks.len() == self.total_chunks as usize`.
    fn reassemble(&self) -> Bytes {
        let mut buf = Vec::new();
        for i in 0..self.total_chunks {
            buf.extend_from_slice(&self.chunks[&i]);
        }
        Bytes::from(buf)
    }
}

/// Outcome of delivering one chunk.
pub enum ChunkOutcome {
    /// Not all chunks have arrived yet.
    Progress { received: u32, total: u32 },
    /// The last chunk arrived; the session is complete and removed.
    Complete {
        bytes: Bytes,
        data_type: &'static str,
        metadata: Metadata,
    },
}

/// A snapshot of an in-progress upload's completeness, backing
/// `GET /status/{upload_id}`.
pub struct SessionProgress {
    pub received_chunks: u32,
    pub total_chunks: u32,
    pub missing_chunks: Vec<u32>,
    pub data_type: &'static str,
}

/// Owns every in-progress chunked upload.
///
/// Upload state is reshaped into one [`Session`] struct per upload_id rather
/// than a map of maps. A single coarse mutex guards the outer map; chunk
/// insertion for *different* upload_ids therefore never blocks each other
/// for longer than the map operation itself.
#[derive(Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one chunk of an upload, creating the session on first sight.
    ///
    /// `chunk_index` must lie in `[0, total_chunks)`; violations are
    /// reported, not silently dropped.
    pub fn record_chunk(
        &self,
        upload_id: &str,
        chunk_index: u32,
        total_chunks: u32,
        data_type: &'static str,
        metadata: Metadata,
        bytes: Bytes,
    ) -> Result<ChunkOutcome, CoreError> {
        if chunk_index >= total_chunks {
            return Err(CoreError::Protocol(format!(
                "chunk_index {chunk_index} out of range for total_chunks {total_chunks}"
            )));
        }

        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let session = sessions
            .entry(upload_id.to_owned())
            .or_insert_with(|| Session::new(total_chunks, data_type, metadata));
        session.chunks.insert(chunk_index, bytes);

        let received = session.chunks.len() as u32;
        if received == session.total_chunks {
            let reassembled = session.reassemble();
            let session = sessions.remove(upload_id).expect("just inserted above");
            info!(upload_id, total_chunks, "chunked upload complete");
            return Ok(ChunkOutcome::Complete {
                bytes: reassembled,
                data_type: session.data_type,
                metadata: session.metadata,
            });
        }

        debug!(upload_id, received, total_chunks, "chunk received");
        Ok(ChunkOutcome::Progress {
            received,
            total: session.total_chunks,
        })
    }

    /// Backs `GET /status/{upload_id}`; `None` means no such session (404).
    pub fn progress(&self, upload_id: &str) -> Option<SessionProgress> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let session = sessions.get(upload_id)?;
        Some(SessionProgress {
            received_chunks: session.chunks.len() as u32,
            total_chunks: session.total_chunks,
            missing_chunks: session.missing(),
            data_type: session.data_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_order_chunks_reassemble_in_index_order() {
        let manager = SessionManager::new();
        let meta = Metadata::default().with_filename("v.bin");

        let progress = |outcome: ChunkOutcome| match outcome {
            ChunkOutcome::Progress { .. } => None,
            ChunkOutcome::Complete { bytes, .. } => Some(bytes),
        };

        let r1 = manager
            .record_chunk("u1", 2, 3, "file", meta.clone(), Bytes::from_static(b"c"))
            .unwrap();
        assert!(progress(r1).is_none());
        let r2 = manager
            .record_chunk("u1", 0, 3, "file", meta.clone(), Bytes::from_static(b"a"))
            .unwrap();
        assert!(progress(r2).is_none());
        let r3 = manager
            .record_chunk("u1", 1, 3, "file", meta, Bytes::from_static(b"b"))
            .unwrap();
        let reassembled = progress(r3).unwrap();
        assert_eq!(&reassembled[..], b"abc");
    }

    #[test]
    fn interleaved_upload_ids_stay_independent() {
        let manager = SessionManager::new();
        let meta = Metadata::default();

        manager
            .record_chunk("a", 0, 2, "binary", meta.clone(), Bytes::from_static(b"A0"))
            .unwrap();
        manager
            .record_chunk("b", 0, 2, "binary", meta.clone(), Bytes::from_static(b"B0"))
            .unwrap();
        let a_done = manager
            .record_chunk("a", 1, 2, "binary", meta.clone(), Bytes::from_static(b"A1"))
            .unwrap();
        match a_done {
            ChunkOutcome::Complete { bytes, .. } => assert_eq!(&bytes[..], b"A0A1"),
            _ => panic!("expected completion"),
        }
        // `b` must still be tracked independently.
        let progress = manager.progress("b").unwrap();
        assert_eq!(progress.received_chunks, 1);
        assert_eq!(progress.missing_chunks, vec![1]);
    }

    #[test]
    fn out_of_range_chunk_index_is_rejected() {
        let manager = SessionManager::new();
        let err = manager
            .record_chunk("u2", 5, 3, "binary", Metadata::default(), Bytes::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::Protocol(_)));
    }

    #[test]
    fn unknown_upload_id_has_no_progress() {
        let manager = SessionManager::new();
        assert!(manager.progress("missing").is_none());
    }
}
