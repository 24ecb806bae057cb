// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Classifies inbound upload requests and routes them to the session
//! manager, handler registry, or exchange orchestrator.
//!
//! [`IncomingRequest`] and [`HttpResponse`] are the adapter's own small
//! request/response structs: the router depends on these, not on
//! a specific HTTP framework's types. A binary wires a concrete transport
//! (e.g. hyper) on top by translating to/from these two structs.

use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use ingest_ipc::{DataKind, Owner, RegionRegistry, Status, HEADER_SIZE};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::CoreError;
use crate::handler::{HandlerKind, HandlerRegistry};
use crate::metadata::{parse_data_kind, Metadata};
use crate::orchestrator::{default_transform, ExchangeOrchestrator};
use crate::session::{ChunkOutcome, SessionManager};

/// The two methods this surface distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Any source of request-body bytes the router can read in bounded chunks.
/// Blanket-implemented so both a real transport's body and [`BufferedBody`]
/// satisfy it without a wrapper type.
pub trait AsyncBody: AsyncRead + Send + Unpin {}
impl<T: AsyncRead + Send + Unpin> AsyncBody for T {}

/// Wraps an already-fully-received body, for transports (or tests) that
/// hand over a single [`Bytes`] rather than an incremental reader.
pub struct BufferedBody {
    data: Bytes,
    pos: usize,
}

impl BufferedBody {
    pub fn new(data: impl Into<Bytes>) -> Self {
        BufferedBody { data: data.into(), pos: 0 }
    }
}

impl AsyncRead for BufferedBody {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let remaining = &this.data[this.pos..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

/// A framework-agnostic inbound request.
pub struct IncomingRequest {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    /// Header names are expected lower-cased by the adapter that builds this.
    pub headers: HashMap<String, String>,
    pub content_length: Option<u64>,
    pub body: Box<dyn AsyncBody>,
}

/// A framework-agnostic JSON response.
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

impl HttpResponse {
    pub fn json(status: u16, body: Value) -> Self {
        HttpResponse { status, body }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        HttpResponse {
            status,
            body: json!({ "status": "error", "message": message.into() }),
        }
    }

    /// An oversized-body rejection carries extra guidance fields for the caller.
    pub fn from_core_error(err: &CoreError) -> Self {
        if let CoreError::Overflow { actual: _, max } = err {
            return HttpResponse {
                status: 413,
                body: json!({
                    "status": "error",
                    "message": err.to_string(),
                    "max_size": max,
                    "solution": "Add ?mode=chunked and upload in smaller pieces, or use /upload/stream.",
                }),
            };
        }
        HttpResponse::error(err.status_code(), err.to_string())
    }
}

fn status_name(status: Status) -> &'static str {
    match status {
        Status::Idle => "IDLE",
        Status::ClientWriting => "CLIENT_WRITING",
        Status::ServerReading => "SERVER_READING",
        Status::Processing => "PROCESSING",
        Status::ServerWriting => "SERVER_WRITING",
        Status::ClientReading => "CLIENT_READING",
        Status::Ready => "READY",
        Status::Error => "ERROR",
    }
}

fn unique_spool_name() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!(
        "ingest-spool-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Deletes the spool file on drop regardless of how the request completed.
struct SpoolGuard(std::path::PathBuf);

impl Drop for SpoolGuard {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.0) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.0.display(), %err, "failed to remove spool file");
            }
        }
    }
}

/// Reads `body` to completion, rejecting early (before buffering anything)
/// when a declared `content_length` already exceeds the configured maximum.
///
/// A declared length at or under `config.stream_threshold()` is read with a
/// single right-sized buffer; above it (or with no declared length at all)
/// this falls back to a loop of `config.io_chunk_size()`-sized reads, so a
/// large body is never read through one ever-growing allocation.
async fn read_body(
    body: &mut (dyn AsyncBody),
    content_length: Option<u64>,
    config: &Config,
) -> Result<Bytes, CoreError> {
    if let Some(len) = content_length {
        if len > config.max_body_size() {
            return Err(CoreError::Overflow { actual: len, max: config.max_body_size() });
        }
        if len <= config.stream_threshold() {
            let mut buf = vec![0u8; len as usize];
            body.read_exact(&mut buf).await?;
            return Ok(Bytes::from(buf));
        }
    }
    let mut buf = BytesMut::new();
    let mut chunk = vec![0u8; config.io_chunk_size()];
    loop {
        let n = body.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        if buf.len() as u64 + n as u64 > config.max_body_size() {
            return Err(CoreError::Overflow {
                actual: buf.len() as u64 + n as u64,
                max: config.max_body_size(),
            });
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(buf.freeze())
}

/// Spools `body` to a temporary file under `spool_dir` while hashing it
/// incrementally, for the dedicated streaming upload path. Returns the guard (delete the
/// file when dropped), the hex md5 digest, and the total byte count.
async fn spool_and_hash(
    body: &mut (dyn AsyncBody),
    spool_dir: &Path,
    chunk_size: usize,
) -> Result<(SpoolGuard, String, u64), CoreError> {
    let path = spool_dir.join(unique_spool_name());
    let mut file = tokio::fs::File::create(&path).await?;
    let guard = SpoolGuard(path);
    let mut ctx = md5::Context::new();
    let mut chunk = vec![0u8; chunk_size];
    let mut total = 0u64;
    loop {
        let n = body.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        ctx.consume(&chunk[..n]);
        file.write_all(&chunk[..n]).await?;
        total += n as u64;
    }
    file.flush().await?;
    Ok((guard, format!("{:x}", ctx.compute()), total))
}

/// Ties the session manager, handler registry, exchange orchestrator, and
/// region registry together behind the ingestion server's HTTP surface.
pub struct Router {
    registry: Arc<RegionRegistry>,
    sessions: Arc<SessionManager>,
    handlers: Arc<HandlerRegistry>,
    orchestrator: Arc<ExchangeOrchestrator>,
    config: Arc<Config>,
}

impl Router {
    pub fn new(
        registry: Arc<RegionRegistry>,
        sessions: Arc<SessionManager>,
        handlers: Arc<HandlerRegistry>,
        orchestrator: Arc<ExchangeOrchestrator>,
        config: Arc<Config>,
    ) -> Self {
        Router { registry, sessions, handlers, orchestrator, config }
    }

    pub async fn handle(&self, req: IncomingRequest) -> HttpResponse {
        let path = req.path.clone();
        match (req.method, path.as_str()) {
            (Method::Post, "/upload") => self.handle_upload(req).await,
            (Method::Post, "/upload/stream") => self.handle_upload_stream(req).await,
            (Method::Get, p) if p.starts_with("/status/") => {
                self.handle_status(&p["/status/".len()..])
            }
            (Method::Post, "/shm/create") => self.handle_shm_create(req).await,
            (Method::Get, p) if p.starts_with("/shm/status/") => {
                self.handle_shm_status(&p["/shm/status/".len()..])
            }
            (Method::Post, p) if p.starts_with("/shm/write/") => {
                let name = p["/shm/write/".len()..].to_owned();
                self.handle_shm_write(&name, req).await
            }
            (Method::Post, p) if p.starts_with("/shm/ready/") => {
                self.handle_shm_ready(&p["/shm/ready/".len()..])
            }
            (Method::Post, p) if p.starts_with("/shm/close/") => {
                self.handle_shm_close(&p["/shm/close/".len()..])
            }
            (Method::Get, "/shm/list") => self.handle_shm_list(),
            _ => HttpResponse::error(404, format!("no route for {path}")),
        }
    }

    async fn handle_upload(&self, mut req: IncomingRequest) -> HttpResponse {
        let type_param = req.query.get("type").cloned().unwrap_or_else(|| "binary".to_owned());
        if type_param == "shm" {
            return self.handle_shm_operation(req).await;
        }

        let mode = req.query.get("mode").cloned();
        let upload_id = req.headers.get("x-upload-id").cloned();
        if mode.as_deref() == Some("chunked") || upload_id.is_some() {
            return self.handle_chunked(req, &type_param).await;
        }

        let kind = match type_param.parse::<HandlerKind>() {
            Ok(kind) => kind,
            Err(err) => return HttpResponse::from_core_error(&err),
        };
        let body = match read_body(&mut *req.body, req.content_length, &self.config).await {
            Ok(body) => body,
            Err(err) => return HttpResponse::from_core_error(&err),
        };
        let metadata = Metadata::default();
        let metadata = match req.headers.get("x-filename") {
            Some(name) => metadata.with_filename(name.clone()),
            None => metadata,
        };

        match self.handlers.dispatch(kind, &body, &metadata, &self.config) {
            Ok(mut result) => {
                result.insert("upload_mode".into(), json!("normal"));
                HttpResponse::json(200, Value::Object(result))
            }
            Err(err) => HttpResponse::from_core_error(&err),
        }
    }

    async fn handle_upload_stream(&self, mut req: IncomingRequest) -> HttpResponse {
        let type_param = req.query.get("type").cloned().unwrap_or_else(|| "binary".to_owned());
        let kind = match type_param.parse::<HandlerKind>() {
            Ok(kind) => kind,
            Err(err) => return HttpResponse::from_core_error(&err),
        };

        let (_guard, digest, total) = match spool_and_hash(
            &mut *req.body,
            self.config.spool_dir(),
            self.config.io_chunk_size(),
        )
        .await
        {
            Ok(v) => v,
            Err(err) => return HttpResponse::from_core_error(&err),
        };
        let spooled = match tokio::fs::read(&_guard.0).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => return HttpResponse::from_core_error(&CoreError::from(err)),
        };

        let metadata = Metadata::default();
        let metadata = match req.headers.get("x-filename") {
            Some(name) => metadata.with_filename(name.clone()),
            None => metadata,
        };

        match self.handlers.dispatch(kind, &spooled, &metadata, &self.config) {
            Ok(mut result) => {
                result.insert("upload_mode".into(), json!("stream"));
                result.insert("total_size".into(), json!(total));
                result.insert("md5".into(), json!(digest));
                HttpResponse::json(200, Value::Object(result))
            }
            Err(err) => HttpResponse::from_core_error(&err),
        }
        // `_guard` drops here on every path, removing the spool file.
    }

    async fn handle_chunked(&self, mut req: IncomingRequest, type_param: &str) -> HttpResponse {
        let upload_id = match req.headers.get("x-upload-id") {
            Some(id) => id.clone(),
            None => return HttpResponse::error(400, "missing X-Upload-ID for a chunked upload"),
        };
        let total_chunks: u32 = match req.headers.get("x-total-chunks").and_then(|v| v.parse().ok()) {
            Some(v) => v,
            None => return HttpResponse::error(400, "missing or invalid X-Total-Chunks"),
        };
        let chunk_index: u32 = match req.headers.get("x-chunk-index").and_then(|v| v.parse().ok()) {
            Some(v) => v,
            None => return HttpResponse::error(400, "missing or invalid X-Chunk-Index"),
        };
        let (_, data_type) = parse_data_kind(type_param);

        let mut metadata = Metadata::default().with_upload_id(upload_id.clone());
        if let Some(filename) = req.headers.get("x-filename") {
            metadata = metadata.with_filename(filename.clone());
        }

        let body = match read_body(&mut *req.body, req.content_length, &self.config).await {
            Ok(body) => body,
            Err(err) => return HttpResponse::from_core_error(&err),
        };

        debug!(upload_id, chunk_index, total_chunks, "routing chunk to session manager");
        match self
            .sessions
            .record_chunk(&upload_id, chunk_index, total_chunks, data_type, metadata, body)
        {
            Ok(ChunkOutcome::Progress { received, total }) => HttpResponse::json(
                200,
                json!({ "status": "chunk_received", "received_chunks": received, "total_chunks": total }),
            ),
            Ok(ChunkOutcome::Complete { bytes, data_type, metadata }) => {
                let kind = data_type.parse::<HandlerKind>().unwrap_or(HandlerKind::Binary);
                match self.handlers.dispatch(kind, &bytes, &metadata, &self.config) {
                    Ok(mut result) => {
                        result.insert("upload_mode".into(), json!("chunked"));
                        HttpResponse::json(200, Value::Object(result))
                    }
                    Err(err) => HttpResponse::from_core_error(&err),
                }
            }
            Err(err) => HttpResponse::from_core_error(&err),
        }
    }

    async fn handle_shm_operation(&self, mut req: IncomingRequest) -> HttpResponse {
        let shm_name = match req.query.get("shm_name") {
            Some(name) => name.clone(),
            None => return HttpResponse::error(400, "missing shm_name"),
        };
        let operation = req.query.get("operation").cloned().unwrap_or_else(|| "read".to_owned());

        match operation.as_str() {
            "read" => {
                let metadata = Metadata::default().with_shm_name(shm_name.clone());
                match self.orchestrator.read_from_client(&shm_name, &metadata).await {
                    Ok(result) => HttpResponse::json(200, Value::Object(result)),
                    Err(err) => HttpResponse::from_core_error(&err),
                }
            }
            "write" => {
                let size = req.query.get("size").and_then(|v| v.parse().ok());
                let body = match read_body(&mut *req.body, req.content_length, &self.config).await {
                    Ok(body) => Some(body),
                    Err(err) => return HttpResponse::from_core_error(&err),
                };
                match self.orchestrator.write_to_client(&shm_name, size, body.as_ref()) {
                    Ok(result) => HttpResponse::json(200, Value::Object(result)),
                    Err(err) => HttpResponse::from_core_error(&err),
                }
            }
            "bidirectional" => match self.orchestrator.bidirectional(&shm_name, default_transform).await {
                Ok(result) => HttpResponse::json(200, Value::Object(result)),
                Err(err) => HttpResponse::from_core_error(&err),
            },
            other => HttpResponse::error(400, format!("unknown shm operation '{other}'")),
        }
    }

    fn handle_status(&self, upload_id: &str) -> HttpResponse {
        match self.sessions.progress(upload_id) {
            Some(progress) => HttpResponse::json(
                200,
                json!({
                    "received_chunks": progress.received_chunks,
                    "total_chunks": progress.total_chunks,
                    "missing_chunks": progress.missing_chunks,
                    "type": progress.data_type,
                }),
            ),
            None => HttpResponse::error(404, format!("no upload in progress for '{upload_id}'")),
        }
    }

    async fn handle_shm_create(&self, mut req: IncomingRequest) -> HttpResponse {
        let body = match read_body(&mut *req.body, req.content_length, &self.config).await {
            Ok(body) => body,
            Err(err) => return HttpResponse::from_core_error(&err),
        };
        let payload: Value = match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(err) => return HttpResponse::error(400, format!("invalid JSON body: {err}")),
        };
        let name = match payload.get("name").and_then(Value::as_str) {
            Some(name) => name.to_owned(),
            None => return HttpResponse::error(400, "missing 'name'"),
        };
        let size = payload
            .get("size")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or_else(|| self.config.default_shm_size());

        match self.registry.create(&name, size, DataKind::Binary.as_u32(), false) {
            Ok(region) => {
                if let Err(err) = region.set_status(Status::ServerWriting.as_u32()) {
                    return HttpResponse::from_core_error(&CoreError::from(err));
                }
                let total_size = HEADER_SIZE as u64 + size as u64;
                HttpResponse::json(
                    200,
                    json!({ "shm_name": name, "size": size, "total_size": total_size, "state": "SERVER_WRITING" }),
                )
            }
            Err(err) => HttpResponse::from_core_error(&CoreError::from(err)),
        }
    }

    fn handle_shm_status(&self, name: &str) -> HttpResponse {
        let region = match self.registry.get(name) {
            Some(region) => region,
            None => return HttpResponse::error(404, format!("no such region '{name}'")),
        };
        match region.read_header() {
            Ok(header) => HttpResponse::json(
                200,
                json!({
                    "state": status_name(Status::from(header.status)),
                    "data_size": header.data_size,
                    "buffer_size": header.buffer_size,
                    "timestamp": header.timestamp,
                }),
            ),
            Err(err) => HttpResponse::from_core_error(&CoreError::from(err)),
        }
    }

    async fn handle_shm_write(&self, name: &str, mut req: IncomingRequest) -> HttpResponse {
        let region = match self.registry.get(name) {
            Some(region) => region,
            None => return HttpResponse::error(404, format!("no such region '{name}'")),
        };
        let body = match read_body(&mut *req.body, req.content_length, &self.config).await {
            Ok(body) => body,
            Err(err) => return HttpResponse::from_core_error(&err),
        };
        match region.write_data(0, &body) {
            Ok(()) => HttpResponse::json(200, json!({ "bytes_written": body.len() })),
            Err(err) => HttpResponse::from_core_error(&CoreError::from(err)),
        }
    }

    fn handle_shm_ready(&self, name: &str) -> HttpResponse {
        let region = match self.registry.get(name) {
            Some(region) => region,
            None => return HttpResponse::error(404, format!("no such region '{name}'")),
        };
        match region.set_status(Status::Ready.as_u32()) {
            Ok(()) => HttpResponse::json(200, json!({ "state": "READY" })),
            Err(err) => HttpResponse::from_core_error(&CoreError::from(err)),
        }
    }

    fn handle_shm_close(&self, name: &str) -> HttpResponse {
        if self.registry.get(name).is_none() {
            return HttpResponse::error(404, format!("no such region '{name}'"));
        }
        self.registry.close(name);
        HttpResponse::json(200, json!({ "shm_name": name, "status": "closed" }))
    }

    fn handle_shm_list(&self) -> HttpResponse {
        let mut map = Map::new();
        for (name, header, access_count, created_at, owner) in self.registry.list() {
            map.insert(
                name,
                json!({
                    "state": status_name(Status::from(header.status)),
                    "data_size": header.data_size,
                    "buffer_size": header.buffer_size,
                    "access_count": access_count,
                    "created_at": created_at,
                    "owner": match owner {
                        Owner::Server => "server",
                        Owner::Client => "client",
                    },
                }),
            );
        }
        HttpResponse::json(200, Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerRegistry;
    use std::time::Duration;

    fn router_with(config: Config) -> Router {
        let registry = Arc::new(RegionRegistry::new());
        let sessions = Arc::new(SessionManager::new());
        let handlers = Arc::new(HandlerRegistry::with_defaults());
        let config = Arc::new(config);
        let orchestrator = Arc::new(ExchangeOrchestrator::new(registry.clone(), handlers.clone(), config.clone()));
        Router::new(registry, sessions, handlers, orchestrator, config)
    }

    fn get(path: &str) -> IncomingRequest {
        IncomingRequest {
            method: Method::Get,
            path: path.to_owned(),
            query: HashMap::new(),
            headers: HashMap::new(),
            content_length: None,
            body: Box::new(BufferedBody::new(Bytes::new())),
        }
    }

    fn post(path: &str, query: &[(&str, &str)], headers: &[(&str, &str)], body: &[u8]) -> IncomingRequest {
        IncomingRequest {
            method: Method::Post,
            path: path.to_owned(),
            query: query.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            headers: headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            content_length: Some(body.len() as u64),
            body: Box::new(BufferedBody::new(Bytes::copy_from_slice(body))),
        }
    }

    /// A body that records the largest buffer capacity any single
    /// `poll_read` call was offered, to observe whether `read_body` handed
    /// it one right-sized buffer or a sequence of `io_chunk_size` ones.
    struct RecordingBody {
        data: Bytes,
        pos: usize,
        max_requested: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl AsyncRead for RecordingBody {
        fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
            let this = self.get_mut();
            this.max_requested.fetch_max(buf.remaining(), Ordering::Relaxed);
            let remaining = &this.data[this.pos..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            this.pos += n;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn read_body_reads_small_bodies_in_one_right_sized_call() {
        let config = Config::builder().stream_threshold(16).io_chunk_size(4).max_body_size(1024).build();
        let max_requested = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut body = RecordingBody { data: Bytes::from_static(&[1u8; 10]), pos: 0, max_requested: max_requested.clone() };
        let bytes = read_body(&mut body, Some(10), &config).await.unwrap();
        assert_eq!(bytes.len(), 10);
        assert_eq!(max_requested.load(Ordering::Relaxed), 10);
    }

    #[tokio::test]
    async fn read_body_chunks_bodies_above_stream_threshold() {
        let config = Config::builder().stream_threshold(16).io_chunk_size(4).max_body_size(1024).build();
        let max_requested = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut body = RecordingBody { data: Bytes::from_static(&[2u8; 20]), pos: 0, max_requested: max_requested.clone() };
        let bytes = read_body(&mut body, Some(20), &config).await.unwrap();
        assert_eq!(bytes.len(), 20);
        assert!(
            max_requested.load(Ordering::Relaxed) <= 4,
            "bodies above the stream threshold must be read in io_chunk_size pieces, never in one growing buffer"
        );
    }

    #[tokio::test]
    async fn text_upload_matches_literal_scenario() {
        let router = router_with(Config::default());
        let resp = router.handle(post("/upload", &[("type", "text")], &[], b"hello")).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["status"], json!("success"));
        assert_eq!(resp.body["type"], json!("text"));
        assert_eq!(resp.body["size"], json!(5));
        assert_eq!(resp.body["upload_mode"], json!("normal"));
    }

    #[tokio::test]
    async fn binary_upload_matches_literal_scenario() {
        let router = router_with(Config::default());
        let resp = router
            .handle(post("/upload", &[("type", "binary")], &[], &[0x00, 0x01, 0x02]))
            .await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["md5"], json!("5289df737df57326fcdd22597afb1fac"));
        assert_eq!(resp.body["upload_mode"], json!("normal"));
    }

    #[tokio::test]
    async fn chunked_upload_reassembles_and_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with(Config::builder().upload_dir(dir.path()).build());
        let headers_for = |idx: &str| {
            vec![
                ("x-upload-id", "u1"),
                ("x-total-chunks", "3"),
                ("x-chunk-index", idx),
                ("x-filename", "v.bin"),
            ]
        };

        let r1 = router
            .handle(post("/upload", &[("mode", "chunked"), ("type", "file")], &headers_for("2"), b"c"))
            .await;
        assert_eq!(r1.body["status"], json!("chunk_received"));

        let r2 = router
            .handle(post("/upload", &[("mode", "chunked"), ("type", "file")], &headers_for("0"), b"a"))
            .await;
        assert_eq!(r2.body["status"], json!("chunk_received"));

        let r3 = router
            .handle(post("/upload", &[("mode", "chunked"), ("type", "file")], &headers_for("1"), b"b"))
            .await;
        assert_eq!(r3.status, 200);
        assert_eq!(r3.body["filename"], json!("v.bin"));
        assert_eq!(std::fs::read(dir.path().join("v.bin")).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn shm_lifecycle_matches_literal_scenario() {
        let router = router_with(Config::default());

        let created = router
            .handle(post("/shm/create", &[], &[], br#"{"name":"r1","size":1024}"#))
            .await;
        assert_eq!(created.body["state"], json!("SERVER_WRITING"));
        assert_eq!(created.body["total_size"], json!(1088));

        let written = router.handle(post("/shm/write/r1", &[], &[], b"XYZ")).await;
        assert_eq!(written.body["bytes_written"], json!(3));

        let ready = router.handle(post("/shm/ready/r1", &[], &[], b"")).await;
        assert_eq!(ready.body["state"], json!("READY"));

        let status = router.handle(get("/shm/status/r1")).await;
        assert_eq!(status.body["state"], json!("READY"));
        assert_eq!(status.body["data_size"], json!(3));
        assert_eq!(status.body["buffer_size"], json!(1024));

        router.handle(post("/shm/close/r1", &[], &[], b"")).await;
        let after_close = router.handle(get("/shm/status/r1")).await;
        assert_eq!(after_close.status, 404);
    }

    #[tokio::test]
    async fn oversized_body_returns_413_with_guidance() {
        let router = router_with(Config::builder().max_body_size(16).build());
        let resp = router.handle(post("/upload", &[("type", "binary")], &[], &[0u8; 32])).await;
        assert_eq!(resp.status, 413);
        assert_eq!(resp.body["max_size"], json!(16));
        assert!(resp.body["solution"].as_str().unwrap().contains("mode=chunked"));
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let router = router_with(Config::default());
        let resp = router.handle(get("/nonexistent")).await;
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn upload_stream_reports_md5_and_total_size() {
        let router = router_with(Config::default());
        let resp = router
            .handle(post("/upload/stream", &[("type", "binary")], &[], &[0x00, 0x01, 0x02]))
            .await;
        assert_eq!(resp.body["upload_mode"], json!("stream"));
        assert_eq!(resp.body["total_size"], json!(3));
        assert_eq!(resp.body["md5"], json!("5289df737df57326fcdd22597afb1fac"));
    }

    #[tokio::test]
    async fn status_for_unknown_upload_is_404() {
        let router = router_with(Config::default());
        let resp = router.handle(get("/status/missing")).await;
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn shm_bidirectional_matches_literal_scenario() {
        let router = router_with(Config::default());
        let region = router.registry.create("r2", 4096, 0, false).unwrap();
        region.write_data(0, b"Q").unwrap();
        region.set_status(Status::ClientWriting.as_u32()).unwrap();

        let resp = router
            .handle(post(
                "/upload",
                &[("type", "shm"), ("shm_name", "r2"), ("operation", "bidirectional")],
                &[],
                b"",
            ))
            .await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["input_size"], json!(1));
        assert!(resp.body["output_size"].as_u64().unwrap() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shm_read_operation_times_out_cleanly() {
        let router = router_with(Config::builder().read_timeout(Duration::from_millis(20)).build());
        router.registry.create("r-timeout", 16, 0, false).unwrap();
        let resp = router
            .handle(post("/upload", &[("type", "shm"), ("shm_name", "r-timeout"), ("operation", "read")], &[], b""))
            .await;
        assert_eq!(resp.status, 504);
    }
}
